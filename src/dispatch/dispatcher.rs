//! Outbound message dispatcher: rate limiting, retry, and idempotence.
//!
//! The dispatcher sits between the engine and the [`ChannelTransport`]. It
//! enforces a per-contact rate ceiling by queuing (never dropping) excess
//! sends, retries transient failures with jittered exponential backoff up to
//! a fixed attempt count, and suppresses duplicate sends of the same logical
//! message id so a crash-retried turn does not double-message the contact.
//!
//! Timing uses `tokio::time`, so tests run under a paused clock.

use std::collections::VecDeque;
use std::sync::Arc;

use miette::Diagnostic;
use rand::Rng;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::message::OutboundMessage;

use super::transport::{ChannelTransport, DeliveryResult, TransportError};

/// Errors surfaced to the caller after the dispatcher gives up.
#[derive(Debug, Error, Diagnostic)]
pub enum DispatchError {
    /// The transport reported a non-retryable failure.
    #[error("permanent delivery failure for {message_id}: {reason}")]
    #[diagnostic(code(chatflow::dispatch::permanent))]
    Permanent { message_id: String, reason: String },

    /// Transient failures persisted through every allowed attempt.
    #[error("delivery of {message_id} failed after {attempts} attempts: {reason}")]
    #[diagnostic(
        code(chatflow::dispatch::exhausted),
        help("the message was not delivered; the turn may be retried under the same id")
    )]
    ExhaustedRetries {
        message_id: String,
        attempts: u32,
        reason: String,
    },
}

/// Dispatcher knobs. Per-flow settings may override the rate ceiling.
#[derive(Clone, Copy, Debug)]
pub struct DispatchConfig {
    /// Per-contact outbound ceiling, messages per minute.
    pub rate_ceiling_per_minute: u32,
    /// Total delivery attempts per message (first try included).
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles each retry.
    pub base_backoff_ms: u64,
    /// Upper bound on a single backoff interval.
    pub max_backoff_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rate_ceiling_per_minute: 20,
            max_attempts: 4,
            base_backoff_ms: 250,
            max_backoff_ms: 10_000,
        }
    }
}

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Rate-limited, retrying, idempotent sender over a [`ChannelTransport`].
pub struct MessageDispatcher {
    transport: Arc<dyn ChannelTransport>,
    config: DispatchConfig,
    delivered: Mutex<FxHashSet<String>>,
    windows: Mutex<FxHashMap<String, VecDeque<Instant>>>,
}

impl MessageDispatcher {
    #[must_use]
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        Self::with_config(transport, DispatchConfig::default())
    }

    #[must_use]
    pub fn with_config(transport: Arc<dyn ChannelTransport>, config: DispatchConfig) -> Self {
        Self {
            transport,
            config,
            delivered: Mutex::new(FxHashSet::default()),
            windows: Mutex::new(FxHashMap::default()),
        }
    }

    /// Send one message, honoring the rate ceiling and retry policy.
    ///
    /// `rate_ceiling` overrides the configured per-contact ceiling when set
    /// (flows can tighten or relax their own pacing).
    #[instrument(skip(self, message), fields(message_id = %message.id))]
    pub async fn send(
        &self,
        contact_key: &str,
        message: &OutboundMessage,
        rate_ceiling: Option<u32>,
    ) -> Result<DeliveryResult, DispatchError> {
        if self.delivered.lock().await.contains(&message.id) {
            debug!(message_id = %message.id, "duplicate send suppressed");
            return Ok(DeliveryResult::Duplicate);
        }

        let ceiling = rate_ceiling.unwrap_or(self.config.rate_ceiling_per_minute);
        self.wait_for_slot(contact_key, ceiling).await;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.transport.deliver(contact_key, message).await {
                Ok(()) => {
                    self.delivered.lock().await.insert(message.id.clone());
                    self.record_send(contact_key).await;
                    return Ok(DeliveryResult::Delivered { attempts: attempt });
                }
                Err(TransportError::Permanent { message: reason }) => {
                    warn!(message_id = %message.id, %reason, "permanent delivery failure");
                    return Err(DispatchError::Permanent {
                        message_id: message.id.clone(),
                        reason,
                    });
                }
                Err(TransportError::Transient { message: reason }) => {
                    if attempt >= self.config.max_attempts {
                        warn!(message_id = %message.id, attempt, %reason, "retries exhausted");
                        return Err(DispatchError::ExhaustedRetries {
                            message_id: message.id.clone(),
                            attempts: attempt,
                            reason,
                        });
                    }
                    let backoff = self.backoff(attempt);
                    debug!(message_id = %message.id, attempt, backoff_ms = backoff.as_millis() as u64, "transient failure, backing off");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Send a turn's messages in order. Stops at the first failure so the
    /// caller can decide whether to retry the turn under the same ids.
    pub async fn send_all(
        &self,
        contact_key: &str,
        messages: &[OutboundMessage],
        rate_ceiling: Option<u32>,
    ) -> Result<Vec<DeliveryResult>, DispatchError> {
        let mut results = Vec::with_capacity(messages.len());
        for message in messages {
            results.push(self.send(contact_key, message, rate_ceiling).await?);
        }
        Ok(results)
    }

    /// Exponential backoff with jitter: `base * 2^(attempt-1)` capped at the
    /// maximum, plus up to half of itself in random jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .base_backoff_ms
            .saturating_mul(1_u64 << (attempt - 1).min(16))
            .min(self.config.max_backoff_ms);
        let jitter = rand::rng().random_range(0..=exp / 2);
        Duration::from_millis(exp + jitter)
    }

    /// Block until the contact's sliding window has room for one more send.
    async fn wait_for_slot(&self, contact_key: &str, ceiling: u32) {
        if ceiling == 0 {
            return;
        }
        loop {
            let wait = {
                let mut windows = self.windows.lock().await;
                let window = windows.entry(contact_key.to_string()).or_default();
                let now = Instant::now();
                while window
                    .front()
                    .is_some_and(|&sent| now.duration_since(sent) >= RATE_WINDOW)
                {
                    window.pop_front();
                }
                if (window.len() as u32) < ceiling {
                    None
                } else {
                    // Oldest send ages out of the window first.
                    window
                        .front()
                        .map(|&sent| RATE_WINDOW.saturating_sub(now.duration_since(sent)))
                }
            };
            match wait {
                None => return,
                Some(delay) => {
                    debug!(contact_key, delay_ms = delay.as_millis() as u64, "rate ceiling reached, queuing send");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn record_send(&self, contact_key: &str) {
        let mut windows = self.windows.lock().await;
        windows
            .entry(contact_key.to_string())
            .or_default()
            .push_back(Instant::now());
    }

    /// Forget delivered ids for a contact prefix. Called when a conversation
    /// closes so the set does not grow without bound.
    pub async fn forget_delivered(&self, id_prefix: &str) {
        self.delivered
            .lock()
            .await
            .retain(|id| !id.starts_with(id_prefix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailNTimes {
        failures: AtomicU32,
        delivered: Mutex<Vec<String>>,
    }

    impl FailNTimes {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChannelTransport for FailNTimes {
        async fn deliver(
            &self,
            _contact_key: &str,
            message: &OutboundMessage,
        ) -> Result<(), TransportError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TransportError::Transient {
                    message: "socket reset".into(),
                });
            }
            self.delivered.lock().await.push(message.id.clone());
            Ok(())
        }
    }

    struct RejectAll;

    #[async_trait]
    impl ChannelTransport for RejectAll {
        async fn deliver(
            &self,
            _contact_key: &str,
            _message: &OutboundMessage,
        ) -> Result<(), TransportError> {
            Err(TransportError::Permanent {
                message: "invalid recipient".into(),
            })
        }
    }

    fn msg(id: &str) -> OutboundMessage {
        OutboundMessage::new(id, MessageKind::Text, "hello")
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let transport = Arc::new(FailNTimes::new(2));
        let dispatcher = MessageDispatcher::new(transport.clone());

        let result = dispatcher.send("c1", &msg("m1"), None).await.unwrap();
        assert_eq!(result, DeliveryResult::Delivered { attempts: 3 });
        assert_eq!(transport.delivered.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_retries_then_fails() {
        let transport = Arc::new(FailNTimes::new(100));
        let dispatcher = MessageDispatcher::with_config(
            transport,
            DispatchConfig {
                max_attempts: 3,
                ..DispatchConfig::default()
            },
        );

        let err = dispatcher.send("c1", &msg("m1"), None).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::ExhaustedRetries { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let dispatcher = MessageDispatcher::new(Arc::new(RejectAll));
        let err = dispatcher.send("c1", &msg("m1"), None).await.unwrap_err();
        assert!(matches!(err, DispatchError::Permanent { .. }));
    }

    #[tokio::test]
    async fn duplicate_ids_are_suppressed() {
        let transport = Arc::new(FailNTimes::new(0));
        let dispatcher = MessageDispatcher::new(transport.clone());

        let first = dispatcher.send("c1", &msg("m1"), None).await.unwrap();
        assert_eq!(first, DeliveryResult::Delivered { attempts: 1 });
        let second = dispatcher.send("c1", &msg("m1"), None).await.unwrap();
        assert_eq!(second, DeliveryResult::Duplicate);
        assert_eq!(transport.delivered.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_ceiling_queues_rather_than_drops() {
        let transport = Arc::new(FailNTimes::new(0));
        let dispatcher = MessageDispatcher::with_config(
            transport.clone(),
            DispatchConfig {
                rate_ceiling_per_minute: 2,
                ..DispatchConfig::default()
            },
        );

        let started = Instant::now();
        for i in 0..3 {
            dispatcher
                .send("c1", &msg(&format!("m{i}")), None)
                .await
                .unwrap();
        }
        // The third send had to wait for the window to free up.
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(transport.delivered.lock().await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_windows_are_per_contact() {
        let transport = Arc::new(FailNTimes::new(0));
        let dispatcher = MessageDispatcher::with_config(
            transport.clone(),
            DispatchConfig {
                rate_ceiling_per_minute: 1,
                ..DispatchConfig::default()
            },
        );

        let started = Instant::now();
        dispatcher.send("a", &msg("m1"), None).await.unwrap();
        dispatcher.send("b", &msg("m2"), None).await.unwrap();
        // Different contacts never queue behind each other.
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn send_all_preserves_order_and_stops_on_failure() {
        let transport = Arc::new(FailNTimes::new(0));
        let dispatcher = MessageDispatcher::new(transport.clone());
        let batch = vec![msg("m1"), msg("m2")];

        let results = dispatcher.send_all("c1", &batch, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(
            transport.delivered.lock().await.as_slice(),
            ["m1".to_string(), "m2".to_string()]
        );
    }

    #[tokio::test]
    async fn forget_delivered_allows_resend() {
        let transport = Arc::new(FailNTimes::new(0));
        let dispatcher = MessageDispatcher::new(transport.clone());
        dispatcher.send("c1", &msg("k#1.0"), None).await.unwrap();
        dispatcher.forget_delivered("k#").await;

        let again = dispatcher.send("c1", &msg("k#1.0"), None).await.unwrap();
        assert_eq!(again, DeliveryResult::Delivered { attempts: 1 });
    }
}
