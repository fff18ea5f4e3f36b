//! Background reclamation of stale conversations.
//!
//! The sweeper runs on a fixed interval. For each active state approaching
//! its session expiry it first sends at most one pre-expiry warning (when the
//! flow configures a threshold); a warned state that passes its expiry is
//! then closed, its expiration message emitted, and the contact optionally
//! redirected into a follow-up flow. A state found already expired before
//! any warning still gets the warning first and is expired on a later pass.
//!
//! Every mutation happens under the same per-key lock as the inbound path,
//! so a sweep racing an in-flight turn serializes instead of interleaving.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use tracing::{info, instrument, warn};

use crate::dispatch::MessageDispatcher;
use crate::engine::FlowProvider;
use crate::event_bus::{ConversationEvent, ConversationEventKind};
use crate::message::{MessageKind, OutboundMessage};
use crate::state::{ConversationState, StateManager};
use crate::types::{CloseReason, ConversationKey};

use super::runner::{FlowRunner, RuntimeError};

const DEFAULT_WARNING_TEXT: &str = "This conversation will expire soon due to inactivity.";

/// What one sweep pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub warned: usize,
    pub expired: usize,
}

/// Periodic scanner that warns and then expires inactive conversations.
pub struct ExpirySweeper {
    states: Arc<StateManager>,
    flows: Arc<dyn FlowProvider>,
    dispatcher: Arc<MessageDispatcher>,
    runner: Arc<FlowRunner>,
    events: flume::Sender<ConversationEvent>,
    /// How far ahead of `now` the scan looks for warning candidates. Flows
    /// with a warning threshold larger than this get their warning late,
    /// never early.
    warning_lookahead_secs: u64,
}

impl ExpirySweeper {
    pub fn new(
        states: Arc<StateManager>,
        flows: Arc<dyn FlowProvider>,
        dispatcher: Arc<MessageDispatcher>,
        runner: Arc<FlowRunner>,
        events: flume::Sender<ConversationEvent>,
    ) -> Self {
        Self {
            states,
            flows,
            dispatcher,
            runner,
            events,
            warning_lookahead_secs: 3600,
        }
    }

    #[must_use]
    pub fn with_warning_lookahead_secs(mut self, secs: u64) -> Self {
        self.warning_lookahead_secs = secs;
        self
    }

    /// The runner's configured `sweep_interval_secs` as a tick duration.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.runner.config().sweep_interval_secs)
    }

    /// Spawn the sweep loop at [`sweep_interval`](Self::sweep_interval).
    /// Abort the handle to stop it.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.sweep_interval());
            loop {
                ticker.tick().await;
                match self.run_once(Utc::now()).await {
                    Ok(report) if report.warned + report.expired > 0 => {
                        info!(warned = report.warned, expired = report.expired, "sweep pass");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "sweep pass failed"),
                }
            }
        })
    }

    /// One sweep pass at the given instant.
    #[instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, RuntimeError> {
        let lookahead = now + ChronoDuration::seconds(self.warning_lookahead_secs as i64);
        let candidates = self.states.scan_expiring(lookahead).await?;
        let mut report = SweepReport::default();

        for candidate in candidates {
            let key = candidate.key.clone();
            let redirect = {
                let _guard = self.states.lock(&key).await;
                // Reload under the lock; an inbound turn may have refreshed
                // the session or closed it since the scan.
                let Some(state) = self.states.load(&key).await? else {
                    continue;
                };
                if !state.is_active {
                    continue;
                }

                if self.warn_due(&state, now).await? {
                    report.warned += 1;
                    None
                } else if state.session_expires_at <= now {
                    report.expired += 1;
                    self.expire(state).await?
                } else {
                    None
                }
            };

            // The guard must be released before the redirect runs its first
            // turn: the redirect flow may be the expired key's own flow, and
            // starting it re-acquires that key's lock.
            if let Some(redirect_key) = redirect
                && let Err(e) = self.runner.start_conversation(&redirect_key, now).await
            {
                warn!(key = %redirect_key, error = %e, "expiry redirect failed");
            }
        }

        self.states.prune_locks().await;
        Ok(report)
    }

    /// Send the pre-expiry warning if the flow configures a threshold, the
    /// state is inside it (or past expiry), and no warning was sent yet.
    async fn warn_due(
        &self,
        state: &ConversationState,
        now: DateTime<Utc>,
    ) -> Result<bool, RuntimeError> {
        let graph = self
            .flows
            .published_graph(&state.key.flow_id, Some(state.flow_version))
            .await?;
        let Some(threshold) = graph.settings.warning_threshold_secs else {
            return Ok(false);
        };
        if state.last_warning_at.is_some() {
            return Ok(false);
        }
        let warn_from = state.session_expires_at - ChronoDuration::seconds(threshold as i64);
        if now < warn_from {
            return Ok(false);
        }

        let mut state = state.clone();
        state.turn_seq += 1;
        let text = graph
            .settings
            .warning_text
            .as_deref()
            .unwrap_or(DEFAULT_WARNING_TEXT);
        let message = OutboundMessage::in_turn(
            &state.key,
            state.turn_seq,
            0,
            MessageKind::ExpiryWarning,
            text,
        );
        self.dispatcher
            .send(
                &state.key.contact_key,
                &message,
                graph.settings.rate_ceiling_per_minute,
            )
            .await?;
        state.last_warning_at = Some(now);
        self.states.persist(&state).await?;
        self.emit(ConversationEvent::now(
            state.key.encode(),
            ConversationEventKind::WarningSent {
                flow_id: state.key.flow_id.clone(),
            },
        ));
        Ok(true)
    }

    /// Close a fully expired state, emitting the expiration message. Returns
    /// the key of the configured redirect flow, to be started by the caller
    /// once the expired key's lock is released.
    async fn expire(
        &self,
        mut state: ConversationState,
    ) -> Result<Option<ConversationKey>, RuntimeError> {
        let graph = self
            .flows
            .published_graph(&state.key.flow_id, Some(state.flow_version))
            .await?;

        if let Some(text) = graph.settings.expiration_text.as_deref() {
            state.turn_seq += 1;
            let message = OutboundMessage::in_turn(
                &state.key,
                state.turn_seq,
                0,
                MessageKind::Expiration,
                text,
            );
            self.dispatcher
                .send(
                    &state.key.contact_key,
                    &message,
                    graph.settings.rate_ceiling_per_minute,
                )
                .await?;
        }

        self.states.close(&mut state, CloseReason::Expired).await?;
        // A later conversation under this key starts its ids from scratch.
        self.dispatcher
            .forget_delivered(&format!("{}#", state.key.encode()))
            .await;
        self.emit(ConversationEvent::now(
            state.key.encode(),
            ConversationEventKind::Closed {
                flow_id: state.key.flow_id.clone(),
                reason: CloseReason::Expired,
                redirected_to: graph.settings.redirect_flow.clone(),
            },
        ));

        Ok(graph.settings.redirect_flow.clone().map(|redirect| {
            ConversationKey::new(&state.key.tenant_id, &state.key.contact_key, redirect)
        }))
    }

    fn emit(&self, event: ConversationEvent) {
        let _ = self.events.send(event);
    }
}
