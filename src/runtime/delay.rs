//! Scheduled resumption of DELAY-suspended conversations.
//!
//! The engine never blocks a thread on a delay; it persists a resume marker
//! and returns. This scheduler polls for due markers and re-enters the
//! engine through [`FlowRunner::resume_due`], which takes the same per-key
//! lock as the inbound path.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use tracing::{debug, warn};

use super::runner::FlowRunner;

/// Background poller for pending DELAY resume markers.
pub struct DelayScheduler {
    runner: Arc<FlowRunner>,
    poll_interval: Duration,
}

impl DelayScheduler {
    /// Polls at the runner's configured `resume_poll_secs`.
    #[must_use]
    pub fn new(runner: Arc<FlowRunner>) -> Self {
        let poll_interval = Duration::from_secs(runner.config().resume_poll_secs);
        Self {
            runner,
            poll_interval,
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Spawn the polling loop. Abort the handle to stop it.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.poll_interval);
            loop {
                ticker.tick().await;
                match self.runner.resume_due(Utc::now()).await {
                    Ok(0) => {}
                    Ok(resumed) => debug!(resumed, "resumed delayed conversations"),
                    Err(e) => warn!(error = %e, "delay resume scan failed"),
                }
            }
        })
    }
}
