use std::io::{self, Result as IoResult};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::info;

use super::event::ConversationEvent;

/// Abstraction over an output target that consumes full event objects.
pub trait EventSink: Sync + Send {
    /// Handle a structured event. The sink decides how to serialize it.
    fn handle(&mut self, event: &ConversationEvent) -> IoResult<()>;
}

/// Default sink: structured log lines through `tracing`.
#[derive(Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn handle(&mut self, event: &ConversationEvent) -> IoResult<()> {
        info!(
            target: "chatflow::events",
            key = %event.key,
            at = %event.at,
            kind = event.kind_name(),
            "conversation event"
        );
        Ok(())
    }
}

/// In-memory sink for tests and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<ConversationEvent>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all captured events.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConversationEvent> {
        self.entries.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl EventSink for MemorySink {
    fn handle(&mut self, event: &ConversationEvent) -> IoResult<()> {
        self.entries.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Forwards events to a tokio mpsc channel for async consumers (dashboards,
/// SSE endpoints).
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ConversationEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<ConversationEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn handle(&mut self, event: &ConversationEvent) -> IoResult<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel receiver dropped"))
    }
}
