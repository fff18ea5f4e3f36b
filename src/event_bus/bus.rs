use tokio::task::JoinHandle;
use tracing::warn;

use super::event::ConversationEvent;
use super::sink::{EventSink, TracingSink};

/// Collects sinks, then [`start`](Self::start)s the drain task that fans
/// events out to them.
///
/// Producers (runner, sweeper) hold a cloned `flume::Sender` from the
/// returned handle and never block on sink I/O.
pub struct EventBus {
    sinks: Vec<Box<dyn EventSink>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new().with_sink(TracingSink)
    }
}

impl EventBus {
    /// An empty bus; add sinks before starting.
    #[must_use]
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    #[must_use]
    pub fn with_sink<S: EventSink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Spawn the drain task and hand back the producer side. The task owns
    /// the sinks; a failing sink is logged and skipped, never fatal.
    #[must_use]
    pub fn start(self) -> EventBusHandle {
        let (tx, rx) = flume::unbounded::<ConversationEvent>();
        let mut sinks = self.sinks;
        let task = tokio::spawn(async move {
            while let Ok(event) = rx.recv_async().await {
                for sink in &mut sinks {
                    if let Err(e) = sink.handle(&event) {
                        warn!(error = %e, kind = event.kind_name(), "event sink failed");
                    }
                }
            }
        });
        EventBusHandle { tx, task }
    }
}

/// Producer side of a started [`EventBus`].
pub struct EventBusHandle {
    tx: flume::Sender<ConversationEvent>,
    task: JoinHandle<()>,
}

impl EventBusHandle {
    /// Clone of the sender for wiring into producers.
    #[must_use]
    pub fn sender(&self) -> flume::Sender<ConversationEvent> {
        self.tx.clone()
    }

    /// Drain every queued event, then stop the task. Cloned senders must be
    /// dropped first; the drain ends on channel disconnect.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}
