//! Test harness: a fully wired runtime over in-memory backends and a
//! recording transport.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use chatflow::dispatch::{ChannelTransport, DispatchConfig, MessageDispatcher, TransportError};
use chatflow::engine::{ActionRegistry, Engine, InMemoryFlowProvider};
use chatflow::event_bus::ConversationEvent;
use chatflow::flows::FlowGraph;
use chatflow::message::OutboundMessage;
use chatflow::runtime::{ExpirySweeper, FlowRunner, RuntimeConfig};
use chatflow::state::{InMemoryStateStore, StateManager};

/// Transport that records every delivery and can be told to fail.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, OutboundMessage)>>,
    transient_failures: AtomicU32,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` deliveries with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.text.clone())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ChannelTransport for RecordingTransport {
    async fn deliver(
        &self,
        contact_key: &str,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Transient {
                message: "injected failure".into(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((contact_key.to_string(), message.clone()));
        Ok(())
    }
}

/// A wired-up runtime over in-memory backends.
pub struct Harness {
    pub runner: Arc<FlowRunner>,
    pub sweeper: ExpirySweeper,
    pub provider: Arc<InMemoryFlowProvider>,
    pub states: Arc<StateManager>,
    pub transport: Arc<RecordingTransport>,
    pub events: flume::Receiver<ConversationEvent>,
}

pub async fn harness(flows: Vec<FlowGraph>) -> Harness {
    harness_with(flows, ActionRegistry::new(), RuntimeConfig::default()).await
}

pub async fn harness_with(
    flows: Vec<FlowGraph>,
    actions: ActionRegistry,
    config: RuntimeConfig,
) -> Harness {
    let provider = Arc::new(InMemoryFlowProvider::new());
    for flow in flows {
        provider.publish(flow).await;
    }

    let states = Arc::new(StateManager::new(Arc::new(InMemoryStateStore::new())));
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = Arc::new(MessageDispatcher::with_config(
        transport.clone(),
        DispatchConfig {
            base_backoff_ms: 1,
            max_backoff_ms: 5,
            ..config.dispatch
        },
    ));
    let (events_tx, events_rx) = flume::unbounded();

    let engine = Engine::new(provider.clone(), Arc::new(actions)).with_config(config.engine);
    let runner = Arc::new(FlowRunner::new(
        engine,
        provider.clone(),
        states.clone(),
        dispatcher.clone(),
        events_tx.clone(),
        config,
    ));
    let sweeper = ExpirySweeper::new(
        states.clone(),
        provider.clone(),
        dispatcher,
        runner.clone(),
        events_tx,
    );

    Harness {
        runner,
        sweeper,
        provider,
        states,
        transport,
        events: events_rx,
    }
}

impl Harness {
    /// Drain every event emitted so far.
    pub fn drain_events(&self) -> Vec<ConversationEvent> {
        self.events.drain().collect()
    }
}
