//! The orchestrator: one inbound event in, a committed turn out.
//!
//! [`FlowRunner`] ties the pieces together under the per-conversation lock:
//! load or create state, run [`Engine::advance`], dispatch the resulting
//! messages, and only then persist. A failure at any point releases the lock
//! with the stored state untouched, so the turn can be retried under the
//! same deterministic message ids.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::dispatch::{DispatchError, MessageDispatcher};
use crate::engine::{Engine, EngineError, FlowProvider, Turn, TurnStatus};
use crate::event_bus::{ConversationEvent, ConversationEventKind};
use crate::flows::FlowGraph;
use crate::message::{MessageKind, OutboundMessage};
use crate::state::{ConversationState, StateManager, StoreError};
use crate::types::{CloseReason, ConversationKey};

use super::config::RuntimeConfig;

/// Sent to the contact when the loop guard aborts a turn.
const APOLOGY_TEXT: &str = "Sorry, something went wrong on our side. Please try again in a moment.";

/// Failures surfaced by the runner. Each aborts the turn without persisting.
#[derive(Debug, Error, Diagnostic)]
pub enum RuntimeError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Orchestrates engine turns over locked, persisted conversation state.
pub struct FlowRunner {
    engine: Engine,
    flows: Arc<dyn FlowProvider>,
    states: Arc<StateManager>,
    dispatcher: Arc<MessageDispatcher>,
    events: flume::Sender<ConversationEvent>,
    config: RuntimeConfig,
}

impl FlowRunner {
    pub fn new(
        engine: Engine,
        flows: Arc<dyn FlowProvider>,
        states: Arc<StateManager>,
        dispatcher: Arc<MessageDispatcher>,
        events: flume::Sender<ConversationEvent>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            engine,
            flows,
            states,
            dispatcher,
            events,
            config,
        }
    }

    /// The resolved runtime configuration. Background collaborators read
    /// their poll and sweep intervals from here.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Entry point for the channel-ingestion collaborator.
    ///
    /// Acquires the per-conversation lock for the whole turn. A closed or
    /// expired state yields [`EngineError::SessionExpired`]; restart policy
    /// belongs to the router, which may call
    /// [`restart_conversation`](Self::restart_conversation).
    #[instrument(skip(self, text), fields(tenant_id, contact_key, flow_id))]
    pub async fn on_inbound_message(
        &self,
        tenant_id: &str,
        contact_key: &str,
        flow_id: &str,
        text: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Turn, RuntimeError> {
        let key = ConversationKey::new(tenant_id, contact_key, flow_id);
        let _guard = self.states.lock(&key).await;

        let entry_graph = self.flows.published_graph(flow_id, None).await?;
        let ttl = self.ttl_for(&entry_graph);
        let state = self
            .states
            .get_or_create(&key, entry_graph.version, ttl, received_at)
            .await?;

        self.run_turn(state, Some(text), received_at).await
    }

    /// Close whatever state exists under the key and begin a fresh
    /// conversation, processing `text` as its first inbound message.
    #[instrument(skip(self, text))]
    pub async fn restart_conversation(
        &self,
        key: &ConversationKey,
        text: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Turn, RuntimeError> {
        let _guard = self.states.lock(key).await;

        if let Some(mut existing) = self.states.load(key).await?
            && existing.is_active
        {
            self.states
                .close(&mut existing, CloseReason::Aborted)
                .await?;
        }
        let graph = self.flows.published_graph(&key.flow_id, None).await?;
        let ttl = self.ttl_for(&graph);
        let state = self
            .states
            .restart(key, graph.version, ttl, received_at)
            .await?;
        self.run_turn(state, Some(text), received_at).await
    }

    /// Start a contact in a flow without an inbound message (expiry
    /// redirects). Runs from START until the flow halts on its own.
    #[instrument(skip(self))]
    pub async fn start_conversation(
        &self,
        key: &ConversationKey,
        now: DateTime<Utc>,
    ) -> Result<Turn, RuntimeError> {
        let _guard = self.states.lock(key).await;
        let graph = self.flows.published_graph(&key.flow_id, None).await?;
        let ttl = self.ttl_for(&graph);
        let state = self.states.restart(key, graph.version, ttl, now).await?;
        self.run_turn(state, None, now).await
    }

    /// Resume every conversation whose DELAY marker is due. Returns the
    /// number of conversations resumed. Invoked by the delay scheduler, never
    /// by the inbound path.
    pub async fn resume_due(&self, now: DateTime<Utc>) -> Result<usize, RuntimeError> {
        let due = self.states.scan_resumable(now).await?;
        let mut resumed = 0;
        for stale in due {
            let key = stale.key.clone();
            let _guard = self.states.lock(&key).await;
            // Reload under the lock: an inbound message may have preempted
            // the delay while we were scanning.
            let Some(state) = self.states.load(&key).await? else {
                continue;
            };
            if !state.is_active || state.pending_resume_at.is_none_or(|at| at > now) {
                continue;
            }
            match self.run_turn(state, None, now).await {
                Ok(_) => resumed += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "delay resume failed; will retry next poll");
                }
            }
        }
        Ok(resumed)
    }

    /// Execute one engine turn for `state`, dispatch, persist, and emit
    /// events. Caller must hold the conversation lock.
    async fn run_turn(
        &self,
        state: ConversationState,
        input: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Turn, RuntimeError> {
        let graph = self.graph_for(&state).await?;
        let ttl = self.ttl_for(&graph);

        let turn = match self
            .engine
            .advance(&state, graph.clone(), input, now)
            .await
        {
            Ok(turn) => turn,
            Err(EngineError::LoopGuardTripped { key, cap }) => {
                self.emit(ConversationEvent::now(
                    key.clone(),
                    ConversationEventKind::LoopGuardTripped {
                        flow_id: state.current_flow_id.clone(),
                        cap,
                    },
                ));
                // Best effort: the contact gets an apology instead of
                // silence. The id lives in its own namespace; the aborted
                // turn was never persisted, so the next successful turn
                // reuses this turn_seq for its regular `.index` ids and
                // those must not collide with the apology.
                let apology = OutboundMessage::new(
                    format!("{}#{}.apology", state.key.encode(), state.turn_seq + 1),
                    MessageKind::Apology,
                    APOLOGY_TEXT,
                );
                if let Err(e) = self
                    .dispatcher
                    .send(
                        &state.key.contact_key,
                        &apology,
                        graph.settings.rate_ceiling_per_minute,
                    )
                    .await
                {
                    warn!(key = %state.key, error = %e, "apology delivery failed");
                }
                return Err(EngineError::LoopGuardTripped { key, cap }.into());
            }
            Err(e) => return Err(e.into()),
        };

        // Dispatch before persisting: if delivery fails the stored state is
        // untouched and the retried turn regenerates identical message ids,
        // so already-sent messages are suppressed as duplicates.
        let rate_ceiling = graph.settings.rate_ceiling_per_minute;
        if let Err(e) = self
            .dispatcher
            .send_all(&state.key.contact_key, &turn.messages, rate_ceiling)
            .await
        {
            let (message_id, reason) = match &e {
                DispatchError::Permanent { message_id, reason } => (message_id, reason),
                DispatchError::ExhaustedRetries {
                    message_id, reason, ..
                } => (message_id, reason),
            };
            self.emit(ConversationEvent::now(
                state.key.encode(),
                ConversationEventKind::DeliveryFailed {
                    message_id: message_id.clone(),
                    reason: reason.clone(),
                },
            ));
            return Err(e.into());
        }

        let mut committed = turn;
        committed.state.touch(now, ttl);
        self.states.persist(&committed.state).await?;

        self.emit_turn_events(&committed);
        if committed.is_closed() {
            // The conversation will never replay these ids again.
            self.dispatcher
                .forget_delivered(&format!("{}#", committed.state.key.encode()))
                .await;
        }
        info!(
            key = %committed.state.key,
            node = committed.state.current_node_id.as_deref().unwrap_or("-"),
            emitted = committed.messages.len(),
            "turn committed"
        );
        Ok(committed)
    }

    /// The graph the state's cursor currently lives in. The originating flow
    /// stays pinned to the version bound at creation; a flow entered through
    /// a cross-flow jump runs at its latest published version.
    async fn graph_for(&self, state: &ConversationState) -> Result<Arc<FlowGraph>, EngineError> {
        let version = if state.current_flow_id == state.key.flow_id {
            Some(state.flow_version)
        } else {
            None
        };
        self.flows
            .published_graph(&state.current_flow_id, version)
            .await
    }

    fn ttl_for(&self, graph: &FlowGraph) -> u64 {
        graph
            .settings
            .session_ttl_secs
            .unwrap_or(self.config.default_ttl_secs)
    }

    fn emit_turn_events(&self, turn: &Turn) {
        let key = turn.state.key.encode();
        let flow_id = turn.state.current_flow_id.clone();
        self.emit(ConversationEvent::now(
            key.clone(),
            ConversationEventKind::TurnCompleted {
                flow_id: flow_id.clone(),
                node: turn.state.current_node_id.clone(),
                emitted: turn.messages.len(),
            },
        ));
        match &turn.status {
            TurnStatus::AwaitingInput => {}
            TurnStatus::DelayScheduled(resume_at) => {
                self.emit(ConversationEvent::now(
                    key,
                    ConversationEventKind::DelayScheduled {
                        flow_id,
                        resume_at: *resume_at,
                    },
                ));
            }
            TurnStatus::Closed(reason) => {
                if *reason == CloseReason::Handoff {
                    self.emit(ConversationEvent::now(
                        key.clone(),
                        ConversationEventKind::Handoff {
                            flow_id: flow_id.clone(),
                        },
                    ));
                }
                self.emit(ConversationEvent::now(
                    key,
                    ConversationEventKind::Closed {
                        flow_id,
                        reason: *reason,
                        redirected_to: None,
                    },
                ));
            }
        }
    }

    fn emit(&self, event: ConversationEvent) {
        // The bus may be gone during shutdown; events are observability only.
        let _ = self.events.send(event);
    }
}
