//! The state-machine core: one inbound event in, one [`Turn`] out.
//!
//! [`Engine::advance`] works on an owned copy of the prior state and never
//! persists anything itself. A successful turn hands the updated state back
//! for the caller to commit; any error leaves the stored state exactly as it
//! was, so an aborted turn is always resumable.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument, warn};

use crate::flows::{FlowGraph, NextStep, Node, NodeKind};
use crate::interpolate;
use crate::message::{MessageKind, OutboundMessage};
use crate::state::ConversationState;
use crate::types::{CloseReason, NodeId};

use super::actions::ActionRegistry;
use super::errors::EngineError;
use super::outcome::{Turn, TurnStatus};
use super::provider::FlowProvider;

/// Engine-wide knobs; per-flow settings override where noted.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Loop-guard step cap. A flow's `settings.step_cap` overrides this.
    pub step_cap: u32,
    /// Default ACTION timeout. A node's `timeout_ms` overrides this.
    pub action_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_cap: 100,
            action_timeout_ms: 5_000,
        }
    }
}

/// Deterministic flow traversal over persisted conversation state.
pub struct Engine {
    flows: Arc<dyn FlowProvider>,
    actions: Arc<ActionRegistry>,
    config: EngineConfig,
}

impl Engine {
    #[must_use]
    pub fn new(flows: Arc<dyn FlowProvider>, actions: Arc<ActionRegistry>) -> Self {
        Self {
            flows,
            actions,
            config: EngineConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Advance a conversation by one turn.
    ///
    /// `graph` must be the published graph for `prior.current_flow_id`.
    /// `input` is the inbound text, or `None` when the runtime resumes a
    /// pending DELAY. An inbound message arriving while a delay is pending
    /// cancels the delay and reprocesses immediately.
    #[instrument(skip(self, prior, graph, input), fields(key = %prior.key, flow = %graph.flow_id))]
    pub async fn advance(
        &self,
        prior: &ConversationState,
        graph: Arc<FlowGraph>,
        input: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Turn, EngineError> {
        if prior.is_closed() || prior.is_expired_at(now) {
            return Err(EngineError::SessionExpired {
                key: prior.key.encode(),
            });
        }

        let mut state = prior.clone();
        let mut graph = graph;
        let mut messages: Vec<OutboundMessage> = Vec::new();
        state.turn_seq += 1;
        // Inbound-during-delay policy: the delay is canceled in favor of
        // immediate reprocessing.
        state.pending_resume_at = None;

        let step_cap = graph.settings.step_cap.unwrap_or(self.config.step_cap);

        // Locate the cursor for this turn.
        let mut cursor: NodeId = match state.current_node_id.clone() {
            None => {
                let start = graph.start_node().map_err(|e| EngineError::Execution {
                    node: "start".into(),
                    message: e.to_string(),
                })?;
                start.id.clone()
            }
            Some(node_id) if state.awaiting_input => {
                let node = lookup(&graph, &node_id)?.clone();
                let NodeKind::Question {
                    prompt,
                    variable,
                    rule,
                    retry_text,
                } = &node.kind
                else {
                    return Err(EngineError::Execution {
                        node: node_id,
                        message: "awaiting input at a non-question node".into(),
                    });
                };
                let answer = input.unwrap_or_default();
                if !rule.accepts(answer) {
                    // Invalid answer: re-prompt and stay halted; nothing else
                    // about the state changes.
                    let text = retry_text.as_deref().unwrap_or(prompt);
                    push(&mut messages, &state, MessageKind::Prompt, interpolate::render(text, &state.variables));
                    debug!(node = %node.id, "answer rejected, re-prompting");
                    return Ok(Turn {
                        state,
                        messages,
                        status: TurnStatus::AwaitingInput,
                    });
                }
                state
                    .variables
                    .insert(variable.clone(), answer.to_string());
                state.awaiting_input = false;
                match resolve(&graph, &node, &state)? {
                    NextStep::Node(next) => next,
                    NextStep::Terminal => {
                        return Err(EngineError::Execution {
                            node: node.id.clone(),
                            message: "question node has no successor".into(),
                        });
                    }
                }
            }
            Some(node_id) => {
                // Halted at a DELAY node; resume (or preempt) from its
                // successor.
                let node = lookup(&graph, &node_id)?.clone();
                match resolve(&graph, &node, &state)? {
                    NextStep::Node(next) => next,
                    NextStep::Terminal => {
                        return Err(EngineError::Execution {
                            node: node_id,
                            message: "halted at a node with no successor".into(),
                        });
                    }
                }
            }
        };

        // Traversal loop: execute the node at the cursor, record it, emit
        // text, resolve the successor.
        let mut steps: u32 = 0;
        loop {
            if steps >= step_cap {
                warn!(key = %state.key, cap = step_cap, node = %cursor, "loop guard tripped");
                return Err(EngineError::LoopGuardTripped {
                    key: state.key.encode(),
                    cap: step_cap,
                });
            }
            steps += 1;

            let node = lookup(&graph, &cursor)?.clone();
            state.execution_path.push(cursor.clone());
            state.current_node_id = Some(cursor.clone());
            debug!(node = %node.id, kind = node.kind.type_name(), step = steps, "executing node");

            match &node.kind {
                NodeKind::Start | NodeKind::Condition { .. } => {}

                NodeKind::Message { text } => {
                    push(&mut messages, &state, MessageKind::Text, interpolate::render(text, &state.variables));
                }

                NodeKind::Question { prompt, .. } => {
                    state.awaiting_input = true;
                    push(&mut messages, &state, MessageKind::Prompt, interpolate::render(prompt, &state.variables));
                    return Ok(Turn {
                        state,
                        messages,
                        status: TurnStatus::AwaitingInput,
                    });
                }

                NodeKind::SetVariable { variable, value } => {
                    let rendered = interpolate::render(value, &state.variables);
                    state.variables.insert(variable.clone(), rendered);
                }

                NodeKind::Action {
                    action,
                    params,
                    output_variable,
                    timeout_ms,
                } => {
                    let budget = std::time::Duration::from_millis(
                        timeout_ms.unwrap_or(self.config.action_timeout_ms),
                    );
                    let outcome = match self.actions.get(action) {
                        Some(handler) => {
                            match tokio::time::timeout(
                                budget,
                                handler.invoke(params, &state.variables),
                            )
                            .await
                            {
                                Ok(Ok(value)) => Ok(value),
                                Ok(Err(e)) => Err(e.message),
                                Err(_) => Err(format!("timed out after {}ms", budget.as_millis())),
                            }
                        }
                        None => Err(format!("no handler registered for action {action}")),
                    };

                    match outcome {
                        Ok(value) => {
                            if let Some(variable) = output_variable {
                                state.variables.insert(variable.clone(), stringify(&value));
                            }
                            let Some(target) = graph.action_success_target(&cursor) else {
                                return Err(EngineError::Execution {
                                    node: cursor,
                                    message: "action node has no success path".into(),
                                });
                            };
                            cursor = target.clone();
                            continue;
                        }
                        Err(message) => {
                            if let Some(target) = graph.action_error_target(&cursor) {
                                warn!(node = %cursor, %message, "action failed, taking error edge");
                                cursor = target.clone();
                                continue;
                            }
                            return Err(EngineError::Execution {
                                node: cursor,
                                message,
                            });
                        }
                    }
                }

                NodeKind::Delay { seconds } => {
                    let resume_at = now + Duration::seconds(*seconds as i64);
                    state.pending_resume_at = Some(resume_at);
                    return Ok(Turn {
                        state,
                        messages,
                        status: TurnStatus::DelayScheduled(resume_at),
                    });
                }

                NodeKind::Handoff { notice } => {
                    if let Some(notice) = notice {
                        push(&mut messages, &state, MessageKind::HandoffNotice, interpolate::render(notice, &state.variables));
                    }
                    state.close(CloseReason::Handoff);
                    return Ok(Turn {
                        state,
                        messages,
                        status: TurnStatus::Closed(CloseReason::Handoff),
                    });
                }

                NodeKind::Jump { flow, node: target } => {
                    if let Some(flow_id) = flow
                        && *flow_id != state.current_flow_id
                    {
                        graph = self.flows.published_graph(flow_id, None).await?;
                        state.current_flow_id = flow_id.clone();
                    }
                    lookup(&graph, target)?;
                    cursor = target.clone();
                    continue;
                }

                NodeKind::End { text } => {
                    if let Some(text) = text {
                        push(&mut messages, &state, MessageKind::Final, interpolate::render(text, &state.variables));
                    }
                    state.close(CloseReason::Completed);
                    return Ok(Turn {
                        state,
                        messages,
                        status: TurnStatus::Closed(CloseReason::Completed),
                    });
                }
            }

            cursor = match resolve(&graph, &node, &state)? {
                NextStep::Node(next) => next,
                NextStep::Terminal => {
                    return Err(EngineError::Execution {
                        node: node.id.clone(),
                        message: "non-terminal node resolved to a terminal step".into(),
                    });
                }
            };
        }
    }
}

fn lookup<'g>(graph: &'g FlowGraph, node_id: &str) -> Result<&'g Node, EngineError> {
    graph.node(node_id).ok_or_else(|| EngineError::UnknownNode {
        flow_id: graph.flow_id.clone(),
        node: node_id.to_string(),
    })
}

fn resolve(
    graph: &FlowGraph,
    node: &Node,
    state: &ConversationState,
) -> Result<NextStep, EngineError> {
    graph
        .resolve_next(node, &state.variables)
        .map_err(|e| EngineError::Execution {
            node: node.id.clone(),
            message: e.to_string(),
        })
}

fn push(
    messages: &mut Vec<OutboundMessage>,
    state: &ConversationState,
    kind: MessageKind,
    text: String,
) {
    let index = messages.len();
    messages.push(OutboundMessage::in_turn(
        &state.key,
        state.turn_seq,
        index,
        kind,
        text,
    ));
}

fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
