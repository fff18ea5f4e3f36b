//! # Chatflow: Flow Execution Engine for Automated Conversations
//!
//! Chatflow advances a contact's position through an operator-authored flow
//! graph: an inbound message comes in, the engine computes the next
//! position, the replies to send, and the updated variable set, and the
//! runtime persists the result and delivers the messages.
//!
//! ## Core Concepts
//!
//! - **Flows**: Validated, versioned graphs of typed nodes and edges
//! - **Engine**: Deterministic traversal producing one [`engine::Turn`] per
//!   inbound event
//! - **State**: Per-contact position, variables, and session lifetime,
//!   serialized through a pluggable store
//! - **Dispatch**: Rate-limited, retrying, idempotent outbound delivery
//! - **Runtime**: Orchestration, DELAY resumption, and session expiry
//!
//! ## Quick Start
//!
//! ### Authoring a Flow
//!
//! ```
//! use chatflow::flows::{AnswerRule, FlowGraphBuilder, NodeKind};
//!
//! let graph = FlowGraphBuilder::new("onboarding")
//!     .add_node("start", NodeKind::Start)
//!     .add_node("hello", NodeKind::Message { text: "Hello {{name}}!".into() })
//!     .add_node("ask", NodeKind::Question {
//!         prompt: "What's your name?".into(),
//!         variable: "name".into(),
//!         rule: AnswerRule::NonEmpty,
//!         retry_text: None,
//!     })
//!     .add_node("bye", NodeKind::End { text: Some("Thanks {{name}}!".into()) })
//!     .add_edge("e1", "start", "hello")
//!     .add_edge("e2", "hello", "ask")
//!     .add_edge("e3", "ask", "bye")
//!     .build()
//!     .expect("valid flow");
//!
//! assert_eq!(graph.nodes.len(), 4);
//! ```
//!
//! ### Running a Turn
//!
//! ```
//! use std::sync::Arc;
//! use chatflow::engine::{ActionRegistry, Engine, FlowProvider, InMemoryFlowProvider};
//! use chatflow::flows::{FlowGraphBuilder, NodeKind};
//! use chatflow::state::ConversationState;
//! use chatflow::types::ConversationKey;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let provider = Arc::new(InMemoryFlowProvider::new());
//! provider.publish(
//!     FlowGraphBuilder::new("f")
//!         .add_node("start", NodeKind::Start)
//!         .add_node("done", NodeKind::End { text: Some("Hi!".into()) })
//!         .add_edge("e1", "start", "done")
//!         .build()
//!         .unwrap(),
//! ).await;
//!
//! let engine = Engine::new(provider.clone(), Arc::new(ActionRegistry::new()));
//! let graph = provider.published_graph("f", None).await.unwrap();
//! let state = ConversationState::new(
//!     ConversationKey::new("acme", "+15550100", "f"),
//!     graph.version,
//!     86400,
//!     chrono::Utc::now(),
//! );
//!
//! let turn = engine.advance(&state, graph, Some("hi"), chrono::Utc::now()).await.unwrap();
//! assert_eq!(turn.messages[0].text, "Hi!");
//! assert!(turn.is_closed());
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`flows`] - Flow graph model, builder, and publish-time validation
//! - [`interpolate`] - `{{name}}` template substitution
//! - [`engine`] - Node dispatch, traversal, loop guard, action seam
//! - [`state`] - Conversation state, locking manager, and stores
//! - [`dispatch`] - Outbound delivery with retry and rate limiting
//! - [`runtime`] - Runner, delay scheduler, and expiry sweeper
//! - [`event_bus`] - Operator-visible conversation events

pub mod dispatch;
pub mod engine;
pub mod event_bus;
pub mod flows;
pub mod interpolate;
pub mod message;
pub mod runtime;
pub mod state;
pub mod telemetry;
pub mod types;
