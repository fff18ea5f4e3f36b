//! Conversation event fan-out.
//!
//! The runtime publishes [`ConversationEvent`]s onto an [`EventBus`]; sinks
//! decide where they go (tracing logs, memory for tests, channels for live
//! consumers). Producers never block on sink I/O.

pub mod bus;
pub mod event;
pub mod sink;

pub use bus::{EventBus, EventBusHandle};
pub use event::{ConversationEvent, ConversationEventKind};
pub use sink::{ChannelSink, EventSink, MemorySink, TracingSink};
