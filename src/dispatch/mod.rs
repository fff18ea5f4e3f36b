//! Outbound delivery: transport seam plus the rate-limited, retrying,
//! idempotent dispatcher in front of it.

pub mod dispatcher;
pub mod transport;

pub use dispatcher::{DispatchConfig, DispatchError, MessageDispatcher};
pub use transport::{ChannelTransport, DeliveryResult, TransportError};
