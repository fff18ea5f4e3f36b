//! The outbound channel seam.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::message::OutboundMessage;

/// Failure reported by a channel transport for a single delivery attempt.
///
/// The dispatcher retries `Transient` failures with backoff and surfaces
/// `Permanent` ones immediately.
#[derive(Debug, Error, Diagnostic)]
pub enum TransportError {
    #[error("transient channel failure: {message}")]
    #[diagnostic(code(chatflow::dispatch::transient))]
    Transient { message: String },

    #[error("permanent channel failure: {message}")]
    #[diagnostic(
        code(chatflow::dispatch::permanent),
        help("permanent failures (e.g. invalid recipient) are never retried")
    )]
    Permanent { message: String },
}

/// Abstraction over the concrete messaging transport.
///
/// Implementations deliver one rendered message to one contact. They do not
/// retry; retry, rate limiting, and duplicate suppression are the
/// dispatcher's job.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn deliver(&self, contact_key: &str, message: &OutboundMessage)
    -> Result<(), TransportError>;
}

/// Outcome of a dispatched message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Delivered on the given attempt (1-based).
    Delivered { attempts: u32 },
    /// The message id was already delivered; the send was suppressed.
    Duplicate,
}
