//! Error taxonomy for the client session layer.

use thiserror::Error;

/// Errors surfaced by the connector, relay and reconciler.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport unreachable after all connect attempts were exhausted.
    #[error("connection failed after {attempts} attempt(s): {reason}")]
    Connection { attempts: u32, reason: String },

    /// A game action was attempted with no connect() ever started, or
    /// after the session was torn down.
    #[error("not connected: call connect() before issuing game actions")]
    NotConnected,

    /// Business error pushed by the server (`error` event). Non-fatal:
    /// the session stays usable.
    #[error("server error: {0}")]
    Server(String),

    /// An inbound event payload was missing required fields.
    #[error("malformed `{event}` payload: {reason}")]
    Protocol { event: String, reason: String },

    /// Underlying socket failure.
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub(crate) fn protocol(event: &str, reason: impl Into<String>) -> Self {
        ClientError::Protocol {
            event: event.to_string(),
            reason: reason.into(),
        }
    }
}
