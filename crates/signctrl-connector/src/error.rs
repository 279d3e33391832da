use thiserror::Error;

use signctrl_protocol::ProtocolError;
use signctrl_state::StateError;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Configuration error:\n{0}")]
    Config(String),

    #[error("Couldn't dial validator: {0}")]
    Dial(#[from] DialError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single dial attempt or of the dial policy itself.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("invalid validator address: {0}")]
    InvalidAddress(String),

    #[error("couldn't load connection key: {0}")]
    KeyUnavailable(String),

    #[error("connection refused by {0}")]
    Refused(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dial cancelled")]
    Cancelled,
}

impl DialError {
    /// Plain connection failures are retried; structural ones are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DialError::Refused(_) | DialError::Io(_))
    }
}
