//! Error types for the StatusWatch system
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for StatusWatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the StatusWatch system
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level I/O errors (refused, reset, closed mid-message)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing errors: malformed varints, bad packet ids, invalid documents
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A ping response echoed a token other than the one sent
    #[error("received mangled ping response packet (expected token {expected}, received {received})")]
    PingTokenMismatch {
        /// Token written in the ping request
        expected: i64,
        /// Token read back from the response
        received: i64,
    },

    /// A network operation exceeded its time bound
    #[error("timed out: {0}")]
    Timeout(String),

    /// Unparseable target address
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// State machine misuse: unregistered names, duplicate registration
    #[error("state machine error: {0}")]
    StateMachine(String),

    /// Gear registry misuse: duplicate gears, removing a live gear
    #[error("gear registry error: {0}")]
    Registry(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a protocol framing error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid address error
    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::InvalidAddress(msg.into())
    }

    /// Create a state machine error
    pub fn state_machine(msg: impl Into<String>) -> Self {
        Self::StateMachine(msg.into())
    }

    /// Create a gear registry error
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for errors an unreachable or restarting server routinely
    /// produces: transport failures, timeouts, and framing garbage from a
    /// half-up listener. Everything else points at a bug or bad input.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Timeout(_) | Self::Protocol(_) | Self::PingTokenMismatch { .. }
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
