//! Unified error types for kaiwa.
//!
//! Every module reports failures through its own error enum; all of them
//! convert into the top-level [`KaiwaError`].

use std::fmt;

// ============================================================================
// Main Error Type
// ============================================================================

/// The main error type for kaiwa operations.
#[derive(Debug, thiserror::Error)]
pub enum KaiwaError {
    /// Message bus error.
    #[error("bus: {0}")]
    Bus(#[from] BusError),

    /// Channel error.
    #[error("channel: {0}")]
    Channel(#[from] ChannelError),

    /// Configuration error.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// Session handler error that escaped the registry.
    #[error("handler: {0}")]
    Handler(#[from] HandlerError),

    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Task join error.
    #[error("task: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for KaiwaError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result type alias for kaiwa operations.
pub type Result<T> = std::result::Result<T, KaiwaError>;

// ============================================================================
// Message Bus Errors
// ============================================================================

/// Error type for message bus operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// The inbound queue has no consumer left.
    #[error("inbound channel closed")]
    InboundClosed,

    /// Nobody is subscribed to receive an outbound message.
    #[error("outbound channel closed")]
    OutboundClosed,
}

/// Result type for message bus operations.
pub type BusResult<T> = std::result::Result<T, BusError>;

// ============================================================================
// Channel Errors
// ============================================================================

/// Error type for channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Failed to write to the platform.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The bus refused a received message.
    #[error("bus: {0}")]
    Bus(#[from] BusError),
}

impl ChannelError {
    /// Create a send failed error.
    #[inline]
    pub fn send(msg: impl Into<String>) -> Self {
        Self::SendFailed(msg.into())
    }
}

/// Result type for channel operations.
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

// ============================================================================
// Session Handler Errors
// ============================================================================

/// Failure raised by a session handler while processing one event.
///
/// The `Display` output is what the originator sees after the `"ERROR: "`
/// prefix, so variants render as plain human-readable text.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Free-form failure description.
    #[error("{0}")]
    Message(String),

    /// The incoming message could not be understood by the session.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A reply issued by the handler could not be queued.
    #[error("reply failed: {0}")]
    Reply(#[from] BusError),
}

impl HandlerError {
    /// Create a free-form handler failure.
    #[inline]
    pub fn msg(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }

    /// Create an invalid input failure.
    #[inline]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// Result type for session handlers.
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// Invalid value.
    #[error("invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create an invalid value error.
    #[inline]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Display Helpers
// ============================================================================

/// A wrapper that displays errors in a user-friendly format.
#[derive(Debug)]
pub struct DisplayError<'a>(pub &'a KaiwaError);

impl fmt::Display for DisplayError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            KaiwaError::Bus(e) => write!(f, "Message bus error: {e}"),
            KaiwaError::Channel(e) => write!(f, "Channel error: {e}"),
            KaiwaError::Config(e) => write!(f, "Configuration error: {e}"),
            KaiwaError::Handler(e) => write!(f, "Session handler error: {e}"),
            KaiwaError::Io(e) => write!(f, "IO error: {e}"),
            KaiwaError::Json(e) => write!(f, "JSON error: {e}"),
            KaiwaError::Task(e) => write!(f, "Task error: {e}"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
