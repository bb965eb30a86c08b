//! Domain-specific error types for the Lumen streaming core.
//!
//! Fallible operations return `Result<T, LumenError>`. Predictor numeric
//! faults never surface here; they are absorbed by the estimator pipeline.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the streaming core.
#[derive(Debug, Error)]
pub enum LumenError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// Received bytes that do not start with the `LMN0` sentinel.
    #[error("invalid magic bytes: expected LMN0")]
    InvalidMagic,

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u32 },

    /// A message violated protocol rules (wrong order, wrong tag, ...).
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// The payload exceeds the allowed size for its message type.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The buffer is shorter or longer than the header announces.
    #[error("invalid message length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// A control message carried values the session refuses to apply.
    #[error("invalid control: {0}")]
    InvalidControl(String),

    // ── Session Errors ───────────────────────────────────────────
    /// The session is not in a state that accepts the operation.
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    /// The client failed the authentication exchange.
    #[error("authentication failed for client {0:?}")]
    AuthFailed(String),

    /// The encoder rejected a reconfiguration; the previous configuration
    /// is still active.
    #[error("reconfiguration rejected: {0}")]
    Reconfigure(String),

    /// Unrecoverable stream failure. The session must be torn down.
    #[error("fatal stream error: {0}")]
    Fatal(String),

    /// Error reported by the external encoder.
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl LumenError {
    /// Returns `true` for faults that end the session or connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LumenError::Fatal(_)
                | LumenError::AuthFailed(_)
                | LumenError::Connection(_)
                | LumenError::ChannelClosed
        )
    }
}

// ── EncoderError ─────────────────────────────────────────────────

/// Typed error for the external encoder collaborator.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// The encoder could not be started with the given configuration.
    #[error("encoder start failed: {0}")]
    Start(String),

    /// A runtime parameter was not accepted.
    #[error("parameter rejected: {0}")]
    Rejected(String),

    /// The encoder has not been started (or was stopped).
    #[error("encoder not running")]
    NotRunning,

    /// Encoding a frame failed.
    #[error("encode failed: {0}")]
    Encode(String),
}

// ── Conversions ──────────────────────────────────────────────────

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for LumenError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        LumenError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for LumenError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        LumenError::Encoding(e.to_string())
    }
}
