//! Stream session lifecycle.
//!
//! Transitions are validated and return `Result` instead of panicking.

use std::time::Instant;

use crate::error::LumenError;

/// ```text
///  Idle ──start──► Streaming ◄──resume── Paused
///                      │     ──pause───►   │
///                      ▼                   ▼
///   (any) ─────────────────stop──────► Stopped
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Streaming {
        since: Instant,
    },
    Paused,
    /// Terminal.
    Stopped,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Streaming { .. } => write!(f, "Streaming"),
            Self::Paused => write!(f, "Paused"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

impl SessionPhase {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// The encoder has been started and not yet stopped.
    pub fn encoder_running(&self) -> bool {
        matches!(self, Self::Streaming { .. } | Self::Paused)
    }

    pub fn streaming_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Streaming { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    pub fn start(&mut self) -> Result<(), LumenError> {
        match self {
            Self::Idle => {
                *self = Self::Streaming {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(LumenError::InvalidState("cannot start: session is not idle")),
        }
    }

    pub fn pause(&mut self) -> Result<(), LumenError> {
        match self {
            Self::Streaming { .. } => {
                *self = Self::Paused;
                Ok(())
            }
            _ => Err(LumenError::InvalidState("cannot pause: session is not streaming")),
        }
    }

    pub fn resume(&mut self) -> Result<(), LumenError> {
        match self {
            Self::Paused => {
                *self = Self::Streaming {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(LumenError::InvalidState("cannot resume: session is not paused")),
        }
    }

    /// Valid from every phase; stopping twice is a no-op.
    pub fn stop(&mut self) {
        *self = Self::Stopped;
    }
}
