//! Authentication exchange.
//!
//! ```text
//! Client ──[Auth]────────────────────────────► Host
//!   Payload: AuthRequest (bincode)
//!
//! Host   ──[AuthAck, value = 1 | 0]──────────► Client
//!   Payload: AuthResult (bincode)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::LumenError;
use crate::message::MessageType;
use crate::packet::WireMessage;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthRequest {
    pub id: String,
    pub key: String,
}

impl AuthRequest {
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LumenError> {
        bincode::deserialize(bytes).map_err(|e| LumenError::Encoding(e.to_string()))
    }

    pub fn into_message(self) -> Result<WireMessage, LumenError> {
        let payload = bincode::serialize(&self)?;
        WireMessage::new(MessageType::Auth, 0, payload)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthResult {
    pub success: bool,
    /// Number of the client slot assigned on success.
    pub client_num: u32,
}

impl AuthResult {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LumenError> {
        bincode::deserialize(bytes).map_err(|e| LumenError::Encoding(e.to_string()))
    }

    pub fn into_message(self) -> Result<WireMessage, LumenError> {
        let payload = bincode::serialize(&self)?;
        WireMessage::new(MessageType::AuthAck, self.success as u32, payload)
    }
}
