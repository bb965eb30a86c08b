//! Generic host notifications.
//!
//! ```text
//! Host   ──[Message, value = NoticeKind]─────► Client
//!   Payload: Notice (bincode)
//!
//! Client ──[MessageAck, value = NoticeKind]──► Host
//! ```

use serde::{Deserialize, Serialize};

use crate::error::LumenError;
use crate::message::MessageType;
use crate::packet::WireMessage;
use crate::protocol::head::{Codec, Resolution, VideoFormat};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    VideoFormatChange = 0x1,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Notice {
    /// The stream was reconfigured; frames after this use the new format.
    VideoFormatChange {
        resolution: Resolution,
        format: VideoFormat,
        codec: Codec,
    },
}

impl Notice {
    pub fn kind(&self) -> NoticeKind {
        match self {
            Notice::VideoFormatChange { .. } => NoticeKind::VideoFormatChange,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LumenError> {
        bincode::deserialize(bytes).map_err(|e| LumenError::Encoding(e.to_string()))
    }

    pub fn into_message(self) -> Result<WireMessage, LumenError> {
        let payload = bincode::serialize(&self)?;
        WireMessage::new(MessageType::Message, self.kind() as u32, payload)
    }
}
