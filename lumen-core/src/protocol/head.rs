//! Stream head exchange and the picture types shared across the protocol.
//!
//! ```text
//! Host   ──[Head]────────────────────────────► Client
//!   Payload: StreamHead (bincode)
//!
//! Client ──[HeadAck, value = 1]──────────────► Host
//!   Payload: empty
//! ```

use serde::{Deserialize, Serialize};

use crate::error::LumenError;
use crate::message::MessageType;
use crate::packet::WireMessage;

// ── Resolution ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// `true` when both dimensions lie within `[min, max]`.
    pub fn within(&self, min: Resolution, max: Resolution) -> bool {
        (min.width..=max.width).contains(&self.width)
            && (min.height..=max.height).contains(&self.height)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ── Codec / Format ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    H264,
    Hevc,
    Av1,
}

/// Pixel layout of the frames handed to the encoder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    #[default]
    Nv12,
    Bgra,
    Rgba,
}

impl VideoFormat {
    /// Bytes for one frame of `res` in this layout.
    pub fn frame_len(self, res: Resolution) -> usize {
        let px = res.pixels() as usize;
        match self {
            VideoFormat::Nv12 => px * 3 / 2,
            VideoFormat::Bgra | VideoFormat::Rgba => px * 4,
        }
    }
}

// ── StreamHead ────────────────────────────────────────────────────

/// First message of a stream: what the client is about to receive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamHead {
    pub resolution: Resolution,
    pub format: VideoFormat,
    pub codec: Codec,
    pub frame_rate: u32,
    /// The client must authenticate before sending control traffic.
    pub auth_required: bool,
}

impl StreamHead {
    pub fn to_bytes(&self) -> Result<Vec<u8>, LumenError> {
        bincode::serialize(self).map_err(|e| LumenError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LumenError> {
        bincode::deserialize(bytes).map_err(|e| LumenError::Encoding(e.to_string()))
    }

    pub fn into_message(self) -> Result<WireMessage, LumenError> {
        let payload = self.to_bytes()?;
        WireMessage::new(MessageType::Head, 0, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_bounds() {
        let min = Resolution::new(640, 480);
        let max = Resolution::new(1920, 1080);
        assert!(Resolution::new(1280, 720).within(min, max));
        assert!(Resolution::new(1920, 1080).within(min, max));
        assert!(!Resolution::new(2560, 1440).within(min, max));
        assert!(!Resolution::new(1280, 200).within(min, max));
    }

    #[test]
    fn nv12_frame_len() {
        assert_eq!(VideoFormat::Nv12.frame_len(Resolution::new(4, 4)), 24);
        assert_eq!(VideoFormat::Bgra.frame_len(Resolution::new(4, 4)), 64);
    }

    #[test]
    fn head_message_carries_payload() {
        let head = StreamHead {
            resolution: Resolution::new(1280, 720),
            format: VideoFormat::Nv12,
            codec: Codec::Hevc,
            frame_rate: 60,
            auth_required: true,
        };
        let msg = head.clone().into_message().unwrap();
        assert_eq!(msg.message_type().unwrap(), MessageType::Head);
        assert_eq!(StreamHead::from_bytes(msg.payload()).unwrap(), head);
    }
}
