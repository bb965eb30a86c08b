//! Control operations (client → host) and their acknowledgements.
//!
//! ```text
//! Client ──[Control, value = ControlKind]────► Host
//!   Payload: ControlMessage (bincode)
//!
//! Host   ──[ControlAck, value = ControlKind]─► Client   (not for feedback)
//!   Payload: ControlAck (bincode)
//! ```
//!
//! The header `value` must agree with the decoded variant; a mismatch is a
//! protocol violation and the message is dropped.

use serde::{Deserialize, Serialize};

use crate::error::LumenError;
use crate::message::{ControlKind, MessageType};
use crate::packet::WireMessage;
use crate::protocol::head::{Codec, Resolution};

/// Rolling intra refresh direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RirKind {
    #[default]
    Off,
    Row,
    Column,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Baseline,
    #[default]
    Main,
    High,
    Main10,
}

/// Diagnostics streams the encoder can dump.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DumpTarget {
    /// Encoder runtime statistics.
    Runtime,
    /// Raw frames entering the encoder.
    Input,
    /// Bitstream leaving the encoder.
    Output,
    /// Frames as delivered by screen capture.
    ScreenCapture,
}

/// One control operation. Each variant carries only its own fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ControlMessage {
    KeyFrame,
    Start,
    Pause,
    Stop,
    SkipFrame { enabled: bool },

    Bitrate { bps: u32 },
    MaxBitrate { bps: u32 },
    Qp { qp: u8 },
    MinMaxQp { min: u8, max: u8 },
    MaxFrameSize { bytes: u32 },
    Gop { size: u32 },
    FrameRate { fps: u32 },
    Resolution { width: u32, height: u32 },
    RollingIntraRefresh { kind: RirKind, cycle_size: u32, qp_delta: i8 },
    RegionOfInterest { x: u32, y: u32, width: u32, height: u32, delta_qp: i8, priority: u8 },
    Sei { enabled: bool, payload_type: u8 },
    Codec { codec: Codec },
    ProfileLevel { profile: Profile, level: u8 },

    DumpStart,
    DumpStop,
    InputOutputDump { input: bool, output: bool },
    ScreenCapture { enabled: bool },

    /// Client-measured delay for a frame of `size_bytes`. Negative delays
    /// mean the client had no measurement.
    ClientFeedback { delay_ms: f64, size_bytes: u32 },
}

impl ControlMessage {
    pub fn kind(&self) -> ControlKind {
        match self {
            ControlMessage::KeyFrame => ControlKind::KeyFrame,
            ControlMessage::Start => ControlKind::Start,
            ControlMessage::Pause => ControlKind::Pause,
            ControlMessage::Stop => ControlKind::Stop,
            ControlMessage::SkipFrame { .. } => ControlKind::SkipFrame,
            ControlMessage::Bitrate { .. } => ControlKind::Bitrate,
            ControlMessage::MaxBitrate { .. } => ControlKind::MaxBitrate,
            ControlMessage::Qp { .. } => ControlKind::Qp,
            ControlMessage::MinMaxQp { .. } => ControlKind::MinMaxQp,
            ControlMessage::MaxFrameSize { .. } => ControlKind::MaxFrameSize,
            ControlMessage::Gop { .. } => ControlKind::Gop,
            ControlMessage::FrameRate { .. } => ControlKind::FrameRate,
            ControlMessage::Resolution { .. } => ControlKind::Resolution,
            ControlMessage::RollingIntraRefresh { .. } => ControlKind::RollingIntraRefresh,
            ControlMessage::RegionOfInterest { .. } => ControlKind::RegionOfInterest,
            ControlMessage::Sei { .. } => ControlKind::Sei,
            ControlMessage::Codec { .. } => ControlKind::Codec,
            ControlMessage::ProfileLevel { .. } => ControlKind::ProfileLevel,
            ControlMessage::DumpStart => ControlKind::DumpStart,
            ControlMessage::DumpStop => ControlKind::DumpStop,
            ControlMessage::InputOutputDump { .. } => ControlKind::InputOutputDump,
            ControlMessage::ScreenCapture { .. } => ControlKind::ScreenCapture,
            ControlMessage::ClientFeedback { .. } => ControlKind::ClientFeedback,
        }
    }

    pub fn resolution(width: u32, height: u32) -> Self {
        ControlMessage::Resolution { width, height }
    }

    pub fn feedback(delay_ms: f64, size_bytes: u32) -> Self {
        ControlMessage::ClientFeedback {
            delay_ms,
            size_bytes,
        }
    }

    /// The requested resolution, for `Resolution` messages.
    pub fn requested_resolution(&self) -> Option<Resolution> {
        match *self {
            ControlMessage::Resolution { width, height } => Some(Resolution::new(width, height)),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, LumenError> {
        bincode::serialize(self).map_err(|e| LumenError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LumenError> {
        bincode::deserialize(bytes).map_err(|e| LumenError::Encoding(e.to_string()))
    }

    pub fn into_message(self) -> Result<WireMessage, LumenError> {
        let payload = self.to_bytes()?;
        WireMessage::new(MessageType::Control, self.kind() as u32, payload)
    }

    /// Decode a `Control` message, checking the header tag against the body.
    pub fn from_message(msg: &WireMessage) -> Result<Self, LumenError> {
        if msg.message_type()? != MessageType::Control {
            return Err(LumenError::ProtocolViolation("expected a Control message"));
        }
        let tagged = ControlKind::try_from(msg.value())?;
        let control = Self::from_bytes(msg.payload())?;
        if control.kind() != tagged {
            return Err(LumenError::ProtocolViolation(
                "control tag does not match payload",
            ));
        }
        Ok(control)
    }
}

// ── ControlAck ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlAck {
    pub applied: bool,
    /// Rejection reason; empty when applied.
    pub detail: String,
}

impl ControlAck {
    pub fn applied() -> Self {
        Self {
            applied: true,
            detail: String::new(),
        }
    }

    pub fn rejected(detail: impl Into<String>) -> Self {
        Self {
            applied: false,
            detail: detail.into(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LumenError> {
        bincode::deserialize(bytes).map_err(|e| LumenError::Encoding(e.to_string()))
    }

    pub fn into_message(self, kind: ControlKind) -> Result<WireMessage, LumenError> {
        let payload = bincode::serialize(&self)?;
        WireMessage::new(MessageType::ControlAck, kind as u32, payload)
    }
}
