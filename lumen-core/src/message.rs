//! Wire message types and control discriminants.
//!
//! Enums convert with `TryFrom`, so unknown values are errors, not panics.
//! Discriminant values are part of the protocol and must stay stable.

use crate::error::LumenError;
use std::fmt;

// ── MessageType ──────────────────────────────────────────────────

/// The `type` field of a [`WireHeader`](crate::header::WireHeader).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Stream description (resolution, format, auth requirement).
    Head = 0x01,
    HeadAck = 0x02,
    /// An encoded video frame.
    Frame = 0x03,
    FrameAck = 0x04,
    /// A control operation; `value` carries the [`ControlKind`].
    Control = 0x05,
    ControlAck = 0x06,
    /// Authentication request (id/key pair).
    Auth = 0x07,
    /// Authentication result; `value` is 1 on success.
    AuthAck = 0x08,
    /// Generic notification (video format change).
    Message = 0x09,
    MessageAck = 0x0A,
}

impl TryFrom<u32> for MessageType {
    type Error = LumenError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageType::Head),
            0x02 => Ok(MessageType::HeadAck),
            0x03 => Ok(MessageType::Frame),
            0x04 => Ok(MessageType::FrameAck),
            0x05 => Ok(MessageType::Control),
            0x06 => Ok(MessageType::ControlAck),
            0x07 => Ok(MessageType::Auth),
            0x08 => Ok(MessageType::AuthAck),
            0x09 => Ok(MessageType::Message),
            0x0A => Ok(MessageType::MessageAck),
            _ => Err(LumenError::UnknownVariant {
                type_name: "MessageType",
                value,
            }),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl MessageType {
    /// The acknowledgement type paired with a request type, if any.
    pub fn ack(&self) -> Option<MessageType> {
        match self {
            MessageType::Head => Some(MessageType::HeadAck),
            MessageType::Frame => Some(MessageType::FrameAck),
            MessageType::Control => Some(MessageType::ControlAck),
            MessageType::Auth => Some(MessageType::AuthAck),
            MessageType::Message => Some(MessageType::MessageAck),
            _ => None,
        }
    }
}

// ── ControlKind ──────────────────────────────────────────────────

/// Control operation tags carried in the header `value` of
/// [`MessageType::Control`] messages.
///
/// Organized by category:
/// - `0x01..0x0F`: stream lifecycle and keyframes
/// - `0x10..0x2F`: rate control and picture parameters
/// - `0x30..0x3F`: diagnostics dumps
/// - `0x40`: client feedback
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    // ── Lifecycle (0x0x) ─────────────────────────────────────────
    KeyFrame = 0x01,
    Start = 0x02,
    Pause = 0x03,
    Stop = 0x04,
    SkipFrame = 0x05,

    // ── Parameters (0x1x / 0x2x) ─────────────────────────────────
    Bitrate = 0x10,
    MaxBitrate = 0x11,
    Qp = 0x12,
    MinMaxQp = 0x13,
    MaxFrameSize = 0x14,
    Gop = 0x15,
    FrameRate = 0x16,
    Resolution = 0x17,
    RollingIntraRefresh = 0x18,
    RegionOfInterest = 0x19,
    Sei = 0x1A,
    Codec = 0x1B,
    ProfileLevel = 0x1C,

    // ── Dumps (0x3x) ─────────────────────────────────────────────
    DumpStart = 0x30,
    DumpStop = 0x31,
    InputOutputDump = 0x32,
    ScreenCapture = 0x33,

    // ── Feedback (0x40) ──────────────────────────────────────────
    ClientFeedback = 0x40,
}

impl TryFrom<u32> for ControlKind {
    type Error = LumenError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(ControlKind::KeyFrame),
            0x02 => Ok(ControlKind::Start),
            0x03 => Ok(ControlKind::Pause),
            0x04 => Ok(ControlKind::Stop),
            0x05 => Ok(ControlKind::SkipFrame),

            0x10 => Ok(ControlKind::Bitrate),
            0x11 => Ok(ControlKind::MaxBitrate),
            0x12 => Ok(ControlKind::Qp),
            0x13 => Ok(ControlKind::MinMaxQp),
            0x14 => Ok(ControlKind::MaxFrameSize),
            0x15 => Ok(ControlKind::Gop),
            0x16 => Ok(ControlKind::FrameRate),
            0x17 => Ok(ControlKind::Resolution),
            0x18 => Ok(ControlKind::RollingIntraRefresh),
            0x19 => Ok(ControlKind::RegionOfInterest),
            0x1A => Ok(ControlKind::Sei),
            0x1B => Ok(ControlKind::Codec),
            0x1C => Ok(ControlKind::ProfileLevel),

            0x30 => Ok(ControlKind::DumpStart),
            0x31 => Ok(ControlKind::DumpStop),
            0x32 => Ok(ControlKind::InputOutputDump),
            0x33 => Ok(ControlKind::ScreenCapture),

            0x40 => Ok(ControlKind::ClientFeedback),

            _ => Err(LumenError::UnknownVariant {
                type_name: "ControlKind",
                value,
            }),
        }
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl ControlKind {
    /// Returns `true` if the client expects a `ControlAck` for this kind.
    ///
    /// Feedback arrives once per frame and is never acknowledged.
    pub fn expects_ack(&self) -> bool {
        !matches!(self, ControlKind::ClientFeedback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_roundtrip() {
        let all = [
            MessageType::Head,
            MessageType::HeadAck,
            MessageType::Frame,
            MessageType::FrameAck,
            MessageType::Control,
            MessageType::ControlAck,
            MessageType::Auth,
            MessageType::AuthAck,
            MessageType::Message,
            MessageType::MessageAck,
        ];
        for ty in all {
            assert_eq!(MessageType::try_from(ty as u32).unwrap(), ty);
        }
    }

    #[test]
    fn message_type_invalid() {
        assert!(MessageType::try_from(0xFF).is_err());
    }

    #[test]
    fn acks_pair_with_requests() {
        assert_eq!(MessageType::Control.ack(), Some(MessageType::ControlAck));
        assert_eq!(MessageType::ControlAck.ack(), None);
    }

    #[test]
    fn control_kind_invalid() {
        assert!(ControlKind::try_from(0xDEAD).is_err());
        assert_eq!(
            ControlKind::try_from(0x40).unwrap(),
            ControlKind::ClientFeedback
        );
    }

    #[test]
    fn feedback_is_not_acked() {
        assert!(!ControlKind::ClientFeedback.expects_ack());
        assert!(ControlKind::Resolution.expects_ack());
    }
}
