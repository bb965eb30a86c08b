//! Encoded frame transport.
//!
//! ```text
//! Host   ──[Frame, value = frame_number]─────► Client   (repeated)
//!   Payload: info_len u32 | FrameInfo (bincode) | video | alpha
//!
//! Client ──[FrameAck, value = frame_number]──► Host     (optional)
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::LumenError;
use crate::flags::FrameFlags;
use crate::message::MessageType;
use crate::packet::WireMessage;

/// Frame metadata preceding the encoded bytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_number: u64,
    pub flags: FrameFlags,
    /// Total bytes following the info block (`video_size + alpha_size`).
    pub data_size: u32,
    pub video_size: u32,
    pub alpha_size: u32,
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp in microseconds since the stream started.
    pub pts_us: u64,
}

/// A complete frame message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePayload {
    pub info: FrameInfo,
    pub data: Bytes,
}

impl FramePayload {
    pub fn new(info: FrameInfo, data: Bytes) -> Result<Self, LumenError> {
        if info.data_size as usize != data.len()
            || info.video_size as u64 + info.alpha_size as u64 != info.data_size as u64
        {
            return Err(LumenError::InvalidLength {
                expected: info.data_size as usize,
                actual: data.len(),
            });
        }
        Ok(Self { info, data })
    }

    pub fn video(&self) -> &[u8] {
        &self.data[..self.info.video_size as usize]
    }

    pub fn alpha(&self) -> &[u8] {
        &self.data[self.info.video_size as usize..]
    }

    pub fn into_message(self) -> Result<WireMessage, LumenError> {
        let info = bincode::serialize(&self.info)?;
        let mut buf = BytesMut::with_capacity(4 + info.len() + self.data.len());
        buf.put_u32_le(info.len() as u32);
        buf.put_slice(&info);
        buf.put_slice(&self.data);
        WireMessage::new(MessageType::Frame, self.info.frame_number as u32, buf.freeze())
    }

    pub fn from_message(msg: &WireMessage) -> Result<Self, LumenError> {
        if msg.message_type()? != MessageType::Frame {
            return Err(LumenError::ProtocolViolation("expected a Frame message"));
        }
        let body = msg.payload();
        let len_bytes: [u8; 4] = body
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or(LumenError::InvalidLength {
                expected: 4,
                actual: body.len(),
            })?;
        let info_len = u32::from_le_bytes(len_bytes) as usize;
        let info_bytes = body.get(4..4 + info_len).ok_or(LumenError::InvalidLength {
            expected: 4 + info_len,
            actual: body.len(),
        })?;
        let info: FrameInfo = bincode::deserialize(info_bytes)?;
        Self::new(info, Bytes::copy_from_slice(&body[4 + info_len..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(video: u32, alpha: u32) -> FrameInfo {
        FrameInfo {
            frame_number: 12,
            flags: FrameFlags::KEY,
            data_size: video + alpha,
            video_size: video,
            alpha_size: alpha,
            width: 640,
            height: 360,
            pts_us: 200_000,
        }
    }

    #[test]
    fn frame_message_splits_video_and_alpha() {
        let data = Bytes::from(vec![1, 1, 1, 2, 2]);
        let payload = FramePayload::new(info(3, 2), data).unwrap();
        let msg = payload.clone().into_message().unwrap();
        assert_eq!(msg.value(), 12);

        let decoded = FramePayload::from_message(&msg).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.video(), &[1, 1, 1]);
        assert_eq!(decoded.alpha(), &[2, 2]);
        assert!(decoded.info.flags.contains(FrameFlags::KEY));
    }

    #[test]
    fn size_mismatch_rejected() {
        assert!(FramePayload::new(info(3, 0), Bytes::from_static(&[1, 2])).is_err());
    }

    #[test]
    fn truncated_body_rejected() {
        let msg = WireMessage::new(MessageType::Frame, 0, vec![0xFF, 0, 0, 0, 1]).unwrap();
        assert!(FramePayload::from_message(&msg).is_err());
    }
}
