//! Contract between the session and an external video encoder.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{EncoderError, LumenError};
use crate::flags::{EncoderFlags, FrameFlags};
use crate::pacing::FramePacket;
use crate::protocol::control::{DumpTarget, Profile};
use crate::protocol::frame::{FrameInfo, FramePayload};
use crate::protocol::head::Resolution;
use crate::session::config::{RirConfig, RoiConfig, SeiConfig, StreamConfig};

/// A runtime parameter change that does not require an encoder restart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EncoderParam {
    Qp(u8),
    MinMaxQp { min: u8, max: u8 },
    Bitrate(u32),
    MaxBitrate(u32),
    MaxFrameSize(u32),
    Gop(u32),
    FrameRate(u32),
    RollingIntraRefresh(RirConfig),
    RegionOfInterest(RoiConfig),
    Sei(SeiConfig),
    ProfileLevel { profile: Profile, level: u8 },
}

/// Output of one encode call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub frame_number: u64,
    pub flags: FrameFlags,
    pub resolution: Resolution,
    pub pts_us: u64,
    /// Input size, reported back to the predictor as the raw size.
    pub raw_size: u32,
    pub video: Bytes,
    pub alpha: Bytes,
}

impl EncodedFrame {
    pub fn encoded_size(&self) -> u32 {
        (self.video.len() + self.alpha.len()) as u32
    }

    pub fn into_payload(self) -> Result<FramePayload, LumenError> {
        let mut flags = self.flags;
        flags.set(FrameFlags::ALPHA, !self.alpha.is_empty());
        let info = FrameInfo {
            frame_number: self.frame_number,
            flags,
            data_size: self.encoded_size(),
            video_size: self.video.len() as u32,
            alpha_size: self.alpha.len() as u32,
            width: self.resolution.width,
            height: self.resolution.height,
            pts_us: self.pts_us,
        };
        let data = if self.alpha.is_empty() {
            self.video
        } else {
            let mut joined = Vec::with_capacity(info.data_size as usize);
            joined.extend_from_slice(&self.video);
            joined.extend_from_slice(&self.alpha);
            Bytes::from(joined)
        };
        FramePayload::new(info, data)
    }
}

/// The external encoder. Calls are serialized by the owning session.
#[async_trait]
pub trait VideoEncoder: Send {
    async fn start(&mut self, config: &StreamConfig) -> Result<(), EncoderError>;

    async fn stop(&mut self) -> Result<(), EncoderError>;

    async fn encode(&mut self, frame: &FramePacket) -> Result<EncodedFrame, EncoderError>;

    async fn apply(&mut self, param: EncoderParam) -> Result<(), EncoderError>;

    /// Target size in bytes for upcoming frames, from the predictor.
    fn set_target_frame_size(&mut self, bytes: u32);

    /// The next encoded frame is a keyframe.
    fn force_keyframe(&mut self);

    fn push_dump(&mut self, target: DumpTarget, enabled: bool);

    fn flags(&self) -> EncoderFlags;

    fn set_flags(&mut self, flags: EncoderFlags);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_joins_alpha_plane() {
        let frame = EncodedFrame {
            frame_number: 9,
            flags: FrameFlags::KEY,
            resolution: Resolution::new(4, 4),
            pts_us: 1234,
            raw_size: 64,
            video: Bytes::from_static(b"video"),
            alpha: Bytes::from_static(b"al"),
        };
        let payload = frame.into_payload().unwrap();
        assert_eq!(payload.video(), b"video");
        assert_eq!(payload.alpha(), b"al");
        assert!(payload.info.flags.contains(FrameFlags::KEY | FrameFlags::ALPHA));
        assert_eq!(payload.info.data_size, 7);
    }
}
