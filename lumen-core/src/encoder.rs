//! Reference [`VideoEncoder`] built on zstd.
//!
//! Not a video codec: each frame is compressed independently, which is
//! enough to exercise the session, the predictor loop and the wire path
//! end to end. The compression level follows the predictor's target size:
//!
//! - last frame over target → raise the level (smaller, slower);
//! - last frame under 80% of target → lower it (larger, faster).

use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use crate::error::EncoderError;
use crate::flags::{EncoderFlags, FrameFlags};
use crate::pacing::FramePacket;
use crate::protocol::control::DumpTarget;
use crate::protocol::head::VideoFormat;
use crate::session::{EncodedFrame, EncoderParam, StreamConfig, VideoEncoder};

const MIN_LEVEL: i32 = 1;
const MAX_LEVEL: i32 = 19;

pub struct ZstdEncoder {
    config: Option<StreamConfig>,
    level: i32,
    target_frame_size: Option<u32>,
    last_size: u32,
    frame_count: u64,
    frames_since_key: u32,
    force_key: bool,
    flags: EncoderFlags,
    dumps: HashSet<DumpTarget>,
}

impl ZstdEncoder {
    pub fn new() -> Self {
        Self {
            config: None,
            level: MIN_LEVEL,
            target_frame_size: None,
            last_size: 0,
            frame_count: 0,
            frames_since_key: 0,
            force_key: true,
            flags: EncoderFlags::empty(),
            dumps: HashSet::new(),
        }
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn target_frame_size(&self) -> Option<u32> {
        self.target_frame_size
    }

    pub fn is_running(&self) -> bool {
        self.config.is_some()
    }

    fn adjust_level(&mut self) {
        let Some(target) = self.target_frame_size else {
            return;
        };
        if self.last_size > target {
            self.level = (self.level + 1).min(MAX_LEVEL);
        } else if (self.last_size as u64) * 10 < target as u64 * 8 {
            self.level = (self.level - 1).max(MIN_LEVEL);
        }
    }

    fn compress(&self, data: &[u8]) -> Result<Bytes, EncoderError> {
        zstd::encode_all(data, self.level)
            .map(Bytes::from)
            .map_err(|e| EncoderError::Encode(format!("zstd encode failed: {e}")))
    }
}

impl Default for ZstdEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Split interleaved 4-byte pixels into (colour, alpha) planes.
fn split_alpha(data: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut colour = Vec::with_capacity(data.len() / 4 * 3);
    let mut alpha = Vec::with_capacity(data.len() / 4);
    for px in data.chunks_exact(4) {
        colour.extend_from_slice(&px[..3]);
        alpha.push(px[3]);
    }
    (colour, alpha)
}

#[async_trait]
impl VideoEncoder for ZstdEncoder {
    async fn start(&mut self, config: &StreamConfig) -> Result<(), EncoderError> {
        if config.resolution.pixels() == 0 {
            return Err(EncoderError::Start(format!(
                "unusable resolution {}",
                config.resolution
            )));
        }
        self.config = Some(config.clone());
        self.force_key = true;
        self.frames_since_key = 0;
        info!(resolution = %config.resolution, level = self.level, "zstd encoder started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), EncoderError> {
        if self.config.take().is_none() {
            return Err(EncoderError::NotRunning);
        }
        Ok(())
    }

    async fn encode(&mut self, frame: &FramePacket) -> Result<EncodedFrame, EncoderError> {
        let Some(config) = &self.config else {
            return Err(EncoderError::NotRunning);
        };
        let expected = frame.format.frame_len(frame.resolution);
        if frame.data.len() != expected {
            return Err(EncoderError::Encode(format!(
                "frame is {} bytes, {} {:?} needs {expected}",
                frame.data.len(),
                frame.resolution,
                frame.format
            )));
        }

        let mut flags = FrameFlags::empty();
        if self.force_key || self.frames_since_key >= config.gop_size.max(1) {
            flags |= FrameFlags::KEY;
            self.force_key = false;
            self.frames_since_key = 0;
        }
        self.frames_since_key += 1;

        let has_alpha = self.flags.contains(EncoderFlags::ALPHA_CHANNEL)
            && matches!(frame.format, VideoFormat::Bgra | VideoFormat::Rgba);
        let (video, alpha) = if has_alpha {
            let (colour, alpha) = split_alpha(&frame.data);
            (self.compress(&colour)?, self.compress(&alpha)?)
        } else {
            (self.compress(&frame.data)?, Bytes::new())
        };

        self.frame_count += 1;
        self.last_size = (video.len() + alpha.len()) as u32;
        self.adjust_level();

        if self.dumps.contains(&DumpTarget::Runtime) {
            debug!(
                frame = self.frame_count,
                raw = frame.data.len(),
                encoded = self.last_size,
                level = self.level,
                target = ?self.target_frame_size,
                "encoder runtime"
            );
        }

        Ok(EncodedFrame {
            frame_number: self.frame_count,
            flags,
            resolution: frame.resolution,
            pts_us: frame.pts_us,
            raw_size: frame.data.len() as u32,
            video,
            alpha,
        })
    }

    async fn apply(&mut self, param: EncoderParam) -> Result<(), EncoderError> {
        let Some(config) = self.config.as_mut() else {
            return Err(EncoderError::NotRunning);
        };
        match param {
            EncoderParam::Gop(size) => config.gop_size = size,
            EncoderParam::FrameRate(fps) => config.frame_rate = fps,
            EncoderParam::MaxFrameSize(bytes) => config.max_frame_size = bytes,
            EncoderParam::Bitrate(bps) => config.bitrate_bps = bps,
            EncoderParam::MaxBitrate(bps) => config.max_bitrate_bps = bps,
            // Quality knobs have no zstd equivalent.
            other => debug!(?other, "parameter ignored by zstd encoder"),
        }
        Ok(())
    }

    fn set_target_frame_size(&mut self, bytes: u32) {
        let ceiling = self
            .config
            .as_ref()
            .map_or(u32::MAX, |c| c.max_frame_size.max(1));
        self.target_frame_size = Some(bytes.min(ceiling));
    }

    fn force_keyframe(&mut self) {
        self.force_key = true;
    }

    fn push_dump(&mut self, target: DumpTarget, enabled: bool) {
        if enabled {
            self.dumps.insert(target);
        } else {
            self.dumps.remove(&target);
        }
    }

    fn flags(&self) -> EncoderFlags {
        self.flags
    }

    fn set_flags(&mut self, flags: EncoderFlags) {
        self.flags = flags;
    }
}
