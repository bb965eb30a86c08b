//! Encoder-facing stream configuration.

use serde::{Deserialize, Serialize};

use crate::protocol::control::{Profile, RirKind};
use crate::protocol::head::{Codec, Resolution, StreamHead, VideoFormat};

/// Rolling intra refresh settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RirConfig {
    pub kind: RirKind,
    pub cycle_size: u32,
    pub qp_delta: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiConfig {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub delta_qp: i8,
    pub priority: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SeiConfig {
    pub enabled: bool,
    pub payload_type: u8,
}

/// Everything the encoder needs to (re)start, plus the bounds the session
/// enforces on client requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub resolution: Resolution,
    pub min_resolution: Resolution,
    pub max_resolution: Resolution,
    /// Substituted when a requested resolution is out of bounds.
    pub default_resolution: Resolution,
    pub format: VideoFormat,
    pub codec: Codec,
    pub profile: Profile,
    pub level: u8,
    pub frame_rate: u32,
    pub gop_size: u32,
    pub bitrate_bps: u32,
    pub max_bitrate_bps: u32,
    /// Hard ceiling for a single encoded frame, in bytes.
    pub max_frame_size: u32,
    pub qp: u8,
    pub min_qp: u8,
    pub max_qp: u8,
    pub rir: RirConfig,
    pub roi: Option<RoiConfig>,
    pub sei: SeiConfig,
    pub auth_required: bool,
    /// Run the predictor for logging only; never retarget the encoder.
    pub logs_only: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        let hd = Resolution::new(1920, 1080);
        Self {
            resolution: hd,
            min_resolution: Resolution::new(320, 240),
            max_resolution: Resolution::new(3840, 2160),
            default_resolution: hd,
            format: VideoFormat::Nv12,
            codec: Codec::H264,
            profile: Profile::Main,
            level: 42,
            frame_rate: 60,
            gop_size: 120,
            bitrate_bps: 20_000_000,
            max_bitrate_bps: 40_000_000,
            max_frame_size: 1_000_000,
            qp: 26,
            min_qp: 10,
            max_qp: 51,
            rir: RirConfig::default(),
            roi: None,
            sei: SeiConfig::default(),
            auth_required: false,
            logs_only: false,
        }
    }
}

impl StreamConfig {
    /// Highest QP the encoders accept.
    pub const QP_LIMIT: u8 = 51;

    /// The resolution to apply for a client request: the request itself when
    /// it lies within bounds, otherwise the configured default.
    pub fn bounded_resolution(&self, requested: Resolution) -> Resolution {
        if requested.within(self.min_resolution, self.max_resolution) {
            requested
        } else {
            self.default_resolution
        }
    }

    /// Copy of `self` at `resolution`, with per-pixel rate parameters
    /// rescaled by the pixel-count ratio.
    pub fn rescaled(&self, resolution: Resolution) -> StreamConfig {
        let mut next = self.clone();
        next.resolution = resolution;
        let old = self.resolution.pixels();
        let new = resolution.pixels();
        if old > 0 && new != old {
            let scale = |v: u32| -> u32 { (v as u64 * new / old).clamp(1, u32::MAX as u64) as u32 };
            next.bitrate_bps = scale(self.bitrate_bps);
            next.max_bitrate_bps = scale(self.max_bitrate_bps);
            next.max_frame_size = scale(self.max_frame_size);
        }
        // A region of interest from the old geometry may no longer fit.
        if next
            .roi
            .is_some_and(|r| r.x + r.width > resolution.width || r.y + r.height > resolution.height)
        {
            next.roi = None;
        }
        next
    }

    pub fn head(&self) -> StreamHead {
        StreamHead {
            resolution: self.resolution,
            format: self.format,
            codec: self.codec,
            frame_rate: self.frame_rate,
            auth_required: self.auth_required,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_bounds_request_uses_default() {
        let config = StreamConfig {
            max_resolution: Resolution::new(1280, 720),
            default_resolution: Resolution::new(1280, 720),
            ..StreamConfig::default()
        };
        assert_eq!(
            config.bounded_resolution(Resolution::new(1920, 1080)),
            Resolution::new(1280, 720)
        );
        assert_eq!(
            config.bounded_resolution(Resolution::new(800, 600)),
            Resolution::new(800, 600)
        );
        assert_eq!(
            config.bounded_resolution(Resolution::new(100, 100)),
            Resolution::new(1280, 720)
        );
    }

    #[test]
    fn rescale_follows_pixel_count() {
        let config = StreamConfig {
            resolution: Resolution::new(1920, 1080),
            bitrate_bps: 8_000_000,
            max_bitrate_bps: 16_000_000,
            max_frame_size: 400_000,
            ..StreamConfig::default()
        };
        let half = config.rescaled(Resolution::new(960, 1080));
        assert_eq!(half.bitrate_bps, 4_000_000);
        assert_eq!(half.max_bitrate_bps, 8_000_000);
        assert_eq!(half.max_frame_size, 200_000);
        assert_eq!(half.resolution, Resolution::new(960, 1080));
    }

    #[test]
    fn rescale_drops_roi_outside_new_frame() {
        let config = StreamConfig {
            roi: Some(RoiConfig {
                x: 1500,
                y: 0,
                width: 200,
                height: 200,
                delta_qp: -4,
                priority: 1,
            }),
            ..StreamConfig::default()
        };
        assert!(config.rescaled(Resolution::new(1280, 720)).roi.is_none());
        assert!(config.rescaled(Resolution::new(2560, 1440)).roi.is_some());
    }
}
