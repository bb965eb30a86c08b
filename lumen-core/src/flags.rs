use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-frame flags carried in [`FrameInfo`](crate::protocol::FrameInfo).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FrameFlags: u32 {
        /// The frame is an IDR / keyframe.
        const KEY = 0x1;
        /// The encoder flagged the frame as corrupt; the client may drop it.
        const CORRUPT = 0x2;
        /// The frame carries an alpha plane after the video data.
        const ALPHA = 0x4;
    }
}

bitflags! {
    /// Per-instance encoder flags queried / set by the session.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EncoderFlags: u32 {
        /// Input surfaces are VA-API surfaces.
        const VA_SURFACE = 0x1;
        /// Input surfaces are QSV surfaces.
        const QSV_SURFACE = 0x2;
        /// Encode the alpha channel as a separate plane.
        const ALPHA_CHANNEL = 0x4;
        /// Encode cadence follows the renderer instead of a fixed timer.
        const RENDER_FPS_ENC = 0x8;
        /// Skip encoding until cleared.
        const SKIP_FRAME = 0x10;
    }
}
