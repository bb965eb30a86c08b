//! Synthetic capture producer.
//!
//! Renders a scrolling colour-bar pattern at its own cadence and hands each
//! frame to the pacing queue. The stream resolution is followed through a
//! `watch` channel so frames match the encoder after a reconfiguration.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::debug;

use lumen_core::pacing::{FramePacket, FrameSender};
use lumen_core::protocol::{Resolution, VideoFormat};

pub struct TestPatternSource {
    format: VideoFormat,
    fps: u32,
    resolution: watch::Receiver<Resolution>,
    sequence: u64,
}

impl TestPatternSource {
    pub fn new(format: VideoFormat, fps: u32, resolution: watch::Receiver<Resolution>) -> Self {
        Self {
            format,
            fps: fps.max(1),
            resolution,
            sequence: 0,
        }
    }

    /// Render the next frame.
    pub fn next_frame(&mut self) -> FramePacket {
        let res = *self.resolution.borrow_and_update();
        let data = render(self.format, res, self.sequence);
        let packet = FramePacket::new(self.sequence, res, self.format, data);
        self.sequence += 1;
        packet
    }

    /// Produce frames until the queue is stopped.
    pub async fn run(mut self, sender: FrameSender) {
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / self.fps as f64));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if sender.send_frame(self.next_frame()).is_err() {
                break;
            }
        }
        debug!(frames = self.sequence, "test pattern source finished");
    }
}

/// Eight vertical bars, shifted by one column per frame.
fn render(format: VideoFormat, res: Resolution, frame: u64) -> Bytes {
    const BARS: [[u8; 3]; 8] = [
        [255, 255, 255],
        [255, 255, 0],
        [0, 255, 255],
        [0, 255, 0],
        [255, 0, 255],
        [255, 0, 0],
        [0, 0, 255],
        [0, 0, 0],
    ];
    let (w, h) = (res.width as usize, res.height as usize);
    let bar_width = (w / BARS.len()).max(1);
    let shift = frame as usize;
    let bar_at = |x: usize| BARS[((x + shift) / bar_width) % BARS.len()];

    let mut out = Vec::with_capacity(format.frame_len(res));
    match format {
        VideoFormat::Bgra | VideoFormat::Rgba => {
            for _ in 0..h {
                for x in 0..w {
                    let [r, g, b] = bar_at(x);
                    let px = if format == VideoFormat::Bgra {
                        [b, g, r, 255]
                    } else {
                        [r, g, b, 255]
                    };
                    out.extend_from_slice(&px);
                }
            }
        }
        VideoFormat::Nv12 => {
            // Luma plane, then a neutral interleaved chroma plane.
            for _ in 0..h {
                for x in 0..w {
                    let [r, g, b] = bar_at(x);
                    let y = (r as u32 * 77 + g as u32 * 150 + b as u32 * 29) >> 8;
                    out.push(y as u8);
                }
            }
            out.resize(format.frame_len(res), 128);
        }
    }
    Bytes::from(out)
}
