//! Single-slot frame handoff between a capture producer and the encode loop.
//!
//! The slot is a `tokio::sync::watch` channel: every [`FrameSender::send_frame`]
//! replaces whatever the reader has not consumed yet, so only the newest frame
//! is ever encoded. The reader decides *when* to take it:
//!
//! ```text
//! render_fps_enc = false   sleep until last_emit + 1/fps, emit newest
//!                          (re-emit previous frame if nothing new arrived)
//!
//! render_fps_enc = true    wait for a new frame, at most 1/min_fps
//!                          (or 1 s without a floor), then emit or go Idle
//! ```
//!
//! Parameter changes and stop requests arrive through a cloneable
//! [`PacingHandle`] and are picked up at the start of each read.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::LumenError;
use crate::protocol::head::{Resolution, VideoFormat};

/// Upper bound on a single reader wait and the stall-report interval.
pub const IDLE_CEILING: Duration = Duration::from_secs(1);

// ── FramePacket ──────────────────────────────────────────────────

/// A raw captured frame on its way to the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePacket {
    /// Producer-assigned sequence number.
    pub sequence: u64,
    pub resolution: Resolution,
    pub format: VideoFormat,
    pub data: Bytes,
    /// Optional display-control side data travelling with the frame.
    pub display_control: Option<Bytes>,
    /// Presentation / decode timestamps in microseconds since the queue was
    /// created. Stamped by the reader on emit.
    pub pts_us: u64,
    pub dts_us: u64,
}

impl FramePacket {
    pub fn new(sequence: u64, resolution: Resolution, format: VideoFormat, data: Bytes) -> Self {
        Self {
            sequence,
            resolution,
            format,
            data,
            display_control: None,
            pts_us: 0,
            dts_us: 0,
        }
    }

    pub fn with_display_control(mut self, control: Bytes) -> Self {
        self.display_control = Some(control);
        self
    }
}

// ── PacingConfig ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Target encode rate for fixed-interval pacing.
    pub frame_rate: f64,
    /// Follow the producer's cadence instead of a fixed timer.
    pub render_fps_enc: bool,
    /// Optional floor: re-emit the last frame if nothing new arrives
    /// within `1 / min_fps`.
    pub min_fps: Option<f64>,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            frame_rate: 60.0,
            render_fps_enc: false,
            min_fps: None,
        }
    }
}

impl PacingConfig {
    fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate.max(1.0))
    }

    fn wait_timeout(&self) -> Duration {
        match self.min_fps {
            // Floors below one frame per ceiling wait the ceiling.
            Some(fps) if fps > 0.0 => {
                Duration::from_secs_f64(1.0 / fps.max(1.0 / IDLE_CEILING.as_secs_f64()))
            }
            _ => IDLE_CEILING,
        }
    }

    fn has_floor(&self) -> bool {
        self.min_fps.is_some_and(|fps| fps > 0.0)
    }
}

/// Outcome of one [`FrameReader::read_frame`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacedRead {
    Frame(FramePacket),
    /// No frame arrived within the wait bound.
    Idle,
    /// The queue was stopped; no further frames will be delivered.
    Stopped,
}

// ── Queue ────────────────────────────────────────────────────────

/// Slot contents. `epoch` advances on every drain so the reader can tell
/// a frame sent after a drain from one it already re-emits.
#[derive(Debug, Default)]
struct Slot {
    epoch: u64,
    frame: Option<FramePacket>,
}

/// Construction helper returning the three endpoints of one queue.
pub struct FramePacingQueue {
    pub sender: FrameSender,
    pub reader: FrameReader,
    pub handle: PacingHandle,
}

impl FramePacingQueue {
    pub fn new(config: PacingConfig) -> Self {
        let (slot_tx, slot_rx) = watch::channel(Slot::default());
        let (params_tx, params_rx) = watch::channel(config);
        let slot_tx = Arc::new(slot_tx);
        let stop = CancellationToken::new();

        let sender = FrameSender {
            slot: Arc::clone(&slot_tx),
            stop: stop.clone(),
        };
        let handle = PacingHandle {
            slot: slot_tx,
            params: Arc::new(params_tx),
            stop: stop.clone(),
        };
        let reader = FrameReader {
            slot: slot_rx,
            params: params_rx,
            stop,
            seen_epoch: 0,
            created: Instant::now(),
            last_emit: None,
            last_frame: None,
            idle: Duration::ZERO,
            emitted: 0,
        };

        Self {
            sender,
            reader,
            handle,
        }
    }

    pub fn split(self) -> (FrameSender, FrameReader, PacingHandle) {
        (self.sender, self.reader, self.handle)
    }
}

// ── FrameSender ──────────────────────────────────────────────────

/// Producer endpoint. Never blocks.
#[derive(Debug)]
pub struct FrameSender {
    slot: Arc<watch::Sender<Slot>>,
    stop: CancellationToken,
}

impl FrameSender {
    /// Publish `packet`, dropping any frame the reader has not taken yet.
    pub fn send_frame(&self, packet: FramePacket) -> Result<(), LumenError> {
        if self.stop.is_cancelled() {
            return Err(LumenError::ChannelClosed);
        }
        self.slot.send_modify(|slot| {
            if let Some(dropped) = slot.frame.replace(packet) {
                debug!(sequence = dropped.sequence, "replaced frame in slot");
            }
        });
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

// ── PacingHandle ─────────────────────────────────────────────────

/// Control endpoint shared by whoever reconfigures or stops the stream.
#[derive(Debug, Clone)]
pub struct PacingHandle {
    slot: Arc<watch::Sender<Slot>>,
    params: Arc<watch::Sender<PacingConfig>>,
    stop: CancellationToken,
}

impl PacingHandle {
    /// Idempotent. A blocked reader returns [`PacedRead::Stopped`].
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            debug!("stopping frame pacing");
        }
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn set_frame_rate(&self, fps: f64) {
        self.params.send_modify(|p| p.frame_rate = fps);
    }

    pub fn set_min_fps(&self, min_fps: Option<f64>) {
        self.params.send_modify(|p| p.min_fps = min_fps);
    }

    pub fn set_render_fps_enc(&self, enabled: bool) {
        self.params.send_modify(|p| p.render_fps_enc = enabled);
    }

    pub fn config(&self) -> PacingConfig {
        *self.params.borrow()
    }

    /// Empty the slot without waking the reader. The reader also forgets
    /// its last emitted frame, so nothing from before the drain is re-sent;
    /// frames sent after the drain are delivered normally.
    pub fn drain(&self) {
        self.slot.send_if_modified(|slot| {
            slot.frame = None;
            slot.epoch += 1;
            false
        });
    }
}

// ── FrameReader ──────────────────────────────────────────────────

/// Consumer endpoint owned by the encode loop.
#[derive(Debug)]
pub struct FrameReader {
    slot: watch::Receiver<Slot>,
    params: watch::Receiver<PacingConfig>,
    stop: CancellationToken,
    /// Drain epoch the reader last synchronised with.
    seen_epoch: u64,
    created: Instant,
    last_emit: Option<Instant>,
    last_frame: Option<FramePacket>,
    /// Time spent without a fresh frame since the last one arrived.
    idle: Duration,
    emitted: u64,
}

impl FrameReader {
    /// Wait for the next frame according to the current pacing mode.
    pub async fn read_frame(&mut self) -> PacedRead {
        if self.stop.is_cancelled() {
            return PacedRead::Stopped;
        }

        let epoch = self.slot.borrow().epoch;
        self.sync_epoch(epoch);

        let config = *self.params.borrow_and_update();
        if config.render_fps_enc || self.last_frame.is_none() {
            self.read_event_driven(config).await
        } else {
            self.read_fixed_interval(config).await
        }
    }

    async fn read_fixed_interval(&mut self, config: PacingConfig) -> PacedRead {
        let started = Instant::now();
        if let Some(last) = self.last_emit {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => return PacedRead::Stopped,
                _ = sleep_until(last + config.interval()) => {}
            }
        }

        if let Some(packet) = self.take_pending() {
            self.idle = Duration::ZERO;
            return PacedRead::Frame(self.emit(packet));
        }

        self.note_idle(started.elapsed());
        match self.last_frame.clone() {
            Some(packet) => PacedRead::Frame(self.emit(packet)),
            None => PacedRead::Idle,
        }
    }

    async fn read_event_driven(&mut self, config: PacingConfig) -> PacedRead {
        let started = Instant::now();
        let deadline = started + config.wait_timeout();
        loop {
            let notified = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return PacedRead::Stopped,
                changed = self.slot.changed() => changed.is_ok(),
                _ = sleep_until(deadline) => false,
            };

            if notified {
                // `changed` already marked the value as seen.
                if let Some(packet) = self.take_current() {
                    self.idle = Duration::ZERO;
                    return PacedRead::Frame(self.emit(packet));
                }
                continue;
            }
            if self.slot.has_changed().is_err() {
                // Producer dropped and nothing is pending.
                return PacedRead::Stopped;
            }
            break;
        }

        self.note_idle(started.elapsed());
        match (&self.last_frame, config.has_floor()) {
            (Some(last), true) => {
                let packet = last.clone();
                PacedRead::Frame(self.emit(packet))
            }
            _ => PacedRead::Idle,
        }
    }

    /// Accumulate time without a fresh frame; report a stall once per ceiling.
    fn note_idle(&mut self, waited: Duration) {
        self.idle += waited;
        if self.idle >= IDLE_CEILING {
            warn!(waited_ms = self.idle.as_millis() as u64, "no new frame from producer");
            self.idle = Duration::ZERO;
        }
    }

    /// A frame published since the last take, if any.
    fn take_pending(&mut self) -> Option<FramePacket> {
        match self.slot.has_changed() {
            Ok(true) => self.take_current(),
            _ => None,
        }
    }

    fn take_current(&mut self) -> Option<FramePacket> {
        let (epoch, frame) = {
            let slot = self.slot.borrow_and_update();
            (slot.epoch, slot.frame.clone())
        };
        self.sync_epoch(epoch);
        frame
    }

    fn sync_epoch(&mut self, epoch: u64) {
        if epoch != self.seen_epoch {
            self.seen_epoch = epoch;
            self.last_frame = None;
        }
    }

    fn emit(&mut self, mut packet: FramePacket) -> FramePacket {
        let now = Instant::now();
        let ts = now.duration_since(self.created).as_micros() as u64;
        packet.pts_us = ts;
        packet.dts_us = ts;
        self.last_emit = Some(now);
        self.last_frame = Some(packet.clone());
        self.emitted += 1;
        packet
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}
