//! Stream session: control-message handling and the encode path.
//!
//! A [`StreamSession`] owns the encoder, the stream configuration, its own
//! [`NetworkPredictor`] and (optionally) the control handle of its own
//! [`FramePacingQueue`](crate::pacing::FramePacingQueue). Control messages
//! are applied one at a time against the current configuration:
//!
//! - runtime parameters go to [`VideoEncoder::apply`]; a rejection leaves the
//!   configuration untouched and surfaces as [`LumenError::Reconfigure`];
//! - resolution and codec changes restart the encoder, rolling back to the
//!   previous configuration on failure and reporting [`LumenError::Fatal`]
//!   if even the rollback cannot start;
//! - client feedback drives the predictor, whose target frame size is
//!   forwarded to the encoder unless the stream runs in logs-only mode.

pub mod auth;
pub mod config;
pub mod encoder;
pub mod phase;

use tracing::{debug, error, info, warn};

use crate::error::LumenError;
use crate::flags::EncoderFlags;
use crate::pacing::{FramePacket, PacingHandle};
use crate::predictor::{NetworkPredictor, PredictorConfig};
use crate::protocol::control::{ControlMessage, DumpTarget, RirKind};
use crate::protocol::head::{Codec, Resolution};

pub use auth::AuthGate;
pub use config::{RirConfig, RoiConfig, SeiConfig, StreamConfig};
pub use encoder::{EncodedFrame, EncoderParam, VideoEncoder};
pub use phase::SessionPhase;

const MAX_FRAME_RATE: u32 = 240;

/// Per-connection flow-control switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowFlags {
    pub allow_encode: bool,
    pub allow_transmit: bool,
    pub skip_frame: bool,
}

/// Active diagnostic dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DumpState {
    pub runtime: bool,
    pub input: bool,
    pub output: bool,
    pub screen_capture: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub frames_encoded: u64,
    pub frames_skipped: u64,
    pub feedback_samples: u64,
    pub controls_applied: u64,
    pub controls_rejected: u64,
}

// ── StreamSession ────────────────────────────────────────────────

pub struct StreamSession<E: VideoEncoder> {
    config: StreamConfig,
    phase: SessionPhase,
    encoder: E,
    predictor: NetworkPredictor,
    pacing: Option<PacingHandle>,
    flow: FlowFlags,
    dumps: DumpState,
    client_num: u32,
    last_raw_size: u32,
    stats: SessionStats,
}

impl<E: VideoEncoder> StreamSession<E> {
    pub fn new(config: StreamConfig, encoder: E, predictor: PredictorConfig) -> Self {
        let mut predictor = NetworkPredictor::new(predictor);
        predictor.set_frame_rate(config.frame_rate as f64);
        // Until authenticated, nothing is encoded or sent.
        let open = !config.auth_required;
        Self {
            phase: SessionPhase::Idle,
            encoder,
            predictor,
            pacing: None,
            flow: FlowFlags {
                allow_encode: open,
                allow_transmit: open,
                skip_frame: false,
            },
            dumps: DumpState::default(),
            client_num: 0,
            last_raw_size: 0,
            stats: SessionStats::default(),
            config,
        }
    }

    /// Attach the control handle of this session's pacing queue.
    pub fn with_pacing(mut self, handle: PacingHandle) -> Self {
        handle.set_frame_rate(self.config.frame_rate as f64);
        self.pacing = Some(handle);
        self
    }

    /// Number of the client slot this session serves.
    pub fn with_client_num(mut self, client_num: u32) -> Self {
        self.client_num = client_num;
        self
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn flow(&self) -> FlowFlags {
        self.flow
    }

    pub fn dumps(&self) -> DumpState {
        self.dumps
    }

    pub fn client_num(&self) -> u32 {
        self.client_num
    }

    pub fn predictor(&self) -> &NetworkPredictor {
        &self.predictor
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Encoded frames may be put on the wire.
    pub fn should_transmit(&self) -> bool {
        self.flow.allow_transmit && !self.phase.is_stopped()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Open the flow gates after a successful auth exchange.
    pub fn authorize(&mut self, client_num: u32) {
        self.client_num = client_num;
        self.flow.allow_encode = true;
        self.flow.allow_transmit = true;
        info!(client_num, "client authorized");
    }

    /// Start the encoder. Failure is fatal.
    pub async fn start(&mut self) -> Result<(), LumenError> {
        self.phase.start()?;
        if let Err(e) = self.encoder.start(&self.config).await {
            error!(error = %e, "encoder failed to start");
            self.phase.stop();
            return Err(LumenError::Fatal(e.to_string()));
        }
        info!(resolution = %self.config.resolution, codec = ?self.config.codec, "stream started");
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), LumenError> {
        self.phase.pause()?;
        info!("stream paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), LumenError> {
        self.phase.resume()?;
        self.encoder.force_keyframe();
        info!("stream resumed");
        Ok(())
    }

    /// Stop the encoder and the pacing queue. Idempotent.
    pub async fn stop(&mut self) {
        if self.phase.is_stopped() {
            return;
        }
        if self.phase.encoder_running() {
            if let Err(e) = self.encoder.stop().await {
                warn!(error = %e, "encoder stop failed");
            }
        }
        if let Some(pacing) = &self.pacing {
            pacing.stop();
        }
        self.phase.stop();
        info!(frames = self.stats.frames_encoded, "stream stopped");
    }

    // ── Encode path ──────────────────────────────────────────────

    /// Encode one paced frame. `Ok(None)` means the frame was skipped
    /// (paused, gated or skip-frame active).
    pub async fn encode_frame(
        &mut self,
        frame: &FramePacket,
    ) -> Result<Option<EncodedFrame>, LumenError> {
        match self.phase {
            SessionPhase::Stopped => return Err(LumenError::InvalidState("session stopped")),
            SessionPhase::Idle => return Err(LumenError::InvalidState("session not started")),
            SessionPhase::Paused => {
                self.stats.frames_skipped += 1;
                return Ok(None);
            }
            SessionPhase::Streaming { .. } => {}
        }
        if !self.flow.allow_encode || self.flow.skip_frame {
            self.stats.frames_skipped += 1;
            return Ok(None);
        }
        if frame.resolution != self.config.resolution {
            // Captured before a resolution change took effect.
            debug!(frame = %frame.resolution, stream = %self.config.resolution, "dropping stale frame");
            self.stats.frames_skipped += 1;
            return Ok(None);
        }

        let encoded = self.encoder.encode(frame).await?;
        self.last_raw_size = encoded.raw_size;
        self.stats.frames_encoded += 1;
        Ok(Some(encoded))
    }

    // ── Feedback ─────────────────────────────────────────────────

    /// Feed one client measurement to the predictor and return the new
    /// target frame size in bytes.
    pub fn client_feedback(&mut self, delay_ms: f64, size_bytes: u32) -> u32 {
        self.stats.feedback_samples += 1;
        self.predictor.update(self.last_raw_size, size_bytes, delay_ms);
        let target = self.predictor.next_frame_size();
        if self.config.logs_only {
            debug!(delay_ms, size_bytes, target, "feedback (logs only)");
        } else {
            self.encoder.set_target_frame_size(target);
            debug!(delay_ms, size_bytes, target, "feedback");
        }
        target
    }

    // ── Control messages ─────────────────────────────────────────

    pub async fn handle_control(&mut self, msg: ControlMessage) -> Result<(), LumenError> {
        let kind = msg.kind();
        let result = self.dispatch(msg).await;
        match &result {
            Ok(()) => {
                self.stats.controls_applied += 1;
                debug!(?kind, "control applied");
            }
            Err(e) => {
                self.stats.controls_rejected += 1;
                warn!(?kind, error = %e, "control rejected");
            }
        }
        result
    }

    async fn dispatch(&mut self, msg: ControlMessage) -> Result<(), LumenError> {
        if self.phase.is_stopped() {
            return match msg {
                ControlMessage::Stop => Ok(()),
                _ => Err(LumenError::InvalidState("session stopped")),
            };
        }

        match msg {
            ControlMessage::Start => match self.phase {
                SessionPhase::Idle => self.start().await,
                SessionPhase::Paused => self.resume(),
                _ => Ok(()),
            },
            ControlMessage::Pause => self.pause(),
            ControlMessage::Stop => {
                self.stop().await;
                Ok(())
            }
            ControlMessage::KeyFrame => {
                self.encoder.force_keyframe();
                Ok(())
            }
            ControlMessage::SkipFrame { enabled } => {
                self.flow.skip_frame = enabled;
                let mut flags = self.encoder.flags();
                flags.set(EncoderFlags::SKIP_FRAME, enabled);
                self.encoder.set_flags(flags);
                Ok(())
            }

            ControlMessage::Qp { qp } => {
                if qp > StreamConfig::QP_LIMIT {
                    return Err(invalid(format!("qp {qp} exceeds {}", StreamConfig::QP_LIMIT)));
                }
                self.apply_param(EncoderParam::Qp(qp), |c| c.qp = qp).await
            }
            ControlMessage::MinMaxQp { min, max } => {
                if min > max || max > StreamConfig::QP_LIMIT {
                    return Err(invalid(format!("qp range {min}..={max}")));
                }
                self.apply_param(EncoderParam::MinMaxQp { min, max }, |c| {
                    c.min_qp = min;
                    c.max_qp = max;
                })
                .await
            }
            ControlMessage::Bitrate { bps } => {
                if bps == 0 {
                    return Err(invalid("bitrate must be non-zero"));
                }
                self.apply_param(EncoderParam::Bitrate(bps), |c| c.bitrate_bps = bps)
                    .await
            }
            ControlMessage::MaxBitrate { bps } => {
                if bps == 0 {
                    return Err(invalid("max bitrate must be non-zero"));
                }
                self.apply_param(EncoderParam::MaxBitrate(bps), |c| c.max_bitrate_bps = bps)
                    .await
            }
            ControlMessage::MaxFrameSize { bytes } => {
                if bytes == 0 {
                    return Err(invalid("max frame size must be non-zero"));
                }
                self.apply_param(EncoderParam::MaxFrameSize(bytes), |c| c.max_frame_size = bytes)
                    .await
            }
            ControlMessage::Gop { size } => {
                if size == 0 {
                    return Err(invalid("gop size must be non-zero"));
                }
                self.apply_param(EncoderParam::Gop(size), |c| c.gop_size = size)
                    .await
            }
            ControlMessage::FrameRate { fps } => self.set_frame_rate(fps).await,
            ControlMessage::RollingIntraRefresh {
                kind,
                cycle_size,
                qp_delta,
            } => {
                if kind != RirKind::Off && cycle_size == 0 {
                    return Err(invalid("rolling intra refresh needs a cycle size"));
                }
                let rir = RirConfig {
                    kind,
                    cycle_size,
                    qp_delta,
                };
                self.apply_param(EncoderParam::RollingIntraRefresh(rir), |c| c.rir = rir)
                    .await
            }
            ControlMessage::RegionOfInterest {
                x,
                y,
                width,
                height,
                delta_qp,
                priority,
            } => {
                let roi = RoiConfig {
                    x,
                    y,
                    width,
                    height,
                    delta_qp,
                    priority,
                };
                self.validate_roi(&roi)?;
                self.apply_param(EncoderParam::RegionOfInterest(roi), |c| c.roi = Some(roi))
                    .await
            }
            ControlMessage::Sei {
                enabled,
                payload_type,
            } => {
                let sei = SeiConfig {
                    enabled,
                    payload_type,
                };
                self.apply_param(EncoderParam::Sei(sei), |c| c.sei = sei).await
            }
            ControlMessage::ProfileLevel { profile, level } => {
                if level == 0 {
                    return Err(invalid("level must be non-zero"));
                }
                self.apply_param(EncoderParam::ProfileLevel { profile, level }, |c| {
                    c.profile = profile;
                    c.level = level;
                })
                .await
            }

            ControlMessage::Resolution { width, height } => {
                self.change_resolution(Resolution::new(width, height)).await
            }
            ControlMessage::Codec { codec } => self.change_codec(codec).await,

            ControlMessage::DumpStart => {
                self.set_dump(DumpTarget::Runtime, true);
                Ok(())
            }
            ControlMessage::DumpStop => {
                self.set_dump(DumpTarget::Runtime, false);
                Ok(())
            }
            ControlMessage::InputOutputDump { input, output } => {
                self.set_dump(DumpTarget::Input, input);
                self.set_dump(DumpTarget::Output, output);
                Ok(())
            }
            ControlMessage::ScreenCapture { enabled } => {
                self.set_dump(DumpTarget::ScreenCapture, enabled);
                Ok(())
            }

            ControlMessage::ClientFeedback {
                delay_ms,
                size_bytes,
            } => {
                self.client_feedback(delay_ms, size_bytes);
                Ok(())
            }
        }
    }

    /// Push a runtime parameter to a running encoder; the configuration is
    /// only updated once the encoder accepted it.
    async fn apply_param(
        &mut self,
        param: EncoderParam,
        update: impl FnOnce(&mut StreamConfig),
    ) -> Result<(), LumenError> {
        if self.phase.encoder_running() {
            self.encoder
                .apply(param)
                .await
                .map_err(|e| LumenError::Reconfigure(e.to_string()))?;
        }
        update(&mut self.config);
        Ok(())
    }

    async fn set_frame_rate(&mut self, fps: u32) -> Result<(), LumenError> {
        if fps == 0 || fps > MAX_FRAME_RATE {
            return Err(invalid(format!("frame rate {fps} outside 1..={MAX_FRAME_RATE}")));
        }
        self.apply_param(EncoderParam::FrameRate(fps), |c| c.frame_rate = fps)
            .await?;
        self.predictor.set_frame_rate(fps as f64);
        if let Some(pacing) = &self.pacing {
            pacing.set_frame_rate(fps as f64);
        }
        Ok(())
    }

    fn validate_roi(&self, roi: &RoiConfig) -> Result<(), LumenError> {
        let res = self.config.resolution;
        let fits = roi.width > 0
            && roi.height > 0
            && roi.x.checked_add(roi.width).is_some_and(|r| r <= res.width)
            && roi.y.checked_add(roi.height).is_some_and(|b| b <= res.height);
        if !fits {
            return Err(invalid(format!(
                "region {}x{}+{}+{} outside {res}",
                roi.width, roi.height, roi.x, roi.y
            )));
        }
        if roi.delta_qp.unsigned_abs() > StreamConfig::QP_LIMIT {
            return Err(invalid(format!("roi delta qp {}", roi.delta_qp)));
        }
        Ok(())
    }

    fn set_dump(&mut self, target: DumpTarget, enabled: bool) {
        let slot = match target {
            DumpTarget::Runtime => &mut self.dumps.runtime,
            DumpTarget::Input => &mut self.dumps.input,
            DumpTarget::Output => &mut self.dumps.output,
            DumpTarget::ScreenCapture => &mut self.dumps.screen_capture,
        };
        if *slot != enabled {
            *slot = enabled;
            self.encoder.push_dump(target, enabled);
            info!(?target, enabled, "dump toggled");
        }
    }

    // ── Reconfiguration ──────────────────────────────────────────

    async fn change_resolution(&mut self, requested: Resolution) -> Result<(), LumenError> {
        if requested.width == 0 || requested.height == 0 {
            return Err(invalid(format!("resolution {requested}")));
        }
        let resolution = self.config.bounded_resolution(requested);
        if resolution != requested {
            warn!(%requested, substituted = %resolution, "requested resolution out of bounds");
        }
        if resolution == self.config.resolution {
            return Ok(());
        }
        let next = self.config.rescaled(resolution);
        self.reconfigure(next).await
    }

    async fn change_codec(&mut self, codec: Codec) -> Result<(), LumenError> {
        if codec == self.config.codec {
            return Ok(());
        }
        let next = StreamConfig {
            codec,
            ..self.config.clone()
        };
        self.reconfigure(next).await
    }

    /// Stop → apply → start. On failure the previous configuration is
    /// restarted; if that fails too the session is stopped.
    async fn reconfigure(&mut self, next: StreamConfig) -> Result<(), LumenError> {
        if !self.phase.encoder_running() {
            self.config = next;
            return Ok(());
        }

        if let Some(pacing) = &self.pacing {
            pacing.drain();
        }
        if let Err(e) = self.encoder.stop().await {
            warn!(error = %e, "encoder stop before reconfigure failed");
        }

        match self.encoder.start(&next).await {
            Ok(()) => {
                info!(resolution = %next.resolution, codec = ?next.codec, "encoder reconfigured");
                self.config = next;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "reconfigure failed; restoring previous configuration");
                match self.encoder.start(&self.config).await {
                    Ok(()) => Err(LumenError::Reconfigure(e.to_string())),
                    Err(rollback) => {
                        error!(error = %rollback, "rollback failed; stopping stream");
                        self.phase.stop();
                        if let Some(pacing) = &self.pacing {
                            pacing.stop();
                        }
                        Err(LumenError::Fatal(format!(
                            "reconfigure failed ({e}) and rollback failed ({rollback})"
                        )))
                    }
                }
            }
        }
    }
}

fn invalid(detail: impl Into<String>) -> LumenError {
    LumenError::InvalidControl(detail.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EncoderError;
    use crate::flags::FrameFlags;
    use crate::pacing::{FramePacingQueue, PacingConfig};
    use crate::protocol::control::Profile;
    use crate::protocol::head::VideoFormat;
    use async_trait::async_trait;
    use bytes::Bytes;

    /// Scripted encoder that records every call.
    #[derive(Default)]
    struct MockEncoder {
        running: bool,
        starts: Vec<Resolution>,
        stops: usize,
        params: Vec<EncoderParam>,
        target: Option<u32>,
        keyframes: usize,
        dumps: Vec<(DumpTarget, bool)>,
        flags: EncoderFlags,
        /// Start calls (0-based) that fail.
        fail_starts: Vec<usize>,
        reject_params: bool,
        encoded: u64,
    }

    #[async_trait]
    impl VideoEncoder for MockEncoder {
        async fn start(&mut self, config: &StreamConfig) -> Result<(), EncoderError> {
            let attempt = self.starts.len();
            self.starts.push(config.resolution);
            if self.fail_starts.contains(&attempt) {
                return Err(EncoderError::Start(format!("attempt {attempt}")));
            }
            self.running = true;
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), EncoderError> {
            self.running = false;
            self.stops += 1;
            Ok(())
        }

        async fn encode(&mut self, frame: &FramePacket) -> Result<EncodedFrame, EncoderError> {
            if !self.running {
                return Err(EncoderError::NotRunning);
            }
            self.encoded += 1;
            Ok(EncodedFrame {
                frame_number: self.encoded,
                flags: FrameFlags::empty(),
                resolution: frame.resolution,
                pts_us: frame.pts_us,
                raw_size: frame.data.len() as u32,
                video: frame.data.slice(..frame.data.len() / 2),
                alpha: Bytes::new(),
            })
        }

        async fn apply(&mut self, param: EncoderParam) -> Result<(), EncoderError> {
            if self.reject_params {
                return Err(EncoderError::Rejected(format!("{param:?}")));
            }
            self.params.push(param);
            Ok(())
        }

        fn set_target_frame_size(&mut self, bytes: u32) {
            self.target = Some(bytes);
        }

        fn force_keyframe(&mut self) {
            self.keyframes += 1;
        }

        fn push_dump(&mut self, target: DumpTarget, enabled: bool) {
            self.dumps.push((target, enabled));
        }

        fn flags(&self) -> EncoderFlags {
            self.flags
        }

        fn set_flags(&mut self, flags: EncoderFlags) {
            self.flags = flags;
        }
    }

    fn config() -> StreamConfig {
        StreamConfig {
            resolution: Resolution::new(1280, 720),
            min_resolution: Resolution::new(640, 360),
            max_resolution: Resolution::new(1920, 1080),
            default_resolution: Resolution::new(1280, 720),
            ..StreamConfig::default()
        }
    }

    fn session(encoder: MockEncoder) -> StreamSession<MockEncoder> {
        StreamSession::new(config(), encoder, PredictorConfig::default())
    }

    async fn started(encoder: MockEncoder) -> StreamSession<MockEncoder> {
        let mut s = session(encoder);
        s.handle_control(ControlMessage::Start).await.unwrap();
        s
    }

    fn frame(res: Resolution) -> FramePacket {
        FramePacket::new(1, res, VideoFormat::Bgra, Bytes::from(vec![0u8; 64]))
    }

    #[tokio::test]
    async fn start_pause_resume_stop() {
        let mut s = started(MockEncoder::default()).await;
        assert!(s.phase().is_streaming());

        s.handle_control(ControlMessage::Pause).await.unwrap();
        assert_eq!(s.phase(), &SessionPhase::Paused);
        let skipped = s.encode_frame(&frame(Resolution::new(1280, 720))).await.unwrap();
        assert!(skipped.is_none());

        s.handle_control(ControlMessage::Start).await.unwrap();
        assert!(s.phase().is_streaming());
        assert_eq!(s.encoder().keyframes, 1);

        s.handle_control(ControlMessage::Stop).await.unwrap();
        assert!(s.phase().is_stopped());
        assert_eq!(s.encoder().stops, 1);
        s.handle_control(ControlMessage::Stop).await.unwrap();

        let err = s.handle_control(ControlMessage::KeyFrame).await.unwrap_err();
        assert!(matches!(err, LumenError::InvalidState(_)));
        assert!(s.encode_frame(&frame(Resolution::new(1280, 720))).await.is_err());
    }

    #[tokio::test]
    async fn encoder_start_failure_is_fatal() {
        let mut s = session(MockEncoder {
            fail_starts: vec![0],
            ..MockEncoder::default()
        });
        let err = s.start().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(s.phase().is_stopped());
    }

    #[tokio::test]
    async fn out_of_bounds_resolution_uses_default() {
        let mut s = started(MockEncoder::default()).await;
        s.handle_control(ControlMessage::resolution(800, 600)).await.unwrap();
        assert_eq!(s.config().resolution, Resolution::new(800, 600));

        s.handle_control(ControlMessage::resolution(3840, 2160)).await.unwrap();
        assert_eq!(s.config().resolution, Resolution::new(1280, 720));
        assert_eq!(
            s.encoder().starts,
            vec![
                Resolution::new(1280, 720),
                Resolution::new(800, 600),
                Resolution::new(1280, 720)
            ]
        );
    }

    #[tokio::test]
    async fn resolution_change_rescales_rates_and_drains_queue() {
        let (tx, mut rx, handle) = FramePacingQueue::new(PacingConfig {
            render_fps_enc: true,
            min_fps: Some(100.0),
            ..PacingConfig::default()
        })
        .split();
        let mut s = session(MockEncoder::default()).with_pacing(handle);
        s.start().await.unwrap();
        let bitrate = s.config().bitrate_bps;

        tx.send_frame(frame(Resolution::new(1280, 720))).unwrap();
        s.handle_control(ControlMessage::resolution(640, 360)).await.unwrap();
        assert_eq!(s.config().bitrate_bps, bitrate / 4);
        assert_eq!(rx.read_frame().await, crate::pacing::PacedRead::Idle);
    }

    #[tokio::test]
    async fn paced_frames_reach_encoder_across_resolution_change() {
        use crate::pacing::PacedRead;

        let (tx, mut rx, handle) = FramePacingQueue::new(PacingConfig {
            render_fps_enc: true,
            ..PacingConfig::default()
        })
        .split();
        let mut s = session(MockEncoder::default()).with_pacing(handle);
        s.start().await.unwrap();

        tx.send_frame(frame(Resolution::new(1280, 720))).unwrap();
        let PacedRead::Frame(first) = rx.read_frame().await else {
            panic!("queued frame was not delivered");
        };
        assert!(s.encode_frame(&first).await.unwrap().is_some());

        // A frame sent right after the drain must not be swallowed by it.
        s.handle_control(ControlMessage::resolution(640, 360)).await.unwrap();
        tx.send_frame(frame(Resolution::new(640, 360))).unwrap();
        let started = tokio::time::Instant::now();
        let PacedRead::Frame(second) = rx.read_frame().await else {
            panic!("frame sent after the drain was lost");
        };
        assert!(started.elapsed() < std::time::Duration::from_millis(500));
        assert_eq!(second.resolution, Resolution::new(640, 360));
        let encoded = s.encode_frame(&second).await.unwrap().unwrap();
        assert_eq!(encoded.resolution, Resolution::new(640, 360));
        assert_eq!(s.encoder().encoded, 2);
    }

    #[tokio::test]
    async fn failed_resolution_change_rolls_back() {
        let mut s = started(MockEncoder {
            fail_starts: vec![1],
            ..MockEncoder::default()
        })
        .await;
        let err = s
            .handle_control(ControlMessage::resolution(800, 600))
            .await
            .unwrap_err();
        assert!(matches!(err, LumenError::Reconfigure(_)));
        assert_eq!(s.config().resolution, Resolution::new(1280, 720));
        assert!(s.phase().is_streaming());
        assert!(s.encoder().running);
    }

    #[tokio::test]
    async fn failed_rollback_is_fatal() {
        let mut s = started(MockEncoder {
            fail_starts: vec![1, 2],
            ..MockEncoder::default()
        })
        .await;
        let err = s.handle_control(ControlMessage::Codec { codec: Codec::Hevc }).await.unwrap_err();
        assert!(matches!(err, LumenError::Fatal(_)));
        assert!(s.phase().is_stopped());
        assert_eq!(s.config().codec, Codec::H264);
    }

    #[tokio::test]
    async fn idle_session_stores_parameters_without_encoder() {
        let mut s = session(MockEncoder::default());
        s.handle_control(ControlMessage::Bitrate { bps: 5_000_000 }).await.unwrap();
        s.handle_control(ControlMessage::resolution(800, 600)).await.unwrap();
        // 5 Mbps scaled by 800x600 / 1280x720.
        assert_eq!(s.config().bitrate_bps, 2_604_166);
        assert!(s.encoder().params.is_empty());
        assert!(s.encoder().starts.is_empty());
    }

    #[tokio::test]
    async fn runtime_parameters_reach_encoder() {
        let mut s = started(MockEncoder::default()).await;
        s.handle_control(ControlMessage::Qp { qp: 30 }).await.unwrap();
        s.handle_control(ControlMessage::MinMaxQp { min: 18, max: 40 }).await.unwrap();
        s.handle_control(ControlMessage::Gop { size: 60 }).await.unwrap();
        s.handle_control(ControlMessage::ProfileLevel {
            profile: Profile::High,
            level: 51,
        })
        .await
        .unwrap();
        s.handle_control(ControlMessage::RollingIntraRefresh {
            kind: RirKind::Row,
            cycle_size: 8,
            qp_delta: -2,
        })
        .await
        .unwrap();

        let c = s.config();
        assert_eq!((c.qp, c.min_qp, c.max_qp, c.gop_size), (30, 18, 40, 60));
        assert_eq!(c.profile, Profile::High);
        assert_eq!(c.rir.cycle_size, 8);
        assert_eq!(s.encoder().params.len(), 5);
        assert_eq!(s.stats().controls_applied, 6);
    }

    #[tokio::test]
    async fn malformed_controls_are_rejected() {
        let mut s = started(MockEncoder::default()).await;
        let bad = [
            ControlMessage::Qp { qp: 60 },
            ControlMessage::MinMaxQp { min: 40, max: 20 },
            ControlMessage::Bitrate { bps: 0 },
            ControlMessage::FrameRate { fps: 0 },
            ControlMessage::resolution(0, 720),
            ControlMessage::RegionOfInterest {
                x: 1200,
                y: 0,
                width: 200,
                height: 100,
                delta_qp: -3,
                priority: 1,
            },
        ];
        for msg in bad {
            let err = s.handle_control(msg).await.unwrap_err();
            assert!(matches!(err, LumenError::InvalidControl(_)), "{err}");
        }
        assert_eq!(s.config(), &config());
        assert_eq!(s.stats().controls_rejected, 6);
        assert!(s.phase().is_streaming());
    }

    #[tokio::test]
    async fn rejected_parameter_keeps_previous_config() {
        let mut s = started(MockEncoder {
            reject_params: true,
            ..MockEncoder::default()
        })
        .await;
        let err = s.handle_control(ControlMessage::Bitrate { bps: 1_000 }).await.unwrap_err();
        assert!(matches!(err, LumenError::Reconfigure(_)));
        assert_eq!(s.config().bitrate_bps, config().bitrate_bps);
    }

    #[tokio::test]
    async fn feedback_retargets_encoder() {
        let mut s = started(MockEncoder::default()).await;
        for _ in 0..30 {
            s.handle_control(ControlMessage::feedback(20.0, 50_000)).await.unwrap();
        }
        let target = s.encoder().target.unwrap();
        assert_eq!(target, s.predictor().next_frame_size());
        assert!(target > 100_000);
        assert_eq!(s.stats().feedback_samples, 30);
    }

    #[tokio::test]
    async fn logs_only_never_retargets() {
        let mut s = StreamSession::new(
            StreamConfig {
                logs_only: true,
                ..config()
            },
            MockEncoder::default(),
            PredictorConfig::default(),
        );
        s.start().await.unwrap();
        s.client_feedback(20.0, 50_000);
        assert!(s.encoder().target.is_none());
        assert_eq!(s.predictor().stats().samples, 1);
    }

    #[tokio::test]
    async fn frame_rate_updates_pacing() {
        let (_tx, _rx, handle) = FramePacingQueue::new(PacingConfig::default()).split();
        let mut s = session(MockEncoder::default()).with_pacing(handle.clone());
        s.start().await.unwrap();
        s.handle_control(ControlMessage::FrameRate { fps: 30 }).await.unwrap();
        assert_eq!(handle.config().frame_rate, 30.0);
        assert_eq!(s.predictor().config().frame_rate, 30.0);
        assert_eq!(s.encoder().params, vec![EncoderParam::FrameRate(30)]);
    }

    #[tokio::test]
    async fn skip_frame_and_dumps() {
        let mut s = started(MockEncoder::default()).await;
        let f = frame(Resolution::new(1280, 720));
        assert!(s.encode_frame(&f).await.unwrap().is_some());

        s.handle_control(ControlMessage::SkipFrame { enabled: true }).await.unwrap();
        assert!(s.encoder().flags().contains(EncoderFlags::SKIP_FRAME));
        assert!(s.encode_frame(&f).await.unwrap().is_none());
        s.handle_control(ControlMessage::SkipFrame { enabled: false }).await.unwrap();
        assert!(s.encode_frame(&f).await.unwrap().is_some());

        s.handle_control(ControlMessage::DumpStart).await.unwrap();
        s.handle_control(ControlMessage::InputOutputDump {
            input: true,
            output: false,
        })
        .await
        .unwrap();
        s.handle_control(ControlMessage::ScreenCapture { enabled: true }).await.unwrap();
        assert_eq!(
            s.dumps(),
            DumpState {
                runtime: true,
                input: true,
                output: false,
                screen_capture: true
            }
        );
        assert_eq!(
            s.encoder().dumps,
            vec![
                (DumpTarget::Runtime, true),
                (DumpTarget::Input, true),
                (DumpTarget::ScreenCapture, true)
            ]
        );
        assert_eq!(s.stats().frames_encoded, 2);
        assert_eq!(s.stats().frames_skipped, 1);
    }

    #[tokio::test]
    async fn auth_required_gates_encoding() {
        let mut s = StreamSession::new(
            StreamConfig {
                auth_required: true,
                ..config()
            },
            MockEncoder::default(),
            PredictorConfig::default(),
        );
        s.start().await.unwrap();
        let f = frame(Resolution::new(1280, 720));
        assert!(!s.should_transmit());
        assert!(s.encode_frame(&f).await.unwrap().is_none());

        s.authorize(3);
        assert_eq!(s.client_num(), 3);
        assert!(s.should_transmit());
        assert!(s.encode_frame(&f).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn client_num_is_kept_without_auth() {
        let mut s = StreamSession::new(config(), MockEncoder::default(), PredictorConfig::default())
            .with_client_num(7);
        s.start().await.unwrap();
        assert_eq!(s.client_num(), 7);
        assert!(s.should_transmit());
    }

    #[tokio::test]
    async fn stale_resolution_frames_are_dropped() {
        let mut s = started(MockEncoder::default()).await;
        let stale = frame(Resolution::new(1920, 1080));
        assert!(s.encode_frame(&stale).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sessions_have_independent_predictors() {
        let mut a = started(MockEncoder::default()).await;
        let b = started(MockEncoder::default()).await;
        a.client_feedback(-1.0, 0);
        assert_eq!(a.predictor().stats().samples, 1);
        assert_eq!(b.predictor().stats().samples, 0);
    }
}
