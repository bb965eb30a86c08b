//! Network predictor: turns client delay feedback into a target frame size.
//!
//! Each feedback sample `(encoded size, measured delay)` updates a
//! delay-vs-size regression ([`model`]), feeds the spike / oscillation
//! tracker ([`steady`]), and derives the largest frame expected to arrive
//! within 90% of the target delay. The result is clamped and smoothed
//! before it reaches the encoder.
//!
//! The predictor never fails: bad feedback and degenerate regressions are
//! absorbed locally.

pub mod model;
pub mod steady;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

pub use model::{BandwidthModel, Estimate, EstimatorKind, Sample, SampleWindow};
pub use steady::{SteadyStateTracker, TrackerEvent};

/// Share of the target delay the predictor aims for.
const DELAY_HEADROOM: f64 = 0.9;

/// Bytes per KB used for all size conversions.
pub const BYTES_PER_KB: f64 = 1000.0;

// ── PredictorConfig ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Samples kept in the regression window.
    pub recorded_len: usize,
    /// End-to-end delay budget in milliseconds.
    pub target_delay_ms: f64,
    pub min_target_kb: f64,
    pub max_target_kb: f64,
    /// Target before any feedback arrives.
    pub initial_target_kb: f64,
    /// Frames at least this large enter the effective set.
    pub effective_size_threshold_kb: f64,
    /// 0 = react immediately, 1 = smoothest.
    pub filter_factor: f64,
    /// Residual, in standard errors, above which a sample is an outlier.
    pub exception_threshold: f64,
    /// Consecutive high-delay samples that make a spike.
    pub observe_counter_threshold: u32,
    /// Oscillation window and recovery length in seconds.
    pub timeout_secs: f64,
    /// Clean time before a recovery attempt, in seconds.
    pub time_to_explore_secs: f64,
    /// Ceiling for the exponential back-off of `time_to_explore_secs`.
    pub max_time_to_explore_secs: f64,
    /// Feedback samples per second (one per encoded frame).
    pub frame_rate: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            recorded_len: 100,
            target_delay_ms: 60.0,
            min_target_kb: 5.0,
            max_target_kb: 1000.0,
            initial_target_kb: 100.0,
            effective_size_threshold_kb: 20.0,
            filter_factor: 0.5,
            exception_threshold: 1.0,
            observe_counter_threshold: 5,
            timeout_secs: 10.0,
            time_to_explore_secs: 20.0,
            max_time_to_explore_secs: 320.0,
            frame_rate: 60.0,
        }
    }
}

// ── PredictorStats ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictorStats {
    pub samples: u64,
    pub invalid_samples: u64,
    pub last_raw_size: u32,
    pub last_encoded_size: u32,
    pub estimator: EstimatorKind,
    pub outliers: u64,
}

impl PredictorStats {
    /// Raw-to-encoded size ratio of the last frame, if known.
    pub fn compression_ratio(&self) -> Option<f64> {
        (self.last_encoded_size > 0)
            .then(|| self.last_raw_size as f64 / self.last_encoded_size as f64)
    }
}

// ── NetworkPredictor ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NetworkPredictor {
    config: PredictorConfig,
    window: SampleWindow,
    model: BandwidthModel,
    tracker: SteadyStateTracker,
    next_target_kb: f64,
    filtered_target_kb: f64,
    stats: PredictorStats,
}

impl NetworkPredictor {
    pub fn new(mut config: PredictorConfig) -> Self {
        config.filter_factor = config.filter_factor.clamp(0.0, 1.0);
        if config.max_target_kb < config.min_target_kb {
            config.max_target_kb = config.min_target_kb;
        }
        let initial = config
            .initial_target_kb
            .clamp(config.min_target_kb, config.max_target_kb);
        let model = BandwidthModel::new(DELAY_HEADROOM * config.target_delay_ms / initial, 0.0);

        Self {
            window: SampleWindow::new(config.recorded_len, config.effective_size_threshold_kb),
            tracker: SteadyStateTracker::new(&config),
            model,
            next_target_kb: initial,
            filtered_target_kb: initial,
            stats: PredictorStats::default(),
            config,
        }
    }

    /// Apply one feedback sample. Samples must arrive in receipt order.
    pub fn update(&mut self, raw_size: u32, encoded_size: u32, delay_ms: f64) {
        self.stats.samples += 1;
        self.stats.last_raw_size = raw_size;
        self.stats.last_encoded_size = encoded_size;

        let size_kb = encoded_size as f64 / BYTES_PER_KB;

        if !(delay_ms >= 0.0) {
            self.stats.invalid_samples += 1;
            self.tracker.observe(size_kb, delay_ms);
            self.next_target_kb = (self.next_target_kb * 0.95).max(self.config.min_target_kb);
            self.smooth(self.next_target_kb);
            debug!(delay_ms, target_kb = self.next_target_kb, "invalid feedback; decaying target");
            return;
        }

        let sample = Sample::new(size_kb, delay_ms);
        self.window.push(sample);

        let (estimated, kind) = self.window.estimate(self.model);
        self.model = self.adjust_for_outlier(estimated, sample);
        self.stats.estimator = kind;

        let event = self.tracker.observe(size_kb, delay_ms);
        if event != TrackerEvent::None {
            debug!(
                ?event,
                threshold_kb = self.tracker.estimated_threshold_size(),
                "steady-state tracker"
            );
        }

        let raw_target = self
            .model
            .size_for_delay(DELAY_HEADROOM * self.config.target_delay_ms);
        self.next_target_kb = self.adjust_target(raw_target, delay_ms);
        self.smooth(self.next_target_kb);

        trace!(
            size_kb,
            delay_ms,
            reverse_bandwidth = self.model.reverse_bandwidth,
            propagation_delay = self.model.propagation_delay,
            target_kb = self.next_target_kb,
            filtered_kb = self.filtered_target_kb,
            "predictor update"
        );
    }

    /// Re-anchor the propagation delay on the current sample when it lies
    /// outside `exception_threshold` standard errors of the model.
    fn adjust_for_outlier(&mut self, model: BandwidthModel, sample: Sample) -> BandwidthModel {
        if sample.size_kb <= 0.0 {
            return model;
        }
        let Some(se) = self.window.standard_error(&model) else {
            return model;
        };
        let residual = sample.delay_ms - model.predict_delay(sample.size_kb);
        if residual.abs() <= self.config.exception_threshold * se {
            return model;
        }

        self.stats.outliers += 1;
        let mut adjusted = BandwidthModel::new(
            model.reverse_bandwidth,
            (sample.delay_ms - model.reverse_bandwidth * sample.size_kb).max(0.0),
        );
        if sample.delay_ms > DELAY_HEADROOM * self.config.target_delay_ms {
            adjusted.propagation_delay =
                0.5 * adjusted.propagation_delay + 0.5 * self.model.propagation_delay;
            adjusted.reverse_bandwidth =
                (sample.delay_ms - adjusted.propagation_delay) / sample.size_kb;
        }

        match adjusted.sanity_check() {
            Estimate::Valid(m) => m,
            Estimate::Invalid => model,
        }
    }

    fn adjust_target(&self, target_kb: f64, delay_ms: f64) -> f64 {
        let previous = self.next_target_kb;
        let mut target = target_kb;

        // High latency but the model did not back off.
        if delay_ms >= DELAY_HEADROOM * self.config.target_delay_ms && !(target < previous) {
            target = 0.9 * previous;
        }
        if let Some(cap) = self.tracker.size_cap() {
            target = target.min(cap);
        }
        if target.is_nan() {
            target = self.config.min_target_kb;
        }
        target.clamp(self.config.min_target_kb, self.config.max_target_kb)
    }

    fn smooth(&mut self, target_kb: f64) {
        let k = 0.9 * self.config.filter_factor;
        self.filtered_target_kb = self.filtered_target_kb * k + target_kb * (1.0 - k);
    }

    /// Smoothed target frame size in bytes.
    pub fn next_frame_size(&self) -> u32 {
        (self.filtered_target_kb * BYTES_PER_KB).round() as u32
    }

    /// Unsmoothed target in KB.
    pub fn target_kb(&self) -> f64 {
        self.next_target_kb
    }

    pub fn filtered_target_kb(&self) -> f64 {
        self.filtered_target_kb
    }

    pub fn model(&self) -> BandwidthModel {
        self.model
    }

    pub fn tracker(&self) -> &SteadyStateTracker {
        &self.tracker
    }

    pub fn stats(&self) -> &PredictorStats {
        &self.stats
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn set_frame_rate(&mut self, fps: f64) {
        self.config.frame_rate = fps;
        self.tracker.set_frame_rate(fps);
    }
}
