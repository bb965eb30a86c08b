//! Spike / oscillation detection and recovery attempts.
//!
//! A *spike* is a run of at least `observe_counter_threshold` consecutive
//! high-delay samples. Two spikes within `timeout` mark a new steady state:
//! the link oscillates around a lower capacity, estimated as the mean frame
//! size sent while spikes were active. The predictor caps its target just
//! below that estimate until a recovery attempt proves the cap unnecessary.
//!
//! ```text
//!            2 spikes within timeout
//!  Stable ───────────────────────────► Oscillating (capped)
//!    ▲                                   │  no spike for time_to_explore
//!    │ timeout clean frames              ▼
//!    └──────────────────────────────── Recovering (cap lifted)
//!                                        │  2 spikes: time_to_explore *= 2
//!                                        └──────────► Oscillating
//! ```
//!
//! All durations are counted in frames at the configured frame rate.

use super::PredictorConfig;

/// What a single observation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    None,
    SpikeStarted,
    SpikeEnded,
    OscillationDetected,
    RecoveryStarted,
    /// Recovery finished cleanly; all oscillation state was reset.
    RecoverySucceeded,
    /// Recovery finished with a single spike; the cap is restored.
    RecoveryEnded,
    /// Spikes recurred during recovery; exploring backs off.
    RecoveryAbandoned,
}

#[derive(Debug, Clone)]
pub struct SteadyStateTracker {
    target_delay_ms: f64,
    observe_counter_threshold: u32,
    frame_rate: f64,
    timeout_secs: f64,
    initial_time_to_explore_secs: f64,
    max_time_to_explore_secs: f64,

    observe_counter: u32,
    spikes: u32,
    frames_since_last_spike: u64,
    new_state: bool,
    estimated_threshold_size: f64,
    estimate_acc: f64,
    enc_frames_for_threshold: u32,
    recovery_attempt: bool,
    recovery_frames: u64,
    recovery_spikes: u32,
    time_to_explore_secs: f64,
}

impl SteadyStateTracker {
    pub fn new(config: &PredictorConfig) -> Self {
        Self {
            target_delay_ms: config.target_delay_ms,
            observe_counter_threshold: config.observe_counter_threshold.max(1),
            frame_rate: config.frame_rate.max(1.0),
            timeout_secs: config.timeout_secs,
            initial_time_to_explore_secs: config.time_to_explore_secs,
            max_time_to_explore_secs: config.max_time_to_explore_secs,

            observe_counter: 0,
            spikes: 0,
            frames_since_last_spike: 0,
            new_state: false,
            estimated_threshold_size: 0.0,
            estimate_acc: 0.0,
            enc_frames_for_threshold: 0,
            recovery_attempt: false,
            recovery_frames: 0,
            recovery_spikes: 0,
            time_to_explore_secs: config.time_to_explore_secs,
        }
    }

    /// Durations are re-derived from seconds on every check, so a new frame
    /// rate takes effect immediately.
    pub fn set_frame_rate(&mut self, fps: f64) {
        self.frame_rate = fps.max(1.0);
    }

    /// Feed one sample (encoded size in KB, client delay in ms).
    pub fn observe(&mut self, size_kb: f64, delay_ms: f64) -> TrackerEvent {
        self.frames_since_last_spike = self.frames_since_last_spike.saturating_add(1);

        let high = !(delay_ms >= 0.0)
            || delay_ms > self.target_delay_ms
            || (self.recovery_attempt && delay_ms > self.target_delay_ms / 2.0);

        let was_spike = self.spike_active();
        let mut event = TrackerEvent::None;
        if high {
            self.observe_counter = self.observe_counter.saturating_add(1);
            if !was_spike && self.spike_active() {
                event = TrackerEvent::SpikeStarted;
            }
        } else {
            self.observe_counter = 0;
            if was_spike {
                event = self.end_spike();
            }
        }

        if self.spike_active() || self.recovery_attempt {
            self.estimate_acc += size_kb;
            self.enc_frames_for_threshold += 1;
        }

        match self.progress_recovery() {
            TrackerEvent::None => event,
            recovery => recovery,
        }
    }

    fn end_spike(&mut self) -> TrackerEvent {
        let recent = self.spikes > 0 && self.frames_since_last_spike <= self.frames(self.timeout_secs);
        self.spikes = if recent { self.spikes + 1 } else { 1 };
        self.frames_since_last_spike = 0;

        if self.enc_frames_for_threshold > 0 {
            let average = self.estimate_acc / self.enc_frames_for_threshold as f64;
            let previous = self.estimated_threshold_size;
            if previous <= 0.0 || (average - previous).abs() > 0.1 * previous {
                self.estimated_threshold_size = average;
            }
        }
        self.estimate_acc = 0.0;
        self.enc_frames_for_threshold = 0;

        if self.recovery_attempt {
            self.recovery_spikes += 1;
            if self.recovery_spikes >= 2 {
                self.end_recovery();
                self.time_to_explore_secs =
                    (self.time_to_explore_secs * 2.0).min(self.max_time_to_explore_secs);
                return TrackerEvent::RecoveryAbandoned;
            }
            return TrackerEvent::SpikeEnded;
        }

        if self.spikes >= 2 && !self.new_state {
            self.new_state = true;
            return TrackerEvent::OscillationDetected;
        }
        TrackerEvent::SpikeEnded
    }

    fn progress_recovery(&mut self) -> TrackerEvent {
        if self.recovery_attempt {
            self.recovery_frames += 1;
            if self.recovery_frames >= self.frames(self.timeout_secs) {
                if self.recovery_spikes == 0 && !self.spike_active() {
                    self.reset();
                    return TrackerEvent::RecoverySucceeded;
                }
                self.end_recovery();
                return TrackerEvent::RecoveryEnded;
            }
        } else if self.new_state
            && !self.spike_active()
            && self.frames_since_last_spike >= self.frames(self.time_to_explore_secs)
        {
            self.recovery_attempt = true;
            self.recovery_frames = 0;
            self.recovery_spikes = 0;
            self.estimate_acc = 0.0;
            self.enc_frames_for_threshold = 0;
            return TrackerEvent::RecoveryStarted;
        }
        TrackerEvent::None
    }

    fn end_recovery(&mut self) {
        self.recovery_attempt = false;
        self.recovery_frames = 0;
        self.recovery_spikes = 0;
        self.frames_since_last_spike = 0;
    }

    /// Back to the construction state.
    pub fn reset(&mut self) {
        self.observe_counter = 0;
        self.spikes = 0;
        self.frames_since_last_spike = 0;
        self.new_state = false;
        self.estimated_threshold_size = 0.0;
        self.estimate_acc = 0.0;
        self.enc_frames_for_threshold = 0;
        self.recovery_attempt = false;
        self.recovery_frames = 0;
        self.recovery_spikes = 0;
        self.time_to_explore_secs = self.initial_time_to_explore_secs;
    }

    fn frames(&self, secs: f64) -> u64 {
        (secs * self.frame_rate).round().max(1.0) as u64
    }

    /// Upper bound for the target size while oscillating, in KB.
    pub fn size_cap(&self) -> Option<f64> {
        (self.new_state && !self.recovery_attempt && self.estimated_threshold_size > 0.0)
            .then(|| 0.95 * self.estimated_threshold_size)
    }

    pub fn spike_active(&self) -> bool {
        self.observe_counter >= self.observe_counter_threshold
    }

    pub fn new_state(&self) -> bool {
        self.new_state
    }

    pub fn recovery_attempt(&self) -> bool {
        self.recovery_attempt
    }

    pub fn spikes(&self) -> u32 {
        self.spikes
    }

    pub fn observe_counter(&self) -> u32 {
        self.observe_counter
    }

    pub fn recovery_frames(&self) -> u64 {
        self.recovery_frames
    }

    pub fn estimated_threshold_size(&self) -> f64 {
        self.estimated_threshold_size
    }

    pub fn time_to_explore_secs(&self) -> f64 {
        self.time_to_explore_secs
    }
}
