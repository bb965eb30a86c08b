//! Delay-vs-size regression over a sliding sample window.
//!
//! The link is modelled as `delay = propagation_delay + reverse_bandwidth * size`
//! and re-estimated after every sample through an explicit fallback pipeline:
//!
//! ```text
//! window >= 20% full, size varies  ──► Normal ──invalid──► Safe ──invalid──┐
//! window >= 20% full, no variation ──► Normal over window + effective set ─┤
//! window too small / all invalid   ──────────────────────────────────────► Small
//! Small invalid                    ──► previous model retained
//! ```
//!
//! Every candidate passes through [`BandwidthModel::sanity_check`].

use std::collections::VecDeque;

/// Lower bound for a usable reverse bandwidth (ms per KB).
pub const MIN_REVERSE_BANDWIDTH: f64 = 0.02;

/// Propagation delay assumed by the ratio-of-means estimator.
pub const SMALL_PROPAGATION_DELAY: f64 = 0.1;

/// Capacity of the "last known good" large-frame set.
pub const EFFECTIVE_CAPACITY: usize = 2;

const EPSILON: f64 = 1e-9;

// ── Sample ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub size_kb: f64,
    pub delay_ms: f64,
}

impl Sample {
    pub fn new(size_kb: f64, delay_ms: f64) -> Self {
        Self { size_kb, delay_ms }
    }

    const ZERO: Sample = Sample {
        size_kb: 0.0,
        delay_ms: 0.0,
    };
}

// ── BandwidthModel ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthModel {
    /// Milliseconds of delay per KB of frame data.
    pub reverse_bandwidth: f64,
    /// Size-independent part of the delay in milliseconds.
    pub propagation_delay: f64,
}

/// Outcome of an estimator step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Estimate {
    Valid(BandwidthModel),
    Invalid,
}

impl Estimate {
    pub fn is_valid(&self) -> bool {
        matches!(self, Estimate::Valid(_))
    }

    pub fn or_else(self, f: impl FnOnce() -> Estimate) -> Estimate {
        match self {
            Estimate::Valid(_) => self,
            Estimate::Invalid => f(),
        }
    }
}

/// Which step of the pipeline produced the current model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EstimatorKind {
    Normal,
    Safe,
    Small,
    #[default]
    Retained,
}

impl BandwidthModel {
    pub fn new(reverse_bandwidth: f64, propagation_delay: f64) -> Self {
        Self {
            reverse_bandwidth,
            propagation_delay,
        }
    }

    pub fn predict_delay(&self, size_kb: f64) -> f64 {
        self.propagation_delay + self.reverse_bandwidth * size_kb
    }

    /// Frame size (KB) expected to arrive within `delay_ms`.
    pub fn size_for_delay(&self, delay_ms: f64) -> f64 {
        (delay_ms - self.propagation_delay) / self.reverse_bandwidth
    }

    pub fn sanity_check(self) -> Estimate {
        let ok = self.reverse_bandwidth.is_finite()
            && self.propagation_delay.is_finite()
            && self.reverse_bandwidth > MIN_REVERSE_BANDWIDTH
            && self.propagation_delay >= 0.0;
        if ok { Estimate::Valid(self) } else { Estimate::Invalid }
    }
}

// ── Weighted statistics ──────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Moments {
    mean_size: f64,
    mean_delay: f64,
    var_size: f64,
    cov: f64,
}

fn moments(points: &[(f64, Sample)]) -> Option<Moments> {
    let total: f64 = points.iter().map(|(w, _)| w).sum();
    if total <= EPSILON {
        return None;
    }
    let mean_size = points.iter().map(|(w, s)| w * s.size_kb).sum::<f64>() / total;
    let mean_delay = points.iter().map(|(w, s)| w * s.delay_ms).sum::<f64>() / total;
    let (var, cov) = points.iter().fold((0.0, 0.0), |(var, cov), (w, s)| {
        let ds = s.size_kb - mean_size;
        (var + w * ds * ds, cov + w * ds * (s.delay_ms - mean_delay))
    });
    Some(Moments {
        mean_size,
        mean_delay,
        var_size: var / total,
        cov: cov / total,
    })
}

fn normal(points: &[(f64, Sample)]) -> Estimate {
    match moments(points) {
        Some(m) if m.var_size > EPSILON => {
            let rb = m.cov / m.var_size;
            BandwidthModel::new(rb, m.mean_delay - rb * m.mean_size).sanity_check()
        }
        _ => Estimate::Invalid,
    }
}

/// Regression after zeroing points whose size and delay move in opposite
/// directions from their means.
fn safe(points: &[(f64, Sample)]) -> Estimate {
    let Some(m) = moments(points) else {
        return Estimate::Invalid;
    };
    let filtered: Vec<(f64, Sample)> = points
        .iter()
        .map(|&(w, s)| {
            let same_sign = (s.size_kb - m.mean_size) * (s.delay_ms - m.mean_delay) >= 0.0;
            if same_sign { (w, s) } else { (w, Sample::ZERO) }
        })
        .collect();
    normal(&filtered)
}

/// Ratio of means with a fixed small propagation delay.
fn small(points: &[(f64, Sample)]) -> Estimate {
    match moments(points) {
        Some(m) if m.mean_size.abs() > EPSILON && m.mean_delay.abs() > EPSILON => {
            BandwidthModel::new(m.mean_delay / m.mean_size, SMALL_PROPAGATION_DELAY).sanity_check()
        }
        _ => Estimate::Invalid,
    }
}

// ── SampleWindow ─────────────────────────────────────────────────

/// Newest-first bounded sample history plus the effective large-frame set.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    all: VecDeque<Sample>,
    effective: VecDeque<Sample>,
    capacity: usize,
    effective_threshold_kb: f64,
    forgot_ratio: f64,
}

impl SampleWindow {
    pub fn new(capacity: usize, effective_threshold_kb: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            all: VecDeque::with_capacity(capacity),
            effective: VecDeque::with_capacity(EFFECTIVE_CAPACITY),
            capacity,
            effective_threshold_kb,
            // A sample two windows old weighs 1% of the newest one.
            forgot_ratio: 0.01f64.powf(1.0 / (2.0 * capacity as f64)),
        }
    }

    pub fn push(&mut self, sample: Sample) {
        self.all.push_front(sample);
        self.all.truncate(self.capacity);
        if sample.size_kb >= self.effective_threshold_kb {
            self.effective.push_front(sample);
            self.effective.truncate(EFFECTIVE_CAPACITY);
        }
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn forgot_ratio(&self) -> f64 {
        self.forgot_ratio
    }

    /// Newest-first samples.
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.all.iter()
    }

    pub fn effective_samples(&self) -> impl Iterator<Item = &Sample> {
        self.effective.iter()
    }

    /// At least 20% of the window is populated.
    pub fn has_min_samples(&self) -> bool {
        self.all.len() * 5 >= self.capacity
    }

    fn weighted_points(&self) -> Vec<(f64, Sample)> {
        let mut weight = 1.0;
        self.all
            .iter()
            .map(|&s| {
                let point = (weight, s);
                weight *= self.forgot_ratio;
                point
            })
            .collect()
    }

    /// Run the estimator pipeline. `prior` is returned unchanged when no
    /// step yields a sane model.
    pub fn estimate(&self, prior: BandwidthModel) -> (BandwidthModel, EstimatorKind) {
        let points = self.weighted_points();
        if points.is_empty() {
            return (prior, EstimatorKind::Retained);
        }

        if self.has_min_samples() {
            let varies = moments(&points).is_some_and(|m| m.var_size > EPSILON);
            if varies {
                if let Estimate::Valid(m) = normal(&points) {
                    return (m, EstimatorKind::Normal);
                }
                if let Estimate::Valid(m) = safe(&points) {
                    return (m, EstimatorKind::Safe);
                }
            } else if !self.effective.is_empty() {
                let mut augmented = points.clone();
                augmented.extend(self.effective.iter().map(|&s| (1.0, s)));
                if let Estimate::Valid(m) = normal(&augmented) {
                    return (m, EstimatorKind::Normal);
                }
            }
        }

        match small(&points) {
            Estimate::Valid(m) => (m, EstimatorKind::Small),
            Estimate::Invalid => (prior, EstimatorKind::Retained),
        }
    }

    /// Weighted standard error of `model` over the window, available once
    /// the window is at least 20% full.
    pub fn standard_error(&self, model: &BandwidthModel) -> Option<f64> {
        if !self.has_min_samples() {
            return None;
        }
        let points = self.weighted_points();
        let total: f64 = points.iter().map(|(w, _)| w).sum();
        if total <= EPSILON {
            return None;
        }
        let mse = points
            .iter()
            .map(|(w, s)| {
                let r = s.delay_ms - model.predict_delay(s.size_kb);
                w * r * r
            })
            .sum::<f64>()
            / total;
        Some(mse.sqrt())
    }
}
