//! Heart-rate estimation from the filtered PPG stream.
//!
//! Time-domain approach: an adaptive amplitude threshold tracks the signal's
//! min-max range, peaks are picked with a physiologically derived minimum
//! spacing, and two smoothing layers (per-update median, then a mean over
//! recent medians) keep the displayed number steady against detection noise.

use std::collections::VecDeque;

/// Tuning parameters for [`HeartRateEstimator`].
#[derive(Clone, Debug)]
pub struct BpmConfig {
    /// Sampling rate of the incoming filtered PPG stream (Hz)
    pub sample_rate_hz: f64,
    /// Analysis window length in seconds
    pub window_secs: f64,
    /// Lowest plausible heart rate; slower intervals are rejected
    pub min_bpm: f64,
    /// Highest plausible heart rate; also sets the minimum peak spacing
    pub max_bpm: f64,
    /// Peak threshold as a fraction of the window's min-max range
    pub threshold_fraction: f64,
    /// EMA influence applied to threshold updates (avoids threshold jumps)
    pub influence: f64,
    /// How many per-update medians the reported value averages over
    pub report_depth: usize,
}

impl Default for BpmConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 250.0,
            window_secs: 5.0,
            min_bpm: 40.0,
            max_bpm: 180.0,
            threshold_fraction: 0.6,
            influence: 0.125,
            report_depth: 5,
        }
    }
}

/// Streaming BPM estimator over filtered PPG samples.
#[derive(Clone, Debug)]
pub struct HeartRateEstimator {
    cfg: BpmConfig,
    window: VecDeque<f64>,
    capacity: usize,
    threshold: f64,
    threshold_primed: bool,
    medians: VecDeque<f64>,
    bpm: f64,
}

impl HeartRateEstimator {
    /// Create an estimator with default tuning at the given sample rate.
    #[must_use]
    pub fn new(sample_rate_hz: f64) -> Self {
        Self::with_config(BpmConfig {
            sample_rate_hz,
            ..BpmConfig::default()
        })
    }

    /// Create an estimator with explicit tuning.
    #[must_use]
    pub fn with_config(cfg: BpmConfig) -> Self {
        let capacity = ((cfg.window_secs * cfg.sample_rate_hz) as usize).max(2);
        Self {
            cfg,
            window: VecDeque::with_capacity(capacity),
            capacity,
            threshold: 0.0,
            threshold_primed: false,
            medians: VecDeque::new(),
            bpm: 0.0,
        }
    }

    /// Feed one filtered PPG sample; returns the current BPM estimate
    /// (0 until the window is at least half full).
    pub fn update(&mut self, sample: f64) -> f64 {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(sample);

        if self.window.len() < self.capacity / 2 {
            return 0.0;
        }

        let (min, max) = self
            .window
            .iter()
            .fold((f64::MAX, f64::MIN), |(lo, hi), &x| (lo.min(x), hi.max(x)));
        let target = self.cfg.threshold_fraction * (max - min);
        self.threshold = if self.threshold_primed {
            self.threshold + self.cfg.influence * (target - self.threshold)
        } else {
            self.threshold_primed = true;
            target
        };

        let level = min + self.threshold;
        let min_distance =
            (self.cfg.sample_rate_hz * 60.0 / self.cfg.max_bpm).round() as usize;
        let samples = self.window.make_contiguous();
        let peaks = detect_peaks(samples, level, min_distance.max(1));

        let mut instantaneous: Vec<f64> = peaks
            .windows(2)
            .map(|pair| self.cfg.sample_rate_hz * 60.0 / (pair[1] - pair[0]) as f64)
            .filter(|bpm| (self.cfg.min_bpm..=self.cfg.max_bpm).contains(bpm))
            .collect();

        if !instantaneous.is_empty() {
            let median = median_of(&mut instantaneous);
            if self.medians.len() == self.cfg.report_depth {
                self.medians.pop_front();
            }
            self.medians.push_back(median);
            self.bpm = self.medians.iter().sum::<f64>() / self.medians.len() as f64;
        }

        self.bpm
    }

    /// Latest reported BPM (0 before the first valid detection).
    #[must_use]
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Whether the analysis window has filled far enough to report.
    #[must_use]
    pub fn warmed_up(&self) -> bool {
        self.window.len() >= self.capacity / 2
    }

    /// Clear the window, threshold, and smoothing history for a new session.
    pub fn reset(&mut self) {
        self.window.clear();
        self.threshold = 0.0;
        self.threshold_primed = false;
        self.medians.clear();
        self.bpm = 0.0;
    }
}

/// Strict local maxima above `level`, at least `min_distance` apart; when
/// two candidates crowd each other the taller one wins.
fn detect_peaks(samples: &[f64], level: f64, min_distance: usize) -> Vec<usize> {
    let mut peaks: Vec<usize> = Vec::new();

    for i in 1..samples.len().saturating_sub(1) {
        let x = samples[i];
        if x <= level || x <= samples[i - 1] || x < samples[i + 1] {
            continue;
        }
        match peaks.last() {
            Some(&last) if i - last < min_distance => {
                if x > samples[last] {
                    *peaks.last_mut().unwrap() = i;
                }
            }
            _ => peaks.push(i),
        }
    }

    peaks
}

fn median_of(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

// ============================================================================
// Tests
// ============================================================================
