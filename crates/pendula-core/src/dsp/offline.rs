//! Post-hoc batch analysis for recorded signals.
//!
//! Zero-phase filtering plus advisory motion-artifact segmentation. The
//! artifact regions are reported, never used to alter the signal.

use super::biquad::ButterworthFilter;

/// A contiguous region of unusually high variance.
#[derive(Clone, Debug, PartialEq)]
pub struct ArtifactSegment {
    /// First sample index of the segment
    pub start: usize,
    /// One past the last sample index
    pub end: usize,
    /// Largest windowed variance observed inside the segment
    pub peak_variance: f64,
}

/// Coarse quality metrics for a recorded signal.
#[derive(Clone, Debug, PartialEq)]
pub struct SignalQuality {
    /// RMS of the filtered signal
    pub rms: f64,
    /// Fraction of samples inside artifact segments (0..1)
    pub artifact_fraction: f64,
}

/// Result of [`analyze`].
#[derive(Clone, Debug)]
pub struct OfflineAnalysis {
    /// Zero-phase filtered signal, same length as the input
    pub filtered: Vec<f64>,
    /// Detected motion-artifact segments, in order
    pub artifacts: Vec<ArtifactSegment>,
    /// Quality summary
    pub quality: SignalQuality,
}

/// Variance windows this many times the median variance flag an artifact.
const ARTIFACT_VARIANCE_RATIO: f64 = 5.0;

/// Batch-filter a recording and locate motion artifacts.
///
/// The filter argument provides the design; its streaming state is not
/// touched (fresh copies run the forward-backward passes). Artifact
/// detection slides a one-second variance window over the filtered signal
/// and flags windows far above the median variance.
#[must_use]
pub fn analyze(
    filter: &ButterworthFilter,
    signal: &[f64],
    sample_rate_hz: f64,
) -> OfflineAnalysis {
    let filtered = filter.filter_signal(signal);

    let window = (sample_rate_hz as usize).max(4);
    let artifacts = detect_artifacts(&filtered, window);

    let rms = if filtered.is_empty() {
        0.0
    } else {
        (filtered.iter().map(|x| x * x).sum::<f64>() / filtered.len() as f64).sqrt()
    };
    let flagged: usize = artifacts.iter().map(|a| a.end - a.start).sum();
    let artifact_fraction = if filtered.is_empty() {
        0.0
    } else {
        flagged as f64 / filtered.len() as f64
    };

    OfflineAnalysis {
        filtered,
        artifacts,
        quality: SignalQuality {
            rms,
            artifact_fraction,
        },
    }
}

fn detect_artifacts(signal: &[f64], window: usize) -> Vec<ArtifactSegment> {
    if signal.len() < window * 2 {
        return Vec::new();
    }

    let hop = (window / 4).max(1);
    let mut variances = Vec::new();
    let mut offset = 0;
    while offset + window <= signal.len() {
        variances.push((offset, variance(&signal[offset..offset + window])));
        offset += hop;
    }

    let mut sorted: Vec<f64> = variances.iter().map(|&(_, v)| v).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let median = sorted[sorted.len() / 2];
    if median <= f64::EPSILON {
        return Vec::new();
    }

    let threshold = median * ARTIFACT_VARIANCE_RATIO;
    let mut segments: Vec<ArtifactSegment> = Vec::new();
    for &(start, var) in &variances {
        if var < threshold {
            continue;
        }
        let end = start + window;
        match segments.last_mut() {
            // Overlapping or adjacent windows merge into one segment
            Some(last) if start <= last.end => {
                last.end = end;
                last.peak_variance = last.peak_variance.max(var);
            }
            _ => segments.push(ArtifactSegment {
                start,
                end,
                peak_variance: var,
            }),
        }
    }

    segments
}

fn variance(window: &[f64]) -> f64 {
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / window.len() as f64
}

// ============================================================================
// Tests
// ============================================================================
