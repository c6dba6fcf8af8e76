//! Streaming signal conditioning for the physiological channels.
//!
//! Two preset chains cover the sensor board's channels:
//! - [`EogFilter`]: high-pass (drift removal) → mains notch → linear-phase
//!   FIR low-pass, preserving the slow eye-movement waveform for display.
//! - [`PpgFilter`]: a single band-pass isolating the cardiac band ahead of
//!   peak detection.
//!
//! All filters keep their state between calls; `reset()` them when a new
//! acquisition session starts or a device reconnects.

pub mod biquad;
pub mod fir;
pub mod offline;

pub use biquad::{Biquad, ButterworthFilter};
pub use fir::FirFilter;
pub use offline::{analyze, ArtifactSegment, OfflineAnalysis, SignalQuality};

use crate::error::FilterError;

/// Default mains frequency for the notch stage (Hz).
pub const DEFAULT_MAINS_HZ: f64 = 50.0;
/// EOG drift-removal high-pass cutoff (Hz).
pub const EOG_HIGHPASS_HZ: f64 = 0.3;
/// EOG display low-pass cutoff (Hz).
pub const EOG_LOWPASS_HZ: f64 = 30.0;
/// Tap count of the EOG FIR stage.
pub const EOG_FIR_TAPS: usize = 65;
/// Notch quality factor.
pub const NOTCH_Q: f64 = 30.0;
/// Cardiac band lower edge (Hz), ~42 BPM.
pub const PPG_BAND_LOW_HZ: f64 = 0.7;
/// Cardiac band upper edge (Hz), ~210 BPM.
pub const PPG_BAND_HIGH_HZ: f64 = 3.5;

// ============================================================================
// EOG Chain
// ============================================================================

/// Streaming conditioning chain for the eye-movement channel.
#[derive(Clone, Debug)]
pub struct EogFilter {
    highpass: ButterworthFilter,
    notch: Biquad,
    lowpass: FirFilter,
}

impl EogFilter {
    /// Build the chain for `sample_rate_hz` with the default 50 Hz notch.
    ///
    /// # Errors
    ///
    /// Returns an error when the sample rate cannot support the fixed
    /// cutoffs (below ~60 Hz).
    pub fn new(sample_rate_hz: f64) -> Result<Self, FilterError> {
        Self::with_mains(sample_rate_hz, DEFAULT_MAINS_HZ)
    }

    /// Build the chain with an explicit mains frequency (50 or 60 Hz).
    ///
    /// # Errors
    ///
    /// Returns an error when a cutoff is invalid for the sample rate.
    pub fn with_mains(sample_rate_hz: f64, mains_hz: f64) -> Result<Self, FilterError> {
        Ok(Self {
            highpass: ButterworthFilter::highpass(sample_rate_hz, EOG_HIGHPASS_HZ, 2)?,
            notch: Biquad::notch(sample_rate_hz, mains_hz, NOTCH_Q)?,
            lowpass: FirFilter::lowpass(sample_rate_hz, EOG_LOWPASS_HZ, EOG_FIR_TAPS)?,
        })
    }

    /// Process one raw EOG sample.
    #[inline]
    pub fn filter(&mut self, x: f64) -> f64 {
        let x = self.highpass.filter(x);
        let x = self.notch.filter(x);
        self.lowpass.filter(x)
    }

    /// Display latency introduced by the FIR stage, in samples.
    #[must_use]
    pub fn group_delay(&self) -> usize {
        self.lowpass.group_delay()
    }

    /// Reset every stage for a new session.
    pub fn reset(&mut self) {
        self.highpass.reset();
        self.notch.reset();
        self.lowpass.reset();
    }
}

// ============================================================================
// PPG Chain
// ============================================================================

/// Streaming band-pass for the pulse channel.
#[derive(Clone, Debug)]
pub struct PpgFilter {
    band: ButterworthFilter,
}

impl PpgFilter {
    /// Build the cardiac band-pass for `sample_rate_hz`.
    ///
    /// # Errors
    ///
    /// Returns an error when the sample rate cannot support the band.
    pub fn new(sample_rate_hz: f64) -> Result<Self, FilterError> {
        Ok(Self {
            band: ButterworthFilter::bandpass(
                sample_rate_hz,
                PPG_BAND_LOW_HZ,
                PPG_BAND_HIGH_HZ,
                2,
            )?,
        })
    }

    /// Process one raw PPG sample.
    #[inline]
    pub fn filter(&mut self, x: f64) -> f64 {
        self.band.filter(x)
    }

    /// Reset for a new session.
    pub fn reset(&mut self) {
        self.band.reset();
    }

    /// The underlying design, for offline reuse.
    #[must_use]
    pub fn design(&self) -> &ButterworthFilter {
        &self.band
    }
}

// ============================================================================
// Tests
// ============================================================================
