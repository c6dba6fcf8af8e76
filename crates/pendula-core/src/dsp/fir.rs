//! Linear-phase FIR low-pass (windowed sinc).
//!
//! The EOG display path uses this instead of another IIR stage: the
//! symmetric taps give a constant group delay of `(taps - 1) / 2` samples,
//! so the waveform shape survives filtering — acceptable latency for a
//! display, unacceptable distortion avoided.

use crate::error::FilterError;

/// Streaming FIR filter with a persistent delay line.
#[derive(Clone, Debug)]
pub struct FirFilter {
    taps: Vec<f64>,
    delay: Vec<f64>,
    /// Next write slot in the circular delay line
    head: usize,
    primed: bool,
}

impl FirFilter {
    /// Design a low-pass by Hamming-windowed sinc.
    ///
    /// `taps` must be odd so the filter has a center tap; the tap vector is
    /// normalized to unity DC gain.
    ///
    /// # Errors
    ///
    /// Returns an error for an even/short tap count or an invalid cutoff.
    pub fn lowpass(
        sample_rate_hz: f64,
        cutoff_hz: f64,
        taps: usize,
    ) -> Result<Self, FilterError> {
        if taps < 3 || taps % 2 == 0 {
            return Err(FilterError::InvalidTapCount { taps });
        }
        if !(cutoff_hz > 0.0 && cutoff_hz < sample_rate_hz / 2.0) {
            return Err(FilterError::InvalidCutoff {
                cutoff_hz,
                sample_rate_hz,
            });
        }

        let center = (taps - 1) as f64 / 2.0;
        let fc = cutoff_hz / sample_rate_hz;

        let mut coeffs: Vec<f64> = (0..taps)
            .map(|i| {
                let n = i as f64 - center;
                let sinc = if n == 0.0 {
                    2.0 * fc
                } else {
                    (2.0 * std::f64::consts::PI * fc * n).sin() / (std::f64::consts::PI * n)
                };
                let window = 0.54
                    - 0.46 * (2.0 * std::f64::consts::PI * i as f64 / (taps - 1) as f64).cos();
                sinc * window
            })
            .collect();

        let sum: f64 = coeffs.iter().sum();
        for c in &mut coeffs {
            *c /= sum;
        }

        Ok(Self {
            delay: vec![0.0; coeffs.len()],
            taps: coeffs,
            head: 0,
            primed: false,
        })
    }

    /// Constant group delay in samples.
    #[must_use]
    pub fn group_delay(&self) -> usize {
        (self.taps.len() - 1) / 2
    }

    /// Process one sample.
    #[inline]
    pub fn filter(&mut self, x: f64) -> f64 {
        if !self.primed {
            // Steady state for a DC stream equal to the first sample
            self.delay.fill(x);
            self.primed = true;
        }

        self.delay[self.head] = x;
        self.head = (self.head + 1) % self.delay.len();

        let len = self.delay.len();
        let mut acc = 0.0;
        for (i, tap) in self.taps.iter().enumerate() {
            // taps[0] weighs the newest sample
            let idx = (self.head + len - 1 - i) % len;
            acc += tap * self.delay[idx];
        }
        acc
    }

    /// Clear the delay line; the next sample re-primes.
    pub fn reset(&mut self) {
        self.delay.fill(0.0);
        self.head = 0;
        self.primed = false;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taps_are_symmetric_and_unity_gain() {
        let fir = FirFilter::lowpass(250.0, 30.0, 65).unwrap();

        let sum: f64 = fir.taps.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);

        let n = fir.taps.len();
        for i in 0..n / 2 {
            assert!((fir.taps[i] - fir.taps[n - 1 - i]).abs() < 1e-12);
        }
    }

    #[test]
    fn dc_passes_unchanged_from_first_sample() {
        let mut fir = FirFilter::lowpass(250.0, 30.0, 65).unwrap();
        for _ in 0..10 {
            let y = fir.filter(3.25);
            assert!((y - 3.25).abs() < 1e-9);
        }
    }

    #[test]
    fn impulse_peaks_at_group_delay() {
        let mut fir = FirFilter::lowpass(250.0, 30.0, 33).unwrap();
        fir.filter(0.0); // prime at zero

        let mut response = vec![fir.filter(1.0)];
        for _ in 0..40 {
            response.push(fir.filter(0.0));
        }

        let peak = response
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, fir.group_delay());
    }

    #[test]
    fn attenuates_above_cutoff() {
        let fs = 250.0;
        let mut fir = FirFilter::lowpass(fs, 30.0, 65).unwrap();

        let mut peak: f64 = 0.0;
        for i in 0..2000 {
            let t = i as f64 / fs;
            let y = fir.filter((2.0 * std::f64::consts::PI * 90.0 * t).sin());
            if i > 1000 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 0.05, "stopband leak {peak}");
    }

    #[test]
    fn rejects_even_tap_count() {
        assert!(matches!(
            FirFilter::lowpass(250.0, 30.0, 64),
            Err(FilterError::InvalidTapCount { taps: 64 })
        ));
    }
}
