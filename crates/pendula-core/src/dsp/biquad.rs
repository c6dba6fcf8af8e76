//! Streaming IIR filters (biquad sections and Butterworth cascades).
//!
//! Every filter here carries its state across calls: `filter()` is meant to
//! be invoked once per incoming sample for the whole acquisition session.
//! On the first sample the state is primed from the filter's steady-state
//! response, so a stream started mid-signal produces no edge transient and
//! per-sample output matches what block filtering of the same data would
//! yield.

use crate::error::FilterError;

// ============================================================================
// Biquad Section
// ============================================================================

/// One second-order IIR section, Direct Form II transposed.
#[derive(Clone, Debug)]
pub struct Biquad {
    b: [f64; 3],
    a: [f64; 3],
    /// DF2T delay registers
    z: [f64; 2],
    primed: bool,
}

impl Biquad {
    fn from_coefficients(b: [f64; 3], a: [f64; 3]) -> Self {
        Self {
            b,
            a,
            z: [0.0, 0.0],
            primed: false,
        }
    }

    /// Butterworth-style low-pass section with quality factor `q`.
    ///
    /// # Errors
    ///
    /// Returns an error when `cutoff_hz` is outside (0, Nyquist).
    pub fn lowpass(sample_rate_hz: f64, cutoff_hz: f64, q: f64) -> Result<Self, FilterError> {
        check_cutoff(sample_rate_hz, cutoff_hz)?;

        let k = (std::f64::consts::PI * cutoff_hz / sample_rate_hz).tan();
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);

        let b0 = k2 * norm;
        Ok(Self::from_coefficients(
            [b0, 2.0 * b0, b0],
            [1.0, 2.0 * (k2 - 1.0) * norm, (1.0 - k / q + k2) * norm],
        ))
    }

    /// Butterworth-style high-pass section with quality factor `q`.
    ///
    /// # Errors
    ///
    /// Returns an error when `cutoff_hz` is outside (0, Nyquist).
    pub fn highpass(sample_rate_hz: f64, cutoff_hz: f64, q: f64) -> Result<Self, FilterError> {
        check_cutoff(sample_rate_hz, cutoff_hz)?;

        let k = (std::f64::consts::PI * cutoff_hz / sample_rate_hz).tan();
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);

        Ok(Self::from_coefficients(
            [norm, -2.0 * norm, norm],
            [1.0, 2.0 * (k2 - 1.0) * norm, (1.0 - k / q + k2) * norm],
        ))
    }

    /// Notch section for mains interference rejection.
    ///
    /// # Errors
    ///
    /// Returns an error when `notch_hz` is outside (0, Nyquist).
    pub fn notch(sample_rate_hz: f64, notch_hz: f64, q: f64) -> Result<Self, FilterError> {
        check_cutoff(sample_rate_hz, notch_hz)?;

        let omega = 2.0 * std::f64::consts::PI * notch_hz / sample_rate_hz;
        let cos_omega = omega.cos();
        let alpha = omega.sin() / (2.0 * q);
        let norm = 1.0 / (1.0 + alpha);

        Ok(Self::from_coefficients(
            [norm, -2.0 * cos_omega * norm, norm],
            [1.0, -2.0 * cos_omega * norm, (1.0 - alpha) * norm],
        ))
    }

    /// DC gain of the section.
    #[must_use]
    pub fn dc_gain(&self) -> f64 {
        (self.b[0] + self.b[1] + self.b[2]) / (1.0 + self.a[1] + self.a[2])
    }

    /// Set the delay registers to the steady-state values for a constant
    /// input `x`, so a stream starting at `x` produces no transient.
    pub fn prime(&mut self, x: f64) {
        let y = self.dc_gain() * x;
        self.z[0] = y - self.b[0] * x;
        self.z[1] = self.b[2] * x - self.a[2] * y;
        self.primed = true;
    }

    /// Process one sample.
    #[inline]
    pub fn filter(&mut self, x: f64) -> f64 {
        if !self.primed {
            self.prime(x);
        }

        let y = self.b[0] * x + self.z[0];
        self.z[0] = self.b[1] * x - self.a[1] * y + self.z[1];
        self.z[1] = self.b[2] * x - self.a[2] * y;
        y
    }

    /// Return to the unprimed state; the next sample re-primes.
    pub fn reset(&mut self) {
        self.z = [0.0, 0.0];
        self.primed = false;
    }
}

fn check_cutoff(sample_rate_hz: f64, cutoff_hz: f64) -> Result<(), FilterError> {
    if !(cutoff_hz > 0.0 && cutoff_hz < sample_rate_hz / 2.0) {
        return Err(FilterError::InvalidCutoff {
            cutoff_hz,
            sample_rate_hz,
        });
    }
    Ok(())
}

// ============================================================================
// Butterworth Cascade
// ============================================================================

/// Butterworth filter of arbitrary even order, realized as a biquad cascade.
///
/// Section quality factors follow the Butterworth pole angles, so the
/// cascade has the maximally flat passband of the analog prototype.
#[derive(Clone, Debug)]
pub struct ButterworthFilter {
    sections: Vec<Biquad>,
}

impl ButterworthFilter {
    /// Quality factors for a Butterworth design of even `order`.
    fn section_qs(order: usize) -> Result<Vec<f64>, FilterError> {
        if order == 0 || order % 2 != 0 {
            return Err(FilterError::InvalidOrder { order });
        }

        let m = order as f64;
        Ok((0..order / 2)
            .map(|k| {
                let phi = (2 * k + 1) as f64 * std::f64::consts::PI / (2.0 * m);
                1.0 / (2.0 * phi.cos())
            })
            .collect())
    }

    /// Low-pass Butterworth of the given even `order`.
    ///
    /// # Errors
    ///
    /// Returns an error for an odd/zero order or an invalid cutoff.
    pub fn lowpass(
        sample_rate_hz: f64,
        cutoff_hz: f64,
        order: usize,
    ) -> Result<Self, FilterError> {
        let sections = Self::section_qs(order)?
            .into_iter()
            .map(|q| Biquad::lowpass(sample_rate_hz, cutoff_hz, q))
            .collect::<Result<_, _>>()?;
        Ok(Self { sections })
    }

    /// High-pass Butterworth of the given even `order`.
    ///
    /// # Errors
    ///
    /// Returns an error for an odd/zero order or an invalid cutoff.
    pub fn highpass(
        sample_rate_hz: f64,
        cutoff_hz: f64,
        order: usize,
    ) -> Result<Self, FilterError> {
        let sections = Self::section_qs(order)?
            .into_iter()
            .map(|q| Biquad::highpass(sample_rate_hz, cutoff_hz, q))
            .collect::<Result<_, _>>()?;
        Ok(Self { sections })
    }

    /// Band-pass built as a high-pass at `low_hz` cascaded with a low-pass
    /// at `high_hz`, each of the given even `order`.
    ///
    /// # Errors
    ///
    /// Returns an error for reversed band edges, an odd/zero order, or an
    /// invalid cutoff.
    pub fn bandpass(
        sample_rate_hz: f64,
        low_hz: f64,
        high_hz: f64,
        order: usize,
    ) -> Result<Self, FilterError> {
        if low_hz >= high_hz {
            return Err(FilterError::InvalidBand { low_hz, high_hz });
        }

        let mut sections: Vec<Biquad> = Self::section_qs(order)?
            .into_iter()
            .map(|q| Biquad::highpass(sample_rate_hz, low_hz, q))
            .collect::<Result<_, _>>()?;
        let lowpass: Vec<Biquad> = Self::section_qs(order)?
            .into_iter()
            .map(|q| Biquad::lowpass(sample_rate_hz, high_hz, q))
            .collect::<Result<_, _>>()?;
        sections.extend(lowpass);

        Ok(Self { sections })
    }

    /// Process one sample through every section.
    #[inline]
    pub fn filter(&mut self, x: f64) -> f64 {
        self.sections.iter_mut().fold(x, |acc, s| s.filter(acc))
    }

    /// Return every section to the unprimed state.
    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
    }

    /// A state-free copy for batch processing.
    #[must_use]
    pub fn fresh(&self) -> Self {
        let mut copy = self.clone();
        copy.reset();
        copy
    }

    /// Zero-phase batch filtering: forward pass, then a second pass over the
    /// reversed result. Doubles the effective order and cancels the phase
    /// lag, which is why the offline analysis path uses it instead of the
    /// streaming path.
    #[must_use]
    pub fn filter_signal(&self, signal: &[f64]) -> Vec<f64> {
        let mut forward = self.fresh();
        let mut out: Vec<f64> = signal.iter().map(|&x| forward.filter(x)).collect();

        out.reverse();
        let mut backward = self.fresh();
        for x in &mut out {
            *x = backward.filter(*x);
        }
        out.reverse();

        out
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn steady_amplitude(filter: &mut ButterworthFilter, freq_hz: f64, fs: f64) -> f64 {
        let total = (fs * 20.0) as usize;
        let tail = total / 4;
        let mut peak: f64 = 0.0;
        for i in 0..total {
            let t = i as f64 / fs;
            let y = filter.filter((2.0 * std::f64::consts::PI * freq_hz * t).sin());
            if i >= total - tail {
                peak = peak.max(y.abs());
            }
        }
        peak
    }

    #[test]
    fn highpass_drives_dc_to_zero() {
        let mut filter = ButterworthFilter::highpass(250.0, 0.5, 2).unwrap();

        // Start at zero, then step to a constant: the output must settle
        // back to zero well within a few settling times.
        filter.filter(0.0);
        let mut y = f64::MAX;
        for _ in 0..3000 {
            y = filter.filter(5.0);
        }
        assert!(y.abs() < 1e-3, "residual {y}");
    }

    #[test]
    fn priming_removes_edge_transient() {
        // A low-pass hit with a large constant as its very first sample
        // must pass it through unchanged instead of ramping up.
        let mut filter = ButterworthFilter::lowpass(250.0, 10.0, 2).unwrap();
        let y = filter.filter(42.0);
        assert!((y - 42.0).abs() < 1e-9, "first output {y}");
    }

    #[test]
    fn state_carries_across_call_boundaries() {
        let signal: Vec<f64> = (0..2000)
            .map(|i| {
                let t = i as f64 / 250.0;
                (2.0 * std::f64::consts::PI * 3.0 * t).sin()
                    + 0.3 * (2.0 * std::f64::consts::PI * 40.0 * t).sin()
            })
            .collect();

        let mut whole = ButterworthFilter::lowpass(250.0, 10.0, 4).unwrap();
        let expected: Vec<f64> = signal.iter().map(|&x| whole.filter(x)).collect();

        // Same filter type, fed in two chunks: identical output, which is
        // exactly what block filtering would not give without carried state.
        let mut split = ButterworthFilter::lowpass(250.0, 10.0, 4).unwrap();
        let mut got: Vec<f64> = signal[..700].iter().map(|&x| split.filter(x)).collect();
        got.extend(signal[700..].iter().map(|&x| split.filter(x)));

        for (e, g) in expected.iter().zip(&got) {
            assert!((e - g).abs() < 1e-12);
        }
    }

    #[test]
    fn notch_rejects_mains_passes_signal() {
        let fs = 250.0;
        let mut notch = Biquad::notch(fs, 50.0, 30.0).unwrap();
        let total = (fs * 30.0) as usize;
        let mut mains_peak: f64 = 0.0;
        for i in 0..total {
            let t = i as f64 / fs;
            let y = notch.filter((2.0 * std::f64::consts::PI * 50.0 * t).sin());
            if i >= total * 3 / 4 {
                mains_peak = mains_peak.max(y.abs());
            }
        }
        assert!(mains_peak < 0.05, "mains leak {mains_peak}");

        let mut notch = Biquad::notch(fs, 50.0, 30.0).unwrap();
        let mut slow_peak: f64 = 0.0;
        for i in 0..total {
            let t = i as f64 / fs;
            let y = notch.filter((2.0 * std::f64::consts::PI * 2.0 * t).sin());
            if i >= total * 3 / 4 {
                slow_peak = slow_peak.max(y.abs());
            }
        }
        assert!(slow_peak > 0.95, "passband loss {slow_peak}");
    }

    #[test]
    fn bandpass_selects_cardiac_band() {
        let fs = 250.0;

        let mut band = ButterworthFilter::bandpass(fs, 0.7, 3.5, 2).unwrap();
        let in_band = steady_amplitude(&mut band, 1.2, fs);
        assert!(in_band > 0.7, "in-band amplitude {in_band}");

        let mut band = ButterworthFilter::bandpass(fs, 0.7, 3.5, 2).unwrap();
        let below = steady_amplitude(&mut band, 0.05, fs);
        assert!(below < 0.2, "sub-band amplitude {below}");

        let mut band = ButterworthFilter::bandpass(fs, 0.7, 3.5, 2).unwrap();
        let above = steady_amplitude(&mut band, 20.0, fs);
        assert!(above < 0.2, "supra-band amplitude {above}");
    }

    #[test]
    fn zero_phase_keeps_peak_positions() {
        let fs = 250.0;
        let signal: Vec<f64> = (0..2500)
            .map(|i| (2.0 * std::f64::consts::PI * 1.0 * (i as f64 / fs)).sin())
            .collect();

        let filter = ButterworthFilter::lowpass(fs, 10.0, 2).unwrap();
        let filtered = filter.filter_signal(&signal);

        // 1 Hz sine peaks at samples 62.5, 312.5, ...; the forward-backward
        // pass must not shift them.
        let peak_in = (260..370)
            .max_by(|&a, &b| signal[a].total_cmp(&signal[b]))
            .unwrap();
        let peak_out = (260..370)
            .max_by(|&a, &b| filtered[a].total_cmp(&filtered[b]))
            .unwrap();
        assert!(peak_in.abs_diff(peak_out) <= 2, "{peak_in} vs {peak_out}");
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(matches!(
            ButterworthFilter::lowpass(250.0, 0.0, 2),
            Err(FilterError::InvalidCutoff { .. })
        ));
        assert!(matches!(
            ButterworthFilter::lowpass(250.0, 200.0, 2),
            Err(FilterError::InvalidCutoff { .. })
        ));
        assert!(matches!(
            ButterworthFilter::highpass(250.0, 1.0, 3),
            Err(FilterError::InvalidOrder { order: 3 })
        ));
        assert!(matches!(
            ButterworthFilter::bandpass(250.0, 5.0, 1.0, 2),
            Err(FilterError::InvalidBand { .. })
        ));
    }

    #[test]
    fn butterworth_q_values() {
        // Classic table values for orders 2 and 4
        let q2 = ButterworthFilter::section_qs(2).unwrap();
        assert!((q2[0] - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);

        let q4 = ButterworthFilter::section_qs(4).unwrap();
        assert!((q4[0] - 0.5412).abs() < 1e-3);
        assert!((q4[1] - 1.3066).abs() < 1e-3);
    }
}
