use crate::config::ConfigError;
use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};
use log::warn;

/// Highest low-pass corner allowed, as a fraction of the sample rate.
const MAX_CORNER_RATIO: f32 = 0.45;

/// Two cascaded Butterworth biquads: a high-pass that strips DC and handling
/// rumble, then a low-pass that removes fret noise and hiss.
///
/// Coefficients are recomputed (and the delay registers cleared) whenever the
/// sample rate changes. A non-finite output sample means the recursion blew
/// up: both sections are reset and the sample is replaced with silence.
pub struct BandPassFilter {
    sample_rate: f32,
    high_pass_hz: f32,
    /// Requested corner; the effective one is capped per sample rate
    low_pass_hz: f32,
    effective_low_pass_hz: f32,
    high_pass: DirectForm2Transposed<f32>,
    low_pass: DirectForm2Transposed<f32>,
    /// Total numerical resets since construction
    resets: u64,
}

fn design(high_pass: bool, sample_rate: f32, corner: f32) -> Option<Coefficients<f32>> {
    let kind = if high_pass { Type::HighPass } else { Type::LowPass };
    Coefficients::<f32>::from_params(kind, sample_rate.hz(), corner.hz(), Q_BUTTERWORTH_F32).ok()
}

impl BandPassFilter {
    pub fn new(sample_rate: f32, high_pass_hz: f32, low_pass_hz: f32) -> Result<Self, ConfigError> {
        let (hp, lp, effective) = Self::sections(sample_rate, high_pass_hz, low_pass_hz)?;
        Ok(Self {
            sample_rate,
            high_pass_hz,
            low_pass_hz,
            effective_low_pass_hz: effective,
            high_pass: hp,
            low_pass: lp,
            resets: 0,
        })
    }

    fn sections(
        sample_rate: f32,
        high_pass_hz: f32,
        low_pass_hz: f32,
    ) -> Result<
        (
            DirectForm2Transposed<f32>,
            DirectForm2Transposed<f32>,
            f32,
        ),
        ConfigError,
    > {
        let err = ConfigError::Filter {
            high_pass: high_pass_hz,
            low_pass: low_pass_hz,
            sample_rate,
        };
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(ConfigError::SampleRate(sample_rate));
        }
        // Keep the low-pass corner clear of Nyquist at low sample rates.
        let low_pass_hz = low_pass_hz.min(sample_rate * MAX_CORNER_RATIO);
        if !(high_pass_hz > 0.0 && high_pass_hz < low_pass_hz) {
            return Err(err);
        }
        let hp = design(true, sample_rate, high_pass_hz).ok_or_else(|| err.clone())?;
        let lp = design(false, sample_rate, low_pass_hz).ok_or(err)?;
        Ok((
            DirectForm2Transposed::<f32>::new(hp),
            DirectForm2Transposed::<f32>::new(lp),
            low_pass_hz,
        ))
    }

    /// Redesign for a new sample rate. Delay registers start from zero.
    pub fn set_sample_rate(&mut self, sample_rate: f32) -> Result<(), ConfigError> {
        if sample_rate == self.sample_rate {
            return Ok(());
        }
        let (hp, lp, effective) = Self::sections(sample_rate, self.high_pass_hz, self.low_pass_hz)?;
        if effective < self.low_pass_hz {
            warn!(
                "low-pass corner capped at {:.0} Hz for {} Hz sample rate",
                effective, sample_rate
            );
        }
        self.sample_rate = sample_rate;
        self.effective_low_pass_hz = effective;
        self.high_pass = hp;
        self.low_pass = lp;
        Ok(())
    }

    /// Low-pass corner in use at the current sample rate.
    pub fn effective_low_pass_hz(&self) -> f32 {
        self.effective_low_pass_hz
    }

    /// Clear the delay registers.
    pub fn reset(&mut self) {
        // Rebuilding from the validated corners cannot fail.
        if let Ok((hp, lp, _)) = Self::sections(self.sample_rate, self.high_pass_hz, self.low_pass_hz) {
            self.high_pass = hp;
            self.low_pass = lp;
        }
    }

    /// Filter one sample.
    #[inline]
    pub fn run(&mut self, x: f32) -> f32 {
        let y = self.low_pass.run(self.high_pass.run(x));
        if y.is_finite() {
            y
        } else {
            self.reset();
            self.resets += 1;
            0.0
        }
    }

    /// Filter `input` into `output` (same length). Returns the number of
    /// numerical resets that happened inside this block.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> u32 {
        let before = self.resets;
        for (o, &x) in output.iter_mut().zip(input) {
            *o = self.run(x);
        }
        let resets = (self.resets - before) as u32;
        if resets > 0 {
            warn!(
                "band-pass filter produced non-finite output; state reset {} time(s) in a {}-sample block",
                resets,
                input.len()
            );
        }
        resets
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn total_resets(&self) -> u64 {
        self.resets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::compute_rms;
    use crate::dsp::test_helpers::sine_wave;

    fn filtered_rms(freq: f64) -> f32 {
        let mut f = BandPassFilter::new(48000.0, 60.0, 2800.0).unwrap();
        let input = sine_wave(freq, 0.5, 48000.0, 9600);
        let mut out = vec![0.0; input.len()];
        f.process(&input, &mut out);
        // Skip the transient
        compute_rms(&out[4800..])
    }

    #[test]
    fn test_passes_guitar_band() {
        let pass = filtered_rms(196.0);
        assert!(pass > 0.33, "196 Hz should pass, rms={}", pass);
    }

    #[test]
    fn test_attenuates_rumble_and_hiss() {
        let pass = filtered_rms(330.0);
        assert!(filtered_rms(15.0) < pass * 0.1, "15 Hz rumble should be cut");
        assert!(filtered_rms(12000.0) < pass * 0.1, "12 kHz hiss should be cut");
    }

    #[test]
    fn test_removes_dc() {
        let mut f = BandPassFilter::new(48000.0, 60.0, 2800.0).unwrap();
        let input = vec![0.5f32; 9600];
        let mut out = vec![0.0; input.len()];
        f.process(&input, &mut out);
        assert!(out[9000..].iter().all(|s| s.abs() < 1e-3));
    }

    #[test]
    fn test_nan_input_resets_and_zeroes() {
        let mut f = BandPassFilter::new(48000.0, 60.0, 2800.0).unwrap();
        let mut input = sine_wave(220.0, 0.5, 48000.0, 1000);
        input[500] = f32::NAN;
        let mut out = vec![0.0; input.len()];
        let resets = f.process(&input, &mut out);
        assert_eq!(resets, 1);
        assert_eq!(out[500], 0.0);
        assert!(out.iter().all(|s| s.is_finite()));
        assert_eq!(f.total_resets(), 1);
    }

    #[test]
    fn test_low_pass_clamped_below_nyquist() {
        // 2800 Hz corner is above 0.45·4000; the design must still succeed.
        let mut f = BandPassFilter::new(4000.0, 60.0, 2800.0).unwrap();
        assert!((f.effective_low_pass_hz() - 1800.0).abs() < 0.01);
        // The requested corner comes back at a rate that allows it
        f.set_sample_rate(48000.0).unwrap();
        assert_eq!(f.effective_low_pass_hz(), 2800.0);
        f.set_sample_rate(6000.0).unwrap();
        assert!((f.effective_low_pass_hz() - 2700.0).abs() < 0.01);
    }

    #[test]
    fn test_rejects_bad_rate_and_corners() {
        assert!(BandPassFilter::new(0.0, 60.0, 2800.0).is_err());
        assert!(BandPassFilter::new(48000.0, 3000.0, 2800.0).is_err());
        let mut f = BandPassFilter::new(48000.0, 60.0, 2800.0).unwrap();
        assert!(f.set_sample_rate(-1.0).is_err());
        assert_eq!(f.sample_rate(), 48000.0);
        assert!(f.set_sample_rate(44100.0).is_ok());
        assert_eq!(f.sample_rate(), 44100.0);
    }
}
