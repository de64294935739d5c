//! YIN fundamental estimator: difference function, cumulative mean
//! normalization, absolute threshold and parabolic refinement.
//!
//! The difference function is computed directly over a fixed window of
//! `frame_len - max_period - 1` samples so every lag is compared over the
//! same amount of signal.

use crate::config::EstimatorKind;
use crate::dsp::parabolic_offset;
use crate::estimator::{FundamentalEstimator, SearchRange};
use crate::types::PitchCandidate;
use log::trace;

pub struct Yin {
    range: SearchRange,
    threshold: f32,
    /// d(τ) for τ in 0..=max_period + 1
    diff: Vec<f32>,
    /// d'(τ), same indexing
    cmndf: Vec<f32>,
}

impl Yin {
    pub fn new(range: SearchRange, threshold: f32, frame_len: usize) -> Self {
        let lags = frame_len / 2 + 2;
        Self {
            range,
            threshold,
            diff: Vec::with_capacity(lags),
            cmndf: Vec::with_capacity(lags),
        }
    }

    /// Fill `diff` and `cmndf` for lags `0..=last_lag`.
    fn difference(&mut self, frame: &[f32], last_lag: usize) {
        let window = frame.len() - last_lag;
        self.diff.clear();
        self.diff.resize(last_lag + 1, 0.0);
        for tau in 1..=last_lag {
            let (head, shifted) = (&frame[..window], &frame[tau..tau + window]);
            self.diff[tau] = head
                .iter()
                .zip(shifted)
                .map(|(a, b)| {
                    let d = a - b;
                    d * d
                })
                .sum();
        }

        self.cmndf.clear();
        self.cmndf.resize(last_lag + 1, 1.0);
        let mut running = 0.0f32;
        for tau in 1..=last_lag {
            running += self.diff[tau];
            self.cmndf[tau] = if running > 0.0 {
                self.diff[tau] * tau as f32 / running
            } else {
                1.0
            };
        }
    }

    /// Cumulative mean normalized difference of the last analysed frame.
    pub fn cmndf(&self) -> &[f32] {
        &self.cmndf
    }

    /// First dip below the threshold at or after `min_period`, walked down
    /// to the bottom of its valley.
    fn pick_lag(&self, min_period: usize, max_period: usize) -> Option<usize> {
        let d = &self.cmndf;
        let mut tau = (min_period..=max_period).find(|&t| d[t] < self.threshold)?;
        while tau < max_period && d[tau + 1] < d[tau] {
            tau += 1;
        }
        Some(tau)
    }
}

impl FundamentalEstimator for Yin {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Yin
    }

    fn estimate(&mut self, frame: &[f32], sample_rate: f32) -> PitchCandidate {
        let none = PitchCandidate::none(EstimatorKind::Yin);
        let Some((min_period, max_period)) = self.range.lags(sample_rate, frame.len()) else {
            return none;
        };
        // One extra lag so the parabola has a right neighbour at max_period.
        let last_lag = max_period + 1;
        if frame.len() <= last_lag + min_period {
            return none;
        }
        self.difference(frame, last_lag);

        let Some(tau) = self.pick_lag(min_period, max_period) else {
            return none;
        };
        let d = &self.cmndf;
        let refined = tau as f32 + parabolic_offset(d[tau - 1], d[tau], d[tau + 1]);
        let freq = sample_rate / refined;
        if !self.range.contains(freq) {
            trace!("yin: {:.2} Hz outside search range", freq);
            return none;
        }
        PitchCandidate::found(EstimatorKind::Yin, freq, 1.0 - d[tau])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_helpers::{add_noise, sine_wave};

    fn yin() -> Yin {
        Yin::new(SearchRange { min_hz: 60.0, max_hz: 1200.0 }, 0.15, 2048)
    }

    #[test]
    fn test_cmndf_starts_at_one_and_dips_at_period() {
        let mut y = yin();
        let frame = sine_wave(200.0, 0.5, 48000.0, 2048);
        let c = y.estimate(&frame, 48000.0);
        assert!(c.is_voiced());
        let d = y.cmndf();
        assert_eq!(d[0], 1.0);
        // 200 Hz at 48 kHz = 240 samples
        assert!(d[240] < 0.05, "d'(240) = {}", d[240]);
        assert!(d[120] > 0.5, "half period must not dip, d'(120) = {}", d[120]);
    }

    #[test]
    fn test_sub_sample_accuracy() {
        let mut y = yin();
        // 146.83 Hz: period 326.9 samples, not an integer lag
        let frame = sine_wave(146.83, 0.5, 48000.0, 2048);
        let f = y.estimate(&frame, 48000.0).frequency_hz.unwrap();
        assert!((f - 146.83).abs() < 0.2, "got {}", f);
    }

    #[test]
    fn test_noisy_sine_still_detected() {
        let mut y = yin();
        let mut frame = sine_wave(110.0, 0.5, 48000.0, 2048);
        add_noise(&mut frame, 0.05, 7);
        let f = y.estimate(&frame, 48000.0).frequency_hz.unwrap();
        assert!((f - 110.0).abs() / 110.0 < 0.01, "got {}", f);
    }

    #[test]
    fn test_white_noise_is_unvoiced() {
        let mut y = yin();
        let mut frame = vec![0.0f32; 2048];
        add_noise(&mut frame, 0.5, 42);
        let c = y.estimate(&frame, 48000.0);
        assert!(!c.is_voiced(), "noise gave {:?}", c.frequency_hz);
    }

    #[test]
    fn test_frame_too_short_is_unvoiced() {
        let mut y = yin();
        let frame = sine_wave(440.0, 0.5, 48000.0, 64);
        assert!(!y.estimate(&frame, 48000.0).is_voiced());
    }

    #[test]
    fn test_out_of_range_pitch_rejected() {
        let mut y = yin();
        // Whatever comes back for a pitch above max_hz must lie in range.
        let frame = sine_wave(1500.0, 0.5, 48000.0, 2048);
        let c = y.estimate(&frame, 48000.0);
        if let Some(f) = c.frequency_hz {
            assert!(f <= 1200.0 && f >= 60.0);
        }
    }
}
