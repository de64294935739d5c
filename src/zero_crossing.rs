//! Zero-crossing rate. Too coarse to tune by, but it cannot lock onto a
//! subharmonic, so the cross-validator uses it to bound the plausible range.

use crate::config::EstimatorKind;
use crate::dsp::peak_amplitude;
use crate::estimator::{FundamentalEstimator, SearchRange};
use crate::types::PitchCandidate;

/// Re-arm level for the next rising crossing, relative to the frame peak.
const HYSTERESIS: f32 = 0.1;

pub struct ZeroCrossingRate {
    range: SearchRange,
    /// Fractional sample positions of rising crossings
    crossings: Vec<f32>,
}

impl ZeroCrossingRate {
    pub fn new(range: SearchRange) -> Self {
        Self {
            range,
            crossings: Vec::with_capacity(64),
        }
    }

    /// Record rising crossings. A crossing only counts after the signal has
    /// gone below `-HYSTERESIS · peak`, so ripple around zero is ignored.
    fn find_crossings(&mut self, frame: &[f32], peak: f32) {
        self.crossings.clear();
        let rearm = -HYSTERESIS * peak;
        let mut armed = false;
        for i in 1..frame.len() {
            let (prev, cur) = (frame[i - 1], frame[i]);
            if cur < rearm {
                armed = true;
            }
            if armed && prev <= 0.0 && cur > 0.0 {
                let frac = -prev / (cur - prev);
                self.crossings.push((i - 1) as f32 + frac);
                armed = false;
            }
        }
    }
}

impl FundamentalEstimator for ZeroCrossingRate {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::ZeroCrossing
    }

    fn estimate(&mut self, frame: &[f32], sample_rate: f32) -> PitchCandidate {
        let none = PitchCandidate::none(EstimatorKind::ZeroCrossing);
        let peak = peak_amplitude(frame);
        if !(peak > 1e-6) || !(sample_rate > 0.0) {
            return none;
        }
        self.find_crossings(frame, peak);
        let n = self.crossings.len();
        if n < 3 {
            return none;
        }
        let first = self.crossings[0];
        let last = self.crossings[n - 1];
        let mean_interval = (last - first) / (n - 1) as f32;
        if !(mean_interval > 0.0) {
            return none;
        }
        let freq = sample_rate / mean_interval;
        if !self.range.contains(freq) {
            return none;
        }

        // Regular spacing means a clean periodic signal.
        let var = self
            .crossings
            .windows(2)
            .map(|w| {
                let d = (w[1] - w[0]) - mean_interval;
                d * d
            })
            .sum::<f32>()
            / (n - 1) as f32;
        let cv = var.sqrt() / mean_interval;
        PitchCandidate::found(EstimatorKind::ZeroCrossing, freq, 0.5 * (1.0 - cv))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_helpers::{add_noise, sine_wave};

    fn zcr() -> ZeroCrossingRate {
        ZeroCrossingRate::new(SearchRange { min_hz: 60.0, max_hz: 1200.0 })
    }

    #[test]
    fn test_counts_rising_crossings() {
        let mut z = zcr();
        let frame = sine_wave(440.0, 0.5, 48000.0, 2048);
        let c = z.estimate(&frame, 48000.0);
        assert!((c.frequency_hz.unwrap() - 440.0).abs() < 2.0);
        assert!(c.strength > 0.45, "regular crossings, strength {}", c.strength);
    }

    #[test]
    fn test_hysteresis_ignores_small_ripple() {
        let mut z = zcr();
        let mut frame = sine_wave(220.0, 0.5, 48000.0, 2048);
        add_noise(&mut frame, 0.01, 11);
        let f = z.estimate(&frame, 48000.0).frequency_hz.unwrap();
        assert!((f - 220.0).abs() / 220.0 < 0.02, "got {}", f);
    }

    #[test]
    fn test_too_few_crossings_is_unvoiced() {
        let mut z = zcr();
        // 40 Hz: under two periods in a 2048-sample frame
        let frame = sine_wave(40.0, 0.5, 48000.0, 2048);
        assert!(!z.estimate(&frame, 48000.0).is_voiced());
    }
}
