//! Fundamental-frequency strategies behind one interface.
//!
//! Every algorithm the tuner knows is a [`FundamentalEstimator`]; the
//! configuration picks one as the primary and any others as cross-validators.

use crate::bitstream::BitstreamAutocorrelation;
use crate::config::{ConfigError, EstimatorKind, TunerConfig};
use crate::fft_peak::FftPeak;
use crate::mcleod::McLeod;
use crate::types::PitchCandidate;
use crate::yin::Yin;
use crate::zero_crossing::ZeroCrossingRate;

/// A per-frame pitch estimator. Implementations keep their scratch buffers
/// between calls and only reallocate when the frame length changes.
pub trait FundamentalEstimator: Send {
    fn kind(&self) -> EstimatorKind;

    /// Estimate the fundamental of one band-passed frame.
    /// Returns an unvoiced candidate when no pitch is found.
    fn estimate(&mut self, frame: &[f32], sample_rate: f32) -> PitchCandidate;
}

/// Frequency bounds shared by every estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchRange {
    pub min_hz: f32,
    pub max_hz: f32,
}

impl SearchRange {
    pub fn from_config(cfg: &TunerConfig) -> Self {
        Self {
            min_hz: cfg.min_frequency,
            max_hz: cfg.max_frequency,
        }
    }

    pub fn contains(&self, hz: f32) -> bool {
        hz.is_finite() && hz >= self.min_hz && hz <= self.max_hz
    }

    /// Lag bounds in samples for a frame of `frame_len` at `sample_rate`:
    /// `min_period >= 2`, `max_period <= frame_len / 2`. None when the frame
    /// cannot hold the range.
    pub fn lags(&self, sample_rate: f32, frame_len: usize) -> Option<(usize, usize)> {
        if !(sample_rate > 0.0) {
            return None;
        }
        let min_period = ((sample_rate / self.max_hz).floor() as usize).max(2);
        let max_period = ((sample_rate / self.min_hz).ceil() as usize).min(frame_len / 2);
        if frame_len < 2 * min_period || max_period <= min_period {
            return None;
        }
        Some((min_period, max_period))
    }
}

/// Instantiate the estimator for `kind` from `cfg`.
pub fn build(
    kind: EstimatorKind,
    cfg: &TunerConfig,
) -> Result<Box<dyn FundamentalEstimator>, ConfigError> {
    cfg.validate()?;
    let range = SearchRange::from_config(cfg);
    Ok(match kind {
        EstimatorKind::Yin => Box::new(Yin::new(range, cfg.yin_threshold, cfg.frame_length)),
        EstimatorKind::McLeod => Box::new(McLeod::new(range, cfg.mcleod_clarity, cfg.frame_length)),
        EstimatorKind::Bitstream => Box::new(BitstreamAutocorrelation::new(range, cfg.frame_length)),
        EstimatorKind::ZeroCrossing => Box::new(ZeroCrossingRate::new(range)),
        EstimatorKind::FftPeak => Box::new(FftPeak::new(range, cfg.frame_length)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_helpers::{harmonic_tone, sine_wave};

    const GUITAR: [f64; 6] = [82.41, 110.0, 146.83, 196.0, 246.94, 329.63];

    fn check_all(kind: EstimatorKind, tolerance: f32, harmonic: bool) {
        let cfg = TunerConfig::default();
        let mut est = build(kind, &cfg).unwrap();
        assert_eq!(est.kind(), kind);
        for &f in &GUITAR {
            let frame = if harmonic {
                harmonic_tone(f, 0.5, 48000.0, 2048)
            } else {
                sine_wave(f, 0.5, 48000.0, 2048)
            };
            let c = est.estimate(&frame, 48000.0);
            let got = c
                .frequency_hz
                .unwrap_or_else(|| panic!("{} found no pitch for {} Hz", kind.label(), f));
            let err = (got - f as f32).abs() / f as f32;
            assert!(
                err < tolerance,
                "{}: {} Hz estimated as {} Hz ({:.2}% off)",
                kind.label(),
                f,
                got,
                err * 100.0
            );
            assert!(c.strength > 0.0 && c.strength <= 1.0);
        }
    }

    #[test]
    fn test_every_strategy_tracks_guitar_sines() {
        check_all(EstimatorKind::Yin, 0.01, false);
        check_all(EstimatorKind::McLeod, 0.01, false);
        check_all(EstimatorKind::Bitstream, 0.02, false);
        check_all(EstimatorKind::FftPeak, 0.03, false);
        check_all(EstimatorKind::ZeroCrossing, 0.05, false);
    }

    #[test]
    fn test_time_domain_strategies_track_harmonic_tones() {
        check_all(EstimatorKind::Yin, 0.01, true);
        check_all(EstimatorKind::McLeod, 0.01, true);
    }

    #[test]
    fn test_silence_is_unvoiced_for_every_strategy() {
        let cfg = TunerConfig::default();
        let silence = vec![0.0f32; 2048];
        for kind in [
            EstimatorKind::Yin,
            EstimatorKind::McLeod,
            EstimatorKind::Bitstream,
            EstimatorKind::ZeroCrossing,
            EstimatorKind::FftPeak,
        ] {
            let mut est = build(kind, &cfg).unwrap();
            let c = est.estimate(&silence, 48000.0);
            assert!(!c.is_voiced(), "{} voiced silence", kind.label());
            assert_eq!(c.strength, 0.0);
        }
    }

    #[test]
    fn test_lag_range() {
        let range = SearchRange { min_hz: 60.0, max_hz: 1200.0 };
        assert_eq!(range.lags(48000.0, 2048), Some((40, 800)));
        // Frame too short for even the shortest period
        assert_eq!(range.lags(48000.0, 64), None);
        assert_eq!(range.lags(0.0, 2048), None);
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let cfg = TunerConfig {
            sample_rate: -1.0,
            ..Default::default()
        };
        assert!(build(EstimatorKind::Yin, &cfg).is_err());
    }
}
