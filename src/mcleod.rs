//! McLeod pitch method: normalized square difference function (NSDF) with
//! key-maximum peak picking.
//!
//! The autocorrelation comes from a zero-padded FFT (`r = IFFT(|FFT(x)|²)`),
//! and the normalizer `m'(τ) = Σ x[j]² + x[j+τ]²` is updated incrementally,
//! so a frame costs two FFTs plus a linear pass.

use crate::config::EstimatorKind;
use crate::dsp::parabolic_offset;
use crate::estimator::{FundamentalEstimator, SearchRange};
use crate::types::PitchCandidate;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Fraction of the highest key maximum the chosen peak must reach.
const PEAK_RATIO: f32 = 0.9;

pub struct McLeod {
    range: SearchRange,
    clarity_threshold: f32,
    frame_len: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    nsdf: Vec<f32>,
    key_maxima: Vec<usize>,
}

fn plan(frame_len: usize) -> (Arc<dyn Fft<f32>>, Arc<dyn Fft<f32>>, usize) {
    // Padding to twice the frame turns the circular correlation into a linear one.
    let fft_len = (2 * frame_len.max(1)).next_power_of_two();
    let mut planner = FftPlanner::new();
    (
        planner.plan_fft_forward(fft_len),
        planner.plan_fft_inverse(fft_len),
        fft_len,
    )
}

impl McLeod {
    pub fn new(range: SearchRange, clarity_threshold: f32, frame_len: usize) -> Self {
        let (forward, inverse, fft_len) = plan(frame_len);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        Self {
            range,
            clarity_threshold,
            frame_len,
            forward,
            inverse,
            buffer: vec![Complex::new(0.0, 0.0); fft_len],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            nsdf: Vec::with_capacity(frame_len / 2 + 2),
            key_maxima: Vec::with_capacity(32),
        }
    }

    fn replan(&mut self, frame_len: usize) {
        let (forward, inverse, fft_len) = plan(frame_len);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        self.forward = forward;
        self.inverse = inverse;
        self.buffer.resize(fft_len, Complex::new(0.0, 0.0));
        self.scratch.resize(scratch_len, Complex::new(0.0, 0.0));
        self.frame_len = frame_len;
    }

    /// NSDF of the last analysed frame, indexed by lag.
    pub fn nsdf(&self) -> &[f32] {
        &self.nsdf
    }

    /// Fill `nsdf` for lags `0..lag_count`. Returns false for a silent frame.
    fn compute_nsdf(&mut self, frame: &[f32], lag_count: usize) -> bool {
        let n = frame.len();
        let fft_len = self.buffer.len();

        for (slot, &x) in self.buffer.iter_mut().zip(frame) {
            *slot = Complex::new(x, 0.0);
        }
        for slot in &mut self.buffer[n..] {
            *slot = Complex::new(0.0, 0.0);
        }
        self.forward.process_with_scratch(&mut self.buffer, &mut self.scratch);
        for c in self.buffer.iter_mut() {
            *c = Complex::new(c.norm_sqr(), 0.0);
        }
        self.inverse.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let scale = 1.0 / fft_len as f32;
        let r0 = self.buffer[0].re * scale;
        self.nsdf.clear();
        if !(r0 > 1e-9) {
            return false;
        }

        let mut m = 2.0 * r0;
        for tau in 0..lag_count {
            if tau > 0 {
                let a = frame[tau - 1];
                let b = frame[n - tau];
                m -= a * a + b * b;
            }
            let r = self.buffer[tau].re * scale;
            self.nsdf.push(if m > 1e-9 { 2.0 * r / m } else { 0.0 });
        }
        true
    }

    /// Lags of the highest NSDF point in each positive lobe after the first
    /// negative-going zero crossing.
    fn find_key_maxima(&mut self) {
        self.key_maxima.clear();
        let nsdf = &self.nsdf;
        let mut tau = 1;
        while tau < nsdf.len() && nsdf[tau] > 0.0 {
            tau += 1;
        }
        let mut current: Option<usize> = None;
        while tau < nsdf.len() {
            let v = nsdf[tau];
            if v > 0.0 {
                match current {
                    Some(best) if nsdf[best] >= v => {}
                    _ => current = Some(tau),
                }
            } else if let Some(best) = current.take() {
                self.key_maxima.push(best);
            }
            tau += 1;
        }
        if let Some(best) = current {
            self.key_maxima.push(best);
        }
    }
}

impl FundamentalEstimator for McLeod {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::McLeod
    }

    fn estimate(&mut self, frame: &[f32], sample_rate: f32) -> PitchCandidate {
        let none = PitchCandidate::none(EstimatorKind::McLeod);
        let Some((min_period, max_period)) = self.range.lags(sample_rate, frame.len()) else {
            return none;
        };
        if frame.len() != self.frame_len {
            self.replan(frame.len());
        }
        if !self.compute_nsdf(frame, max_period + 2) {
            return none;
        }
        self.find_key_maxima();

        let nsdf = &self.nsdf;
        let in_range = |&&tau: &&usize| tau >= min_period && tau <= max_period;
        let highest = self
            .key_maxima
            .iter()
            .filter(in_range)
            .map(|&tau| nsdf[tau])
            .fold(0.0f32, f32::max);
        if highest <= 0.0 {
            return none;
        }
        let Some(&tau) = self
            .key_maxima
            .iter()
            .filter(in_range)
            .find(|&&tau| nsdf[tau] >= PEAK_RATIO * highest)
        else {
            return none;
        };

        let (y1, y2, y3) = (nsdf[tau - 1], nsdf[tau], nsdf[tau + 1]);
        let offset = parabolic_offset(y1, y2, y3);
        let clarity = y2 - 0.25 * (y1 - y3) * offset;
        if clarity < self.clarity_threshold {
            return none;
        }
        let freq = sample_rate / (tau as f32 + offset);
        if !self.range.contains(freq) {
            return none;
        }
        PitchCandidate::found(EstimatorKind::McLeod, freq, clarity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_helpers::{add_noise, sine_wave};

    fn mpm() -> McLeod {
        McLeod::new(SearchRange { min_hz: 60.0, max_hz: 1200.0 }, 0.5, 2048)
    }

    #[test]
    fn test_nsdf_matches_direct_sum() {
        let mut m = mpm();
        let frame = sine_wave(220.0, 0.5, 48000.0, 2048);
        assert!(m.compute_nsdf(&frame, 300));
        for &tau in &[0usize, 50, 109, 218, 299] {
            let mut r = 0.0f32;
            let mut mm = 0.0f32;
            for j in 0..2048 - tau {
                r += frame[j] * frame[j + tau];
                mm += frame[j] * frame[j] + frame[j + tau] * frame[j + tau];
            }
            let direct = 2.0 * r / mm;
            assert!(
                (m.nsdf()[tau] - direct).abs() < 1e-3,
                "tau={} fft={} direct={}",
                tau,
                m.nsdf()[tau],
                direct
            );
        }
    }

    #[test]
    fn test_clarity_high_for_sine() {
        let mut m = mpm();
        let frame = sine_wave(196.0, 0.5, 48000.0, 2048);
        let c = m.estimate(&frame, 48000.0);
        assert!((c.frequency_hz.unwrap() - 196.0).abs() < 0.5);
        assert!(c.strength > 0.9, "clarity {}", c.strength);
    }

    #[test]
    fn test_noise_below_clarity_is_unvoiced() {
        let mut m = mpm();
        let mut frame = vec![0.0f32; 2048];
        add_noise(&mut frame, 0.5, 3);
        assert!(!m.estimate(&frame, 48000.0).is_voiced());
    }

    #[test]
    fn test_replans_for_new_frame_length() {
        let mut m = mpm();
        let frame = sine_wave(330.0, 0.5, 48000.0, 4096);
        let f = m.estimate(&frame, 48000.0).frequency_hz.unwrap();
        assert!((f - 330.0).abs() / 330.0 < 0.01);
        assert_eq!(m.buffer.len(), 8192);
    }
}
