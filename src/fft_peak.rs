//! Spectral peak picking: Hann window, zero-padded FFT, strongest bin in the
//! search band, refined by a parabola through the log magnitudes.

use crate::config::EstimatorKind;
use crate::dsp::{apply_hann_window, parabolic_offset};
use crate::estimator::{FundamentalEstimator, SearchRange};
use crate::types::PitchCandidate;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Zero-padding factor. Narrows the bin spacing so the log-parabolic fit
/// sits near the top of the main lobe.
const PADDING: usize = 4;

pub struct FftPeak {
    range: SearchRange,
    frame_len: usize,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    windowed: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
}

fn plan(frame_len: usize) -> (Arc<dyn Fft<f32>>, usize) {
    let fft_len = (frame_len.max(1) * PADDING).next_power_of_two();
    (FftPlanner::new().plan_fft_forward(fft_len), fft_len)
}

impl FftPeak {
    pub fn new(range: SearchRange, frame_len: usize) -> Self {
        let (fft, fft_len) = plan(frame_len);
        let scratch_len = fft.get_inplace_scratch_len();
        Self {
            range,
            frame_len,
            fft,
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            windowed: Vec::with_capacity(frame_len),
            buffer: vec![Complex::new(0.0, 0.0); fft_len],
            magnitudes: Vec::with_capacity(fft_len / 2),
        }
    }

    fn spectrum(&mut self, frame: &[f32]) {
        if frame.len() != self.frame_len {
            let (fft, fft_len) = plan(frame.len());
            self.scratch
                .resize(fft.get_inplace_scratch_len(), Complex::new(0.0, 0.0));
            self.fft = fft;
            self.buffer.resize(fft_len, Complex::new(0.0, 0.0));
            self.frame_len = frame.len();
        }
        self.windowed.clear();
        self.windowed.extend_from_slice(frame);
        let mean = self.windowed.iter().sum::<f32>() / frame.len().max(1) as f32;
        for s in self.windowed.iter_mut() {
            *s -= mean;
        }
        apply_hann_window(&mut self.windowed);

        for slot in self.buffer.iter_mut() {
            *slot = Complex::new(0.0, 0.0);
        }
        for (slot, &x) in self.buffer.iter_mut().zip(&self.windowed) {
            slot.re = x;
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let half = self.buffer.len() / 2;
        self.magnitudes.clear();
        self.magnitudes
            .extend(self.buffer[..half].iter().map(|c| c.norm()));
    }
}

impl FundamentalEstimator for FftPeak {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::FftPeak
    }

    fn estimate(&mut self, frame: &[f32], sample_rate: f32) -> PitchCandidate {
        let none = PitchCandidate::none(EstimatorKind::FftPeak);
        if frame.len() < 4 || !(sample_rate > 0.0) {
            return none;
        }
        self.spectrum(frame);
        let bin_hz = sample_rate / self.buffer.len() as f32;
        let mags = &self.magnitudes;
        let lo = ((self.range.min_hz / bin_hz).ceil() as usize).max(1);
        let hi = ((self.range.max_hz / bin_hz).floor() as usize).min(mags.len() - 2);
        if lo >= hi {
            return none;
        }

        let (peak_bin, peak) = (lo..=hi)
            .map(|k| (k, mags[k]))
            .fold((lo, 0.0f32), |best, cur| if cur.1 > best.1 { cur } else { best });
        if !(peak > 1e-6) {
            return none;
        }

        let ln = |m: f32| (m + 1e-12).ln();
        let offset = parabolic_offset(ln(mags[peak_bin - 1]), ln(peak), ln(mags[peak_bin + 1]));
        let freq = (peak_bin as f32 + offset) * bin_hz;
        if !self.range.contains(freq) {
            return none;
        }

        // Share of in-band energy inside the peak's main lobe.
        let lobe = 2 * PADDING;
        let band: f32 = mags[lo..=hi].iter().map(|m| m * m).sum();
        let near: f32 = mags[peak_bin.saturating_sub(lobe).max(lo)..=(peak_bin + lobe).min(hi)]
            .iter()
            .map(|m| m * m)
            .sum();
        let strength = if band > 0.0 { near / band } else { 0.0 };
        PitchCandidate::found(EstimatorKind::FftPeak, freq, strength)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_helpers::sine_wave;

    #[test]
    fn test_peak_refined_between_bins() {
        let mut e = FftPeak::new(SearchRange { min_hz: 60.0, max_hz: 1200.0 }, 2048);
        // Bin spacing is 48000/8192 ≈ 5.86 Hz; 440 Hz sits at bin 75.09
        let c = e.estimate(&sine_wave(440.0, 0.5, 48000.0, 2048), 48000.0);
        let f = c.frequency_hz.unwrap();
        assert!((f - 440.0).abs() < 1.0, "got {}", f);
        assert!(c.strength > 0.9);
    }

    #[test]
    fn test_out_of_band_energy_ignored() {
        let mut e = FftPeak::new(SearchRange { min_hz: 60.0, max_hz: 1200.0 }, 2048);
        let mut frame = sine_wave(220.0, 0.3, 48000.0, 2048);
        for (s, hf) in frame.iter_mut().zip(sine_wave(5000.0, 0.9, 48000.0, 2048)) {
            *s += hf;
        }
        let f = e.estimate(&frame, 48000.0).frequency_hz.unwrap();
        assert!((f - 220.0).abs() < 2.0, "got {}", f);
    }
}
