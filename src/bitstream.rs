//! Bitstream autocorrelation: the frame is reduced to one sign bit per
//! sample and correlated against itself with XOR and popcount, 64 lags'
//! worth of samples per instruction. Cheap enough to run on every frame as
//! a second opinion.

use crate::config::EstimatorKind;
use crate::dsp::{parabolic_offset, peak_amplitude};
use crate::estimator::{FundamentalEstimator, SearchRange};
use crate::types::PitchCandidate;

const WORD_BITS: usize = 64;
/// Negative hysteresis for the sign detector, relative to the frame peak
const HYSTERESIS: f32 = 0.1;
/// A sub-multiple lag counts as matching below this share of the worst count
const SUB_PERIOD_THRESHOLD: f32 = 0.15;
/// Best lag must mismatch on fewer than this share of the window
const MAX_MISMATCH: f32 = 0.25;

/// Sign detector with hysteresis: goes low below `-threshold`, high above 0.
struct ZeroCross {
    high: bool,
    threshold: f32,
}

impl ZeroCross {
    fn new(threshold: f32) -> Self {
        Self {
            high: false,
            threshold,
        }
    }

    fn run(&mut self, s: f32) -> bool {
        if s < -self.threshold {
            self.high = false;
        }
        if s > 0.0 {
            self.high = true;
        }
        self.high
    }
}

pub struct BitstreamAutocorrelation {
    range: SearchRange,
    bits: Vec<u64>,
    /// XOR mismatch count per lag
    counts: Vec<u32>,
}

impl BitstreamAutocorrelation {
    pub fn new(range: SearchRange, frame_len: usize) -> Self {
        Self {
            range,
            bits: Vec::with_capacity(frame_len / WORD_BITS + 1),
            counts: Vec::with_capacity(frame_len / 2 + 2),
        }
    }

    /// Pack the frame's sign bits, LSB first. Returns the number of bit flips.
    fn pack(&mut self, frame: &[f32], peak: f32) -> usize {
        self.bits.clear();
        self.bits.resize(frame.len().div_ceil(WORD_BITS), 0);
        let mut zc = ZeroCross::new(HYSTERESIS * peak);
        let mut prev = false;
        let mut transitions = 0;
        for (i, &s) in frame.iter().enumerate() {
            let bit = zc.run(s);
            if bit {
                self.bits[i / WORD_BITS] |= 1u64 << (i % WORD_BITS);
            }
            if i > 0 && bit != prev {
                transitions += 1;
            }
            prev = bit;
        }
        transitions
    }

    /// 64 bits of the stream starting at bit `start`.
    #[inline]
    fn word_at(&self, start: usize) -> u64 {
        let index = start / WORD_BITS;
        let shift = start % WORD_BITS;
        let lo = self.bits.get(index).copied().unwrap_or(0);
        if shift == 0 {
            lo
        } else {
            let hi = self.bits.get(index + 1).copied().unwrap_or(0);
            (lo >> shift) | (hi << (WORD_BITS - shift))
        }
    }

    /// Mismatch count between the first `window` bits and the same bits
    /// shifted by `lag`.
    fn mismatches(&self, lag: usize, window: usize) -> u32 {
        let full = window / WORD_BITS;
        let mut count = 0;
        for i in 0..full {
            count += (self.bits[i] ^ self.word_at(lag + i * WORD_BITS)).count_ones();
        }
        let rem = window % WORD_BITS;
        if rem > 0 {
            let mask = (1u64 << rem) - 1;
            let a = self.bits.get(full).copied().unwrap_or(0);
            count += ((a ^ self.word_at(lag + full * WORD_BITS)) & mask).count_ones();
        }
        count
    }

    /// If every sub-multiple of `lag` also matches, the true period is the
    /// shortest such sub-multiple and `lag` was a multiple of it.
    fn resolve_harmonics(&self, lag: usize, min_period: usize, worst: u32) -> f32 {
        let threshold = SUB_PERIOD_THRESHOLD * worst as f32;
        let max_div = lag / min_period;
        for div in (2..=max_div).rev() {
            let step = lag as f32 / div as f32;
            let all_strong = (1..div).all(|k| {
                let sub = (k as f32 * step).round() as usize;
                self.counts.get(sub).map_or(false, |&c| c as f32 <= threshold)
            });
            if all_strong {
                return step;
            }
        }
        lag as f32
    }
}

impl FundamentalEstimator for BitstreamAutocorrelation {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Bitstream
    }

    fn estimate(&mut self, frame: &[f32], sample_rate: f32) -> PitchCandidate {
        let none = PitchCandidate::none(EstimatorKind::Bitstream);
        let Some((min_period, max_period)) = self.range.lags(sample_rate, frame.len()) else {
            return none;
        };
        let peak = peak_amplitude(frame);
        if !(peak > 1e-6) {
            return none;
        }
        if self.pack(frame, peak) < 2 {
            return none;
        }

        let window = frame.len() / 2;
        self.counts.clear();
        self.counts.resize(max_period + 2, 0);
        let mut worst = 0;
        let mut best = u32::MAX;
        let mut best_lag = 0;
        for lag in 1..=max_period + 1 {
            let c = self.mismatches(lag, window);
            self.counts[lag] = c;
            if lag < min_period || lag > max_period {
                continue;
            }
            worst = worst.max(c);
            if c < best {
                best = c;
                best_lag = lag;
            }
        }
        if best as f32 > MAX_MISMATCH * window as f32 {
            return none;
        }

        let period = self.resolve_harmonics(best_lag, min_period, worst);
        let lag = (period.round() as usize).clamp(min_period, max_period);
        let c = &self.counts;
        let refined = lag as f32
            + parabolic_offset(c[lag - 1] as f32, c[lag] as f32, c[lag + 1] as f32);
        let freq = sample_rate / refined;
        if !self.range.contains(freq) {
            return none;
        }
        let strength = 1.0 - 2.0 * c[lag] as f32 / window as f32;
        PitchCandidate::found(EstimatorKind::Bitstream, freq, strength)
    }
}
