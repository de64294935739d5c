//! Shared DSP primitives: RMS, parabolic refinement, cents, windowing, and test signal generators.

/// Root mean square of an audio buffer.
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Largest absolute sample value.
pub fn peak_amplitude(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}

/// Vertex offset of the parabola through (-1, y1), (0, y2), (1, y3).
///
/// Returns a shift in [-1, 1] relative to the centre point, or 0.0 when the
/// three points are collinear.
pub fn parabolic_offset(y1: f32, y2: f32, y3: f32) -> f32 {
    let denom = y1 - 2.0 * y2 + y3;
    if denom.abs() < 1e-12 || !denom.is_finite() {
        return 0.0;
    }
    (0.5 * (y1 - y3) / denom).clamp(-1.0, 1.0)
}

/// Pitch distance in cents. Positive when `freq` is sharp of `reference`.
pub fn cents_between(freq: f32, reference: f32) -> f32 {
    1200.0 * (freq / reference).log2()
}

/// Multiply `buffer` in place by a Hann window.
pub fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let w = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos());
        *sample *= w;
    }
}

/// Median of a small slice. Sorts `scratch` in place; returns None if empty.
pub fn median(values: &[f32], scratch: &mut Vec<f32>) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    scratch.clear();
    scratch.extend_from_slice(values);
    scratch.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = scratch.len();
    Some(if n % 2 == 1 {
        scratch[n / 2]
    } else {
        0.5 * (scratch[n / 2 - 1] + scratch[n / 2])
    })
}

/// Test signal generators shared by the unit tests.
#[cfg(test)]
pub mod test_helpers {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    /// Generate a mono sine wave of `n` samples.
    pub fn sine_wave(freq_hz: f64, amp: f64, sr: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (amp * (2.0 * PI * freq_hz * i as f64 / sr as f64).sin()) as f32)
            .collect()
    }

    /// A plucked-string-like tone: fundamental plus decaying upper partials.
    pub fn harmonic_tone(freq_hz: f64, amp: f64, sr: f32, n: usize) -> Vec<f32> {
        let partials = [1.0, 0.5, 0.3, 0.15];
        let norm: f64 = partials.iter().sum();
        (0..n)
            .map(|i| {
                let t = i as f64 / sr as f64;
                partials
                    .iter()
                    .enumerate()
                    .map(|(k, &a)| a * (2.0 * PI * freq_hz * (k + 1) as f64 * t).sin())
                    .sum::<f64>()
                    * amp
                    / norm
            })
            .map(|s| s as f32)
            .collect()
    }

    /// Add seeded uniform noise of the given peak amplitude.
    pub fn add_noise(samples: &mut [f32], amp: f32, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        for s in samples.iter_mut() {
            *s += rng.gen_range(-amp..=amp);
        }
    }
}
