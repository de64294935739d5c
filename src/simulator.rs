use crate::types::*;
use crossbeam_channel::Sender;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::thread;
use std::time::Duration;

/// Relative amplitudes of the first partials of a plucked string.
const PARTIALS: [f32; 4] = [1.0, 0.5, 0.3, 0.15];
/// Peak level of a fresh pluck (before the partial mix is normalized).
const PLUCK_LEVEL: f32 = 0.6;
/// Time constant of the pluck's exponential decay.
const DECAY_SECS: f32 = 3.0;

/// One scripted action of the simulated player.
#[derive(Debug, Clone, PartialEq)]
pub enum Gesture {
    /// Strings muted, only background noise
    Silence { ms: u32 },
    /// Pluck a string at `hz` and let it ring
    Pluck { hz: f32, ms: u32 },
    /// Pluck `from_cents` away from `hz`, then turn the peg until it is in tune
    TuneUp { hz: f32, from_cents: f32, ms: u32 },
    /// Bend the ringing note up by `cents` and back
    Bend { cents: f32, ms: u32 },
    /// Touch the 12th-fret node: the ringing note jumps an octave
    OctaveHarmonic { ms: u32 },
}

/// The string currently ringing.
#[derive(Debug, Clone, Copy)]
struct Voice {
    hz: f32,
    level: f32,
    /// Samples since the pluck
    age: u64,
    sounding: bool,
}

/// Generates synthetic string tones that exercise the full tuner pipeline
/// without any audio hardware.
pub struct Simulator {
    tx: Sender<TunerEvent>,
    sample_rate: u32,
    chunk_len: usize,
    /// Sleep one chunk's duration per chunk, like a capture callback
    realtime: bool,
    noise_amp: f32,
    rng: StdRng,
    voice: Voice,
    /// Oscillator phase in cycles, carried across chunks and pitch changes
    phase: f64,
    /// Monotonic sample counter used for chunk timestamps
    sample_counter: u64,
}

impl Simulator {
    pub fn new(tx: Sender<TunerEvent>, sample_rate: u32, chunk_len: usize, seed: u64) -> Self {
        Self {
            tx,
            sample_rate,
            chunk_len: chunk_len.max(1),
            realtime: false,
            noise_amp: 0.002,
            rng: StdRng::seed_from_u64(seed),
            voice: Voice {
                hz: 0.0,
                level: 0.0,
                age: 0,
                sounding: false,
            },
            phase: 0.0,
            sample_counter: 0,
        }
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Peak amplitude of the uniform background noise.
    pub fn with_noise(mut self, amp: f32) -> Self {
        self.noise_amp = amp.max(0.0);
        self
    }

    /// Play a gesture script. Blocks the calling thread.
    pub fn run(&mut self, gestures: &[Gesture]) {
        info!(
            "Simulator starting ({} gestures, {} Hz, {} samples/chunk)",
            gestures.len(),
            self.sample_rate,
            self.chunk_len
        );
        for gesture in gestures {
            self.execute(gesture);
        }
        info!("Simulator finished after {} samples", self.sample_counter);
    }

    fn ticks(&self, ms: u32) -> usize {
        let samples = ms as u64 * self.sample_rate as u64 / 1000;
        ((samples as usize) / self.chunk_len).max(1)
    }

    fn pluck(&mut self, hz: f32) {
        self.voice = Voice {
            hz,
            level: PLUCK_LEVEL,
            age: 0,
            sounding: true,
        };
    }

    fn execute(&mut self, gesture: &Gesture) {
        match *gesture {
            Gesture::Silence { ms } => {
                info!("  silence {}ms", ms);
                self.voice.sounding = false;
                for _ in 0..self.ticks(ms) {
                    self.emit_tick(0.0, 0.0);
                }
            }

            Gesture::Pluck { hz, ms } => {
                info!("  pluck {:.2} Hz, ring {}ms", hz, ms);
                self.pluck(hz);
                for _ in 0..self.ticks(ms) {
                    self.emit_tick(hz, hz);
                }
            }

            Gesture::TuneUp { hz, from_cents, ms } => {
                let start = hz * 2f32.powf(from_cents / 1200.0);
                info!("  tune {:.2} Hz -> {:.2} Hz over {}ms", start, hz, ms);
                self.pluck(start);
                let ticks = self.ticks(ms);
                // Peg reaches pitch at 70% of the gesture, then the note rings
                let pitch_at = |i: usize| {
                    let t = (i as f32 / (0.7 * ticks as f32)).min(1.0);
                    start * (hz / start).powf(smoothstep(t))
                };
                for i in 0..ticks {
                    let (a, b) = (pitch_at(i), pitch_at(i + 1));
                    self.emit_tick(a, b);
                }
                self.voice.hz = hz;
            }

            Gesture::Bend { cents, ms } => {
                let base = self.voice.hz;
                info!("  bend {:.2} Hz up {} cents over {}ms", base, cents, ms);
                let ticks = self.ticks(ms);
                let pitch_at = |i: usize| {
                    let t = i as f32 / ticks as f32;
                    base * 2f32.powf(cents * (std::f32::consts::PI * t).sin() / 1200.0)
                };
                for i in 0..ticks {
                    let (a, b) = (pitch_at(i), pitch_at(i + 1));
                    self.emit_tick(a, b);
                }
            }

            Gesture::OctaveHarmonic { ms } => {
                let base = self.voice.hz;
                info!("  harmonic {:.2} Hz for {}ms", 2.0 * base, ms);
                self.voice.level *= 0.5;
                for _ in 0..self.ticks(ms) {
                    self.emit_tick(2.0 * base, 2.0 * base);
                }
                self.voice.level *= 2.0;
            }
        }
    }

    /// Emit one chunk with the pitch gliding linearly from `hz_from` to `hz_to`.
    fn emit_tick(&mut self, hz_from: f32, hz_to: f32) {
        let sr = self.sample_rate as f64;
        let n = self.chunk_len;
        let norm: f32 = PARTIALS.iter().sum();
        let mut samples = Vec::with_capacity(n);

        for j in 0..n {
            let mut s = 0.0f32;
            if self.voice.sounding {
                let hz = lerp(hz_from, hz_to, j as f32 / n as f32) as f64;
                self.phase = (self.phase + hz / sr).fract();
                let env = self.voice.level
                    * (-(self.voice.age as f32) / (DECAY_SECS * self.sample_rate as f32)).exp();
                let tone: f32 = PARTIALS
                    .iter()
                    .enumerate()
                    .map(|(k, &a)| a * (2.0 * PI * (k + 1) as f64 * self.phase).sin() as f32)
                    .sum();
                s = env * tone / norm;
                self.voice.age += 1;
            }
            if self.noise_amp > 0.0 {
                s += self.rng.gen_range(-self.noise_amp..=self.noise_amp);
            }
            samples.push(s);
        }

        let timestamp_us = self.sample_counter * 1_000_000 / self.sample_rate as u64;
        self.sample_counter += n as u64;
        let _ = self.tx.send(TunerEvent::Audio(AudioChunk {
            timestamp_us,
            samples,
            sample_rate: self.sample_rate,
        }));

        if self.realtime {
            thread::sleep(Duration::from_micros(n as u64 * 1_000_000 / self.sample_rate as u64));
        }
    }
}

/// A demo session for a string set: warm-up silence, each string tuned up
/// from flat, then a bend and an octave harmonic on the lowest string.
pub fn demo_sequence(strings: &[f32]) -> Vec<Gesture> {
    let mut seq = vec![Gesture::Silence { ms: 800 }];
    for (i, &hz) in strings.iter().enumerate() {
        let from_cents = if i % 2 == 0 { -35.0 } else { 25.0 };
        seq.push(Gesture::TuneUp {
            hz,
            from_cents,
            ms: 1800,
        });
        seq.push(Gesture::Silence { ms: 400 });
    }
    if let Some(&low) = strings.first() {
        seq.push(Gesture::Pluck { hz: low, ms: 600 });
        seq.push(Gesture::Bend { cents: 40.0, ms: 800 });
        seq.push(Gesture::OctaveHarmonic { ms: 700 });
        seq.push(Gesture::Silence { ms: 1000 });
    }
    seq
}

// ─── Math helpers ───────────────────────────────────────────────────────────

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Smooth interpolation (ease in/out)
fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn collect(gestures: &[Gesture]) -> Vec<AudioChunk> {
        let (tx, rx) = unbounded();
        let mut sim = Simulator::new(tx, 48000, 480, 7);
        sim.run(gestures);
        rx.try_iter()
            .filter_map(|e| match e {
                TunerEvent::Audio(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_chunks_are_timestamped_by_sample_clock() {
        let chunks = collect(&[Gesture::Silence { ms: 100 }]);
        assert_eq!(chunks.len(), 10);
        assert_eq!(chunks[3].timestamp_us, 30_000);
        assert!(chunks.iter().all(|c| c.samples.len() == 480));
    }

    #[test]
    fn test_pluck_is_phase_continuous() {
        let chunks = collect(&[Gesture::Pluck { hz: 110.0, ms: 200 }]);
        let signal: Vec<f32> = chunks.iter().flat_map(|c| c.samples.iter().copied()).collect();
        // Sample-to-sample steps stay small across chunk joins
        let max_step = signal
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0f32, f32::max);
        assert!(max_step < 0.05, "discontinuity of {}", max_step);
        let peak = signal.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.3);
    }

    #[test]
    fn test_demo_sequence_covers_every_string() {
        let strings = [82.41, 110.0, 146.83];
        let seq = demo_sequence(&strings);
        let tuned: Vec<f32> = seq
            .iter()
            .filter_map(|g| match g {
                Gesture::TuneUp { hz, .. } => Some(*hz),
                _ => None,
            })
            .collect();
        assert_eq!(tuned, strings);
        assert!(matches!(seq.first(), Some(Gesture::Silence { .. })));
        assert!(seq.contains(&Gesture::OctaveHarmonic { ms: 700 }));
    }
}
