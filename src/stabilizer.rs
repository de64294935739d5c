use crate::config::TunerConfig;
use crate::dsp::{cents_between, median};
use crate::types::StabilizedPitch;
use log::{debug, trace};
use std::collections::VecDeque;

/// Frequency ratio bands treated as a spurious octave jump.
const OCTAVE_UP: (f32, f32) = (1.8, 2.2);
const OCTAVE_DOWN: (f32, f32) = (0.45, 0.55);
/// A jump larger than this (cents) snaps instead of smoothing.
const SNAP_CENTS: f32 = 100.0;
/// Relative change below which a frame counts toward the stable streak.
const STEADY_RATIO: f32 = 0.01;

/// Turns per-frame estimates into a display frequency.
///
/// Rolling median over the last `capacity` voiced estimates, a consistency
/// check on the buffer, octave-jump rejection against the last accepted
/// value, then two-speed exponential smoothing: fast while the pitch
/// settles, slow once it has held steady for `stable_frames` frames.
/// Unvoiced frames first drain the buffer one sample at a time with the
/// display held, so a dropped estimate is only a longer gap. Once the
/// buffer is empty the display decays geometrically to zero.
pub struct Stabilizer {
    capacity: usize,
    decay_factor: f32,
    decay_floor_hz: f32,
    tolerance: f32,
    smoothing_slow: f32,
    smoothing_fast: f32,
    stable_frames: u32,
    buffer: VecDeque<f32>,
    scratch: Vec<f32>,
    state: StabilizedPitch,
    /// Consecutive frames an octave jump has been held back
    octave_hold: u32,
    /// Share of the buffer agreeing with its median, 0..1
    consistency: f32,
}

impl Stabilizer {
    pub fn new(cfg: &TunerConfig) -> Self {
        let capacity = cfg.stabilizer_buffer.max(1);
        Self {
            capacity,
            decay_factor: cfg.decay_factor,
            decay_floor_hz: cfg.decay_floor_hz,
            tolerance: cfg.consistency_tolerance,
            smoothing_slow: cfg.smoothing_slow,
            smoothing_fast: cfg.smoothing_fast,
            stable_frames: cfg.stable_frames,
            buffer: VecDeque::with_capacity(capacity + 1),
            scratch: Vec::with_capacity(capacity + 1),
            state: StabilizedPitch::default(),
            octave_hold: 0,
            consistency: 0.0,
        }
    }

    /// Feed one frame's estimate (in frame order). Returns the display
    /// frequency, 0.0 meaning no pitch.
    pub fn push(&mut self, estimate: Option<f32>) -> f32 {
        match estimate.filter(|f| f.is_finite() && *f > 0.0) {
            Some(f) => self.push_voiced(f),
            None => self.push_unvoiced(),
        }
        self.state.display_hz
    }

    fn push_voiced(&mut self, f: f32) {
        self.buffer.push_back(f);
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
        let Some(med) = median(self.buffer.make_contiguous(), &mut self.scratch) else {
            return;
        };

        let outliers = self
            .buffer
            .iter()
            .filter(|&&v| (v / med - 1.0).abs() > self.tolerance)
            .count();
        let n = self.buffer.len();
        self.consistency = 1.0 - outliers as f32 / n as f32;
        let consistent = if n >= 3 { outliers <= 1 } else { outliers == 0 };
        if !consistent {
            trace!("stabilizer: buffer inconsistent ({} outliers), holding", outliers);
            return;
        }

        let last_good = self.state.last_good_hz;
        if last_good > 0.0 && is_octave_jump(med / last_good) {
            self.octave_hold += 1;
            if self.octave_hold <= 2 * self.capacity as u32 {
                trace!("stabilizer: octave jump {:.2} -> {:.2} held", last_good, med);
                return;
            }
            debug!("stabilizer: octave change to {:.2} Hz accepted after hold", med);
        }
        self.octave_hold = 0;
        self.accept(med);
    }

    fn accept(&mut self, med: f32) {
        let s = &mut self.state;
        let display = s.display_hz;
        let resumed = std::mem::take(&mut s.decaying);
        if display <= 0.0 || resumed || cents_between(med, display).abs() > SNAP_CENTS {
            s.display_hz = med;
            s.consecutive_stable_frames = 0;
        } else {
            if (med / display - 1.0).abs() < STEADY_RATIO {
                s.consecutive_stable_frames += 1;
            } else {
                s.consecutive_stable_frames = 0;
            }
            let alpha = if s.consecutive_stable_frames >= self.stable_frames {
                self.smoothing_slow
            } else {
                self.smoothing_fast
            };
            let next = alpha * display + (1.0 - alpha) * med;
            s.display_hz = if (next - med).abs() <= 1e-4 * med { med } else { next };
        }
        s.last_good_hz = med;
    }

    fn push_unvoiced(&mut self) {
        self.buffer.pop_front();
        let s = &mut self.state;
        s.consecutive_stable_frames = 0;
        if s.display_hz <= 0.0 {
            s.decaying = false;
            return;
        }
        if !s.decaying && !self.buffer.is_empty() {
            trace!("stabilizer: gap, {} buffered estimates left", self.buffer.len());
            return;
        }
        s.decaying = true;
        s.display_hz *= self.decay_factor;
        if s.display_hz < self.decay_floor_hz {
            s.display_hz = 0.0;
            s.decaying = false;
            s.last_good_hz = 0.0;
            self.buffer.clear();
            self.octave_hold = 0;
            self.consistency = 0.0;
        }
    }

    pub fn state(&self) -> StabilizedPitch {
        self.state
    }

    pub fn display_hz(&self) -> f32 {
        self.state.display_hz
    }

    /// The display is fading out and no longer reflects a detected pitch.
    pub fn is_decaying(&self) -> bool {
        self.state.decaying
    }

    /// Share of buffered estimates within tolerance of their median.
    pub fn consistency(&self) -> f32 {
        self.consistency
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = StabilizedPitch::default();
        self.octave_hold = 0;
        self.consistency = 0.0;
    }
}

fn is_octave_jump(ratio: f32) -> bool {
    (OCTAVE_UP.0..=OCTAVE_UP.1).contains(&ratio) || (OCTAVE_DOWN.0..=OCTAVE_DOWN.1).contains(&ratio)
}
