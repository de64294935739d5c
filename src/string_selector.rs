use crate::config::TunerConfig;
use crate::dsp::cents_between;
use log::debug;

/// Cents window around 2× or ½× the locked string in which a reading is
/// treated as that string's octave (a harmonic, or an octave error).
const OCTAVE_WINDOW_CENTS: f32 = 50.0;

/// Result of one auto-selection step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StringSelection {
    pub index: Option<usize>,
    /// Within the acquire window (or the wider release window once held)
    pub locked: bool,
    /// Offset from the selected string's open pitch
    pub cents: Option<f32>,
}

/// Picks the string the player is tuning in auto mode.
///
/// Each string is scored by its absolute cents distance to the input. The
/// active string gets a `lock_bias` bonus and may also be matched an octave
/// away (plus `octave_penalty`), and every other string pays the octave
/// penalty while the input sits on an octave of the active string. A
/// different best string only becomes active after winning
/// `debounce_frames` consecutive evaluations, and never while the input is
/// still inside the active string's release window.
pub struct StringSelector {
    strings: Vec<f32>,
    acquire_cents: f32,
    release_cents: f32,
    lock_bias_cents: f32,
    octave_penalty_cents: f32,
    debounce_frames: u32,
    active: Option<usize>,
    locked: bool,
    pending: Option<usize>,
    pending_count: u32,
    switches: u64,
}

impl StringSelector {
    pub fn new(cfg: &TunerConfig, strings: &[f32]) -> Self {
        let mut selector = Self {
            strings: Vec::with_capacity(strings.len().max(8)),
            acquire_cents: cfg.lock_acquire_cents,
            release_cents: cfg.lock_release_cents,
            lock_bias_cents: cfg.lock_bias_cents,
            octave_penalty_cents: cfg.octave_penalty_cents,
            debounce_frames: cfg.debounce_frames(),
            active: None,
            locked: false,
            pending: None,
            pending_count: 0,
            switches: 0,
        };
        selector.set_strings(strings);
        selector
    }

    /// Replace the string set. Any lock on the old set is dropped.
    pub fn set_strings(&mut self, strings: &[f32]) {
        self.strings.clear();
        self.strings
            .extend(strings.iter().copied().filter(|f| f.is_finite() && *f > 0.0));
        self.reset();
    }

    pub fn strings(&self) -> &[f32] {
        &self.strings
    }

    pub fn set_debounce_frames(&mut self, frames: u32) {
        self.debounce_frames = frames.max(1);
    }

    /// Distance in cents from `hz` to the nearest octave of `string`
    /// among {½×, 1×, 2×}.
    fn octave_distance(hz: f32, string: f32) -> f32 {
        [0.5, 1.0, 2.0]
            .iter()
            .map(|m| cents_between(hz, string * m).abs())
            .fold(f32::INFINITY, f32::min)
    }

    fn score(&self, i: usize, hz: f32, on_active_octave: bool) -> f32 {
        let direct = cents_between(hz, self.strings[i]).abs();
        match self.active {
            Some(a) if a == i => {
                let folded = Self::octave_distance(hz, self.strings[i]) + self.octave_penalty_cents;
                direct.min(folded) - self.lock_bias_cents
            }
            Some(_) if on_active_octave => direct + self.octave_penalty_cents,
            _ => direct,
        }
    }

    /// Evaluate one frame. `hz` is the stabilized display frequency, None
    /// (or 0) while silent.
    pub fn select(&mut self, hz: Option<f32>) -> StringSelection {
        let hz = match hz.filter(|f| f.is_finite() && *f > 0.0) {
            Some(f) if !self.strings.is_empty() => f,
            _ => {
                self.pending = None;
                self.pending_count = 0;
                self.locked = false;
                return StringSelection {
                    index: self.active,
                    locked: false,
                    cents: None,
                };
            }
        };

        let on_active_octave = self.active.map_or(false, |a| {
            let s = self.strings[a];
            cents_between(hz, 2.0 * s).abs() <= OCTAVE_WINDOW_CENTS
                || cents_between(hz, 0.5 * s).abs() <= OCTAVE_WINDOW_CENTS
        });
        let mut best = 0;
        let mut best_score = f32::INFINITY;
        for i in 0..self.strings.len() {
            let s = self.score(i, hz, on_active_octave);
            if s < best_score {
                best_score = s;
                best = i;
            }
        }

        match self.active {
            None => {
                debug!("string selector: acquired string {} ({:.2} Hz)", best + 1, self.strings[best]);
                self.active = Some(best);
                self.pending = None;
                self.pending_count = 0;
            }
            Some(a) if a == best => {
                self.pending = None;
                self.pending_count = 0;
            }
            Some(a) => {
                let held = cents_between(hz, self.strings[a]).abs() <= self.release_cents;
                if held {
                    self.pending = None;
                    self.pending_count = 0;
                } else {
                    if self.pending == Some(best) {
                        self.pending_count += 1;
                    } else {
                        self.pending = Some(best);
                        self.pending_count = 1;
                    }
                    if self.pending_count >= self.debounce_frames {
                        debug!(
                            "string selector: switched string {} -> {} after {} frames",
                            a + 1,
                            best + 1,
                            self.pending_count
                        );
                        self.active = Some(best);
                        self.locked = false;
                        self.pending = None;
                        self.pending_count = 0;
                        self.switches += 1;
                    }
                }
            }
        }

        let Some(a) = self.active else {
            return StringSelection {
                index: None,
                locked: false,
                cents: None,
            };
        };
        let cents = cents_between(hz, self.strings[a]);
        let window = if self.locked {
            self.release_cents
        } else {
            self.acquire_cents
        };
        self.locked = cents.abs() <= window;
        StringSelection {
            index: Some(a),
            locked: self.locked,
            cents: Some(cents),
        }
    }

    pub fn active(&self) -> Option<usize> {
        self.active
    }

    /// Number of committed string changes since the last reset.
    pub fn switches(&self) -> u64 {
        self.switches
    }

    pub fn reset(&mut self) {
        self.active = None;
        self.locked = false;
        self.pending = None;
        self.pending_count = 0;
        self.switches = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::Tuning;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn guitar() -> StringSelector {
        let strings = Tuning::find("standard").unwrap().frequencies(440.0);
        StringSelector::new(&TunerConfig::default(), &strings)
    }

    #[test]
    fn test_first_reading_acquires_immediately() {
        let mut s = guitar();
        let sel = s.select(Some(110.5));
        assert_eq!(sel.index, Some(1));
        assert!(sel.locked);
        assert!((sel.cents.unwrap() - 7.85).abs() < 0.1);
    }

    #[test]
    fn test_switch_requires_debounce() {
        let mut s = guitar();
        s.select(Some(82.41));
        let debounce = TunerConfig::default().debounce_frames();
        for i in 1..debounce {
            let sel = s.select(Some(146.83));
            assert_eq!(sel.index, Some(0), "switched early at frame {}", i);
        }
        assert_eq!(s.select(Some(146.83)).index, Some(2));
        assert_eq!(s.switches(), 1);
    }

    #[test]
    fn test_release_window_holds_lock() {
        let mut s = guitar();
        s.select(Some(110.0));
        // 103 cents sharp of A2: beyond acquire but inside release
        let hz = 110.0 * 2f32.powf(103.0 / 1200.0);
        for _ in 0..100 {
            let sel = s.select(Some(hz));
            assert_eq!(sel.index, Some(1));
            assert!(sel.locked, "release window keeps the lock");
        }
        // Acquiring from scratch at the same offset: selected, not locked
        let mut fresh = guitar();
        let sel = fresh.select(Some(hz));
        assert_eq!(sel.index, Some(1));
        assert!(!sel.locked);
    }

    #[test]
    fn test_harmonic_of_locked_string_does_not_switch() {
        let mut s = guitar();
        s.select(Some(82.41));
        // 12th-fret harmonic of low E
        for _ in 0..200 {
            assert_eq!(s.select(Some(164.82)).index, Some(0));
        }
    }

    #[test]
    fn test_midpoint_noise_flips_at_most_once_per_debounce() {
        let mut s = guitar();
        let (a, b) = (110.0f32, 146.83f32);
        let mid = (a * b).sqrt();
        let debounce = TunerConfig::default().debounce_frames() as u64;
        let mut rng = StdRng::seed_from_u64(99);
        s.select(Some(a));
        let frames = 2000u64;
        for _ in 0..frames {
            let jitter: f32 = rng.gen_range(-30.0..30.0);
            s.select(Some(mid * 2f32.powf(jitter / 1200.0)));
        }
        assert!(
            s.switches() <= frames / debounce,
            "{} switches in {} frames",
            s.switches(),
            frames
        );
    }

    #[test]
    fn test_silence_keeps_active_but_clears_pending() {
        let mut s = guitar();
        s.select(Some(196.0));
        let debounce = TunerConfig::default().debounce_frames();
        for _ in 0..debounce - 1 {
            s.select(Some(246.94));
        }
        let sel = s.select(None);
        assert_eq!(sel.index, Some(3));
        assert!(!sel.locked);
        // Pending progress was lost: one more frame is not enough
        assert_eq!(s.select(Some(246.94)).index, Some(3));
    }

    #[test]
    fn test_set_strings_invalidates_lock() {
        let mut s = guitar();
        s.select(Some(329.63));
        assert_eq!(s.active(), Some(5));
        s.set_strings(&[196.0, 261.63, 329.63, 440.0]);
        assert_eq!(s.active(), None);
        assert_eq!(s.select(Some(440.0)).index, Some(3));
    }

    #[test]
    fn test_empty_string_set_selects_nothing() {
        let mut s = StringSelector::new(&TunerConfig::default(), &[]);
        let sel = s.select(Some(110.0));
        assert_eq!(sel.index, None);
        assert_eq!(sel.cents, None);
    }
}
