use log::{debug, info};

/// Running mean/variance of frame RMS, learned during calibration.
///
/// Uses Welford's online update so the variance never goes negative and
/// no history needs to be stored. Frozen once calibration ends; only
/// `reset` unfreezes it.
#[derive(Debug, Clone, Default)]
pub struct NoiseProfile {
    count: u32,
    mean: f64,
    m2: f64,
    frozen: bool,
}

impl NoiseProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one RMS observation in. Ignored once frozen.
    pub fn update(&mut self, rms: f32) {
        if self.frozen {
            return;
        }
        let x = rms as f64;
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn mean(&self) -> f32 {
        self.mean as f32
    }

    /// Population variance of the observations (0 with fewer than two).
    pub fn variance(&self) -> f32 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / self.count as f64).max(0.0) as f32
        }
    }

    pub fn std_dev(&self) -> f32 {
        self.variance().sqrt()
    }

    /// Gate threshold: mean + k·stddev, bounded to [floor, ceiling].
    pub fn threshold(&self, k: f32, floor: f32, ceiling: f32) -> f32 {
        (self.mean() + k * self.std_dev()).clamp(floor, ceiling)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Gate phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Learning the noise floor; nothing passes
    Calibrating,
    Closed,
    Open,
}

/// Adaptive noise gate.
///
/// For the first `calibration_frames` frames every RMS value feeds the
/// [`NoiseProfile`] and the gate stays shut. Afterwards a frame counts as
/// signal when its RMS exceeds the learned threshold; the gate only flips
/// after `hysteresis` consecutive frames agree, which keeps it from
/// chattering when the level sits right at the threshold.
pub struct NoiseGate {
    profile: NoiseProfile,
    state: GateState,
    calibration_frames: u32,
    sigma: f32,
    floor: f32,
    ceiling: f32,
    hysteresis: u32,
    /// Consecutive frames disagreeing with the current state
    flip_count: u32,
    threshold: f32,
    bypass: bool,
}

impl NoiseGate {
    pub fn new(
        calibration_frames: u32,
        sigma: f32,
        floor: f32,
        ceiling: f32,
        hysteresis: u32,
        bypass: bool,
    ) -> Self {
        let mut gate = Self {
            profile: NoiseProfile::new(),
            state: GateState::Calibrating,
            calibration_frames,
            sigma,
            floor,
            ceiling,
            hysteresis: hysteresis.max(1),
            flip_count: 0,
            threshold: floor,
            bypass,
        };
        gate.reset();
        gate
    }

    /// Feed one frame's RMS. Returns true if the frame should be analyzed.
    ///
    /// A non-finite RMS is treated as silence.
    pub fn process(&mut self, rms: f32) -> bool {
        if self.bypass {
            return true;
        }
        let rms = if rms.is_finite() { rms } else { 0.0 };

        match self.state {
            GateState::Calibrating => {
                self.profile.update(rms);
                if self.profile.count() >= self.calibration_frames {
                    self.finish_calibration();
                }
                false
            }
            GateState::Closed | GateState::Open => {
                let above = rms > self.threshold;
                let open = self.state == GateState::Open;
                if above != open {
                    self.flip_count += 1;
                    if self.flip_count >= self.hysteresis {
                        self.state = if above { GateState::Open } else { GateState::Closed };
                        self.flip_count = 0;
                        debug!(
                            "noise gate {} (rms={:.4}, threshold={:.4})",
                            if above { "opened" } else { "closed" },
                            rms,
                            self.threshold
                        );
                    }
                } else {
                    self.flip_count = 0;
                }
                self.state == GateState::Open
            }
        }
    }

    fn finish_calibration(&mut self) {
        self.profile.freeze();
        self.threshold = self.profile.threshold(self.sigma, self.floor, self.ceiling);
        self.state = GateState::Closed;
        self.flip_count = 0;
        info!(
            "Noise profile: mean={:.5} std={:.5} over {} frames → gate threshold {:.5}",
            self.profile.mean(),
            self.profile.std_dev(),
            self.profile.count(),
            self.threshold
        );
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_calibrating(&self) -> bool {
        !self.bypass && self.state == GateState::Calibrating
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn profile(&self) -> &NoiseProfile {
        &self.profile
    }

    /// Forget the noise profile and start calibrating again.
    pub fn reset(&mut self) {
        self.profile.reset();
        self.flip_count = 0;
        self.threshold = self.floor;
        self.state = if self.calibration_frames == 0 {
            self.profile.freeze();
            GateState::Closed
        } else {
            GateState::Calibrating
        };
    }

    /// Change the warm-up length (e.g. after a sample-rate change) and recalibrate.
    pub fn set_calibration_frames(&mut self, frames: u32) {
        self.calibration_frames = frames;
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> NoiseGate {
        NoiseGate::new(10, 3.0, 0.003, 0.05, 3, false)
    }

    #[test]
    fn test_welford_matches_direct() {
        let xs = [0.01f32, 0.02, 0.015, 0.03, 0.012];
        let mut p = NoiseProfile::new();
        for &x in &xs {
            p.update(x);
        }
        let mean: f32 = xs.iter().sum::<f32>() / xs.len() as f32;
        let var: f32 = xs.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / xs.len() as f32;
        assert!((p.mean() - mean).abs() < 1e-6);
        assert!((p.variance() - var).abs() < 1e-7);
        assert!(p.variance() >= 0.0);
    }

    #[test]
    fn test_frozen_profile_ignores_updates() {
        let mut p = NoiseProfile::new();
        p.update(0.01);
        p.freeze();
        p.update(1.0);
        assert_eq!(p.count(), 1);
        assert!((p.mean() - 0.01).abs() < 1e-7);
    }

    #[test]
    fn test_threshold_floor_and_ceiling() {
        let p = NoiseProfile::new();
        assert_eq!(p.threshold(3.0, 0.003, 0.05), 0.003);
        let mut loud = NoiseProfile::new();
        loud.update(0.4);
        loud.update(0.5);
        assert_eq!(loud.threshold(3.0, 0.003, 0.05), 0.05);
    }

    #[test]
    fn test_calibration_blocks_then_closes() {
        let mut g = gate();
        for _ in 0..10 {
            assert!(!g.process(0.5), "nothing passes while calibrating");
        }
        assert_eq!(g.state(), GateState::Closed);
        assert!(g.profile().is_frozen());
    }

    #[test]
    fn test_hysteresis_on_open_and_close() {
        let mut g = gate();
        for _ in 0..10 {
            g.process(0.001);
        }
        // Needs 3 consecutive loud frames to open
        assert!(!g.process(0.2));
        assert!(!g.process(0.2));
        assert!(g.process(0.2));
        // A single quiet frame does not close it
        assert!(g.process(0.0));
        assert!(g.process(0.2));
        // Three quiet frames do
        assert!(g.process(0.0));
        assert!(g.process(0.0));
        assert!(!g.process(0.0));
    }

    #[test]
    fn test_chatter_at_threshold_does_not_flip() {
        let mut g = gate();
        for _ in 0..10 {
            g.process(0.001);
        }
        let t = g.threshold();
        for i in 0..50 {
            let rms = if i % 2 == 0 { t * 1.1 } else { t * 0.9 };
            assert!(!g.process(rms), "alternating levels must not open the gate");
        }
    }

    #[test]
    fn test_non_finite_rms_is_silence() {
        let mut g = gate();
        for _ in 0..10 {
            g.process(f32::NAN);
        }
        assert_eq!(g.state(), GateState::Closed);
        assert!(g.profile().mean().is_finite());
        for _ in 0..5 {
            assert!(!g.process(f32::INFINITY));
        }
    }

    #[test]
    fn test_bypass_always_open() {
        let mut g = NoiseGate::new(10, 3.0, 0.003, 0.05, 3, true);
        assert!(g.process(0.0));
        assert!(!g.is_calibrating());
    }

    #[test]
    fn test_reset_recalibrates() {
        let mut g = gate();
        for _ in 0..10 {
            g.process(0.001);
        }
        g.reset();
        assert!(g.is_calibrating());
        assert_eq!(g.profile().count(), 0);
    }
}
