use crate::config::TunerConfig;
use crate::dsp::cents_between;

/// Displayed cents span (±) used by the stateless [`angle`] helper.
const DEFAULT_RANGE_CENTS: f32 = 50.0;
/// Weight of the previous angle used by [`angle`].
const DEFAULT_BLEND: f32 = 0.85;
const DEFAULT_IDLE_DECAY: f32 = 0.96;
/// Below this the idle decay snaps to exactly zero.
const REST_DEGREES: f32 = 0.01;

/// Angle the needle is heading for at a given offset, before smoothing.
///
/// Cents are clamped to ±`range_cents`, then compressed with tanh so small
/// offsets move the needle visibly and large ones approach `max_degrees`
/// without reaching it.
pub fn target_angle(cents: f32, max_degrees: f32, range_cents: f32) -> f32 {
    if !cents.is_finite() {
        return 0.0;
    }
    let c = cents.clamp(-range_cents, range_cents);
    max_degrees * (c / (0.5 * range_cents)).tanh()
}

/// One step of the needle without a slew limit.
///
/// Non-positive frequencies mean no signal: the previous angle decays
/// toward zero instead of snapping back.
pub fn angle(current_hz: f32, target_hz: f32, previous_degrees: f32, max_degrees: f32) -> f32 {
    if !(current_hz > 0.0 && target_hz > 0.0) {
        return idle(previous_degrees, DEFAULT_IDLE_DECAY);
    }
    let target = target_angle(
        cents_between(current_hz, target_hz),
        max_degrees,
        DEFAULT_RANGE_CENTS,
    );
    let blended = DEFAULT_BLEND * previous_degrees + (1.0 - DEFAULT_BLEND) * target;
    blended.clamp(-max_degrees, max_degrees)
}

fn idle(previous: f32, decay: f32) -> f32 {
    let next = previous * decay;
    if next.abs() < REST_DEGREES || !next.is_finite() {
        0.0
    } else {
        next
    }
}

/// Stateful needle: tanh mapping, exponential blend, then a slew-rate limit.
pub struct NeedleMapper {
    max_degrees: f32,
    range_cents: f32,
    blend: f32,
    idle_decay: f32,
    slew_deg_per_sec: f32,
    current: f32,
}

impl NeedleMapper {
    pub fn new(cfg: &TunerConfig) -> Self {
        Self {
            max_degrees: cfg.needle_max_degrees,
            range_cents: cfg.needle_range_cents,
            blend: cfg.needle_blend,
            idle_decay: cfg.needle_idle_decay,
            slew_deg_per_sec: cfg.needle_slew_deg_per_sec,
            current: 0.0,
        }
    }

    /// Advance one frame. `cents` is None while there is no pitch; `dt` is
    /// the time since the previous frame in seconds.
    pub fn update(&mut self, cents: Option<f32>, dt: f32) -> f32 {
        let Some(cents) = cents.filter(|c| c.is_finite()) else {
            self.current = idle(self.current, self.idle_decay);
            return self.current;
        };
        let target = target_angle(cents, self.max_degrees, self.range_cents);
        let blended = self.blend * self.current + (1.0 - self.blend) * target;
        let mut step = blended - self.current;
        if self.slew_deg_per_sec > 0.0 && dt > 0.0 {
            let limit = self.slew_deg_per_sec * dt;
            step = step.clamp(-limit, limit);
        }
        self.current = (self.current + step).clamp(-self.max_degrees, self.max_degrees);
        self.current
    }

    pub fn angle(&self) -> f32 {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_tune_converges_to_zero() {
        let mut a = 30.0;
        for _ in 0..200 {
            a = angle(82.41, 82.41, a, 45.0);
        }
        assert!(a.abs() < 1e-3, "got {}", a);
    }

    #[test]
    fn test_never_exceeds_max() {
        for ratio in [1e-6f32, 0.01, 0.5, 0.97, 1.03, 2.0, 100.0, 1e6] {
            let mut a = 0.0;
            for _ in 0..500 {
                a = angle(100.0 * ratio, 100.0, a, 45.0);
                assert!(a.abs() <= 45.0, "ratio {} gave {}", ratio, a);
            }
        }
        assert!(target_angle(1e9, 45.0, 50.0) < 45.0);
        assert!(target_angle(-1e9, 45.0, 50.0) > -45.0);
    }

    #[test]
    fn test_target_angle_monotonic() {
        let mut prev = target_angle(0.0, 45.0, 50.0);
        assert_eq!(prev, 0.0);
        let mut c = 0.5;
        while c < 80.0 {
            let a = target_angle(c, 45.0, 50.0);
            assert!(a >= prev, "{} cents gave {} after {}", c, a, prev);
            prev = a;
            c += 0.5;
        }
        // Small offsets still move the needle visibly
        assert!(target_angle(5.0, 45.0, 50.0) > 8.0);
    }

    #[test]
    fn test_no_signal_decays_instead_of_snapping() {
        let a = angle(0.0, 110.0, 20.0, 45.0);
        assert!((a - 19.2).abs() < 1e-4);
        let a = angle(110.0, -1.0, a, 45.0);
        assert!((a - 18.432).abs() < 1e-3);
        let mut a = 0.5;
        for _ in 0..200 {
            a = angle(0.0, 0.0, a, 45.0);
        }
        assert_eq!(a, 0.0);
    }

    #[test]
    fn test_slew_limit_bounds_velocity() {
        let cfg = TunerConfig {
            needle_blend: 0.0,
            ..Default::default()
        };
        let mut n = NeedleMapper::new(&cfg);
        let dt = cfg.frame_interval_secs();
        let limit = cfg.needle_slew_deg_per_sec * dt;
        let mut prev = n.angle();
        for _ in 0..20 {
            let a = n.update(Some(50.0), dt);
            assert!(a - prev <= limit + 1e-4, "moved {} > {}", a - prev, limit);
            prev = a;
        }
        assert!((prev - target_angle(50.0, 45.0, 50.0)).abs() < 1e-3);
    }

    #[test]
    fn test_mapper_idle_then_reset() {
        let mut n = NeedleMapper::new(&TunerConfig::default());
        for _ in 0..50 {
            n.update(Some(-20.0), 0.01);
        }
        let held = n.angle();
        assert!(held < -10.0);
        let decayed = n.update(None, 0.01);
        assert!((decayed - held * 0.96).abs() < 1e-4);
        n.reset();
        assert_eq!(n.angle(), 0.0);
    }
}
