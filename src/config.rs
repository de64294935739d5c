//! Tuner configuration: every tunable of the pipeline in one serializable struct.
//!
//! Configuration is the one place where the tuner fails hard. Anything wrong
//! here is a setup bug, so `validate` rejects it up front instead of letting
//! the per-frame code silently degrade.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Available fundamental-frequency strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    /// Cumulative mean normalized difference with parabolic refinement
    Yin,
    /// Normalized square difference (McLeod), FFT autocorrelation
    McLeod,
    /// Sign-bit autocorrelation via XOR/popcount
    Bitstream,
    /// Rising zero-crossing rate (coarse bound only)
    ZeroCrossing,
    /// Hann-windowed FFT magnitude peak
    FftPeak,
}

impl EstimatorKind {
    pub fn label(&self) -> &'static str {
        match self {
            EstimatorKind::Yin => "yin",
            EstimatorKind::McLeod => "mcleod",
            EstimatorKind::Bitstream => "bitstream",
            EstimatorKind::ZeroCrossing => "zero-crossing",
            EstimatorKind::FftPeak => "fft-peak",
        }
    }
}

impl std::str::FromStr for EstimatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yin" => Ok(EstimatorKind::Yin),
            "mcleod" | "mpm" => Ok(EstimatorKind::McLeod),
            "bitstream" => Ok(EstimatorKind::Bitstream),
            "zero-crossing" | "zero_crossing" | "zcr" => Ok(EstimatorKind::ZeroCrossing),
            "fft-peak" | "fft_peak" | "fft" => Ok(EstimatorKind::FftPeak),
            other => Err(format!("unknown estimator '{other}'")),
        }
    }
}

/// Rejected configuration. The only error class the tuner surfaces to callers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("sample rate must be positive and finite, got {0}")]
    SampleRate(f32),
    #[error("frequency range {min} Hz..{max} Hz is empty or non-positive")]
    FrequencyRange { min: f32, max: f32 },
    #[error("max frequency {max} Hz is at or above Nyquist ({nyquist} Hz)")]
    AboveNyquist { max: f32, nyquist: f32 },
    #[error("frame of {frame} samples cannot hold two periods of {min_freq} Hz (needs {needed})")]
    FrameTooShort {
        frame: usize,
        min_freq: f32,
        needed: usize,
    },
    #[error("hop of {hop} samples must be in 1..={frame}")]
    Hop { hop: usize, frame: usize },
    #[error("{name} = {value} is outside {lo}..={hi}")]
    OutOfRange {
        name: &'static str,
        value: f32,
        lo: f32,
        hi: f32,
    },
    #[error("string lock acquire threshold {acquire} exceeds release threshold {release}")]
    LockThresholds { acquire: f32, release: f32 },
    #[error("band-pass corners {high_pass} Hz / {low_pass} Hz are invalid for {sample_rate} Hz")]
    Filter {
        high_pass: f32,
        low_pass: f32,
        sample_rate: f32,
    },
    #[error("{} cannot be the primary estimator, it only bounds the others", .0.label())]
    PrimaryEstimator(EstimatorKind),
    #[error("tuning target must be a positive frequency, got {0}")]
    Target(f32),
    #[error("invalid configuration JSON: {0}")]
    Json(String),
}

/// Every knob of the pipeline. Defaults suit a six-string guitar through a
/// cheap laptop or phone microphone at 48 kHz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    // ── Framing ────────────────────────────────────────────────────────
    pub sample_rate: f32,
    /// Analysis frame length (samples)
    pub frame_length: usize,
    /// New samples between consecutive frames (512 of 2048 = 75% overlap)
    pub hop_size: usize,

    // ── Search range ───────────────────────────────────────────────────
    pub min_frequency: f32,
    pub max_frequency: f32,
    /// A4 reference for note naming
    pub a4_hz: f32,

    // ── Signal conditioner ─────────────────────────────────────────────
    /// Noise profile warm-up length (seconds)
    pub calibration_secs: f32,
    /// Gate threshold = mean + k·stddev of the calibration RMS
    pub gate_sigma: f32,
    /// Lower bound on the gate threshold (RMS)
    pub gate_floor: f32,
    /// Upper bound on the gate threshold, so a note ringing during
    /// calibration cannot lock the gate shut
    pub gate_ceiling: f32,
    /// Consecutive frames needed to flip the gate
    pub gate_hysteresis_frames: u32,
    /// Debug only: skip calibration and keep the gate open
    pub gate_bypass: bool,
    pub high_pass_hz: f32,
    pub low_pass_hz: f32,

    // ── Estimation ─────────────────────────────────────────────────────
    pub estimator: EstimatorKind,
    /// Alternative estimators consulted by the cross-validator
    pub cross_validators: Vec<EstimatorKind>,
    /// YIN absolute threshold on d'(τ)
    pub yin_threshold: f32,
    /// Minimum NSDF peak accepted by the McLeod estimator
    pub mcleod_clarity: f32,
    /// Frequency ratio within which two candidates agree
    pub agreement_tolerance: f32,

    // ── Stabilizer ─────────────────────────────────────────────────────
    /// Rolling median length
    pub stabilizer_buffer: usize,
    /// Per-frame display decay while no pitch is present, at most 0.97.
    /// At that bound with a 512-sample hop at 48 kHz, 110 Hz fades below a
    /// 15 Hz floor in about 66 frames (0.7 s).
    pub decay_factor: f32,
    /// Display snaps to zero below this frequency (at least 1 Hz)
    pub decay_floor_hz: f32,
    /// Relative spread around the median tolerated in the buffer
    pub consistency_tolerance: f32,
    /// Weight of the previous display value once the pitch is stable
    pub smoothing_slow: f32,
    /// Weight of the previous display value while the pitch settles
    pub smoothing_fast: f32,
    /// Consecutive steady frames before the slow factor applies
    pub stable_frames: u32,

    // ── String selection ───────────────────────────────────────────────
    /// Cents window to acquire a string lock
    pub lock_acquire_cents: f32,
    /// Cents window to keep an existing lock
    pub lock_release_cents: f32,
    /// Score bonus (cents) for the currently locked string
    pub lock_bias_cents: f32,
    /// Score penalty (cents) for switching strings on an octave-confusable reading
    pub octave_penalty_cents: f32,
    /// Time a new best string must persist before it becomes active
    pub debounce_secs: f32,

    // ── Needle ─────────────────────────────────────────────────────────
    pub needle_max_degrees: f32,
    /// Cents span shown on the needle (±)
    pub needle_range_cents: f32,
    /// Weight of the previous angle in the exponential blend
    pub needle_blend: f32,
    /// Per-frame angle decay while no pitch is present
    pub needle_idle_decay: f32,
    /// Maximum angular velocity (degrees/second); 0 disables the limiter
    pub needle_slew_deg_per_sec: f32,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            frame_length: 2048,
            hop_size: 512,

            min_frequency: 60.0,
            max_frequency: 1200.0,
            a4_hz: 440.0,

            calibration_secs: 0.5,
            gate_sigma: 3.0,
            gate_floor: 0.003,
            gate_ceiling: 0.05,
            gate_hysteresis_frames: 3,
            gate_bypass: false,
            high_pass_hz: 60.0,
            low_pass_hz: 2800.0,

            estimator: EstimatorKind::Yin,
            cross_validators: vec![
                EstimatorKind::Bitstream,
                EstimatorKind::McLeod,
                EstimatorKind::ZeroCrossing,
            ],
            yin_threshold: 0.15,
            mcleod_clarity: 0.5,
            agreement_tolerance: 0.05,

            stabilizer_buffer: 5,
            decay_factor: 0.9,
            decay_floor_hz: 15.0,
            consistency_tolerance: 0.05,
            smoothing_slow: 0.8,
            smoothing_fast: 0.4,
            stable_frames: 4,

            lock_acquire_cents: 100.0,
            lock_release_cents: 106.0,
            lock_bias_cents: 15.0,
            octave_penalty_cents: 60.0,
            debounce_secs: 0.35,

            needle_max_degrees: 45.0,
            needle_range_cents: 50.0,
            needle_blend: 0.85,
            needle_idle_decay: 0.96,
            needle_slew_deg_per_sec: 360.0,
        }
    }
}

/// Slowest allowed silence fade; keeps the fade to roughly a second.
const MAX_DECAY_FACTOR: f32 = 0.97;

fn check_range(name: &'static str, value: f32, lo: f32, hi: f32) -> Result<(), ConfigError> {
    if value.is_finite() && (lo..=hi).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { name, value, lo, hi })
    }
}

impl TunerConfig {
    /// Check every invariant. Constructors taking a config call this first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sr = self.sample_rate;
        if !(sr.is_finite() && sr > 0.0) {
            return Err(ConfigError::SampleRate(sr));
        }
        if !(self.min_frequency > 0.0 && self.min_frequency < self.max_frequency)
            || !self.max_frequency.is_finite()
        {
            return Err(ConfigError::FrequencyRange {
                min: self.min_frequency,
                max: self.max_frequency,
            });
        }
        let nyquist = sr / 2.0;
        if self.max_frequency >= nyquist {
            return Err(ConfigError::AboveNyquist {
                max: self.max_frequency,
                nyquist,
            });
        }
        // Two full periods of the lowest pitch must fit in a frame.
        let needed = 2 * (sr / self.min_frequency).ceil() as usize;
        if self.frame_length < needed || self.frame_length < 4 {
            return Err(ConfigError::FrameTooShort {
                frame: self.frame_length,
                min_freq: self.min_frequency,
                needed,
            });
        }
        if self.hop_size == 0 || self.hop_size > self.frame_length {
            return Err(ConfigError::Hop {
                hop: self.hop_size,
                frame: self.frame_length,
            });
        }
        if !(self.high_pass_hz > 0.0
            && self.high_pass_hz < self.low_pass_hz
            && self.low_pass_hz.is_finite())
        {
            return Err(ConfigError::Filter {
                high_pass: self.high_pass_hz,
                low_pass: self.low_pass_hz,
                sample_rate: sr,
            });
        }

        if self.estimator == EstimatorKind::ZeroCrossing {
            return Err(ConfigError::PrimaryEstimator(self.estimator));
        }

        check_range("a4_hz", self.a4_hz, 400.0, 480.0)?;
        check_range("calibration_secs", self.calibration_secs, 0.0, 10.0)?;
        check_range("gate_sigma", self.gate_sigma, 2.0, 4.0)?;
        check_range("gate_floor", self.gate_floor, 1e-6, 1.0)?;
        check_range("gate_ceiling", self.gate_ceiling, self.gate_floor, 1.0)?;
        check_range(
            "gate_hysteresis_frames",
            self.gate_hysteresis_frames as f32,
            1.0,
            64.0,
        )?;
        check_range("yin_threshold", self.yin_threshold, 0.01, 0.5)?;
        check_range("mcleod_clarity", self.mcleod_clarity, 0.0, 1.0)?;
        check_range("agreement_tolerance", self.agreement_tolerance, 0.001, 0.5)?;
        check_range("stabilizer_buffer", self.stabilizer_buffer as f32, 1.0, 64.0)?;
        check_range("decay_factor", self.decay_factor, 0.0, MAX_DECAY_FACTOR)?;
        check_range("decay_floor_hz", self.decay_floor_hz, 1.0, self.min_frequency)?;
        check_range("consistency_tolerance", self.consistency_tolerance, 0.001, 0.5)?;
        check_range("smoothing_slow", self.smoothing_slow, 0.0, 0.99)?;
        check_range("smoothing_fast", self.smoothing_fast, 0.0, self.smoothing_slow)?;
        check_range("lock_acquire_cents", self.lock_acquire_cents, 1.0, 600.0)?;
        if self.lock_acquire_cents > self.lock_release_cents {
            return Err(ConfigError::LockThresholds {
                acquire: self.lock_acquire_cents,
                release: self.lock_release_cents,
            });
        }
        check_range("lock_bias_cents", self.lock_bias_cents, 0.0, 200.0)?;
        check_range("octave_penalty_cents", self.octave_penalty_cents, 0.0, 1200.0)?;
        check_range("debounce_secs", self.debounce_secs, 0.0, 5.0)?;
        check_range("needle_max_degrees", self.needle_max_degrees, 1.0, 90.0)?;
        check_range("needle_range_cents", self.needle_range_cents, 1.0, 600.0)?;
        check_range("needle_blend", self.needle_blend, 0.0, 0.99)?;
        check_range("needle_idle_decay", self.needle_idle_decay, 0.0, 0.999)?;
        check_range(
            "needle_slew_deg_per_sec",
            self.needle_slew_deg_per_sec,
            0.0,
            1.0e5,
        )?;
        Ok(())
    }

    /// Copy of this config at another sample rate, validated.
    pub fn with_sample_rate(&self, sample_rate: f32) -> Result<Self, ConfigError> {
        let cfg = Self {
            sample_rate,
            ..self.clone()
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Shortest lag searched, in samples.
    pub fn min_period(&self) -> usize {
        ((self.sample_rate / self.max_frequency).floor() as usize).max(2)
    }

    /// Longest lag searched, in samples.
    pub fn max_period(&self) -> usize {
        ((self.sample_rate / self.min_frequency).ceil() as usize).min(self.frame_length / 2)
    }

    /// Seconds between consecutive frames.
    pub fn frame_interval_secs(&self) -> f32 {
        self.hop_size as f32 / self.sample_rate
    }

    /// Number of frames the noise profile warms up over.
    pub fn calibration_frames(&self) -> u32 {
        (self.calibration_secs / self.frame_interval_secs()).ceil() as u32
    }

    /// Number of consecutive evaluations a string change must survive.
    pub fn debounce_frames(&self) -> u32 {
        ((self.debounce_secs / self.frame_interval_secs()).ceil() as u32).max(1)
    }

    /// Parse and validate a JSON document; absent fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ConfigError::Json(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_json(&self) -> String {
        // Plain data struct: serialization cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}
