use crate::config::EstimatorKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

// ─── Audio input ────────────────────────────────────────────────────────────

/// A chunk of audio samples from the capture layer (or simulator).
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Microseconds since session start (timestamp of first sample)
    pub timestamp_us: u64,
    /// Mono f32 samples, normalized -1.0 to 1.0
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

// ─── Per-frame estimates ────────────────────────────────────────────────────

/// One estimator's opinion about a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchCandidate {
    /// None = unvoiced / no pitch found
    pub frequency_hz: Option<f32>,
    /// Correlation or clarity score in [0, 1]
    pub strength: f32,
    pub source: EstimatorKind,
}

impl PitchCandidate {
    pub fn none(source: EstimatorKind) -> Self {
        Self {
            frequency_hz: None,
            strength: 0.0,
            source,
        }
    }

    pub fn found(source: EstimatorKind, frequency_hz: f32, strength: f32) -> Self {
        Self {
            frequency_hz: Some(frequency_hz),
            strength: strength.clamp(0.0, 1.0),
            source,
        }
    }

    pub fn is_voiced(&self) -> bool {
        self.frequency_hz.is_some()
    }
}

// ─── Session state snapshots ────────────────────────────────────────────────

/// Stabilizer state. A display frequency of 0.0 means "no pitch".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StabilizedPitch {
    pub display_hz: f32,
    pub last_good_hz: f32,
    pub consecutive_stable_frames: u32,
    /// True while `display_hz` is fading out after the pitch was lost; the
    /// value is then a display fade, not a measurement.
    #[serde(default)]
    pub decaying: bool,
}

/// The pitch the player is tuning toward. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningTarget {
    pub reference_hz: f32,
    pub note_name: String,
    pub string_index: Option<usize>,
}

impl TuningTarget {
    pub fn new(reference_hz: f32, note_name: impl Into<String>) -> Self {
        Self {
            reference_hz,
            note_name: note_name.into(),
            string_index: None,
        }
    }

    pub fn for_string(reference_hz: f32, note_name: impl Into<String>, index: usize) -> Self {
        Self {
            reference_hz,
            note_name: note_name.into(),
            string_index: Some(index),
        }
    }
}

/// Needle position and string lock carried across frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NeedleState {
    pub current_angle_degrees: f32,
    pub locked_string_index: Option<usize>,
}

/// Auto picks the nearest string (or chromatic note when no strings are
/// configured); Manual holds a fixed externally supplied target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TunerMode {
    Auto,
    Manual(TuningTarget),
}

// ─── Pipeline output ────────────────────────────────────────────────────────

/// Everything the presentation layer needs for one processed frame.
/// Published as a whole value; consumers never see a partial update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunerReading {
    /// Cross-validated raw estimate for this frame
    pub fundamental_hz: Option<f32>,
    /// Stabilized frequency for display, 0.0 when silent
    pub display_hz: f32,
    /// Nearest note name ("E", "F#", ...), None when silent
    pub note: Option<String>,
    pub octave: Option<i32>,
    /// Offset from the active target (string or nearest note)
    pub cents: Option<f32>,
    /// Reference frequency the cents are measured against
    pub target_hz: Option<f32>,
    pub needle_degrees: f32,
    pub string_index: Option<usize>,
    /// Whether the active string is within its lock window
    pub string_locked: bool,
    /// 0.0 (no pitch) to 1.0
    pub confidence: f32,
    pub gate_open: bool,
    pub calibrating: bool,
}

impl TunerReading {
    pub fn silent() -> Self {
        Self {
            fundamental_hz: None,
            display_hz: 0.0,
            note: None,
            octave: None,
            cents: None,
            target_hz: None,
            needle_degrees: 0.0,
            string_index: None,
            string_locked: false,
            confidence: 0.0,
            gate_open: false,
            calibrating: false,
        }
    }

    /// "E2", "A#3", or "--" when silent.
    pub fn note_label(&self) -> String {
        match (&self.note, self.octave) {
            (Some(n), Some(o)) => format!("{}{}", n, o),
            _ => "--".to_string(),
        }
    }
}

impl fmt::Display for TunerReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cents = match self.cents {
            Some(c) => format!("{:+6.1}c", c),
            None => "   ---".to_string(),
        };
        let string = match self.string_index {
            Some(i) => format!("{}", i + 1),
            None => "-".to_string(),
        };
        write!(
            f,
            "{:>8.2}Hz  {:<4} {}  needle={:+6.1}°  str={}{}  conf={:.2}{}",
            self.display_hz,
            self.note_label(),
            cents,
            self.needle_degrees,
            string,
            if self.string_locked { "*" } else { " " },
            self.confidence,
            if self.calibrating { "  [calibrating]" } else { "" },
        )
    }
}

/// A reading stamped with the capture time of the frame's newest sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunerFrame {
    pub timestamp_us: u64,
    pub reading: TunerReading,
}

// ─── Inter-thread messages ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum TunerEvent {
    Audio(AudioChunk),
    SetMode(TunerMode),
    /// Replace the instrument's string set (open-string frequencies in Hz)
    SetStrings(Vec<f32>),
    /// Stop the session: all per-session state is discarded
    Reset,
}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic clock for the tuning session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
