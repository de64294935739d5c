//! Equal-temperament note math and the built-in instrument tunings.

use crate::types::TuningTarget;

pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// MIDI note number of A4.
const A4_MIDI: f32 = 69.0;

/// Convert a (fractional) MIDI note number to Hz.
pub fn midi_to_hz(midi: f32, a4_hz: f32) -> f32 {
    a4_hz * 2.0_f32.powf((midi - A4_MIDI) / 12.0)
}

/// Convert Hz to a fractional MIDI note number.
pub fn hz_to_midi(hz: f32, a4_hz: f32) -> f32 {
    A4_MIDI + 12.0 * (hz / a4_hz).log2()
}

/// Pitch-class name of a MIDI note ("C", "F#", ...).
pub fn note_name(midi: i32) -> &'static str {
    NOTE_NAMES[midi.rem_euclid(12) as usize]
}

/// Octave of a MIDI note in scientific pitch notation (C4 = 60).
pub fn note_octave(midi: i32) -> i32 {
    midi.div_euclid(12) - 1
}

/// The note nearest to a frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteInfo {
    pub name: &'static str,
    pub octave: i32,
    pub midi: i32,
    /// Offset from `reference_hz`, within ±50
    pub cents: f32,
    pub reference_hz: f32,
}

impl NoteInfo {
    pub fn label(&self) -> String {
        format!("{}{}", self.name, self.octave)
    }
}

/// Nearest equal-tempered note to `hz`. None for non-positive or non-finite input.
pub fn map_to_note(hz: f32, a4_hz: f32) -> Option<NoteInfo> {
    if !(hz.is_finite() && hz > 0.0) {
        return None;
    }
    let midi = hz_to_midi(hz, a4_hz).round() as i32;
    let reference_hz = midi_to_hz(midi as f32, a4_hz);
    Some(NoteInfo {
        name: note_name(midi),
        octave: note_octave(midi),
        midi,
        cents: 1200.0 * (hz / reference_hz).log2(),
        reference_hz,
    })
}

/// Parse scientific pitch notation ("E2", "C#4", "Bb3", "A-1") into a MIDI number.
pub fn parse_note(s: &str) -> Option<i32> {
    let s = s.trim();
    let mut chars = s.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let mut semitone: i32 = match letter {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let rest = chars.as_str();
    let octave_str = if let Some(r) = rest.strip_prefix('#') {
        semitone += 1;
        r
    } else if let Some(r) = rest.strip_prefix('b') {
        semitone -= 1;
        r
    } else {
        rest
    };
    let octave: i32 = octave_str.parse().ok()?;
    Some((octave + 1) * 12 + semitone)
}

/// A named set of open-string pitches, lowest string first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuning {
    pub name: &'static str,
    pub instrument: &'static str,
    pub notes: &'static [&'static str],
}

pub const TUNINGS: &[Tuning] = &[
    Tuning {
        name: "standard",
        instrument: "guitar",
        notes: &["E2", "A2", "D3", "G3", "B3", "E4"],
    },
    Tuning {
        name: "drop-d",
        instrument: "guitar",
        notes: &["D2", "A2", "D3", "G3", "B3", "E4"],
    },
    Tuning {
        name: "dadgad",
        instrument: "guitar",
        notes: &["D2", "A2", "D3", "G3", "A3", "D4"],
    },
    Tuning {
        name: "open-g",
        instrument: "guitar",
        notes: &["D2", "G2", "D3", "G3", "B3", "D4"],
    },
    Tuning {
        name: "ukulele",
        instrument: "ukulele",
        notes: &["G4", "C4", "E4", "A4"],
    },
    Tuning {
        name: "violin",
        instrument: "violin",
        notes: &["G3", "D4", "A4", "E5"],
    },
];

impl Tuning {
    /// Look up a built-in tuning by name (case-insensitive).
    pub fn find(name: &str) -> Option<&'static Tuning> {
        TUNINGS.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Open-string frequencies in Hz.
    pub fn frequencies(&self, a4_hz: f32) -> Vec<f32> {
        self.notes
            .iter()
            .filter_map(|n| parse_note(n))
            .map(|m| midi_to_hz(m as f32, a4_hz))
            .collect()
    }

    /// Fixed target for one string, for manual mode.
    pub fn target(&self, index: usize, a4_hz: f32) -> Option<TuningTarget> {
        let note = self.notes.get(index)?;
        let midi = parse_note(note)?;
        Some(TuningTarget::for_string(
            midi_to_hz(midi as f32, a4_hz),
            *note,
            index,
        ))
    }
}
