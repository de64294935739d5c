use crate::types::*;
use crossbeam_channel::Receiver;
use std::io::{self, Write};

/// Output format of the console consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStyle {
    /// Redrawn ASCII needle meter
    Meter,
    /// One JSON object per frame, for piping into other tools
    Json,
}

/// Renders tuner readings on the terminal.
pub struct ConsoleDisplay {
    rx: Receiver<TunerFrame>,
    style: DisplayStyle,
    /// Draw every Nth frame in meter mode
    skip: u64,
    max_degrees: f32,
}

impl ConsoleDisplay {
    /// `frames_per_sec` is the pipeline's frame rate; the meter is redrawn
    /// at roughly `update_hz`.
    pub fn new(
        rx: Receiver<TunerFrame>,
        style: DisplayStyle,
        update_hz: u32,
        frames_per_sec: f32,
        max_degrees: f32,
    ) -> Self {
        let skip = if update_hz == 0 {
            1
        } else {
            (frames_per_sec / update_hz as f32).round().max(1.0) as u64
        };
        Self {
            rx,
            style,
            skip,
            max_degrees,
        }
    }

    pub fn run(&self) {
        let mut count: u64 = 0;
        let mut stdout = io::stdout();

        for frame in self.rx.iter() {
            count += 1;
            match self.style {
                DisplayStyle::Json => {
                    if let Ok(line) = serde_json::to_string(&frame) {
                        let _ = writeln!(stdout, "{}", line);
                    }
                }
                DisplayStyle::Meter => {
                    if count % self.skip != 0 {
                        continue;
                    }
                    // Clear screen and move cursor home
                    let _ = write!(stdout, "\x1b[2J\x1b[H{}", render_meter(&frame, self.max_degrees));
                }
            }
            let _ = stdout.flush();
        }
    }
}

/// The full meter panel for one frame.
pub fn render_meter(frame: &TunerFrame, max_degrees: f32) -> String {
    let r = &frame.reading;
    let mut out = String::new();
    out.push_str("╔══════════════════════════════════════════════════════════╗\n");
    out.push_str("║  STRING TUNER                                            ║\n");
    out.push_str("╠══════════════════════════════════════════════════════════╣\n");
    let secs = frame.timestamp_us as f64 / 1_000_000.0;
    out.push_str(&format!("║  Time: {:<10.2}{:>40}║\n", secs, status(r)));
    out.push_str("║                                                          ║\n");

    let note = r.note_label();
    let target = match (r.string_index, r.target_hz) {
        (Some(i), Some(hz)) => format!("string {} @ {:.2} Hz{}", i + 1, hz, if r.string_locked { " *" } else { "" }),
        (None, Some(hz)) => format!("{:.2} Hz", hz),
        _ => "---".to_string(),
    };
    out.push_str(&format!("║  Note: {:<6} {:>9.2} Hz   target {:<24}║\n", note, r.display_hz, target));
    let cents = match r.cents {
        Some(c) => format!("{:+.1} cents", c),
        None => "---".to_string(),
    };
    out.push_str(&format!("║  Offset: {:<16} confidence {}   ║\n", cents, make_bar(r.confidence, 16)));
    out.push_str("║                                                          ║\n");
    out.push_str(&format!("║  {}  ║\n", make_needle(r.needle_degrees, max_degrees, 53)));
    out.push_str("║       flat                                    sharp      ║\n");
    out.push_str("╚══════════════════════════════════════════════════════════╝\n");
    out
}

fn status(r: &TunerReading) -> &'static str {
    if r.calibrating {
        "[calibrating]"
    } else if r.gate_open {
        "[listening]"
    } else {
        "[quiet]"
    }
}

fn make_bar(val: f32, width: usize) -> String {
    let filled = (val.clamp(0.0, 1.0) * width as f32).round() as usize;
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// A horizontal needle: `│` marks center, `▼` the needle position.
fn make_needle(degrees: f32, max_degrees: f32, width: usize) -> String {
    let width = width.max(3) | 1;
    let center = width / 2;
    let t = if max_degrees > 0.0 {
        (degrees / max_degrees).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let pos = (center as f32 + t * center as f32).round() as usize;
    (0..width)
        .map(|i| {
            if i == pos {
                '▼'
            } else if i == center {
                '│'
            } else {
                '─'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needle_position() {
        let centered = make_needle(0.0, 45.0, 11);
        assert_eq!(centered.chars().nth(5), Some('▼'));
        let sharp = make_needle(45.0, 45.0, 11);
        assert_eq!(sharp.chars().last(), Some('▼'));
        assert_eq!(sharp.chars().nth(5), Some('│'));
        let flat = make_needle(-100.0, 45.0, 11);
        assert_eq!(flat.chars().next(), Some('▼'));
    }

    #[test]
    fn test_meter_shows_note_and_offset() {
        let mut reading = TunerReading::silent();
        reading.display_hz = 110.3;
        reading.note = Some("A".into());
        reading.octave = Some(2);
        reading.cents = Some(4.7);
        reading.target_hz = Some(110.0);
        reading.string_index = Some(1);
        reading.string_locked = true;
        let text = render_meter(
            &TunerFrame {
                timestamp_us: 1_500_000,
                reading,
            },
            45.0,
        );
        assert!(text.contains("A2"));
        assert!(text.contains("+4.7 cents"));
        assert!(text.contains("string 2 @ 110.00 Hz *"));
        assert!(text.contains("[quiet]"));
    }
}
