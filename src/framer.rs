use crate::types::AudioChunk;
use log::warn;

/// Frames of backlog kept before the oldest samples are dropped.
const MAX_BACKLOG_FRAMES: usize = 8;

/// Turns capture chunks of any size into overlapping analysis frames.
///
/// Storage is sized once for the frame length plus backlog; consumed samples
/// are compacted away at the next push, so steady-state streaming does not
/// allocate. If the consumer falls behind by more than the backlog the
/// oldest samples are discarded, which downstream sees as a gap.
pub struct FrameAssembler {
    frame_length: usize,
    hop_size: usize,
    max_backlog: usize,
    buffer: Vec<f32>,
    /// Start of the next frame within `buffer`
    start: usize,
    sample_rate: f32,
    /// Capture time of `buffer[0]`
    base_us: u64,
    last_frame_us: u64,
    dropped_samples: u64,
}

impl FrameAssembler {
    pub fn new(frame_length: usize, hop_size: usize, sample_rate: f32) -> Self {
        let max_backlog = frame_length * MAX_BACKLOG_FRAMES;
        Self {
            frame_length,
            hop_size: hop_size.max(1),
            max_backlog,
            buffer: Vec::with_capacity(max_backlog + frame_length),
            start: 0,
            sample_rate,
            base_us: 0,
            last_frame_us: 0,
            dropped_samples: 0,
        }
    }

    fn samples_to_us(&self, n: usize) -> u64 {
        if self.sample_rate > 0.0 {
            (n as f64 * 1.0e6 / self.sample_rate as f64) as u64
        } else {
            0
        }
    }

    /// Append a capture chunk.
    pub fn push(&mut self, chunk: &AudioChunk) {
        if self.start > 0 {
            let consumed = self.start.min(self.buffer.len());
            self.buffer.drain(..consumed);
            self.base_us += self.samples_to_us(consumed);
            self.start = 0;
        }
        if self.buffer.is_empty() {
            self.base_us = chunk.timestamp_us;
        }
        self.buffer.extend_from_slice(&chunk.samples);

        if self.buffer.len() > self.max_backlog {
            let excess = self.buffer.len() - self.max_backlog;
            warn!(
                "frame assembler: backlog over {} samples, dropping {} oldest",
                self.max_backlog, excess
            );
            self.buffer.drain(..excess);
            self.base_us += self.samples_to_us(excess);
            self.dropped_samples += excess as u64;
        }
    }

    /// Whether a full frame is waiting.
    pub fn ready(&self) -> bool {
        self.buffer.len() >= self.start + self.frame_length
    }

    /// The next analysis frame, advancing by one hop. None until enough
    /// samples have arrived.
    pub fn next_frame(&mut self) -> Option<&[f32]> {
        if !self.ready() {
            return None;
        }
        let begin = self.start;
        let end = begin + self.frame_length;
        self.start += self.hop_size;
        self.last_frame_us = self.base_us + self.samples_to_us(end);
        Some(&self.buffer[begin..end])
    }

    /// Capture time just past the newest sample of the last frame returned.
    pub fn last_frame_us(&self) -> u64 {
        self.last_frame_us
    }

    /// Samples waiting beyond the next frame start.
    pub fn pending(&self) -> usize {
        self.buffer.len().saturating_sub(self.start)
    }

    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    /// Switch sample rate; pending samples belong to the old rate and are discarded.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.start = 0;
        self.base_us = 0;
        self.last_frame_us = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(start: usize, n: usize, timestamp_us: u64) -> AudioChunk {
        AudioChunk {
            timestamp_us,
            samples: (start..start + n).map(|i| i as f32).collect(),
            sample_rate: 1000,
        }
    }

    #[test]
    fn test_frames_overlap_by_hop() {
        let mut f = FrameAssembler::new(8, 2, 1000.0);
        f.push(&chunk(0, 5, 0));
        assert!(f.next_frame().is_none());
        f.push(&chunk(5, 7, 5000));

        let first: Vec<f32> = f.next_frame().unwrap().to_vec();
        assert_eq!(first, (0..8).map(|i| i as f32).collect::<Vec<_>>());
        assert_eq!(f.last_frame_us(), 8000);
        let second = f.next_frame().unwrap();
        assert_eq!(second[0], 2.0);
        assert_eq!(second[7], 9.0);
        let third = f.next_frame().unwrap();
        assert_eq!(third[0], 4.0);
        assert!(f.next_frame().is_none());
    }

    #[test]
    fn test_compaction_keeps_continuity() {
        let mut f = FrameAssembler::new(4, 4, 1000.0);
        let mut expected = 0.0;
        for i in 0..50 {
            f.push(&chunk(i * 3, 3, (i * 3) as u64 * 1000));
            while let Some(frame) = f.next_frame() {
                assert_eq!(frame[0], expected);
                expected += 4.0;
            }
        }
        assert_eq!(expected, 148.0);
        assert_eq!(f.dropped_samples(), 0);
    }

    #[test]
    fn test_backlog_drops_oldest() {
        let mut f = FrameAssembler::new(4, 1, 1000.0);
        f.push(&chunk(0, 100, 0));
        assert_eq!(f.pending(), 32);
        assert_eq!(f.dropped_samples(), 68);
        assert_eq!(f.next_frame().unwrap()[0], 68.0);
        assert_eq!(f.last_frame_us(), 72_000);
    }

    #[test]
    fn test_sample_rate_change_discards_pending() {
        let mut f = FrameAssembler::new(8, 4, 1000.0);
        f.push(&chunk(0, 6, 0));
        f.set_sample_rate(2000.0);
        assert_eq!(f.pending(), 0);
        f.push(&chunk(100, 8, 10_000));
        assert_eq!(f.next_frame().unwrap()[0], 100.0);
        assert_eq!(f.last_frame_us(), 14_000);
    }
}
