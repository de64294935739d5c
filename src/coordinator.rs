use crate::config::{ConfigError, TunerConfig};
use crate::pipeline::TunerPipeline;
use crate::types::*;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, trace, warn};

/// The coordinator is the processing thread. It receives TunerEvents (audio
/// chunks and control changes) in arrival order, runs the pipeline on every
/// completed frame and publishes each TunerFrame, whole, to every
/// subscriber.
///
/// Control events are applied between frames, so a mode change or reset
/// never lands halfway through a frame. A closed input channel ends the
/// session.
pub struct Coordinator {
    input_rx: Receiver<TunerEvent>,
    frame_txs: Vec<Sender<TunerFrame>>,
    pipeline: TunerPipeline,
    /// Last sample rate rejected, so a bad stream warns once
    rejected_rate: Option<u32>,
}

impl Coordinator {
    pub fn new(
        input_rx: Receiver<TunerEvent>,
        frame_txs: Vec<Sender<TunerFrame>>,
        cfg: TunerConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            input_rx,
            frame_txs,
            pipeline: TunerPipeline::new(cfg)?,
            rejected_rate: None,
        })
    }

    pub fn pipeline(&self) -> &TunerPipeline {
        &self.pipeline
    }

    pub fn run(&mut self) {
        let cfg = self.pipeline.config();
        info!(
            "Coordinator running ({} primary, {} Hz, frame {} / hop {})",
            cfg.estimator.label(),
            cfg.sample_rate,
            cfg.frame_length,
            cfg.hop_size
        );

        let mut frame_count: u64 = 0;
        let mut chunk_count: u64 = 0;

        for event in self.input_rx.iter() {
            match event {
                TunerEvent::Audio(chunk) => {
                    chunk_count += 1;
                    if let Err(e) = self.pipeline.push_audio(&chunk) {
                        if self.rejected_rate != Some(chunk.sample_rate) {
                            warn!("Dropping audio at {} Hz: {}", chunk.sample_rate, e);
                            self.rejected_rate = Some(chunk.sample_rate);
                        }
                        continue;
                    }
                    self.rejected_rate = None;

                    while let Some(frame) = self.pipeline.next_reading() {
                        for tx in &self.frame_txs {
                            let _ = tx.send(frame.clone());
                        }
                        frame_count += 1;
                        if frame_count % 1000 == 0 {
                            debug!(
                                "Coordinator: {} frames from {} chunks, {} samples dropped",
                                frame_count,
                                chunk_count,
                                self.pipeline.dropped_samples()
                            );
                            trace!("Latest: {}", frame.reading);
                        }
                    }
                }

                TunerEvent::SetMode(mode) => {
                    if let Err(e) = self.pipeline.set_mode(mode) {
                        warn!("Ignoring mode change: {}", e);
                    }
                }

                TunerEvent::SetStrings(strings) => {
                    self.pipeline.set_strings(&strings);
                }

                TunerEvent::Reset => {
                    info!("Session reset after {} frames", frame_count);
                    self.pipeline.reset();
                }
            }
        }

        info!("Coordinator shutting down after {} frames", frame_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};

    #[test]
    fn test_bad_config_rejected() {
        let (_tx, rx) = bounded(4);
        let cfg = TunerConfig {
            min_frequency: 2000.0,
            ..Default::default()
        };
        assert!(Coordinator::new(rx, vec![], cfg).is_err());
    }

    #[test]
    fn test_publishes_one_frame_per_hop_to_every_subscriber() {
        let (in_tx, in_rx) = bounded(64);
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();
        let mut c = Coordinator::new(in_rx, vec![a_tx, b_tx], TunerConfig::default()).unwrap();

        in_tx
            .send(TunerEvent::Audio(AudioChunk {
                timestamp_us: 0,
                samples: vec![0.0; 2048 + 512 * 3],
                sample_rate: 48000,
            }))
            .unwrap();
        in_tx.send(TunerEvent::Reset).unwrap();
        drop(in_tx);
        c.run();

        assert_eq!(a_rx.try_iter().count(), 4);
        let b: Vec<TunerFrame> = b_rx.try_iter().collect();
        assert_eq!(b.len(), 4);
        assert!(b.windows(2).all(|w| w[1].timestamp_us > w[0].timestamp_us));
        assert_eq!(c.pipeline().frames_processed(), 0, "reset clears counters");
    }

    #[test]
    fn test_invalid_events_do_not_stop_the_session() {
        let (in_tx, in_rx) = bounded(64);
        let (out_tx, out_rx) = unbounded();
        let mut c = Coordinator::new(in_rx, vec![out_tx], TunerConfig::default()).unwrap();

        in_tx
            .send(TunerEvent::SetMode(TunerMode::Manual(TuningTarget::new(-1.0, "?"))))
            .unwrap();
        in_tx
            .send(TunerEvent::Audio(AudioChunk {
                timestamp_us: 0,
                samples: vec![0.0; 4096],
                sample_rate: 1000,
            }))
            .unwrap();
        in_tx
            .send(TunerEvent::Audio(AudioChunk {
                timestamp_us: 0,
                samples: vec![0.0; 2048],
                sample_rate: 48000,
            }))
            .unwrap();
        drop(in_tx);
        c.run();

        assert_eq!(c.pipeline().mode(), &TunerMode::Auto);
        assert_eq!(out_rx.try_iter().count(), 1);
    }
}
