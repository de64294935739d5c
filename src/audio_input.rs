use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{Sender, TrySendError};
use log::{error, info, warn};
use std::thread;

use crate::types::{AudioChunk, SessionClock, TunerEvent};

/// Live microphone capture via cpal.
///
/// Holds the cpal `Stream` alive; drop this to stop capture. Samples are
/// mixed to mono f32 and sent as `TunerEvent::Audio` chunks of
/// `chunk_size` samples. The realtime callback never blocks: if the
/// hand-off queue is full the buffer is dropped.
pub struct AudioCapture {
    _stream: Stream,
    sample_rate: u32,
}

impl AudioCapture {
    /// Open the default input device and start streaming, preferring
    /// `preferred_rate` when the device supports it.
    pub fn start(
        tx: Sender<TunerEvent>,
        clock: SessionClock,
        preferred_rate: u32,
        chunk_size: usize,
    ) -> Result<Self, String> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| "No default audio input device found".to_string())?;

        info!(
            "Audio input: {}",
            device.name().unwrap_or_else(|_| "unknown".into())
        );

        let supported = device
            .default_input_config()
            .map_err(|e| format!("No supported input config: {e}"))?;

        let preferred = cpal::SampleRate(preferred_rate);
        let matching = device.supported_input_configs().ok().and_then(|configs| {
            configs
                .filter(|c| {
                    c.channels() == supported.channels()
                        && c.min_sample_rate() <= preferred
                        && c.max_sample_rate() >= preferred
                })
                .max_by_key(|c| c.max_sample_rate())
                .map(|c| c.with_sample_rate(preferred))
        });

        let (config, sample_rate, format): (StreamConfig, u32, SampleFormat) = match matching {
            Some(cfg) => {
                let sr = cfg.sample_rate().0;
                let fmt = cfg.sample_format();
                (cfg.into(), sr, fmt)
            }
            None => {
                let sr = supported.sample_rate().0;
                let fmt = supported.sample_format();
                warn!("{} Hz not supported, using device default {} Hz", preferred_rate, sr);
                (supported.into(), sr, fmt)
            }
        };

        let channels = config.channels as usize;
        info!("Capture config: {}Hz  {} ch  {:?}", sample_rate, channels, format);

        let (raw_tx, raw_rx) = crossbeam_channel::bounded::<Vec<f32>>(64);
        let err_fn = |e: cpal::StreamError| error!("Audio stream error: {e}");

        let stream = match format {
            SampleFormat::F32 => {
                let raw_tx = raw_tx.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _| forward(&raw_tx, mix_mono(data, channels, |s| s)),
                    err_fn,
                    None,
                )
            }
            SampleFormat::I16 => {
                let raw_tx = raw_tx.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _| forward(&raw_tx, mix_mono(data, channels, i16_to_f32)),
                    err_fn,
                    None,
                )
            }
            SampleFormat::U16 => {
                let raw_tx = raw_tx.clone();
                device.build_input_stream(
                    &config,
                    move |data: &[u16], _| forward(&raw_tx, mix_mono(data, channels, u16_to_f32)),
                    err_fn,
                    None,
                )
            }
            fmt => {
                return Err(format!(
                    "Unsupported sample format {fmt:?}. Use an F32, I16 or U16 device."
                ))
            }
        }
        .map_err(|e| e.to_string())?;

        stream.play().map_err(|e| e.to_string())?;

        // Re-chunk callback buffers into fixed-size events off the realtime thread
        let chunk_size = chunk_size.max(1);
        thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let mut accum: Vec<f32> = Vec::with_capacity(chunk_size * 4);
                for block in raw_rx {
                    accum.extend_from_slice(&block);
                    while accum.len() >= chunk_size {
                        let samples: Vec<f32> = accum.drain(..chunk_size).collect();
                        let event = TunerEvent::Audio(AudioChunk {
                            timestamp_us: clock.now_us(),
                            samples,
                            sample_rate,
                        });
                        if tx.send(event).is_err() {
                            return; // Coordinator gone
                        }
                    }
                }
            })
            .map_err(|e| format!("Failed to spawn capture thread: {e}"))?;

        Ok(Self {
            _stream: stream,
            sample_rate,
        })
    }

    /// Rate the device actually runs at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn forward(tx: &Sender<Vec<f32>>, mono: Vec<f32>) {
    if let Err(TrySendError::Full(_)) = tx.try_send(mono) {
        warn!("Capture queue full, dropping callback buffer");
    }
}

// ─── Mono mixdown ───────────────────────────────────────────────────────────

fn i16_to_f32(s: i16) -> f32 {
    s as f32 / i16::MAX as f32
}

/// U16: 0 = -1.0, 32768 = 0.0, 65535 ≈ +1.0
fn u16_to_f32(s: u16) -> f32 {
    (s as f32 - 32768.0) / 32768.0
}

/// Average interleaved frames down to one channel.
fn mix_mono<T: Copy>(data: &[T], channels: usize, to_f32: impl Fn(T) -> f32) -> Vec<f32> {
    if channels <= 1 {
        return data.iter().map(|&s| to_f32(s)).collect();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().map(|&s| to_f32(s)).sum::<f32>() / channels as f32)
        .collect()
}
