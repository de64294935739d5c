//! One tuning session: every stage from raw frame to needle angle, with all
//! cross-frame state owned in one place so it can be reset as a unit.

use crate::conditioner::SignalConditioner;
use crate::config::{ConfigError, TunerConfig};
use crate::dsp::cents_between;
use crate::estimator::{self, FundamentalEstimator};
use crate::framer::FrameAssembler;
use crate::hybrid::CrossValidator;
use crate::needle::NeedleMapper;
use crate::stabilizer::Stabilizer;
use crate::string_selector::StringSelector;
use crate::tuning::map_to_note;
use crate::types::{AudioChunk, NeedleState, PitchCandidate, TunerFrame, TunerMode, TunerReading};
use log::{info, trace};

pub struct TunerPipeline {
    cfg: TunerConfig,
    conditioner: SignalConditioner,
    primary: Box<dyn FundamentalEstimator>,
    validators: Vec<Box<dyn FundamentalEstimator>>,
    /// Per-frame validator results, reused
    alternatives: Vec<PitchCandidate>,
    cross: CrossValidator,
    stabilizer: Stabilizer,
    selector: StringSelector,
    needle: NeedleMapper,
    framer: FrameAssembler,
    mode: TunerMode,
    frame: Vec<f32>,
    frames_processed: u64,
}

impl TunerPipeline {
    /// Build a session in auto mode with no strings (chromatic).
    pub fn new(cfg: TunerConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let primary = estimator::build(cfg.estimator, &cfg)?;
        let mut kinds = Vec::with_capacity(cfg.cross_validators.len());
        for &kind in &cfg.cross_validators {
            if kind != cfg.estimator && !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        let validators = kinds
            .iter()
            .map(|&k| estimator::build(k, &cfg))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            conditioner: SignalConditioner::new(&cfg)?,
            alternatives: Vec::with_capacity(validators.len()),
            primary,
            validators,
            cross: CrossValidator::new(cfg.agreement_tolerance),
            stabilizer: Stabilizer::new(&cfg),
            selector: StringSelector::new(&cfg, &[]),
            needle: NeedleMapper::new(&cfg),
            framer: FrameAssembler::new(cfg.frame_length, cfg.hop_size, cfg.sample_rate),
            mode: TunerMode::Auto,
            frame: Vec::with_capacity(cfg.frame_length),
            frames_processed: 0,
            cfg,
        })
    }

    /// Run one analysis frame through every stage.
    pub fn process_frame(&mut self, frame: &[f32]) -> TunerReading {
        self.frames_processed += 1;
        let sr = self.cfg.sample_rate;
        let conditioned = self.conditioner.condition(frame);
        let manual_hz = match &self.mode {
            TunerMode::Manual(t) => Some(t.reference_hz),
            TunerMode::Auto => None,
        };

        let reconciled = if conditioned.passthrough && !conditioned.calibrating {
            let filtered = self.conditioner.filtered();
            let primary = self.primary.estimate(filtered, sr);
            self.alternatives.clear();
            for v in self.validators.iter_mut() {
                self.alternatives.push(v.estimate(filtered, sr));
            }
            self.cross.reconcile(&primary, &self.alternatives, manual_hz)
        } else {
            None
        };

        let display_hz = self.stabilizer.push(reconciled.map(|r| r.frequency_hz));
        // A fading display is shown as a level only: no note, no cents.
        let voiced = display_hz > 0.0 && !self.stabilizer.is_decaying();
        let note = if voiced {
            map_to_note(display_hz, self.cfg.a4_hz)
        } else {
            None
        };

        let (target_hz, string_index, string_locked, cents) = match &self.mode {
            TunerMode::Manual(t) => {
                let cents = voiced.then(|| cents_between(display_hz, t.reference_hz));
                let locked = cents.map_or(false, |c| c.abs() <= self.cfg.lock_acquire_cents);
                (Some(t.reference_hz), t.string_index, locked, cents)
            }
            TunerMode::Auto if !self.selector.strings().is_empty() => {
                let sel = self.selector.select(voiced.then_some(display_hz));
                let target = sel.index.map(|i| self.selector.strings()[i]);
                (target, sel.index, sel.locked, sel.cents)
            }
            TunerMode::Auto => match note {
                Some(n) => (Some(n.reference_hz), None, false, Some(n.cents)),
                None => (None, None, false, None),
            },
        };

        let needle_degrees = self.needle.update(cents, self.cfg.frame_interval_secs());
        let confidence = match reconciled {
            Some(r) if voiced => (r.confidence * self.stabilizer.consistency()).clamp(0.0, 1.0),
            _ => 0.0,
        };

        trace!(
            "frame {}: rms={:.4} raw={:?} display={:.2} cents={:?} needle={:.1}",
            self.frames_processed,
            conditioned.rms,
            reconciled.map(|r| r.frequency_hz),
            display_hz,
            cents,
            needle_degrees
        );

        TunerReading {
            fundamental_hz: reconciled.map(|r| r.frequency_hz),
            display_hz,
            note: note.map(|n| n.name.to_string()),
            octave: note.map(|n| n.octave),
            cents,
            target_hz,
            needle_degrees,
            string_index,
            string_locked,
            confidence,
            gate_open: conditioned.passthrough,
            calibrating: conditioned.calibrating,
        }
    }

    /// Queue a capture chunk. A chunk at a new sample rate reconfigures the
    /// session first; an unusable rate is rejected and the chunk dropped.
    pub fn push_audio(&mut self, chunk: &AudioChunk) -> Result<(), ConfigError> {
        let rate = chunk.sample_rate as f32;
        if rate != self.cfg.sample_rate {
            self.set_sample_rate(rate)?;
        }
        self.framer.push(chunk);
        Ok(())
    }

    /// Process the next queued frame, if a full one is available.
    pub fn next_reading(&mut self) -> Option<TunerFrame> {
        let frame = self.framer.next_frame()?;
        let mut buf = std::mem::take(&mut self.frame);
        buf.clear();
        buf.extend_from_slice(frame);
        let timestamp_us = self.framer.last_frame_us();
        let reading = self.process_frame(&buf);
        self.frame = buf;
        Some(TunerFrame {
            timestamp_us,
            reading,
        })
    }

    /// Push a chunk and process every frame it completes.
    pub fn process_chunk(&mut self, chunk: &AudioChunk) -> Result<Vec<TunerFrame>, ConfigError> {
        self.push_audio(chunk)?;
        let mut out = Vec::new();
        while let Some(frame) = self.next_reading() {
            out.push(frame);
        }
        Ok(out)
    }

    pub fn set_mode(&mut self, mode: TunerMode) -> Result<(), ConfigError> {
        if let TunerMode::Manual(t) = &mode {
            if !(t.reference_hz.is_finite() && t.reference_hz > 0.0) {
                return Err(ConfigError::Target(t.reference_hz));
            }
            info!("Manual target {} ({:.2} Hz)", t.note_name, t.reference_hz);
        } else {
            info!("Auto string selection");
        }
        self.mode = mode;
        Ok(())
    }

    /// Replace the string set; any string lock is dropped.
    pub fn set_strings(&mut self, strings: &[f32]) {
        self.selector.set_strings(strings);
        info!(
            "String set: {}",
            self.selector
                .strings()
                .iter()
                .map(|f| format!("{:.2}", f))
                .collect::<Vec<_>>()
                .join(" ")
        );
    }

    /// Reconfigure for a new sample rate. Filters are redesigned and the
    /// noise profile recalibrates.
    pub fn set_sample_rate(&mut self, sample_rate: f32) -> Result<(), ConfigError> {
        let cfg = self.cfg.with_sample_rate(sample_rate)?;
        self.conditioner.set_sample_rate(&cfg)?;
        self.selector.set_debounce_frames(cfg.debounce_frames());
        self.framer.set_sample_rate(cfg.sample_rate);
        info!(
            "Sample rate {} Hz -> {} Hz, recalibrating",
            self.cfg.sample_rate, cfg.sample_rate
        );
        self.cfg = cfg;
        Ok(())
    }

    /// Discard all per-session state: noise profile, filter history,
    /// stabilizer, string lock, needle and queued audio. Mode and strings stay.
    pub fn reset(&mut self) {
        self.conditioner.reset();
        self.stabilizer.reset();
        self.selector.reset();
        self.needle.reset();
        self.framer.reset();
        self.alternatives.clear();
        self.frames_processed = 0;
    }

    pub fn config(&self) -> &TunerConfig {
        &self.cfg
    }

    pub fn mode(&self) -> &TunerMode {
        &self.mode
    }

    pub fn needle_state(&self) -> NeedleState {
        NeedleState {
            current_angle_degrees: self.needle.angle(),
            locked_string_index: self.selector.active(),
        }
    }

    pub fn display_hz(&self) -> f32 {
        self.stabilizer.display_hz()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn dropped_samples(&self) -> u64 {
        self.framer.dropped_samples()
    }
}
