use crate::config::{ConfigError, TunerConfig};
use crate::dsp::compute_rms;
use crate::filter::BandPassFilter;
use crate::noise_gate::{GateState, NoiseGate};
use log::trace;

/// Per-frame verdict of the conditioner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditionedFrame {
    /// RMS of the band-passed frame (0.0 if non-finite)
    pub rms: f32,
    /// True when the gate is open and the frame should be analyzed
    pub passthrough: bool,
    pub calibrating: bool,
}

/// Noise gate plus band-pass filter, the first stage of the pipeline.
///
/// The filter runs as a stream. Analysis frames overlap (hop < frame), so
/// when a frame continues the previous one only its newest `hop` samples go
/// through the biquads and the rest of the filtered frame is shifted from
/// history, so every input sample passes through the filter exactly once.
/// A frame that does not continue the previous one is filtered whole, as
/// new audio.
pub struct SignalConditioner {
    filter: BandPassFilter,
    gate: NoiseGate,
    hop_size: usize,
    /// Raw samples of the previous frame
    raw: Vec<f32>,
    /// Band-passed version of the current frame
    filtered: Vec<f32>,
    primed: bool,
}

impl SignalConditioner {
    pub fn new(cfg: &TunerConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let filter = BandPassFilter::new(cfg.sample_rate, cfg.high_pass_hz, cfg.low_pass_hz)?;
        let gate = NoiseGate::new(
            cfg.calibration_frames(),
            cfg.gate_sigma,
            cfg.gate_floor,
            cfg.gate_ceiling,
            cfg.gate_hysteresis_frames,
            cfg.gate_bypass,
        );
        Ok(Self {
            filter,
            gate,
            hop_size: cfg.hop_size,
            raw: Vec::with_capacity(cfg.frame_length),
            filtered: Vec::with_capacity(cfg.frame_length),
            primed: false,
        })
    }

    /// Filter `frame`, measure it, and decide whether it goes on to the
    /// estimators. The filtered samples are available from [`filtered`]
    /// until the next call.
    ///
    /// [`filtered`]: SignalConditioner::filtered
    pub fn condition(&mut self, frame: &[f32]) -> ConditionedFrame {
        let n = frame.len();
        let hop = self.hop_size;

        if self.continues_previous(frame) {
            self.filtered.copy_within(hop.., 0);
            let (_, fresh) = self.filtered.split_at_mut(n - hop);
            self.filter.process(&frame[n - hop..], fresh);
        } else {
            self.filtered.clear();
            self.filtered.resize(n, 0.0);
            self.filter.process(frame, &mut self.filtered);
            if self.primed {
                trace!("conditioner: discontinuous frame of {} samples, filtered whole", n);
            }
        }
        self.raw.clear();
        self.raw.extend_from_slice(frame);
        self.primed = true;

        let rms = compute_rms(&self.filtered);
        let rms = if rms.is_finite() { rms } else { 0.0 };
        let passthrough = self.gate.process(rms);
        ConditionedFrame {
            rms,
            passthrough,
            calibrating: self.gate.is_calibrating(),
        }
    }

    fn continues_previous(&self, frame: &[f32]) -> bool {
        let hop = self.hop_size;
        self.primed
            && frame.len() == self.raw.len()
            && frame.len() > hop
            && frame[..frame.len() - hop] == self.raw[hop..]
    }

    /// Band-passed samples of the most recent frame.
    pub fn filtered(&self) -> &[f32] {
        &self.filtered
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    pub fn gate(&self) -> &NoiseGate {
        &self.gate
    }

    /// Recompute the filter for a new rate and restart calibration, since
    /// the warm-up length in frames depends on the rate.
    pub fn set_sample_rate(&mut self, cfg: &TunerConfig) -> Result<(), ConfigError> {
        self.filter.set_sample_rate(cfg.sample_rate)?;
        self.gate.set_calibration_frames(cfg.calibration_frames());
        self.clear_history();
        Ok(())
    }

    /// Forget the noise profile and filter history.
    pub fn reset(&mut self) {
        self.filter.reset();
        self.gate.reset();
        self.clear_history();
    }

    fn clear_history(&mut self) {
        self.raw.clear();
        self.filtered.clear();
        self.primed = false;
    }
}
