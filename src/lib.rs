pub mod bitstream;
pub mod conditioner;
pub mod config;
pub mod console_display;
pub mod coordinator;
pub mod dsp;
pub mod estimator;
pub mod fft_peak;
pub mod filter;
pub mod framer;
pub mod hybrid;
pub mod mcleod;
pub mod needle;
pub mod noise_gate;
pub mod pipeline;
pub mod simulator;
pub mod stabilizer;
pub mod string_selector;
pub mod tuning;
pub mod types;
pub mod yin;
pub mod zero_crossing;

#[cfg(feature = "audio")]
pub mod audio_input;
