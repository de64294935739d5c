#[cfg(feature = "audio")]
use string_tuner::audio_input;
use string_tuner::config::{EstimatorKind, TunerConfig};
use string_tuner::console_display::{ConsoleDisplay, DisplayStyle};
use string_tuner::coordinator::Coordinator;
use string_tuner::simulator::{demo_sequence, Simulator};
use string_tuner::tuning::{midi_to_hz, parse_note, Tuning, TUNINGS};
use string_tuner::types::*;

use clap::Parser;
use crossbeam_channel::bounded;
use log::{error, info};
use std::path::PathBuf;
use std::thread;

#[derive(Parser)]
#[command(name = "string-tuner")]
#[command(about = "Real-time tuner for stringed instruments")]
struct Cli {
    /// Built-in tuning (standard, drop-d, dadgad, open-g, ukulele, violin)
    #[arg(long, default_value = "standard")]
    tuning: String,

    /// Tune one string of the tuning (1 = lowest) instead of auto-selecting
    #[arg(long)]
    string: Option<usize>,

    /// Fixed target note in scientific pitch notation, e.g. E2 or C#4
    #[arg(long, conflicts_with = "string")]
    note: Option<String>,

    /// Fixed target frequency in Hz
    #[arg(long, conflicts_with_all = ["string", "note"])]
    target_hz: Option<f32>,

    /// Chromatic mode: measure against the nearest note, ignore strings
    #[arg(long)]
    chromatic: bool,

    /// Reference pitch for A4 (Hz)
    #[arg(long)]
    a4: Option<f32>,

    /// Primary pitch estimator (yin, mcleod, bitstream, fft-peak)
    #[arg(long)]
    estimator: Option<EstimatorKind>,

    /// JSON file overriding any tuner setting
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    dump_config: bool,

    /// Listen to the default microphone instead of the simulator
    #[cfg(feature = "audio")]
    #[arg(long)]
    live: bool,

    /// Emit one JSON object per frame instead of the meter
    #[arg(long)]
    json: bool,

    /// Meter refresh rate (Hz)
    #[arg(long, default_value_t = 20)]
    display_hz: u32,

    /// Run the simulator as fast as possible instead of in real time
    #[arg(long)]
    fast: bool,

    /// Simulator noise seed
    #[arg(long, default_value_t = 1)]
    seed: u64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run(Cli::parse()) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<TunerConfig, String> {
    let mut cfg = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
            TunerConfig::from_json(&text).map_err(|e| format!("{}: {}", path.display(), e))?
        }
        None => TunerConfig::default(),
    };
    if let Some(a4) = cli.a4 {
        cfg.a4_hz = a4;
    }
    if let Some(kind) = cli.estimator {
        cfg.estimator = kind;
    }
    cfg.validate().map_err(|e| e.to_string())?;
    Ok(cfg)
}

fn resolve_mode(cli: &Cli, tuning: &Tuning, a4: f32) -> Result<TunerMode, String> {
    if let Some(n) = cli.string {
        let target = n
            .checked_sub(1)
            .and_then(|i| tuning.target(i, a4))
            .ok_or_else(|| format!("{} has no string {}", tuning.name, n))?;
        return Ok(TunerMode::Manual(target));
    }
    if let Some(note) = &cli.note {
        let midi = parse_note(note).ok_or_else(|| format!("Cannot parse note '{}'", note))?;
        return Ok(TunerMode::Manual(TuningTarget::new(
            midi_to_hz(midi as f32, a4),
            note.clone(),
        )));
    }
    if let Some(hz) = cli.target_hz {
        return Ok(TunerMode::Manual(TuningTarget::new(hz, format!("{:.2} Hz", hz))));
    }
    Ok(TunerMode::Auto)
}

fn run(cli: Cli) -> Result<(), String> {
    let cfg = load_config(&cli)?;
    if cli.dump_config {
        println!("{}", cfg.to_json());
        return Ok(());
    }

    let tuning = Tuning::find(&cli.tuning).ok_or_else(|| {
        let names: Vec<&str> = TUNINGS.iter().map(|t| t.name).collect();
        format!("Unknown tuning '{}' (known: {})", cli.tuning, names.join(", "))
    })?;
    let strings = tuning.frequencies(cfg.a4_hz);
    let mode = resolve_mode(&cli, tuning, cfg.a4_hz)?;

    info!("═══════════════════════════════════════════════");
    info!("  STRING TUNER v{}", env!("CARGO_PKG_VERSION"));
    info!("  Tuning: {} ({}) {}", tuning.name, tuning.instrument, tuning.notes.join(" "));
    match &mode {
        TunerMode::Auto if cli.chromatic => info!("  Mode: chromatic"),
        TunerMode::Auto => info!("  Mode: auto string"),
        TunerMode::Manual(t) => info!("  Mode: manual {} ({:.2} Hz)", t.note_name, t.reference_hz),
    }
    info!("  Estimator: {}  A4 = {} Hz", cfg.estimator.label(), cfg.a4_hz);
    info!("═══════════════════════════════════════════════");

    // Channel: inputs → coordinator
    let (input_tx, input_rx) = bounded::<TunerEvent>(4096);
    // Channel: coordinator → display
    let (frame_tx, frame_rx) = bounded::<TunerFrame>(256);

    let mut coordinator = Coordinator::new(input_rx, vec![frame_tx], cfg.clone())
        .map_err(|e| e.to_string())?;
    let session_strings = if cli.chromatic { Vec::new() } else { strings.clone() };
    let _ = input_tx.send(TunerEvent::SetStrings(session_strings));
    let _ = input_tx.send(TunerEvent::SetMode(mode));

    let mut handles = Vec::new();

    // ─── Console display ────────────────────────────────────────────
    let style = if cli.json {
        DisplayStyle::Json
    } else {
        DisplayStyle::Meter
    };
    let fps = 1.0 / cfg.frame_interval_secs();
    let (hz, max_deg) = (cli.display_hz, cfg.needle_max_degrees);
    handles.push(
        thread::Builder::new()
            .name("display".into())
            .spawn(move || ConsoleDisplay::new(frame_rx, style, hz, fps, max_deg).run())
            .map_err(|e| e.to_string())?,
    );

    // ─── Coordinator ────────────────────────────────────────────────
    handles.push(
        thread::Builder::new()
            .name("coordinator".into())
            .spawn(move || coordinator.run())
            .map_err(|e| e.to_string())?,
    );

    // ─── Input source ───────────────────────────────────────────────
    #[cfg(feature = "audio")]
    let _capture = if cli.live {
        info!("Starting microphone capture...");
        let capture = audio_input::AudioCapture::start(
            input_tx.clone(),
            SessionClock::new(),
            cfg.sample_rate as u32,
            cfg.hop_size,
        )?;
        Some(capture)
    } else {
        None
    };
    #[cfg(not(feature = "audio"))]
    let live = false;
    #[cfg(feature = "audio")]
    let live = cli.live;

    if !live {
        info!("Starting simulator...");
        let sim_tx = input_tx.clone();
        let rate = cfg.sample_rate as u32;
        let chunk = cfg.hop_size;
        let realtime = !cli.fast;
        let seed = cli.seed;
        handles.push(
            thread::Builder::new()
                .name("simulator".into())
                .spawn(move || {
                    Simulator::new(sim_tx, rate, chunk, seed)
                        .with_realtime(realtime)
                        .run(&demo_sequence(&strings));
                })
                .map_err(|e| e.to_string())?,
        );
    }
    // The simulator holds its own sender; closing ours lets the session end
    // when it finishes.
    drop(input_tx);

    info!("Press Ctrl+C to stop.");
    for h in handles {
        let _ = h.join();
    }
    Ok(())
}
