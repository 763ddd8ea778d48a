#[cfg(feature = "audio")]
use pitch_capture::audio_input::MicSource;
use pitch_capture::calibrator::{CalibrationOutcome, Calibrator, TICKS_PER_NOTE};
use pitch_capture::capture::{AudioSource, Capture, CaptureConfig};
use pitch_capture::console_display::NoteDisplay;
use pitch_capture::clock::Ticker;
use pitch_capture::engine::PitchEngine;
use pitch_capture::error::CaptureError;
use pitch_capture::live::LiveSession;
use pitch_capture::reference::ReferenceTable;
use pitch_capture::simulator::{self, ToneSimulator};
use pitch_capture::types::{CancelToken, SessionClock};
use pitch_capture::wav_source::{WavRecorder, WavSource};

use clap::Parser;
use crossbeam_channel::bounded;
use log::{error, info, warn};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "pitch-capture")]
#[command(about = "Real-time pitch detection and per-user note calibration")]
struct Cli {
    /// Use the built-in tone simulator (default when no other source is given)
    #[arg(long)]
    simulate: bool,

    /// Stream a WAV file instead of live input
    #[arg(long)]
    audio_file: Option<PathBuf>,

    /// Capture from the default microphone (requires the 'audio' feature)
    #[arg(long)]
    mic: bool,

    /// Deliver file/simulator audio as fast as possible instead of in real time
    #[arg(long)]
    no_realtime: bool,

    /// Requested sample rate (Hz); the source's actual rate wins
    #[arg(long, default_value_t = 44_100)]
    rate: u32,

    /// Samples per device read
    #[arg(long, default_value_t = 1024)]
    chunk: usize,

    /// Capture window per stream() call (seconds)
    #[arg(long, default_value_t = 0.1)]
    window: f64,

    /// Live run length in seconds (0 = until the source ends or Ctrl+C)
    #[arg(long, default_value_t = 0.0)]
    seconds: f64,

    /// Calibrate all 12 notes before the live run
    #[arg(long)]
    calibrate: bool,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Also write every captured window to this WAV file
    #[arg(long)]
    record: Option<PathBuf>,

    /// Foreground loop rate (Hz)
    #[arg(long, default_value_t = 60)]
    fps: u32,
}

type Engine = PitchEngine<Box<dyn AudioSource>>;

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    let cli = Cli::parse();
    let config = CaptureConfig {
        sample_rate: cli.rate,
        chunk_size: cli.chunk.max(1),
    };

    info!("═══════════════════════════════════════════════");
    info!("  PITCH CAPTURE v{}", env!("CARGO_PKG_VERSION"));
    info!("  Source: {}", source_label(&cli));
    info!("  Window: {:.3}s  Rate: {} Hz  Chunk: {}", cli.window, config.sample_rate, config.chunk_size);
    if cli.calibrate { info!("  Calibration: on"); }
    if let Some(path) = &cli.record { info!("  Recording: {:?}", path); }
    info!("═══════════════════════════════════════════════");

    let source = match open_source(&cli, &config) {
        Ok(s) => s,
        Err(e) => {
            error!("Cannot open audio source: {}", e);
            process::exit(1);
        }
    };

    let mut capture = Capture::new(source, config);
    if let Some(path) = &cli.record {
        capture = capture.with_recorder(WavRecorder::new(path));
    }
    let mut engine: Engine = PitchEngine::from_capture(capture);
    let mut table = ReferenceTable::default();

    // ─── Calibration ────────────────────────────────────────────────
    if cli.calibrate {
        run_calibration(&cli, &mut engine, &mut table);
    }

    // ─── Live mode ──────────────────────────────────────────────────
    let engine = run_live(&cli, engine, &table);

    if let Some(engine) = engine {
        if let Err(e) = engine.into_capture().into_source() {
            error!("Failed to finalize recording: {}", e);
        }
    }
}

fn source_label(cli: &Cli) -> String {
    if let Some(path) = &cli.audio_file {
        format!("WAV {:?}", path)
    } else if cli.mic {
        "MICROPHONE".into()
    } else {
        "SIMULATOR".into()
    }
}

fn open_source(cli: &Cli, config: &CaptureConfig) -> Result<Box<dyn AudioSource>, CaptureError> {
    if let Some(path) = &cli.audio_file {
        return Ok(Box::new(WavSource::open(path, !cli.no_realtime)?));
    }
    if cli.mic {
        #[cfg(feature = "audio")]
        {
            return Ok(Box::new(MicSource::open(config)?));
        }
        #[cfg(not(feature = "audio"))]
        {
            error!("Microphone input requires the 'audio' feature. Falling back to simulator.");
        }
    }
    if !cli.simulate {
        info!("No input given; using the simulator");
    }

    let script = if cli.calibrate {
        // One note per calibration window, then the sweep repeats.
        let per_tick = (config.sample_rate as f64 / config.chunk_size as f64 * cli.window).round() as usize
            * config.chunk_size;
        simulator::calibration_script(config.sample_rate, per_tick * TICKS_PER_NOTE as usize)
    } else {
        simulator::demo_script(config.sample_rate, 600)
    };
    let sim = ToneSimulator::new(script, config.sample_rate)
        .looping(true)
        .realtime(!cli.no_realtime);
    Ok(Box::new(sim))
}

fn run_calibration(cli: &Cli, engine: &mut Engine, table: &mut ReferenceTable) {
    let cancel = CancelToken::new();

    // Not joined: it stays blocked on stdin until the process exits.
    let stdin_cancel = cancel.clone();
    let spawned = thread::Builder::new().name("stdin".into()).spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(l) if l.trim().eq_ignore_ascii_case("q") => {
                    stdin_cancel.cancel();
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });
    if let Err(e) = spawned {
        warn!("No stdin reader ({}); calibration cannot be cancelled", e);
    }

    let (tx, rx) = bounded(256);
    let json = cli.json;
    let display = thread::Builder::new().name("display".into()).spawn(move || {
        if let Err(e) = NoteDisplay::stdout(json).run_calibration(rx) {
            error!("Display: {}", e);
        }
    });

    let mut calibrator = Calibrator::new(cancel)
        .with_progress(tx)
        .with_window(cli.window);
    let outcome = calibrator.run(engine, table);
    // Closes the progress channel so the display thread finishes.
    drop(calibrator);
    match display {
        Ok(handle) => {
            let _ = handle.join();
        }
        Err(e) => warn!("No calibration display ({})", e),
    }

    match outcome {
        Ok(CalibrationOutcome::Completed) => info!("Calibration finished"),
        Ok(CalibrationOutcome::Cancelled) => info!("Calibration cancelled; using default notes"),
        Err(e) => error!("Calibration aborted: {}", e),
    }
    if let Err(e) = NoteDisplay::stdout(cli.json).show_table(table) {
        error!("Display: {}", e);
    }
}

/// Runs until `--seconds` elapse or the capture worker stops. Returns the
/// engine when the worker was joined cleanly.
fn run_live(cli: &Cli, engine: Engine, table: &ReferenceTable) -> Option<Engine> {
    let mut session = match LiveSession::start(engine, cli.window) {
        Ok(s) => s,
        Err(e) => {
            error!("Cannot start live mode: {}", e);
            process::exit(1);
        }
    };

    let clock = SessionClock::new();
    let mut display = NoteDisplay::stdout(cli.json).with_clock(clock);
    let mut ticker = Ticker::new(cli.fps);
    let deadline = (cli.seconds > 0.0).then(|| Instant::now() + Duration::from_secs_f64(cli.seconds));

    info!("Listening. Press Ctrl+C to stop.");
    loop {
        ticker.tick();
        let running = session.is_running();

        match session.poll(table) {
            Ok(Some(detection)) => {
                if let Err(e) = display.show_detection(&detection) {
                    error!("Display: {}", e);
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Detection failed: {}", e),
        }

        if !running {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
    }

    match session.stop() {
        Ok(stopped) => {
            match stopped.worker_error {
                None => info!("Live mode stopped"),
                Some(CaptureError::Exhausted) => info!("Audio source finished"),
                Some(e) => error!("Capture failed: {}", e),
            }
            Some(stopped.engine)
        }
        Err(e) => {
            error!("Live mode shutdown: {}", e);
            None
        }
    }
}
