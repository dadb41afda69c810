use anyhow::{Context, Result};
use clap::Parser;
use ringbuf::traits::Split;
use ringbuf::HeapRb;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use pulse_capture::config::{Config, PlausibilityProfile};
use pulse_capture::session::{PulseReading, SessionRecord};
use pulse_capture::signal::{load_thresholds, EstimatorMethod, Sex, TwoSidedAlpha};
use pulse_capture::video::{
    calculate_ring_buffer_capacity, run_processor, FrameCapture, ProcessorConfig,
    ProcessorMessage,
};
use pulse_capture::vision::{ColorChannel, Frame, Rect, RegionMode, RegionStatus, SkinBoxDetector};

/// Headless CLI for camera-based pulse rate estimation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory of still frames (png/jpg) to replay in name order
    #[arg(short, long)]
    frames: PathBuf,

    /// Replay frame rate
    #[arg(long)]
    fps: Option<f64>,

    /// Loop the frame directory until Ctrl+C
    #[arg(long = "loop")]
    repeat: bool,

    /// Region mode: fixed, tracked, calibration or map
    #[arg(short, long)]
    mode: Option<RegionMode>,

    /// Region rectangle as x,y,width,height
    #[arg(short, long)]
    rect: Option<Rect>,

    /// Colour channel: red, green or blue
    #[arg(short, long)]
    channel: Option<ColorChannel>,

    /// Estimator: spectral, crossing or both
    #[arg(long)]
    method: Option<EstimatorMethod>,

    /// Estimate interval (ms)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Count every pixel of a fixed region, not just skin
    #[arg(long)]
    no_skin_filter: bool,

    /// Population threshold table (XML)
    #[arg(long, requires_all = ["sex", "age"])]
    thresholds: Option<PathBuf>,

    /// Sex for the threshold lookup: male or female
    #[arg(long)]
    sex: Option<Sex>,

    /// Age for the threshold lookup
    #[arg(long)]
    age: Option<u32>,

    /// Two-sided alpha for the threshold lookup: 2, 5, 10, 20 or 50
    #[arg(long, default_value = "5")]
    alpha: TwoSidedAlpha,

    /// Save the last annotated frame to this path
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Config file (defaults to ~/.pulsecapture/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Overlay command line values on the loaded config
    fn apply(&self, config: &mut Config) {
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(mode) = self.mode {
            config.region_mode = mode;
        }
        if let Some(rect) = self.rect {
            config.rect = Some(rect);
        }
        if let Some(channel) = self.channel {
            config.channel = channel;
        }
        if let Some(method) = self.method {
            config.method = method;
        }
        if let Some(interval) = self.interval_ms {
            config.estimate_interval_ms = interval;
        }
        if self.no_skin_filter {
            config.skin_filter = false;
        }
        if let (Some(path), Some(sex), Some(age)) = (&self.thresholds, self.sex, self.age) {
            config.profile = Some(PlausibilityProfile {
                thresholds_path: path.clone(),
                sex,
                age,
                alpha: self.alpha,
            });
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    // Load config, then apply command line overrides
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!("Pulse capture starting...");
    info!("Frames: {:?} at {:.1} fps", args.frames, config.fps);
    info!("Region: {} mode, channel {}", config.region_mode, config.channel);

    if config.rect.is_none() && config.region_mode != RegionMode::Tracked {
        warn!("No region rectangle set; use --rect x,y,width,height");
    }

    // Plausibility range from the population table, defaults on failure
    let mut estimator_config = config.estimator_config();
    if let Some(profile) = &config.profile {
        match load_thresholds(&profile.thresholds_path, profile.sex, profile.age, profile.alpha) {
            Ok(range) => {
                info!(
                    "Plausible range for {} age {} ({}): {:.1}-{:.1} bpm",
                    profile.sex, profile.age, profile.alpha, range.low, range.high
                );
                estimator_config.range = range;
            }
            Err(e) => {
                error!("Threshold lookup failed: {}", e);
                warn!(
                    "Using default plausible range {:.1}-{:.1} bpm",
                    estimator_config.range.low, estimator_config.range.high
                );
            }
        }
    }

    // Create ring buffer
    let capacity = calculate_ring_buffer_capacity(config.fps);
    let ring_buffer = HeapRb::<Frame>::new(capacity);
    let (producer, consumer) = ring_buffer.split();
    debug!("Ring buffer capacity: {} frames", capacity);

    // Create frame capture
    let mut capture = FrameCapture::new(&args.frames, config.fps, args.repeat, producer)?;

    // Create processor config
    let processor_config = ProcessorConfig {
        estimator: estimator_config,
        locator: config.locator_config(),
        method: config.method,
        estimate_interval_ms: config.estimate_interval_ms,
        status_interval_ms: 1000,
        frame_period_ms: Some(1000.0 / config.fps),
        emit_frames: args.snapshot.is_some(),
    };

    // Create channels
    let (tx, mut rx) = mpsc::channel::<ProcessorMessage>(64);
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();

    // Spawn processor thread
    let processor_handle = std::thread::spawn(move || {
        run_processor(
            consumer,
            processor_config,
            Box::new(SkinBoxDetector::default()),
            tx,
            stop_flag_clone,
        );
    });

    // Set up Ctrl+C handler
    let stop_flag_ctrlc = stop_flag.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, stopping...");
        stop_flag_ctrlc.store(true, Ordering::SeqCst);
    });

    // Start capture; the processor stops once the replay is done and drained
    capture.start(stop_flag.clone())?;
    println!(
        "\nReplaying {} frames... Press Ctrl+C to stop.\n",
        capture.frame_count()
    );

    // Create session record
    let mut session = SessionRecord::new(
        args.frames.display().to_string(),
        config.region_mode,
        config.channel,
    );

    // Process messages
    let mut last_frame: Option<Frame> = None;
    let mut last_status = RegionStatus::Measured;

    while let Some(msg) = rx.recv().await {
        match msg {
            ProcessorMessage::FrameProcessed {
                frame,
                period_ms,
                pixels,
                region,
                status,
            } => {
                session.add_frame(period_ms, pixels > 0);
                if status != last_status {
                    match status {
                        RegionStatus::Measured => info!("Region acquired: {:?}", region),
                        RegionStatus::SelectRegion => warn!("Select a region on the image"),
                        RegionStatus::NoFace => warn!("No face: come closer or change light"),
                    }
                    last_status = status;
                }
                if frame.is_some() {
                    last_frame = frame;
                }
            }

            ProcessorMessage::Sample { .. } => {}

            ProcessorMessage::Spectrum(spectrum) => {
                debug!("Spectrum updated: {} bins", spectrum.len());
            }

            ProcessorMessage::Frequency { bpm, snr, plausible } => {
                let at_ms = session.total_duration_ms;
                println!(
                    "[{:02}:{:02}.{:03}] {:6.1} bpm  SNR {:5.2} dB{}",
                    at_ms / 60000,
                    (at_ms % 60000) / 1000,
                    at_ms % 1000,
                    bpm,
                    snr,
                    if plausible { "" } else { "  (outside plausible range)" }
                );
                session.add_reading(PulseReading::spectral(at_ms, bpm, snr, plausible));
            }

            ProcessorMessage::TooNoisy { snr } => {
                session.add_noisy();
                match snr {
                    Some(snr) => debug!("Too noisy: SNR {:.2} dB", snr),
                    None => debug!("Too noisy: degenerate spectrum"),
                }
            }

            ProcessorMessage::Crossings(estimate) => {
                let at_ms = session.total_duration_ms;
                match PulseReading::crossing(at_ms, &estimate) {
                    Some(reading) => {
                        println!("[zero-crossing] {:6.1} bpm", reading.bpm);
                        session.add_reading(reading);
                    }
                    None => debug!("Zero-crossing scan exhausted after {} slots", estimate.scanned()),
                }
            }

            ProcessorMessage::Calibrated(result) => {
                println!(
                    "Calibrated: green {:.2} ± {:.2} ({} frames)",
                    result.mean, result.stdev, result.samples
                );
            }

            ProcessorMessage::MapCells(cells) => {
                let means: Vec<String> = cells
                    .iter()
                    .filter_map(|c| c.means())
                    .map(|m| format!("{:.1}", m.green))
                    .collect();
                debug!("Map cells (green): {}", means.join(" "));
            }

            ProcessorMessage::Status { frames, pending } => {
                debug!("Status: {} frames processed, {} pending", frames, pending);
                if pending > capacity / 2 {
                    warn!("Processing is behind: {} frames queued", pending);
                }
            }

            ProcessorMessage::Error(e) => {
                error!("Processor error: {}", e);
            }

            ProcessorMessage::Stopped => {
                info!("Processor stopped");
                break;
            }
        }
    }

    // Stop capture
    capture.stop()?;

    // Wait for processor thread
    let _ = processor_handle.join();

    // Finalize session
    session.finalize();

    // Print summary
    println!("\n--- Session Summary ---");
    println!("{}", session.summary());

    if capture.overflow_count() > 0 {
        warn!("Frames dropped (ring full): {}", capture.overflow_count());
    }

    if let Some(path) = &args.snapshot {
        match &last_frame {
            Some(Frame::Rgb(img)) => img.save(path).with_context(|| format!("Failed to save snapshot {:?}", path))?,
            Some(Frame::Luma(img)) => img.save(path).with_context(|| format!("Failed to save snapshot {:?}", path))?,
            None => warn!("No frame to snapshot"),
        }
        if last_frame.is_some() {
            info!("Snapshot saved to {:?}", path);
        }
    }

    info!("Session complete");
    Ok(())
}
