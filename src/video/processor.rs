use anyhow::Result;
use ringbuf::traits::{Consumer as ConsumerTrait, Observer};
use ringbuf::HeapCons;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::signal::{
    CrossingEstimate, EstimatorConfig, EstimatorMethod, PulseEstimator, SpectralUpdate,
};
use crate::vision::{
    CalibrationResult, Clock, ColorSums, FaceDetector, FixedClock, Frame, LocatorConfig,
    MonotonicClock, Rect, RegionLocator, RegionStatus,
};

/// Default period of the estimate trigger
pub const DEFAULT_ESTIMATE_INTERVAL_MS: u64 = 1000;

/// Message from processing thread
#[derive(Debug)]
pub enum ProcessorMessage {
    /// A frame went through the locator
    FrameProcessed {
        /// Annotated frame, only when frames are requested
        frame: Option<Frame>,
        period_ms: f64,
        pixels: u64,
        region: Option<Rect>,
        status: RegionStatus,
    },
    /// A colour sample entered the signal buffer
    Sample {
        cn_signal: f64,
        red: f64,
        green: f64,
        blue: f64,
        frequency: Option<f64>,
        snr: f64,
    },
    /// Amplitude spectrum of the last spectral update
    Spectrum(Vec<f64>),
    /// Accepted spectral estimate
    Frequency { bpm: f64, snr: f64, plausible: bool },
    /// Spectral estimate rejected by the SNR gate
    TooNoisy { snr: Option<f64> },
    /// Zero-crossing estimate
    Crossings(CrossingEstimate),
    /// Calibration window completed
    Calibrated(CalibrationResult),
    /// Map mode cell sums, row-major
    MapCells(Vec<ColorSums>),
    /// Processing status update
    Status { frames: u64, pending: usize },
    /// Processing thread stopped
    Stopped,
    /// Error occurred
    Error(String),
}

/// Video processing thread configuration
pub struct ProcessorConfig {
    pub estimator: EstimatorConfig,
    pub locator: LocatorConfig,
    pub method: EstimatorMethod,
    pub estimate_interval_ms: u64,
    pub status_interval_ms: u64,
    /// Nominal frame period for replayed video; wall clock when `None`
    pub frame_period_ms: Option<f64>,
    /// Attach the annotated frame to `FrameProcessed`
    pub emit_frames: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            locator: LocatorConfig::default(),
            method: EstimatorMethod::default(),
            estimate_interval_ms: DEFAULT_ESTIMATE_INTERVAL_MS,
            status_interval_ms: 500,
            frame_period_ms: None,
            emit_frames: false,
        }
    }
}

/// Run the video processing thread
///
/// This function should be spawned in a separate thread.
/// It reads frames from the ring buffer, aggregates the region colour,
/// feeds the pulse estimator and runs the periodic estimate.
pub fn run_processor(
    mut consumer: HeapCons<Frame>,
    config: ProcessorConfig,
    detector: Box<dyn FaceDetector>,
    tx: mpsc::Sender<ProcessorMessage>,
    stop_flag: Arc<AtomicBool>,
) {
    let result = run_processor_inner(&mut consumer, config, detector, &tx, stop_flag);

    if let Err(e) = result {
        let _ = tx.blocking_send(ProcessorMessage::Error(e.to_string()));
    }

    let _ = tx.blocking_send(ProcessorMessage::Stopped);
}

fn run_processor_inner(
    consumer: &mut HeapCons<Frame>,
    config: ProcessorConfig,
    detector: Box<dyn FaceDetector>,
    tx: &mpsc::Sender<ProcessorMessage>,
    stop_flag: Arc<AtomicBool>,
) -> Result<()> {
    info!(
        "Starting video processor: {} region, {} estimator every {} ms",
        config.locator.mode, config.method, config.estimate_interval_ms
    );

    let clock: Box<dyn Clock> = match config.frame_period_ms {
        Some(period) => Box::new(FixedClock::new(period)),
        None => Box::new(MonotonicClock::new()),
    };
    let mut locator = RegionLocator::new(config.locator.clone(), detector, clock);
    let mut estimator = PulseEstimator::new(&config.estimator);

    let mut frames = 0u64;

    // Status tracking
    let mut last_status_time = Instant::now();
    let status_interval = Duration::from_millis(config.status_interval_ms);
    let mut last_estimate_time = Instant::now();
    let estimate_interval = Duration::from_millis(config.estimate_interval_ms);

    info!("Video processor started, waiting for frames...");

    loop {
        match consumer.try_pop() {
            Some(frame) => {
                frames += 1;
                if !process_frame(frame, &mut locator, &mut estimator, config.emit_frames, tx) {
                    warn!("Failed to send frame results, receiver dropped");
                    return Ok(());
                }
            }
            None => {
                // Only stop once the ring is drained
                if stop_flag.load(Ordering::Relaxed) {
                    info!("Stop flag received, running final estimate...");
                    if !run_estimate(&mut estimator, config.method, tx) {
                        warn!("Failed to send final estimate, receiver dropped");
                    }
                    break;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        if last_estimate_time.elapsed() >= estimate_interval {
            if !run_estimate(&mut estimator, config.method, tx) {
                warn!("Failed to send estimate, receiver dropped");
                return Ok(());
            }
            last_estimate_time = Instant::now();
        }

        // Send status updates periodically
        if last_status_time.elapsed() >= status_interval {
            let _ = tx.blocking_send(ProcessorMessage::Status {
                frames,
                pending: consumer.occupied_len(),
            });
            last_status_time = Instant::now();
        }
    }

    info!("Video processor stopped after {} frames", frames);
    Ok(())
}

/// Locate, aggregate and ingest one frame; false once the receiver is gone
fn process_frame(
    mut frame: Frame,
    locator: &mut RegionLocator,
    estimator: &mut PulseEstimator,
    emit_frames: bool,
    tx: &mpsc::Sender<ProcessorMessage>,
) -> bool {
    let report = locator.process(&mut frame);

    if let Some(calibration) = report.calibration {
        if tx.blocking_send(ProcessorMessage::Calibrated(calibration)).is_err() {
            return false;
        }
    }

    if !report.cells.is_empty() && tx.blocking_send(ProcessorMessage::MapCells(report.cells)).is_err() {
        return false;
    }

    if let Some(sample) = estimator.ingest(&report.sums, report.elapsed_ms) {
        let message = ProcessorMessage::Sample {
            cn_signal: sample.cn,
            red: sample.means.red,
            green: sample.means.green,
            blue: sample.means.blue,
            frequency: sample.frequency,
            snr: sample.snr,
        };
        if tx.blocking_send(message).is_err() {
            return false;
        }
    }

    tx.blocking_send(ProcessorMessage::FrameProcessed {
        frame: emit_frames.then_some(frame),
        period_ms: report.elapsed_ms,
        pixels: report.sums.area,
        region: report.region,
        status: report.status,
    })
    .is_ok()
}

/// Run the configured estimators; false once the receiver is gone
fn run_estimate(
    estimator: &mut PulseEstimator,
    method: EstimatorMethod,
    tx: &mpsc::Sender<ProcessorMessage>,
) -> bool {
    if estimator.samples() == 0 {
        return true;
    }

    if method.runs_spectral() {
        let update = estimator.compute_frequency();
        if tx
            .blocking_send(ProcessorMessage::Spectrum(estimator.spectrum().to_vec()))
            .is_err()
        {
            return false;
        }
        let message = match update {
            SpectralUpdate::Pulse { bpm, snr, plausible } => {
                debug!("Spectral estimate: {:.1} bpm ({:.2} dB)", bpm, snr);
                ProcessorMessage::Frequency { bpm, snr, plausible }
            }
            SpectralUpdate::TooNoisy { snr } => ProcessorMessage::TooNoisy { snr },
        };
        if tx.blocking_send(message).is_err() {
            return false;
        }
    }

    if method.runs_crossing() {
        let estimate = estimator.count_frequency();
        if tx.blocking_send(ProcessorMessage::Crossings(estimate)).is_err() {
            return false;
        }
    }

    true
}
