//! Pulse estimator
//!
//! Single owner of the rolling buffer and everything derived from it. One
//! thread drives it: colour samples go in through `ingest`, the periodic
//! trigger calls `compute_frequency` or `count_frequency`. Changing the
//! buffer geometry or the colour channel rebuilds all signal state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::buffer::SignalBuffer;
use super::crossing::{CrossingDetector, CrossingEstimate, DEFAULT_CROSSING_TARGET, DEFAULT_FILTER_LENGTH};
use super::spectral::{SpectralConfig, SpectralEstimator, SpectralUpdate};
use super::thresholds::{self, PlausibleRange, Sex, ThresholdError, TwoSidedAlpha};
use crate::vision::{ChannelMeans, ColorChannel, ColorSums};

/// Default rolling buffer capacity
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// Default spectral window length
pub const DEFAULT_WINDOW_LENGTH: usize = 256;

/// Which estimator the periodic trigger runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorMethod {
    #[default]
    Spectral,
    Crossing,
    Both,
}

impl EstimatorMethod {
    pub fn runs_spectral(&self) -> bool {
        matches!(self, EstimatorMethod::Spectral | EstimatorMethod::Both)
    }

    pub fn runs_crossing(&self) -> bool {
        matches!(self, EstimatorMethod::Crossing | EstimatorMethod::Both)
    }
}

impl fmt::Display for EstimatorMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EstimatorMethod::Spectral => "spectral",
            EstimatorMethod::Crossing => "crossing",
            EstimatorMethod::Both => "both",
        };
        f.write_str(name)
    }
}

impl FromStr for EstimatorMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spectral" | "fft" => Ok(EstimatorMethod::Spectral),
            "crossing" | "zero-crossing" => Ok(EstimatorMethod::Crossing),
            "both" => Ok(EstimatorMethod::Both),
            _ => Err(format!("Unknown method: {} (expected spectral, crossing or both)", s)),
        }
    }
}

/// Buffer geometry and estimator tuning
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorConfig {
    pub capacity: usize,
    pub window: usize,
    pub filter_length: usize,
    pub crossing_target: usize,
    pub channel: ColorChannel,
    pub spectral: SpectralConfig,
    pub range: PlausibleRange,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_CAPACITY,
            window: DEFAULT_WINDOW_LENGTH,
            filter_length: DEFAULT_FILTER_LENGTH,
            crossing_target: DEFAULT_CROSSING_TARGET,
            channel: ColorChannel::Green,
            spectral: SpectralConfig::default(),
            range: PlausibleRange::default(),
        }
    }
}

/// Per-sample output, emitted for every ingested frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleUpdate {
    pub cn: f64,
    pub means: ChannelMeans,
    /// Last accepted frequency (bpm) from either estimator
    pub frequency: Option<f64>,
    /// Last computed SNR (dB)
    pub snr: f64,
}

pub struct PulseEstimator {
    config: EstimatorConfig,
    buffer: SignalBuffer,
    crossing: CrossingDetector,
    spectral: SpectralEstimator,
    range: PlausibleRange,
    frequency: Option<f64>,
    samples: u64,
}

impl PulseEstimator {
    pub fn new(config: &EstimatorConfig) -> Self {
        let window = config.window.min(config.capacity);
        info!(
            "Pulse estimator: buffer {}, window {}, filter {}, channel {}",
            config.capacity, window, config.filter_length, config.channel
        );

        Self {
            buffer: SignalBuffer::new(config.capacity),
            crossing: CrossingDetector::new(config.capacity, config.filter_length, config.crossing_target),
            spectral: SpectralEstimator::new(window, config.spectral),
            range: config.range,
            frequency: None,
            samples: 0,
            config: config.clone(),
        }
    }

    /// Feed one frame's colour sums; empty regions are skipped
    pub fn ingest(&mut self, sums: &ColorSums, elapsed_ms: f64) -> Option<SampleUpdate> {
        let means = sums.means()?;
        let ingested = self.buffer.ingest(means.select(self.config.channel), elapsed_ms);
        self.crossing.push(ingested.z, ingested.slot);
        self.samples += 1;

        Some(SampleUpdate {
            cn: ingested.cn,
            means,
            frequency: self.frequency,
            snr: self.spectral.snr(),
        })
    }

    /// Spectral estimate over the newest window
    pub fn compute_frequency(&mut self) -> SpectralUpdate {
        let update = self.spectral.estimate(&self.buffer, self.range);
        if let SpectralUpdate::Pulse { bpm, .. } = update {
            self.frequency = Some(bpm);
        }
        update
    }

    /// Zero-crossing estimate from the polarity wave
    pub fn count_frequency(&mut self) -> CrossingEstimate {
        let estimate = self.crossing.count_frequency(&self.buffer);
        if let Some(bpm) = estimate.bpm() {
            self.frequency = Some(bpm);
        }
        estimate
    }

    /// Replace the plausibility range from a threshold table; on error the
    /// current range stays in place
    pub fn load_thresholds(
        &mut self,
        path: &Path,
        sex: Sex,
        age: u32,
        alpha: TwoSidedAlpha,
    ) -> Result<PlausibleRange, ThresholdError> {
        match thresholds::load_thresholds(path, sex, age, alpha) {
            Ok(range) => {
                info!("Plausible range set to {:.1}-{:.1} bpm", range.low, range.high);
                self.range = range;
                Ok(range)
            }
            Err(e) => {
                warn!("Keeping plausible range {:.1}-{:.1} bpm: {}", self.range.low, self.range.high, e);
                Err(e)
            }
        }
    }

    /// Select the colour channel; all buffered samples and estimates are
    /// discarded, the plausibility range is kept
    pub fn switch_channel(&mut self, channel: ColorChannel) {
        if channel == self.config.channel {
            return;
        }
        debug!("Switching channel {} -> {}", self.config.channel, channel);
        let config = EstimatorConfig {
            channel,
            range: self.range,
            ..self.config.clone()
        };
        *self = Self::new(&config);
    }

    pub fn set_range(&mut self, range: PlausibleRange) {
        self.range = range;
    }

    pub fn range(&self) -> PlausibleRange {
        self.range
    }

    pub fn channel(&self) -> ColorChannel {
        self.config.channel
    }

    /// Last accepted frequency from either estimator
    pub fn frequency(&self) -> Option<f64> {
        self.frequency
    }

    pub fn snr(&self) -> f64 {
        self.spectral.snr()
    }

    pub fn spectrum(&self) -> &[f64] {
        self.spectral.spectrum()
    }

    pub fn buffer(&self) -> &SignalBuffer {
        &self.buffer
    }

    pub fn crossing(&self) -> &CrossingDetector {
        &self.crossing
    }

    /// Samples ingested since construction
    pub fn samples(&self) -> u64 {
        self.samples
    }
}
