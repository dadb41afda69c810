use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::signal::crossing::{DEFAULT_CROSSING_TARGET, DEFAULT_FILTER_LENGTH};
use crate::signal::estimator::{DEFAULT_BUFFER_CAPACITY, DEFAULT_WINDOW_LENGTH};
use crate::signal::spectral::{
    DEFAULT_BAND_HIGH_BPM, DEFAULT_BAND_LOW_BPM, DEFAULT_HALF_INTERVAL, DEFAULT_SNR_THRESHOLD,
};
use crate::signal::{EstimatorConfig, EstimatorMethod, PlausibleRange, Sex, SpectralConfig, TwoSidedAlpha};
use crate::video::processor::DEFAULT_ESTIMATE_INTERVAL_MS;
use crate::vision::locator::DEFAULT_BLUR_SIZE;
use crate::vision::track::{DEFAULT_MISS_THRESHOLD, DEFAULT_TRACK_LENGTH};
use crate::vision::{ColorChannel, LocatorConfig, Rect, RegionMode};

/// Invalid configuration values
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Buffer capacity must be at least 2, got {0}")]
    BufferTooSmall(usize),

    #[error("Spectral window must be at least 8, got {0}")]
    WindowTooSmall(usize),

    #[error("Spectral window {window} exceeds buffer capacity {capacity}")]
    WindowExceedsBuffer { window: usize, capacity: usize },

    #[error("Filter length must be at least 2, got {0}")]
    FilterTooShort(usize),

    #[error("Zero-crossing target must be at least 2, got {0}")]
    CrossingTargetTooSmall(usize),

    #[error("Blur size must be at least 2, got {0}")]
    BlurTooSmall(u32),

    #[error("Empty frequency band: {low} - {high} bpm")]
    EmptyBand { low: f64, high: f64 },

    #[error("Map cell size must be non-zero, got {0}x{1}")]
    ZeroMapCell(u32, u32),

    #[error("Face track needs at least one slot")]
    EmptyTrack,

    #[error("Frame rate must be positive, got {0}")]
    InvalidFrameRate(f64),

    #[error("Estimate interval must be non-zero")]
    ZeroInterval,
}

/// Population table lookup used for the plausibility range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlausibilityProfile {
    pub thresholds_path: PathBuf,
    pub sex: Sex,
    pub age: u32,
    pub alpha: TwoSidedAlpha,
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: u32,

    // Signal
    pub channel: ColorChannel,
    pub buffer_capacity: usize,
    pub window_length: usize,
    pub filter_length: usize,
    pub crossing_target: usize,
    pub method: EstimatorMethod,
    pub estimate_interval_ms: u64,

    // Spectral tuning
    pub band_low_bpm: f64,
    pub band_high_bpm: f64,
    pub half_interval: usize,
    pub snr_threshold: f64,

    // Region
    pub region_mode: RegionMode,
    pub rect: Option<Rect>,
    pub blur_size: u32,
    pub skin_filter: bool,
    pub map_cell_width: u32,
    pub map_cell_height: u32,
    pub track_length: usize,
    pub miss_threshold: u32,

    // Replay
    pub fps: f64,

    // Plausibility
    pub plausible_low_bpm: f64,
    pub plausible_high_bpm: f64,
    pub profile: Option<PlausibilityProfile>,
}

impl Default for Config {
    fn default() -> Self {
        let range = PlausibleRange::default();
        Self {
            schema_version: 1,
            channel: ColorChannel::Green,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            window_length: DEFAULT_WINDOW_LENGTH,
            filter_length: DEFAULT_FILTER_LENGTH,
            crossing_target: DEFAULT_CROSSING_TARGET,
            method: EstimatorMethod::Spectral,
            estimate_interval_ms: DEFAULT_ESTIMATE_INTERVAL_MS,
            band_low_bpm: DEFAULT_BAND_LOW_BPM,
            band_high_bpm: DEFAULT_BAND_HIGH_BPM,
            half_interval: DEFAULT_HALF_INTERVAL,
            snr_threshold: DEFAULT_SNR_THRESHOLD,
            region_mode: RegionMode::Fixed,
            rect: None,
            blur_size: DEFAULT_BLUR_SIZE,
            skin_filter: true,
            map_cell_width: 8,
            map_cell_height: 8,
            track_length: DEFAULT_TRACK_LENGTH,
            miss_threshold: DEFAULT_MISS_THRESHOLD,
            fps: 30.0,
            plausible_low_bpm: range.low,
            plausible_high_bpm: range.high,
            profile: None,
        }
    }
}

impl Config {
    /// Load config from file, or create default
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .context("Failed to read config file")?;
            serde_json::from_str(&content)
                .context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(path, content)
            .context("Failed to write config file")
    }

    /// Get the default config directory
    pub fn default_config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .context("Failed to get home directory")?;
        Ok(home.join(".pulsecapture"))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.json"))
    }

    /// Check value ranges and cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity < 2 {
            return Err(ConfigError::BufferTooSmall(self.buffer_capacity));
        }
        if self.window_length < 8 {
            return Err(ConfigError::WindowTooSmall(self.window_length));
        }
        if self.window_length > self.buffer_capacity {
            return Err(ConfigError::WindowExceedsBuffer {
                window: self.window_length,
                capacity: self.buffer_capacity,
            });
        }
        if self.filter_length < 2 {
            return Err(ConfigError::FilterTooShort(self.filter_length));
        }
        if self.crossing_target < 2 {
            return Err(ConfigError::CrossingTargetTooSmall(self.crossing_target));
        }
        if self.blur_size < 2 {
            return Err(ConfigError::BlurTooSmall(self.blur_size));
        }
        if !(self.band_low_bpm >= 0.0 && self.band_low_bpm < self.band_high_bpm) {
            return Err(ConfigError::EmptyBand {
                low: self.band_low_bpm,
                high: self.band_high_bpm,
            });
        }
        if self.map_cell_width == 0 || self.map_cell_height == 0 {
            return Err(ConfigError::ZeroMapCell(self.map_cell_width, self.map_cell_height));
        }
        if self.track_length == 0 {
            return Err(ConfigError::EmptyTrack);
        }
        if self.fps.is_nan() || self.fps <= 0.0 {
            return Err(ConfigError::InvalidFrameRate(self.fps));
        }
        if self.estimate_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }

    pub fn estimator_config(&self) -> EstimatorConfig {
        EstimatorConfig {
            capacity: self.buffer_capacity,
            window: self.window_length,
            filter_length: self.filter_length,
            crossing_target: self.crossing_target,
            channel: self.channel,
            spectral: SpectralConfig {
                band_low_bpm: self.band_low_bpm,
                band_high_bpm: self.band_high_bpm,
                half_interval: self.half_interval,
                snr_threshold: self.snr_threshold,
            },
            range: PlausibleRange::new(self.plausible_low_bpm, self.plausible_high_bpm),
        }
    }

    pub fn locator_config(&self) -> LocatorConfig {
        LocatorConfig {
            mode: self.region_mode,
            rect: self.rect,
            blur_size: self.blur_size,
            skin_filter: self.skin_filter,
            map_cell: (self.map_cell_width, self.map_cell_height),
            track_length: self.track_length,
            miss_threshold: self.miss_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.schema_version, 1);
        assert_eq!(config.buffer_capacity, 256);
        assert_eq!(config.channel, ColorChannel::Green);
        assert_eq!(config.estimate_interval_ms, 1000);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.rect = Some(Rect::new(10, 20, 64, 48));
        config.region_mode = RegionMode::Calibration;
        config.profile = Some(PlausibilityProfile {
            thresholds_path: PathBuf::from("/tmp/table.xml"),
            sex: Sex::Female,
            age: 30,
            alpha: TwoSidedAlpha::Five,
        });
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"region_mode\": \"calibration\""));
        assert!(raw.contains("\"sex\": \"female\""));
    }

    #[test]
    fn test_missing_file_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "channel": "red", "window_length": 128 }"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.channel, ColorChannel::Red);
        assert_eq!(config.window_length, 128);
        assert_eq!(config.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = |f: fn(&mut Config)| {
            let mut config = Config::default();
            f(&mut config);
            config.validate().unwrap_err()
        };

        assert_eq!(bad(|c| c.buffer_capacity = 1), ConfigError::BufferTooSmall(1));
        assert_eq!(
            bad(|c| c.window_length = 512),
            ConfigError::WindowExceedsBuffer { window: 512, capacity: 256 }
        );
        assert_eq!(bad(|c| c.filter_length = 1), ConfigError::FilterTooShort(1));
        assert_eq!(bad(|c| c.blur_size = 1), ConfigError::BlurTooSmall(1));
        assert!(matches!(bad(|c| c.band_high_bpm = 30.0), ConfigError::EmptyBand { .. }));
        assert_eq!(bad(|c| c.map_cell_height = 0), ConfigError::ZeroMapCell(8, 0));
        assert_eq!(bad(|c| c.fps = 0.0), ConfigError::InvalidFrameRate(0.0));
    }

    #[test]
    fn test_derived_configs() {
        let mut config = Config::default();
        config.channel = ColorChannel::Blue;
        config.rect = Some(Rect::new(1, 2, 3, 4));
        config.map_cell_width = 4;

        let estimator = config.estimator_config();
        assert_eq!(estimator.channel, ColorChannel::Blue);
        assert_eq!(estimator.range, PlausibleRange::default());
        assert_eq!(estimator.spectral, SpectralConfig::default());

        let locator = config.locator_config();
        assert_eq!(locator.rect, Some(Rect::new(1, 2, 3, 4)));
        assert_eq!(locator.map_cell, (4, 8));
    }
}
