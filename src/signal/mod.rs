pub mod buffer;
pub mod crossing;
pub mod estimator;
pub mod spectral;
pub mod thresholds;

pub use buffer::{SignalBuffer, DEFAULT_SAMPLE_TIME_MS};
pub use crossing::{CrossingDetector, CrossingEstimate};
pub use estimator::{EstimatorConfig, EstimatorMethod, PulseEstimator, SampleUpdate};
pub use spectral::{SpectralConfig, SpectralEstimator, SpectralUpdate};
pub use thresholds::{load_thresholds, PlausibleRange, Sex, ThresholdError, TwoSidedAlpha};
