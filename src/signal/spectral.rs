//! Spectral pulse estimator
//!
//! ## Algorithm
//! 1. Copy the last `window` centered-normalized samples (oldest first) and
//!    sum their elapsed times to get the effective sampling duration
//! 2. Real FFT, amplitude spectrum `re² + im²`
//! 3. Convert the bpm band into bin bounds using that duration
//! 4. Peak search inside the band, `half_interval` bins away from each edge
//! 5. SNR = power within ±half_interval of the peak over the rest of the band
//! 6. Power-weighted centroid around the peak gives the bias-corrected rate
//! 7. SNR is penalized by the fourth power of the centroid offset weight
//! 8. Gate on the SNR threshold, classify against the plausibility range

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

use super::buffer::SignalBuffer;
use super::thresholds::PlausibleRange;

/// Lowest rate searched by default (0.7 Hz)
pub const DEFAULT_BAND_LOW_BPM: f64 = 42.0;

/// Highest rate searched by default (4.5 Hz)
pub const DEFAULT_BAND_HIGH_BPM: f64 = 270.0;

/// Bins on each side of the peak counted as signal
pub const DEFAULT_HALF_INTERVAL: usize = 2;

/// SNR (dB) an estimate must exceed to be accepted
pub const DEFAULT_SNR_THRESHOLD: f64 = 2.0;

/// Initial SNR reported before the first estimate
pub const INITIAL_SNR: f64 = -5.0;

/// Tuning of the spectral estimator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralConfig {
    pub band_low_bpm: f64,
    pub band_high_bpm: f64,
    pub half_interval: usize,
    pub snr_threshold: f64,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            band_low_bpm: DEFAULT_BAND_LOW_BPM,
            band_high_bpm: DEFAULT_BAND_HIGH_BPM,
            half_interval: DEFAULT_HALF_INTERVAL,
            snr_threshold: DEFAULT_SNR_THRESHOLD,
        }
    }
}

/// Outcome of one spectral update
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpectralUpdate {
    /// Accepted estimate
    Pulse { bpm: f64, snr: f64, plausible: bool },
    /// SNR did not pass the gate; `None` when the spectrum was degenerate
    TooNoisy { snr: Option<f64> },
}

/// Spectral estimator with its own FFT plan
pub struct SpectralEstimator {
    config: SpectralConfig,
    fft: Arc<dyn RealToComplex<f64>>,
    input: Vec<f64>,
    output: Vec<Complex<f64>>,
    spectrum: Vec<f64>,
    window: usize,
    snr: f64,
    frequency: Option<f64>,
}

impl SpectralEstimator {
    pub fn new(window: usize, config: SpectralConfig) -> Self {
        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(window);
        let input = fft.make_input_vec();
        let output = fft.make_output_vec();

        debug!(
            "Spectral estimator: window {} ({} bins), band {:.0}-{:.0} bpm",
            window,
            window / 2 + 1,
            config.band_low_bpm,
            config.band_high_bpm
        );

        Self {
            config,
            fft,
            input,
            output,
            spectrum: vec![0.0; window / 2 + 1],
            window,
            snr: INITIAL_SNR,
            frequency: None,
        }
    }

    /// Rebuild the plan and scratch buffers for a new window length
    pub fn set_window_length(&mut self, window: usize) {
        if window == self.window {
            return;
        }
        *self = Self::new(window, self.config);
    }

    /// Run one estimate over the newest `window` samples of `buffer`
    pub fn estimate(&mut self, buffer: &SignalBuffer, range: PlausibleRange) -> SpectralUpdate {
        debug_assert!(self.window <= buffer.capacity());

        let cn = buffer.cn_signal();
        let mut duration_ms = 0.0;
        for (i, slot) in buffer.window_slots(self.window).enumerate() {
            self.input[i] = cn[slot];
            duration_ms += buffer.time_at(slot);
        }

        if let Err(e) = self.fft.process(&mut self.input, &mut self.output) {
            debug!("FFT failed: {}", e);
            return SpectralUpdate::TooNoisy { snr: None };
        }

        for (amp, c) in self.spectrum.iter_mut().zip(self.output.iter()) {
            *amp = c.re * c.re + c.im * c.im;
        }

        let Some(peak) = self.analyze(duration_ms) else {
            trace!("Degenerate spectrum, keeping previous estimate");
            return SpectralUpdate::TooNoisy { snr: None };
        };

        self.snr = peak.snr;
        if peak.snr > self.config.snr_threshold {
            self.frequency = Some(peak.bpm);
            let plausible = range.contains(peak.bpm);
            debug!(
                "Pulse {:.1} bpm, SNR {:.2} dB, plausible: {}",
                peak.bpm, peak.snr, plausible
            );
            SpectralUpdate::Pulse {
                bpm: peak.bpm,
                snr: peak.snr,
                plausible,
            }
        } else {
            SpectralUpdate::TooNoisy { snr: Some(peak.snr) }
        }
    }

    fn analyze(&self, duration_ms: f64) -> Option<Peak> {
        let half = self.config.half_interval;
        let bins = self.spectrum.len();
        let seconds = duration_ms / 1000.0;
        if seconds <= 0.0 {
            return None;
        }

        let bottom = (self.config.band_low_bpm / 60.0 * seconds) as usize;
        let top = ((self.config.band_high_bpm / 60.0 * seconds) as usize).min(bins);
        if bottom + half >= top.saturating_sub(half) {
            return None;
        }

        let mut peak = bottom + half;
        let mut max_power = 0.0;
        for i in (bottom + half)..(top - half) {
            if self.spectrum[i] > max_power {
                max_power = self.spectrum[i];
                peak = i;
            }
        }

        let mut signal_power = 0.0;
        let mut noise_power = 0.0;
        for i in bottom..top {
            if i + half >= peak && i <= peak + half {
                signal_power += self.spectrum[i];
            } else {
                noise_power += self.spectrum[i];
            }
        }

        if signal_power <= 0.0 || noise_power <= 0.0 {
            return None;
        }

        let mut weighted = 0.0;
        let mut power = 0.0;
        for i in (peak - half)..=(peak + half) {
            power += self.spectrum[i];
            weighted += i as f64 * self.spectrum[i];
        }
        let centroid = weighted / power;

        let bias = (peak as f64 - centroid).abs();
        let weight = (half as f64 + 1.0 - bias) / (half as f64 + 1.0);
        let snr = 10.0 * (signal_power / noise_power).log10() * weight.powi(4);

        trace!(
            "Peak bin {} (centroid {:.3}), band {}..{}, SNR {:.2} dB",
            peak,
            centroid,
            bottom,
            top,
            snr
        );

        Some(Peak {
            bpm: centroid * 60_000.0 / duration_ms,
            snr,
        })
    }

    /// Amplitude spectrum of the last update
    pub fn spectrum(&self) -> &[f64] {
        &self.spectrum
    }

    /// Last computed SNR (dB)
    pub fn snr(&self) -> f64 {
        self.snr
    }

    /// Last accepted frequency (bpm)
    pub fn frequency(&self) -> Option<f64> {
        self.frequency
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn config(&self) -> &SpectralConfig {
        &self.config
    }
}

struct Peak {
    bpm: f64,
    snr: f64,
}
