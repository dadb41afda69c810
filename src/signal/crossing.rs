//! Time-domain filter and zero-crossing estimator
//!
//! A moving average of the last `L` z-scored samples is differentiated over
//! `L - 1` samples; a sign change between consecutive non-zero derivative
//! values is a zero crossing, and every second crossing flips a persistent
//! polarity. The polarity is recorded per buffer slot as a square wave which
//! lags the true phase by roughly `L` samples.
//!
//! The frequency estimate scans that square wave backward from the newest
//! slot, bounded by a watchdog equal to the buffer capacity.

use serde::Serialize;
use tracing::debug;

use super::buffer::SignalBuffer;

/// Default moving-average length
pub const DEFAULT_FILTER_LENGTH: usize = 5;

/// Default number of polarity changes to collect (two full cycles)
pub const DEFAULT_CROSSING_TARGET: usize = 4;

/// Result of a backward polarity scan
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CrossingEstimate {
    /// Target count reached; `scanned` slots were visited
    Frequency { bpm: f64, scanned: usize },
    /// Watchdog ran out before the target count was reached
    Exhausted { scanned: usize },
}

impl CrossingEstimate {
    pub fn bpm(&self) -> Option<f64> {
        match self {
            Self::Frequency { bpm, .. } => Some(*bpm),
            Self::Exhausted { .. } => None,
        }
    }

    pub fn scanned(&self) -> usize {
        match self {
            Self::Frequency { scanned, .. } | Self::Exhausted { scanned } => *scanned,
        }
    }
}

/// Per-sample output of the derivative filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterTick {
    pub derivative: f64,
    pub crossed: bool,
    pub polarity: f64,
}

/// Derivative filter state plus the polarity square wave
#[derive(Debug, Clone)]
pub struct CrossingDetector {
    history: Vec<f64>,
    outputs: Vec<f64>,
    pos: usize,
    /// Last non-zero derivative value
    last_derivative: f64,
    parity: u8,
    polarity: f64,
    square: Vec<f64>,
    target: usize,
}

impl CrossingDetector {
    /// Create a detector for a buffer of `capacity` slots
    pub fn new(capacity: usize, filter_length: usize, target: usize) -> Self {
        assert!(filter_length >= 2, "filter length must be at least 2");
        assert!(target >= 2, "crossing target must be at least 2");

        let polarity = 1.0;
        // Seed with alternating runs so the wave has no undefined region
        let square = (0..capacity)
            .map(|i| if i % 4 != 0 { polarity } else { -polarity })
            .collect();

        Self {
            history: vec![0.0; filter_length],
            outputs: vec![0.0; filter_length],
            pos: 0,
            last_derivative: 0.0,
            parity: 0,
            polarity,
            square,
            target,
        }
    }

    /// Feed the z-scored value written to buffer `slot`
    pub fn push(&mut self, z: f64, slot: usize) -> FilterTick {
        debug_assert!(slot < self.square.len(), "slot {} out of range", slot);

        let len = self.history.len();
        self.history[self.pos] = z;

        let output = self.history.iter().sum::<f64>() / len as f64;
        self.outputs[self.pos] = output;

        // Output L-1 samples back lives in the next filter slot
        let earlier = self.outputs[(self.pos + 1) % len];
        let derivative = output - earlier;

        // An exact zero carries no sign; compare against the last non-zero value
        let crossed = derivative * self.last_derivative < 0.0;
        if derivative != 0.0 {
            self.last_derivative = derivative;
        }
        if crossed {
            self.parity = (self.parity + 1) % 2;
            if self.parity == 0 {
                self.polarity = -self.polarity;
            }
        }

        self.square[slot] = self.polarity;
        self.pos = (self.pos + 1) % len;

        FilterTick {
            derivative,
            crossed,
            polarity: self.polarity,
        }
    }

    /// Estimate the pulse rate from the last `target` polarity changes
    pub fn count_frequency(&self, buffer: &SignalBuffer) -> CrossingEstimate {
        let n = buffer.capacity();
        let wave = |p: isize| self.square[buffer.wrap(p)];

        let mut position = buffer.newest() as isize;
        let mut watchdog = 0usize;

        while wave(position) * wave(position - 1) > 0.0 && watchdog < n {
            position -= 1;
            watchdog += 1;
        }

        let mut remaining = self.target;
        let mut elapsed_ms = 0.0;
        while remaining > 0 && watchdog < n {
            if wave(position) * wave(position - 1) < 0.0 {
                remaining -= 1;
            }
            position -= 1;
            watchdog += 1;
            elapsed_ms += buffer.time_at(buffer.wrap(position));
        }

        if remaining > 0 {
            debug!(
                "Crossing scan exhausted after {} slots ({} changes missing)",
                watchdog, remaining
            );
            return CrossingEstimate::Exhausted { scanned: watchdog };
        }

        let seconds = (elapsed_ms - buffer.time_at(buffer.wrap(position))) / 1000.0;
        if seconds <= 0.0 {
            return CrossingEstimate::Exhausted { scanned: watchdog };
        }

        CrossingEstimate::Frequency {
            bpm: 60.0 * (self.target - 1) as f64 / seconds,
            scanned: watchdog,
        }
    }

    /// Polarity square wave, indexed like the signal buffer
    pub fn square_wave(&self) -> &[f64] {
        &self.square
    }

    pub fn polarity(&self) -> f64 {
        self.polarity
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn set_target(&mut self, target: usize) {
        if target >= 2 {
            self.target = target;
        }
    }
}
