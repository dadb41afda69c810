//! Rolling signal buffer
//!
//! Fixed-capacity circular storage for the per-frame channel means, the
//! elapsed time of every sample and the centered-normalized signal derived
//! from them. Every slot is pre-seeded at construction, so all sequences are
//! fully populated from the first sample on.

use tracing::trace;

/// Elapsed time pre-seeded into every slot (ms), keeps durations non-zero
pub const DEFAULT_SAMPLE_TIME_MS: f64 = 35.0;

/// Result of a single ingestion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ingested {
    /// Slot the sample was written to
    pub slot: usize,
    /// Z-scored value of the sample
    pub z: f64,
    /// Centered-normalized value stored at `slot`
    pub cn: f64,
}

/// Circular buffer of raw samples, timestamps and centered-normalized signal
#[derive(Debug, Clone)]
pub struct SignalBuffer {
    raw: Vec<f64>,
    time_ms: Vec<f64>,
    cn: Vec<f64>,
    cursor: usize,
    mean: f64,
    stdev: f64,
}

impl SignalBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "signal buffer needs at least two slots");
        Self {
            raw: vec![0.0; capacity],
            time_ms: vec![DEFAULT_SAMPLE_TIME_MS; capacity],
            cn: vec![0.0; capacity],
            cursor: 0,
            mean: 0.0,
            stdev: 0.0,
        }
    }

    /// Push one channel sample taken `elapsed_ms` after the previous one
    pub fn ingest(&mut self, value: f64, elapsed_ms: f64) -> Ingested {
        debug_assert!(elapsed_ms >= 0.0, "negative elapsed time: {}", elapsed_ms);

        let n = self.raw.len();
        let slot = self.cursor;

        self.mean += (value - self.raw[slot]) / n as f64;
        self.raw[slot] = value;
        self.time_ms[slot] = elapsed_ms;

        self.stdev = full_scan_stdev(&self.raw, self.mean);
        let z = if self.stdev > f64::EPSILON {
            (value - self.mean) / self.stdev
        } else {
            0.0
        };

        let cn = (z + self.cn[self.wrap(slot as isize - 1)]) / 2.0;
        self.cn[slot] = cn;

        trace!(slot, value, z, cn, "sample ingested");

        self.cursor = (slot + 1) % n;
        Ingested { slot, z, cn }
    }

    /// Map a possibly negative index onto the ring
    pub fn wrap(&self, index: isize) -> usize {
        let n = self.raw.len() as isize;
        (((index % n) + n) % n) as usize
    }

    pub fn capacity(&self) -> usize {
        self.raw.len()
    }

    /// Slot the next sample will be written to
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Slot holding the most recent sample
    pub fn newest(&self) -> usize {
        self.wrap(self.cursor as isize - 1)
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Standard deviation computed during the last ingestion
    pub fn stdev(&self) -> f64 {
        self.stdev
    }

    pub fn raw(&self) -> &[f64] {
        &self.raw
    }

    pub fn times_ms(&self) -> &[f64] {
        &self.time_ms
    }

    pub fn cn_signal(&self) -> &[f64] {
        &self.cn
    }

    pub fn time_at(&self, slot: usize) -> f64 {
        self.time_ms[slot]
    }

    /// Slots of the last `len` samples, oldest first
    pub fn window_slots(&self, len: usize) -> impl Iterator<Item = usize> + '_ {
        let len = len.min(self.capacity());
        let newest = self.newest() as isize;
        (0..len).map(move |i| self.wrap(newest - (len as isize - 1) + i as isize))
    }
}

/// Sample standard deviation of `values` around `mean` (divisor n - 1)
pub fn full_scan_stdev(values: &[f64], mean: f64) -> f64 {
    let sum_sq: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}
