//! Frame period measurement

use std::time::Instant;

/// Source of the elapsed time between processed frames
pub trait Clock: Send {
    /// Milliseconds since the previous call (or since the last reset)
    fn lap_ms(&mut self) -> f64;

    /// Restart the measurement from now
    fn reset(&mut self);
}

/// Wall-clock lap timer
#[derive(Debug)]
pub struct MonotonicClock {
    last: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn lap_ms(&mut self) -> f64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        self.last = now;
        elapsed.as_secs_f64() * 1000.0
    }

    fn reset(&mut self) {
        self.last = Instant::now();
    }
}

/// Constant frame period, for replay at a nominal rate and for tests
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    pub period_ms: f64,
}

impl FixedClock {
    pub fn new(period_ms: f64) -> Self {
        Self { period_ms }
    }

    pub fn from_fps(fps: f64) -> Self {
        Self::new(1000.0 / fps)
    }
}

impl Clock for FixedClock {
    fn lap_ms(&mut self) -> f64 {
        self.period_ms
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_monotonic_clock_measures_laps() {
        let mut clock = MonotonicClock::new();
        std::thread::sleep(Duration::from_millis(5));
        let lap = clock.lap_ms();
        assert!(lap >= 5.0);
        // Second lap starts from the first
        assert!(clock.lap_ms() < lap + 1000.0);
    }

    #[test]
    fn test_fixed_clock() {
        let mut clock = FixedClock::from_fps(25.0);
        assert_eq!(clock.lap_ms(), 40.0);
        clock.reset();
        assert_eq!(clock.lap_ms(), 40.0);
    }
}
