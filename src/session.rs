use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signal::CrossingEstimate;
use crate::vision::{ColorChannel, RegionMode};

/// Estimator that produced a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingSource {
    Spectral,
    Crossing,
}

/// A single accepted pulse estimate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseReading {
    pub id: Uuid,
    /// Time since the session started
    pub at_ms: u64,
    pub bpm: f64,
    pub snr: Option<f64>,
    pub plausible: bool,
    pub source: ReadingSource,
}

impl PulseReading {
    pub fn spectral(at_ms: u64, bpm: f64, snr: f64, plausible: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            at_ms,
            bpm,
            snr: Some(snr),
            plausible,
            source: ReadingSource::Spectral,
        }
    }

    pub fn crossing(at_ms: u64, estimate: &CrossingEstimate) -> Option<Self> {
        Some(Self {
            id: Uuid::new_v4(),
            at_ms,
            bpm: estimate.bpm()?,
            snr: None,
            plausible: true,
            source: ReadingSource::Crossing,
        })
    }
}

/// A complete measurement session record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub source: String,
    pub region_mode: RegionMode,
    pub channel: ColorChannel,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub readings: Vec<PulseReading>,

    // Stats
    pub frames: u64,
    pub measured_frames: u64,
    pub noisy_estimates: u64,
    pub total_duration_ms: u64,
}

impl SessionRecord {
    pub fn new(source: String, region_mode: RegionMode, channel: ColorChannel) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            source,
            region_mode,
            channel,
            started_at: Utc::now(),
            ended_at: None,
            readings: Vec::new(),
            frames: 0,
            measured_frames: 0,
            noisy_estimates: 0,
            total_duration_ms: 0,
        }
    }

    /// Count a processed frame of `period_ms`, measured if it had pixels
    pub fn add_frame(&mut self, period_ms: f64, measured: bool) {
        self.frames += 1;
        if measured {
            self.measured_frames += 1;
        }
        self.total_duration_ms += period_ms.max(0.0).round() as u64;
    }

    pub fn add_reading(&mut self, reading: PulseReading) {
        self.readings.push(reading);
    }

    pub fn add_noisy(&mut self) {
        self.noisy_estimates += 1;
    }

    pub fn finalize(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    fn spectral_readings(&self) -> impl Iterator<Item = &PulseReading> {
        self.readings
            .iter()
            .filter(|r| r.source == ReadingSource::Spectral)
    }

    /// Mean of the spectral readings
    pub fn mean_bpm(&self) -> Option<f64> {
        let (sum, count) = self
            .spectral_readings()
            .fold((0.0, 0usize), |(s, c), r| (s + r.bpm, c + 1));
        (count > 0).then(|| sum / count as f64)
    }

    /// Lowest and highest spectral reading
    pub fn bpm_range(&self) -> Option<(f64, f64)> {
        self.spectral_readings().fold(None, |acc, r| match acc {
            None => Some((r.bpm, r.bpm)),
            Some((lo, hi)) => Some((lo.min(r.bpm), hi.max(r.bpm))),
        })
    }

    /// Fraction of spectral readings inside the plausible range
    pub fn plausible_fraction(&self) -> Option<f64> {
        let (plausible, count) = self
            .spectral_readings()
            .fold((0usize, 0usize), |(p, c), r| (p + r.plausible as usize, c + 1));
        (count > 0).then(|| plausible as f64 / count as f64)
    }

    /// Fraction of frames that produced a measurement
    pub fn coverage(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.measured_frames as f64 / self.frames as f64
        }
    }

    /// Human-readable end-of-run summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Duration: {:.1}s", self.total_duration_ms as f64 / 1000.0),
            format!(
                "Frames: {} ({:.0}% measured)",
                self.frames,
                self.coverage() * 100.0
            ),
            format!(
                "Readings: {} accepted, {} too noisy",
                self.readings.len(),
                self.noisy_estimates
            ),
        ];
        if let Some(mean) = self.mean_bpm() {
            lines.push(format!("Mean pulse: {:.1} bpm", mean));
        }
        if let Some((lo, hi)) = self.bpm_range() {
            lines.push(format!("Range: {:.1} - {:.1} bpm", lo, hi));
        }
        if let Some(fraction) = self.plausible_fraction() {
            lines.push(format!("Plausible: {:.0}%", fraction * 100.0));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionRecord {
        SessionRecord::new("frames/".to_string(), RegionMode::Fixed, ColorChannel::Green)
    }

    #[test]
    fn test_empty_session_summary() {
        let mut session = session();
        session.finalize();
        assert!(session.ended_at.is_some());
        assert_eq!(session.mean_bpm(), None);
        assert_eq!(session.coverage(), 0.0);
        assert!(session.summary().contains("Readings: 0 accepted"));
    }

    #[test]
    fn test_session_statistics() {
        let mut session = session();
        for i in 0..4 {
            session.add_frame(40.0, i != 0);
        }
        session.add_reading(PulseReading::spectral(1000, 70.0, 4.0, true));
        session.add_reading(PulseReading::spectral(2000, 80.0, 3.0, false));
        session.add_noisy();

        let crossing = CrossingEstimate::Frequency { bpm: 200.0, scanned: 40 };
        session.add_reading(PulseReading::crossing(2000, &crossing).unwrap());

        assert_eq!(session.total_duration_ms, 160);
        assert_eq!(session.coverage(), 0.75);
        // Crossing readings stay out of the spectral statistics
        assert_eq!(session.mean_bpm(), Some(75.0));
        assert_eq!(session.bpm_range(), Some((70.0, 80.0)));
        assert_eq!(session.plausible_fraction(), Some(0.5));

        let summary = session.summary();
        assert!(summary.contains("Mean pulse: 75.0 bpm"));
        assert!(summary.contains("3 accepted, 1 too noisy"));
    }

    #[test]
    fn test_exhausted_crossing_is_not_a_reading() {
        let estimate = CrossingEstimate::Exhausted { scanned: 256 };
        assert!(PulseReading::crossing(0, &estimate).is_none());
    }

    #[test]
    fn test_session_serializes() {
        let mut session = session();
        session.add_reading(PulseReading::spectral(500, 66.0, 5.5, false));
        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"source\":\"spectral\""));
        assert!(json.contains("\"region_mode\":\"fixed\""));
    }
}
