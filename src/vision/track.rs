//! Face rectangle smoothing across frames

use tracing::trace;

use super::frame::Rect;

/// Detections averaged into the tracked rectangle
pub const DEFAULT_TRACK_LENGTH: usize = 9;

/// Consecutive misses tolerated before the region is dropped
pub const DEFAULT_MISS_THRESHOLD: u32 = 5;

/// Ring of the last detections plus a consecutive-miss counter
#[derive(Debug, Clone)]
pub struct FaceTrack {
    slots: Vec<Option<Rect>>,
    next: usize,
    misses: u32,
    miss_threshold: u32,
    average: Option<Rect>,
}

impl FaceTrack {
    pub fn new(length: usize, miss_threshold: u32) -> Self {
        assert!(length >= 1, "face track needs at least one slot");
        Self {
            slots: vec![None; length],
            next: 0,
            misses: 0,
            miss_threshold,
            average: None,
        }
    }

    /// Record this frame's detection result and return the rectangle to use
    pub fn observe(&mut self, detection: Option<Rect>) -> Option<Rect> {
        match detection {
            Some(rect) => {
                self.slots[self.next] = Some(rect);
                self.next = (self.next + 1) % self.slots.len();
                self.misses = 0;
                self.average = self.populated_average();
                self.average
            }
            None => {
                self.misses = self.misses.saturating_add(1);
                trace!(misses = self.misses, "face not detected");
                if self.misses <= self.miss_threshold {
                    self.average
                } else {
                    None
                }
            }
        }
    }

    fn populated_average(&self) -> Option<Rect> {
        let mut count = 0i64;
        let mut sum = [0i64; 4];
        for rect in self.slots.iter().flatten() {
            sum[0] += rect.x as i64;
            sum[1] += rect.y as i64;
            sum[2] += rect.width as i64;
            sum[3] += rect.height as i64;
            count += 1;
        }
        if count == 0 {
            return None;
        }
        Some(Rect::new(
            (sum[0] / count) as i32,
            (sum[1] / count) as i32,
            (sum[2] / count) as i32,
            (sum[3] / count) as i32,
        ))
    }

    pub fn average(&self) -> Option<Rect> {
        self.average
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }

    /// Forget all detections
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.next = 0;
        self.misses = 0;
        self.average = None;
    }
}

impl Default for FaceTrack {
    fn default() -> Self {
        Self::new(DEFAULT_TRACK_LENGTH, DEFAULT_MISS_THRESHOLD)
    }
}
