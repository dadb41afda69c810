//! Skin classification and face-region geometry

use serde::Serialize;

use super::frame::Rect;

/// Samples collected before a calibrated band is derived
pub const CALIBRATION_WINDOW: usize = 25;

/// Half-width of the calibrated band in standard deviations
pub const CALIBRATION_MARGIN: f64 = 10.0;

/// Modified Kovac rule for daylight skin tones
pub fn is_skin(r: u8, g: u8, b: u8) -> bool {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    r > 115 && r > g && b > 45 && r - g.min(b) > 35 && r - g > 25
}

/// Ellipse inscribed in a face rectangle, biased upward to include the forehead
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceEllipse {
    cx: f64,
    cy: f64,
    semi_x: f64,
    semi_y: f64,
    /// Rows and columns worth scanning, before clamping to the frame
    pub scan: Rect,
}

impl FaceEllipse {
    pub fn from_face(face: &Rect) -> Self {
        let dx = face.width / 16;
        let dy = face.height / 30;

        let bounds = Rect::new(
            face.x + dx,
            face.y - 6 * dy,
            face.width - 2 * dx,
            face.height + 6 * dy,
        );
        let scan = Rect::new(face.x, face.y - 2 * dy, face.width, face.height + 2 * dy);

        Self {
            cx: bounds.x as f64 + bounds.width as f64 / 2.0,
            cy: bounds.y as f64 + bounds.height as f64 / 2.0,
            semi_x: bounds.width as f64 / 2.0,
            semi_y: bounds.height as f64 / 2.0,
            scan,
        }
    }

    /// Strict containment of the pixel centre
    pub fn contains(&self, x: i32, y: i32) -> bool {
        if self.semi_x <= 0.0 || self.semi_y <= 0.0 {
            return false;
        }
        let nx = (x as f64 + 0.5 - self.cx) / self.semi_x;
        let ny = (y as f64 + 0.5 - self.cy) / self.semi_y;
        nx * nx + ny * ny < 1.0
    }
}

/// Green-channel band learned during calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationResult {
    pub mean: f64,
    pub stdev: f64,
    pub samples: usize,
}

impl CalibrationResult {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.len() < 2 {
            return None;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let var = samples.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
        Some(Self {
            mean,
            stdev: var.sqrt(),
            samples: samples.len(),
        })
    }

    pub fn low(&self) -> f64 {
        self.mean - CALIBRATION_MARGIN * self.stdev
    }

    pub fn high(&self) -> f64 {
        self.mean + CALIBRATION_MARGIN * self.stdev
    }

    pub fn accepts(&self, green: u8) -> bool {
        let g = green as f64;
        g > self.low() && g < self.high()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skin_rule() {
        assert!(is_skin(200, 120, 100));
        // Too dark
        assert!(!is_skin(110, 60, 50));
        // Blue too low
        assert!(!is_skin(200, 120, 40));
        // Red not dominant enough over green
        assert!(!is_skin(200, 180, 100));
        assert!(!is_skin(90, 200, 100));
    }

    #[test]
    fn test_ellipse_geometry() {
        let face = Rect::new(0, 60, 160, 150);
        let ellipse = FaceEllipse::from_face(&face);
        // dx = 10, dy = 5
        assert_eq!(ellipse.scan, Rect::new(0, 50, 160, 160));
        // Centre of bounds (10, 30, 140, 180) is (80, 120)
        assert!(ellipse.contains(80, 120));
        assert!(ellipse.contains(79, 35));
        // Corners of the face rectangle are outside
        assert!(!ellipse.contains(0, 60));
        assert!(!ellipse.contains(159, 209));
        // Column just left of the bounds
        assert!(ellipse.contains(10, 120));
        assert!(!ellipse.contains(9, 120));
    }

    #[test]
    fn test_degenerate_ellipse_contains_nothing() {
        let ellipse = FaceEllipse::from_face(&Rect::new(5, 5, 0, 0));
        assert!(!ellipse.contains(5, 5));
    }

    #[test]
    fn test_calibration_band() {
        let samples: Vec<f64> = (0..CALIBRATION_WINDOW).map(|i| 100.0 + (i % 2) as f64).collect();
        let result = CalibrationResult::from_samples(&samples).unwrap();
        assert_eq!(result.samples, CALIBRATION_WINDOW);
        assert!((result.mean - 100.48).abs() < 1e-9);
        assert!(result.accepts(100));
        assert!(result.accepts(104));
        assert!(!result.accepts(120));
        assert!(!result.accepts(80));
    }

    #[test]
    fn test_calibration_needs_two_samples() {
        assert!(CalibrationResult::from_samples(&[1.0]).is_none());
    }
}
