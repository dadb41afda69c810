//! Region locator and colour aggregator
//!
//! ## Modes
//! - **Fixed**: a caller-set rectangle, optionally skin-filtered
//! - **Tracked**: a smoothed face rectangle from a `FaceDetector`, skin pixels
//!   inside the face ellipse only
//! - **Calibration**: fixed mode that learns a green band from 25 frames and
//!   then filters by that band instead of the skin rule
//! - **Map**: raw sums of a grid of cells for spatial inspection
//!
//! Every call to `process` measures the frame period and annotates the frame:
//! qualifying pixels get their red value folded, the region gets an outline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use super::clock::Clock;
use super::detector::FaceDetector;
use super::frame::{ColorSums, Frame, Rect, MARK_MODULUS};
use super::skin::{is_skin, CalibrationResult, FaceEllipse, CALIBRATION_WINDOW};
use super::track::FaceTrack;

/// Default box blur kernel size
pub const DEFAULT_BLUR_SIZE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionMode {
    #[default]
    Fixed,
    Tracked,
    Calibration,
    Map,
}

impl fmt::Display for RegionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegionMode::Fixed => "fixed",
            RegionMode::Tracked => "tracked",
            RegionMode::Calibration => "calibration",
            RegionMode::Map => "map",
        };
        f.write_str(name)
    }
}

impl FromStr for RegionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" | "rect" => Ok(RegionMode::Fixed),
            "tracked" | "face" => Ok(RegionMode::Tracked),
            "calibration" | "calibrate" => Ok(RegionMode::Calibration),
            "map" => Ok(RegionMode::Map),
            _ => Err(format!(
                "Unknown region mode: {} (expected fixed, tracked, calibration or map)",
                s
            )),
        }
    }
}

/// Why a frame did or did not produce a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionStatus {
    Measured,
    /// No usable region; a rectangle needs to be selected
    SelectRegion,
    /// Tracking lost the face or no qualifying pixel was found in it
    NoFace,
}

/// Result of locating and aggregating one frame
#[derive(Debug, Clone, PartialEq)]
pub struct RegionReport {
    pub sums: ColorSums,
    pub elapsed_ms: f64,
    pub region: Option<Rect>,
    pub status: RegionStatus,
    /// Set on the frame that completes calibration
    pub calibration: Option<CalibrationResult>,
    /// Map mode cell sums, row-major
    pub cells: Vec<ColorSums>,
}

/// Locator settings
#[derive(Debug, Clone, PartialEq)]
pub struct LocatorConfig {
    pub mode: RegionMode,
    pub rect: Option<Rect>,
    pub blur_size: u32,
    pub skin_filter: bool,
    pub map_cell: (u32, u32),
    pub track_length: usize,
    pub miss_threshold: u32,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            mode: RegionMode::Fixed,
            rect: None,
            blur_size: DEFAULT_BLUR_SIZE,
            skin_filter: true,
            map_cell: (8, 8),
            track_length: super::track::DEFAULT_TRACK_LENGTH,
            miss_threshold: super::track::DEFAULT_MISS_THRESHOLD,
        }
    }
}

pub struct RegionLocator {
    mode: RegionMode,
    rect: Option<Rect>,
    blur_size: u32,
    skin_filter: bool,
    map_cell: (u32, u32),
    track: FaceTrack,
    detector: Box<dyn FaceDetector>,
    clock: Box<dyn Clock>,
    /// Green means gathered while calibrating
    collecting: Option<Vec<f64>>,
    band: Option<CalibrationResult>,
}

impl RegionLocator {
    pub fn new(config: LocatorConfig, detector: Box<dyn FaceDetector>, clock: Box<dyn Clock>) -> Self {
        let mut locator = Self {
            mode: config.mode,
            rect: config.rect,
            blur_size: DEFAULT_BLUR_SIZE,
            skin_filter: config.skin_filter,
            map_cell: config.map_cell,
            track: FaceTrack::new(config.track_length, config.miss_threshold),
            detector,
            clock,
            collecting: None,
            band: None,
        };
        locator.set_blur_size(config.blur_size);
        if config.mode == RegionMode::Calibration {
            locator.calibrate(true);
        }
        locator
    }

    /// Locate the region, aggregate its colours and annotate the frame
    pub fn process(&mut self, frame: &mut Frame) -> RegionReport {
        let mut report = match self.mode {
            RegionMode::Fixed | RegionMode::Calibration => self.process_rect(frame),
            RegionMode::Tracked => self.process_face(frame),
            RegionMode::Map => self.process_map(frame),
        };
        report.elapsed_ms = self.clock.lap_ms();

        if !report.sums.is_empty() {
            if let Some(region) = &report.region {
                frame.draw_rect(region);
            }
            if self.collecting.is_some() {
                report.calibration = self.push_calibration(&report.sums);
            }
        }
        report
    }

    fn empty_report(status: RegionStatus, region: Option<Rect>) -> RegionReport {
        RegionReport {
            sums: ColorSums::default(),
            elapsed_ms: 0.0,
            region,
            status,
            calibration: None,
            cells: Vec::new(),
        }
    }

    fn process_rect(&mut self, frame: &mut Frame) -> RegionReport {
        let rect = match self.rect {
            Some(r) if r.fits(frame.width(), frame.height()) => r,
            other => return Self::empty_report(RegionStatus::SelectRegion, other),
        };

        frame.blur_region(&rect, self.blur_size);

        let mut sums = ColorSums::default();
        match frame {
            Frame::Rgb(img) => {
                for y in rect.y as u32..rect.bottom() as u32 {
                    for x in rect.x as u32..rect.right() as u32 {
                        let px = img.get_pixel_mut(x, y);
                        let [r, g, b] = px.0;
                        let qualifies = match (&self.band, self.skin_filter) {
                            (Some(band), _) => band.accepts(g),
                            (None, true) => is_skin(r, g, b),
                            (None, false) => true,
                        };
                        if qualifies {
                            sums.add(r, g, b);
                            if self.skin_filter || self.band.is_some() {
                                px.0[0] %= MARK_MODULUS;
                            }
                        }
                    }
                }
            }
            Frame::Luma(img) => {
                for y in rect.y as u32..rect.bottom() as u32 {
                    for x in rect.x as u32..rect.right() as u32 {
                        sums.green += img.get_pixel(x, y).0[0] as u64;
                    }
                }
                sums.area = rect.width as u64 * rect.height as u64;
            }
        }

        let status = if sums.is_empty() {
            RegionStatus::SelectRegion
        } else {
            RegionStatus::Measured
        };
        RegionReport {
            sums,
            elapsed_ms: 0.0,
            region: Some(rect),
            status,
            calibration: None,
            cells: Vec::new(),
        }
    }

    fn process_face(&mut self, frame: &mut Frame) -> RegionReport {
        let detection = self.detector.detect(frame);
        let Some(face) = self.track.observe(detection) else {
            return Self::empty_report(RegionStatus::NoFace, None);
        };
        let Some(visible) = face.clip(frame.width(), frame.height()) else {
            return Self::empty_report(RegionStatus::NoFace, Some(face));
        };

        frame.blur_region(&visible, self.blur_size);

        let ellipse = FaceEllipse::from_face(&face);
        let mut sums = ColorSums::default();
        let scan = ellipse.scan.clip(frame.width(), frame.height());
        if let (Frame::Rgb(img), Some(scan)) = (&mut *frame, scan) {
            for y in scan.y..scan.bottom() {
                for x in scan.x..scan.right() {
                    let px = img.get_pixel_mut(x as u32, y as u32);
                    let [r, g, b] = px.0;
                    if is_skin(r, g, b) && ellipse.contains(x, y) {
                        sums.add(r, g, b);
                        px.0[0] %= MARK_MODULUS;
                    }
                }
            }
        }

        let status = if sums.is_empty() {
            RegionStatus::NoFace
        } else {
            RegionStatus::Measured
        };
        RegionReport {
            sums,
            elapsed_ms: 0.0,
            region: Some(face),
            status,
            calibration: None,
            cells: Vec::new(),
        }
    }

    fn process_map(&mut self, frame: &mut Frame) -> RegionReport {
        let rect = match self.rect {
            Some(r) if r.fits(frame.width(), frame.height()) => r,
            other => return Self::empty_report(RegionStatus::SelectRegion, other),
        };
        let (cell_w, cell_h) = self.map_cell;
        if cell_w == 0 || cell_h == 0 {
            return Self::empty_report(RegionStatus::SelectRegion, Some(rect));
        }

        let steps_x = rect.width as u32 / cell_w;
        let steps_y = rect.height as u32 / cell_h;
        let area = cell_w as u64 * cell_h as u64;
        let mut cells = Vec::with_capacity((steps_x * steps_y) as usize);

        for row in 0..steps_y {
            for col in 0..steps_x {
                let x0 = rect.x as u32 + col * cell_w;
                let y0 = rect.y as u32 + row * cell_h;
                let mut cell = ColorSums::default();
                for y in y0..y0 + cell_h {
                    for x in x0..x0 + cell_w {
                        match &*frame {
                            Frame::Rgb(img) => {
                                let [r, g, b] = img.get_pixel(x, y).0;
                                cell.red += r as u64;
                                cell.green += g as u64;
                                cell.blue += b as u64;
                            }
                            Frame::Luma(img) => {
                                let v = img.get_pixel(x, y).0[0] as u64;
                                cell.red += v;
                                cell.green += v;
                                cell.blue += v;
                            }
                        }
                    }
                }
                cell.area = area;
                cells.push(cell);
            }
        }

        let status = if cells.is_empty() {
            RegionStatus::SelectRegion
        } else {
            RegionStatus::Measured
        };
        RegionReport {
            sums: ColorSums::default(),
            elapsed_ms: 0.0,
            region: Some(rect),
            status,
            calibration: None,
            cells,
        }
    }

    fn push_calibration(&mut self, sums: &ColorSums) -> Option<CalibrationResult> {
        let means = sums.means()?;
        let samples = self.collecting.as_mut()?;
        samples.push(means.green);
        if samples.len() < CALIBRATION_WINDOW {
            return None;
        }

        let result = CalibrationResult::from_samples(samples);
        self.collecting = None;
        if let Some(result) = result {
            info!(
                "Calibration done: green {:.2} ± {:.2} over {} frames",
                result.mean, result.stdev, result.samples
            );
            self.band = Some(result);
        }
        result
    }

    /// Start (`true`) or leave (`false`) calibrated colour filtering
    pub fn calibrate(&mut self, enable: bool) {
        if enable {
            debug!("Collecting {} frames for calibration", CALIBRATION_WINDOW);
            self.collecting = Some(Vec::with_capacity(CALIBRATION_WINDOW));
        } else {
            self.collecting = None;
            self.band = None;
        }
    }

    pub fn set_rect(&mut self, rect: Rect) {
        self.rect = Some(rect);
    }

    pub fn rect(&self) -> Option<Rect> {
        self.rect
    }

    pub fn set_mode(&mut self, mode: RegionMode) {
        if mode == RegionMode::Tracked && self.mode != RegionMode::Tracked {
            self.track.clear();
        }
        self.mode = mode;
    }

    pub fn mode(&self) -> RegionMode {
        self.mode
    }

    /// Kernel sizes below 2 are ignored
    pub fn set_blur_size(&mut self, size: u32) {
        if size > 1 {
            self.blur_size = size;
        }
    }

    pub fn blur_size(&self) -> u32 {
        self.blur_size
    }

    pub fn set_skin_filter(&mut self, enabled: bool) {
        self.skin_filter = enabled;
    }

    pub fn set_map_cell_size(&mut self, width: u32, height: u32) {
        self.map_cell = (width, height);
    }

    pub fn calibration(&self) -> Option<CalibrationResult> {
        self.band
    }

    pub fn is_calibrating(&self) -> bool {
        self.collecting.is_some()
    }

    pub fn reset_clock(&mut self) {
        self.clock.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::clock::FixedClock;
    use crate::vision::detector::SkinBoxDetector;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    const SKIN: [u8; 3] = [200, 120, 100];

    /// Returns the same rectangle for the first `hits` frames, then nothing
    struct ScriptedDetector {
        rect: Rect,
        hits: usize,
    }

    impl FaceDetector for ScriptedDetector {
        fn detect(&mut self, _frame: &Frame) -> Option<Rect> {
            if self.hits == 0 {
                return None;
            }
            self.hits -= 1;
            Some(self.rect)
        }
    }

    fn locator(config: LocatorConfig) -> RegionLocator {
        RegionLocator::new(
            config,
            Box::new(SkinBoxDetector::default()),
            Box::new(FixedClock::new(40.0)),
        )
    }

    fn fixed(rect: Rect) -> LocatorConfig {
        LocatorConfig {
            rect: Some(rect),
            ..LocatorConfig::default()
        }
    }

    #[test]
    fn test_skin_patch_sums() {
        let mut frame = Frame::Rgb(RgbImage::from_pixel(10, 10, Rgb(SKIN)));
        let mut locator = locator(fixed(Rect::new(4, 4, 3, 3)));

        let report = locator.process(&mut frame);
        assert_eq!(report.status, RegionStatus::Measured);
        assert_eq!(report.elapsed_ms, 40.0);
        assert_eq!(
            report.sums,
            ColorSums {
                red: 9 * 200,
                green: 9 * 120,
                blue: 9 * 100,
                area: 9
            }
        );

        // Qualifying pixels are marked, the outline is drawn
        let Frame::Rgb(img) = &frame else { unreachable!() };
        assert_eq!(img.get_pixel(5, 5).0, [200 % MARK_MODULUS, 120, 100]);
        assert_eq!(img.get_pixel(4, 4).0, crate::vision::frame::OUTLINE_COLOR);
        assert_eq!(img.get_pixel(0, 0).0, SKIN);
    }

    #[test]
    fn test_skin_filter_off_counts_every_pixel() {
        let mut img = RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]));
        img.put_pixel(2, 2, Rgb(SKIN));
        let mut frame = Frame::Rgb(img);
        let mut config = fixed(Rect::new(0, 0, 8, 8));
        config.skin_filter = false;
        let mut locator = locator(config);

        let report = locator.process(&mut frame);
        assert_eq!(report.sums.area, 64);
    }

    #[test]
    fn test_non_skin_region_is_empty() {
        let mut frame = Frame::Rgb(RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])));
        let mut locator = locator(fixed(Rect::new(0, 0, 4, 4)));
        let report = locator.process(&mut frame);
        assert_eq!(report.sums.area, 0);
        assert!(report.sums.means().is_none());
        assert_eq!(report.status, RegionStatus::SelectRegion);
    }

    #[test]
    fn test_rect_outside_frame_is_empty() {
        let mut frame = Frame::Rgb(RgbImage::from_pixel(8, 8, Rgb(SKIN)));
        let mut locator = locator(fixed(Rect::new(6, 6, 4, 4)));
        let report = locator.process(&mut frame);
        assert_eq!(report.sums.area, 0);
        assert_eq!(report.status, RegionStatus::SelectRegion);

        let mut unset = super::tests::locator(LocatorConfig::default());
        assert_eq!(unset.process(&mut frame).sums.area, 0);
    }

    #[test]
    fn test_gray_frame_sums_into_green() {
        let mut frame = Frame::Luma(GrayImage::from_pixel(6, 6, Luma([50])));
        let mut locator = locator(fixed(Rect::new(1, 1, 2, 3)));
        let report = locator.process(&mut frame);
        assert_eq!(
            report.sums,
            ColorSums {
                red: 0,
                green: 300,
                blue: 0,
                area: 6
            }
        );
    }

    #[test]
    fn test_blur_size_ignores_small_values() {
        let mut locator = locator(LocatorConfig::default());
        locator.set_blur_size(1);
        assert_eq!(locator.blur_size(), DEFAULT_BLUR_SIZE);
        locator.set_blur_size(6);
        assert_eq!(locator.blur_size(), 6);
    }

    #[test]
    fn test_tracked_face_uses_ellipse() {
        let face = Rect::new(8, 8, 32, 32);
        let mut locator = RegionLocator::new(
            LocatorConfig {
                mode: RegionMode::Tracked,
                miss_threshold: 1,
                ..LocatorConfig::default()
            },
            Box::new(ScriptedDetector { rect: face, hits: 1 }),
            Box::new(FixedClock::new(33.0)),
        );

        let fresh = || Frame::Rgb(RgbImage::from_pixel(48, 48, Rgb(SKIN)));

        let mut frame = fresh();
        let report = locator.process(&mut frame);
        assert_eq!(report.status, RegionStatus::Measured);
        assert_eq!(report.region, Some(face));
        assert!(report.sums.area > 0);
        // Corners of the face rectangle fall outside the ellipse
        assert!(report.sums.area < 32 * 32);

        // One miss is tolerated
        let mut frame = fresh();
        let again = locator.process(&mut frame);
        assert_eq!(again.sums.area, report.sums.area);

        // The second consecutive miss drops the region
        let mut frame = fresh();
        let lost = locator.process(&mut frame);
        assert_eq!(lost.status, RegionStatus::NoFace);
        assert_eq!(lost.sums.area, 0);
    }

    #[test]
    fn test_tracked_gray_frame_is_empty() {
        let mut locator = RegionLocator::new(
            LocatorConfig {
                mode: RegionMode::Tracked,
                ..LocatorConfig::default()
            },
            Box::new(ScriptedDetector {
                rect: Rect::new(0, 0, 16, 16),
                hits: 1,
            }),
            Box::new(FixedClock::new(33.0)),
        );
        let mut frame = Frame::Luma(GrayImage::from_pixel(20, 20, Luma([200])));
        let report = locator.process(&mut frame);
        assert_eq!(report.sums.area, 0);
        assert_eq!(report.status, RegionStatus::NoFace);
    }

    #[test]
    fn test_map_cells() {
        let mut img = RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]));
        img.put_pixel(6, 6, Rgb([11, 2, 3]));
        let mut frame = Frame::Rgb(img);
        let mut config = fixed(Rect::new(4, 4, 4, 4));
        config.mode = RegionMode::Map;
        config.map_cell = (2, 2);
        let mut locator = locator(config);

        let report = locator.process(&mut frame);
        assert_eq!(report.cells.len(), 4);
        assert!(report.cells.iter().all(|c| c.area == 4));
        assert_eq!(report.cells[0].red, 4);
        // Row-major: the bottom-right cell holds the bright pixel
        assert_eq!(report.cells[3].red, 14);
        assert_eq!(report.cells[3].green, 8);
        assert!(report.sums.is_empty());
    }

    #[test]
    fn test_map_gray_fills_all_channels() {
        let mut frame = Frame::Luma(GrayImage::from_pixel(4, 4, Luma([7])));
        let mut config = fixed(Rect::new(0, 0, 4, 2));
        config.mode = RegionMode::Map;
        config.map_cell = (2, 2);
        let mut locator = locator(config);

        let report = locator.process(&mut frame);
        assert_eq!(report.cells.len(), 2);
        assert_eq!(
            report.cells[1],
            ColorSums {
                red: 28,
                green: 28,
                blue: 28,
                area: 4
            }
        );
    }

    #[test]
    fn test_map_outside_frame_has_no_cells() {
        let mut frame = Frame::Luma(GrayImage::new(4, 4));
        let mut config = fixed(Rect::new(2, 2, 4, 4));
        config.mode = RegionMode::Map;
        let mut locator = locator(config);
        assert!(locator.process(&mut frame).cells.is_empty());
    }

    #[test]
    fn test_calibration_replaces_skin_rule() {
        let mut config = fixed(Rect::new(0, 0, 4, 4));
        config.mode = RegionMode::Calibration;
        let mut locator = locator(config);
        assert!(locator.is_calibrating());

        let mut result = None;
        for i in 0..CALIBRATION_WINDOW {
            let green = if i % 2 == 0 { 118 } else { 122 };
            let mut frame = Frame::Rgb(RgbImage::from_pixel(4, 4, Rgb([200, green, 100])));
            let report = locator.process(&mut frame);
            assert_eq!(report.sums.area, 16);
            if i + 1 < CALIBRATION_WINDOW {
                assert!(report.calibration.is_none());
            } else {
                result = report.calibration;
            }
        }

        let result = result.unwrap();
        assert_eq!(result.samples, CALIBRATION_WINDOW);
        assert!((result.mean - 119.92).abs() < 1e-9);
        assert!(!locator.is_calibrating());

        // Non-skin pixel with an in-band green now qualifies
        let mut frame = Frame::Rgb(RgbImage::from_pixel(4, 4, Rgb([50, 120, 200])));
        assert_eq!(locator.process(&mut frame).sums.area, 16);

        // Skin pixel with an out-of-band green does not
        let mut frame = Frame::Rgb(RgbImage::from_pixel(4, 4, Rgb([200, 60, 100])));
        assert_eq!(locator.process(&mut frame).sums.area, 0);

        locator.calibrate(false);
        assert!(locator.calibration().is_none());
        let mut frame = Frame::Rgb(RgbImage::from_pixel(4, 4, Rgb([200, 60, 100])));
        assert_eq!(locator.process(&mut frame).sums.area, 16);
    }
}
