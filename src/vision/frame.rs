//! Frames, rectangles and per-channel colour sums

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Colour of the region outline drawn on annotated frames
pub const OUTLINE_COLOR: [u8; 3] = [255, 25, 25];

/// Qualifying pixels have their red value reduced modulo this
pub const MARK_MODULUS: u8 = 32;

/// An 8-bit video frame, colour or single-channel
#[derive(Debug, Clone)]
pub enum Frame {
    Rgb(RgbImage),
    Luma(GrayImage),
}

impl Frame {
    /// Keep single-channel images as-is, convert everything else to RGB
    pub fn from_dynamic(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(gray) => Frame::Luma(gray),
            other => Frame::Rgb(other.to_rgb8()),
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            Frame::Rgb(img) => img.width(),
            Frame::Luma(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Frame::Rgb(img) => img.height(),
            Frame::Luma(img) => img.height(),
        }
    }

    pub fn is_color(&self) -> bool {
        matches!(self, Frame::Rgb(_))
    }

    /// Box-blur the pixels inside `rect` with a `kernel`×`kernel` mean filter
    pub fn blur_region(&mut self, rect: &Rect, kernel: u32) {
        if kernel < 2 || rect.is_empty() {
            return;
        }
        let (width, height) = (self.width(), self.height());
        match self {
            Frame::Rgb(img) => box_blur(img, width, height, 3, rect, kernel),
            Frame::Luma(img) => box_blur(img, width, height, 1, rect, kernel),
        }
    }

    /// Draw a one pixel outline of `rect`, clipped to the frame
    pub fn draw_rect(&mut self, rect: &Rect) {
        let Some(r) = rect.clip(self.width(), self.height()) else {
            return;
        };
        let (x0, y0) = (r.x as u32, r.y as u32);
        let (x1, y1) = (x0 + r.width as u32 - 1, y0 + r.height as u32 - 1);

        let mut outline = |x: u32, y: u32| match self {
            Frame::Rgb(img) => img.put_pixel(x, y, Rgb(OUTLINE_COLOR)),
            Frame::Luma(img) => img.put_pixel(x, y, Luma([255])),
        };
        for x in x0..=x1 {
            outline(x, y0);
            outline(x, y1);
        }
        for y in y0..=y1 {
            outline(x0, y);
            outline(x1, y);
        }
    }
}

/// Separable box filter over the region, neighbours clamped to the image
fn box_blur(data: &mut [u8], width: u32, height: u32, channels: usize, rect: &Rect, kernel: u32) {
    let (w, h) = (width as i64, height as i64);
    let k = kernel as i64;
    // Window offsets match a centred anchor of kernel / 2
    let before = k / 2;
    let after = k - before - 1;

    let x_start = (rect.x as i64).max(0);
    let x_end = (rect.x as i64 + rect.width as i64).min(w);
    let y_start = (rect.y as i64).max(0);
    let y_end = (rect.y as i64 + rect.height as i64).min(h);
    if x_start >= x_end || y_start >= y_end {
        return;
    }

    // Horizontal pass over every row the vertical pass reads
    let ry_start = (y_start - before).max(0);
    let ry_end = (y_end + after).min(h);
    let cols = (x_end - x_start) as usize;
    let mut horizontal = vec![0.0f32; (ry_end - ry_start) as usize * cols * channels];

    let at = |x: i64, y: i64, c: usize| -> usize { ((y * w + x) as usize) * channels + c };

    for y in ry_start..ry_end {
        for x in x_start..x_end {
            for c in 0..channels {
                let mut sum = 0.0f32;
                for dx in -before..=after {
                    let sx = (x + dx).clamp(0, w - 1);
                    sum += data[at(sx, y, c)] as f32;
                }
                let idx = (((y - ry_start) as usize) * cols + (x - x_start) as usize) * channels + c;
                horizontal[idx] = sum;
            }
        }
    }

    let area = (k * k) as f32;
    for y in y_start..y_end {
        for x in x_start..x_end {
            for c in 0..channels {
                let mut sum = 0.0f32;
                for dy in -before..=after {
                    let sy = (y + dy).clamp(ry_start, ry_end - 1);
                    let idx = (((sy - ry_start) as usize) * cols + (x - x_start) as usize) * channels + c;
                    sum += horizontal[idx];
                }
                data[at(x, y, c)] = (sum / area).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Axis-aligned rectangle in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// True if the rectangle is non-empty and lies entirely inside the frame
    pub fn fits(&self, width: u32, height: u32) -> bool {
        !self.is_empty()
            && self.x >= 0
            && self.y >= 0
            && self.right() as i64 <= width as i64
            && self.bottom() as i64 <= height as i64
    }

    /// Intersection with the frame, `None` if nothing is left
    pub fn clip(&self, width: u32, height: u32) -> Option<Rect> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = (self.right() as i64).min(width as i64) as i32;
        let y1 = (self.bottom() as i64).min(height as i64) as i32;
        let clipped = Rect::new(x0, y0, x1 - x0, y1 - y0);
        (!clipped.is_empty()).then_some(clipped)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

impl FromStr for Rect {
    type Err = String;

    /// Parse `x,y,width,height`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(format!("Expected x,y,width,height, got: {}", s));
        }
        let mut values = [0i32; 4];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part
                .parse()
                .map_err(|_| format!("Invalid rectangle component: {}", part))?;
        }
        Ok(Rect::new(values[0], values[1], values[2], values[3]))
    }
}

/// Colour channel feeding the signal buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorChannel {
    Red,
    #[default]
    Green,
    Blue,
}

impl fmt::Display for ColorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColorChannel::Red => "red",
            ColorChannel::Green => "green",
            ColorChannel::Blue => "blue",
        };
        f.write_str(name)
    }
}

impl FromStr for ColorChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "red" | "r" => Ok(ColorChannel::Red),
            "green" | "g" => Ok(ColorChannel::Green),
            "blue" | "b" => Ok(ColorChannel::Blue),
            _ => Err(format!("Unknown channel: {} (expected red, green or blue)", s)),
        }
    }
}

/// Per-channel sums over the qualifying pixels of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColorSums {
    pub red: u64,
    pub green: u64,
    pub blue: u64,
    pub area: u64,
}

/// Per-channel means of a non-empty region
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelMeans {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

impl ChannelMeans {
    pub fn select(&self, channel: ColorChannel) -> f64 {
        match channel {
            ColorChannel::Red => self.red,
            ColorChannel::Green => self.green,
            ColorChannel::Blue => self.blue,
        }
    }
}

impl ColorSums {
    pub fn add(&mut self, r: u8, g: u8, b: u8) {
        self.red += r as u64;
        self.green += g as u64;
        self.blue += b as u64;
        self.area += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.area == 0
    }

    /// Channel means, `None` for an empty region
    pub fn means(&self) -> Option<ChannelMeans> {
        if self.area == 0 {
            return None;
        }
        let area = self.area as f64;
        Some(ChannelMeans {
            red: self.red as f64 / area,
            green: self.green as f64 / area,
            blue: self.blue as f64 / area,
        })
    }
}
