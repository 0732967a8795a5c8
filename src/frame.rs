//! Owned video frames and the drawing primitives used to annotate them.
//!
//! - `Frame`: decoded RGB frame plus its sequence number from the source.
//! - Drawing helpers render detection boxes and the ROI outline onto a copy
//!   of the frame. The raw frame itself is never drawn on, so evidence
//!   captures and "latest" snapshots can choose between raw and annotated.

use image::{Rgb, RgbImage};

use crate::detect::{BoundingBox, Point};

/// Box color for qualifying detections.
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Outline color for the region of interest.
pub const ROI_COLOR: Rgb<u8> = Rgb([0, 255, 255]);

/// Decoded RGB frame.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Monotonic per-source sequence number (1-based).
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    /// All-black frame, mostly for tests.
    pub fn blank(width: u32, height: u32, sequence: u64) -> Self {
        Self::new(RgbImage::new(width, height), sequence)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Draw a rectangle outline `thickness` pixels wide.
    pub fn draw_box(&mut self, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
        let Some((x, y, w, h)) = bbox.clamped_rect(self.width(), self.height()) else {
            return;
        };
        for t in 0..thickness.min(w / 2 + 1).min(h / 2 + 1) {
            let left = (x + t) as i64;
            let top = (y + t) as i64;
            let right = (x + w - 1 - t) as i64;
            let bottom = (y + h - 1 - t) as i64;
            self.draw_line((left, top), (right, top), color);
            self.draw_line((left, bottom), (right, bottom), color);
            self.draw_line((left, top), (left, bottom), color);
            self.draw_line((right, top), (right, bottom), color);
        }
    }

    /// Draw a closed polygon outline.
    pub fn draw_polygon(&mut self, points: &[Point], color: Rgb<u8>) {
        if points.len() < 2 {
            return;
        }
        for (i, a) in points.iter().enumerate() {
            let b = points[(i + 1) % points.len()];
            self.draw_line(
                (a.x.round() as i64, a.y.round() as i64),
                (b.x.round() as i64, b.y.round() as i64),
                color,
            );
        }
    }

    /// Bresenham line; pixels outside the frame are skipped.
    fn draw_line(&mut self, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
        let (mut x0, mut y0) = from;
        let (x1, y1) = to;
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.put(x0, y0, color);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    fn put(&mut self, x: i64, y: i64, color: Rgb<u8>) {
        if x < 0 || y < 0 || x >= self.width() as i64 || y >= self.height() as i64 {
            return;
        }
        self.image.put_pixel(x as u32, y as u32, color);
    }
}
