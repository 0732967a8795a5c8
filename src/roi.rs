//! Region-of-interest gate.
//!
//! A detection counts only when its anchor point (the bounding-box center)
//! lies inside the configured polygon. Points exactly on an edge or vertex
//! count as inside, matching a `>= 0` point-polygon test. With ROI disabled
//! every point passes.

use image::Rgb;

use crate::detect::Point;
use crate::frame::Frame;

/// Distance (pixels) within which a point is considered on an edge.
const EDGE_TOLERANCE: f64 = 1e-4;

#[derive(Clone, Debug, Default)]
pub struct RoiGate {
    polygon: Option<Vec<Point>>,
}

impl RoiGate {
    /// Gate that accepts every point.
    pub fn disabled() -> Self {
        Self { polygon: None }
    }

    /// Gate over `points`, in order. Callers validate that there are at least three.
    pub fn new(points: Vec<Point>) -> Self {
        Self {
            polygon: Some(points),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.polygon.is_some()
    }

    pub fn polygon(&self) -> Option<&[Point]> {
        self.polygon.as_deref()
    }

    /// Whether `point` counts as inside the region. Boundary points are inside.
    pub fn contains(&self, point: Point) -> bool {
        match &self.polygon {
            None => true,
            Some(polygon) => point_in_polygon(point, polygon),
        }
    }

    /// Precompute a pixel mask for frames of the given size.
    pub fn mask_for(&self, width: u32, height: u32) -> Option<RoiMask> {
        let polygon = self.polygon.as_ref()?;
        let mut inside = Vec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            for x in 0..width {
                inside.push(point_in_polygon(Point::new(x as f32, y as f32), polygon));
            }
        }
        Some(RoiMask {
            width,
            height,
            inside,
        })
    }
}

/// Per-pixel inside/outside map for one frame size.
#[derive(Clone, Debug)]
pub struct RoiMask {
    width: u32,
    height: u32,
    inside: Vec<bool>,
}

impl RoiMask {
    pub fn matches(&self, frame: &Frame) -> bool {
        self.width == frame.width() && self.height == frame.height()
    }

    /// Black out every pixel outside the region.
    ///
    /// Frames of a different size are left untouched.
    pub fn apply(&self, frame: &mut Frame) {
        if !self.matches(frame) {
            return;
        }
        let width = self.width as usize;
        for (x, y, pixel) in frame.image_mut().enumerate_pixels_mut() {
            if !self.inside[y as usize * width + x as usize] {
                *pixel = Rgb([0, 0, 0]);
            }
        }
    }
}

fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    let n = polygon.len();
    if n == 0 {
        return false;
    }
    let (px, py) = (point.x as f64, point.y as f64);

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (polygon[i].x as f64, polygon[i].y as f64);
        let (xj, yj) = (polygon[j].x as f64, polygon[j].y as f64);

        if on_segment((px, py), (xi, yi), (xj, yj)) {
            return true;
        }
        if (yi > py) != (yj > py) {
            let x_cross = (xj - xi) * (py - yi) / (yj - yi) + xi;
            if px < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> bool {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return (p.0 - a.0).abs() <= EDGE_TOLERANCE && (p.1 - a.1).abs() <= EDGE_TOLERANCE;
    }
    let cross = dx * (p.1 - a.1) - dy * (p.0 - a.0);
    if cross.abs() / len > EDGE_TOLERANCE {
        return false;
    }
    let within = |v: f64, lo: f64, hi: f64| {
        v >= lo.min(hi) - EDGE_TOLERANCE && v <= lo.max(hi) + EDGE_TOLERANCE
    };
    within(p.0, a.0, b.0) && within(p.1, a.1, b.1)
}
