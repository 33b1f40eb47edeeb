//! Coordinate mapping between backend pixels, percentages and surface pixels

use serde::{Deserialize, Serialize};

/// Absolute corner box in source-frame pixels, as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelCorners {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl PixelCorners {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<[f64; 4]> for PixelCorners {
    fn from(b: [f64; 4]) -> Self {
        Self::new(b[0], b[1], b[2], b[3])
    }
}

/// Box as percentages (0-100) of frame width/height, origin top-left
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Box in destination surface pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl PixelRect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }
}

/// Convert backend corners to percentages of the frame.
///
/// Frame dimensions must be positive. No clamping.
pub fn to_normalized(corners: PixelCorners, frame_width: f64, frame_height: f64) -> PercentBox {
    PercentBox {
        x: 100.0 * corners.x1 / frame_width,
        y: 100.0 * corners.y1 / frame_height,
        w: 100.0 * (corners.x2 - corners.x1) / frame_width,
        h: 100.0 * (corners.y2 - corners.y1) / frame_height,
    }
}

/// Convert a percentage box to surface pixels.
///
/// Surface dimensions must be positive. No clamping.
pub fn to_pixels(bbox: PercentBox, surface_width: f64, surface_height: f64) -> PixelRect {
    PixelRect {
        x: bbox.x / 100.0 * surface_width,
        y: bbox.y / 100.0 * surface_height,
        w: bbox.w / 100.0 * surface_width,
        h: bbox.h / 100.0 * surface_height,
    }
}

impl PercentBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Whether the box lies inside the frame with non-negative size
    pub fn is_well_formed(&self) -> bool {
        [self.x, self.y, self.w, self.h].iter().all(|v| v.is_finite())
            && self.w >= 0.0
            && self.h >= 0.0
            && (0.0..=100.0).contains(&self.x)
            && (0.0..=100.0).contains(&self.y)
            && self.x + self.w <= 100.0 + f64::EPSILON * 100.0
            && self.y + self.h <= 100.0 + f64::EPSILON * 100.0
    }

    /// Clamp into the frame.
    ///
    /// Negative sizes collapse to zero, non-finite values become zero and
    /// the far edges are pulled back to 100%.
    pub fn sanitized(&self) -> PercentBox {
        let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
        let (x0, y0) = (finite(self.x), finite(self.y));
        let x = x0.clamp(0.0, 100.0);
        let y = y0.clamp(0.0, 100.0);
        let right = (x0 + finite(self.w).max(0.0)).clamp(0.0, 100.0);
        let bottom = (y0 + finite(self.h).max(0.0)).clamp(0.0, 100.0);
        PercentBox {
            x,
            y,
            w: (right - x).max(0.0),
            h: (bottom - y).max(0.0),
        }
    }
}
