//! Perception Overlay
//!
//! Everything needed to turn detections into pixels:
//! - Detection model and display categories
//! - Coordinate mapping (backend pixels ↔ percentages ↔ surface pixels)
//! - Overlay rendering (lane mask blend, boxes, label chips)
//! - Generation-guarded asynchronous mask decoding

pub mod detection;
pub mod geometry;
pub mod mask;
pub mod renderer;
pub mod surface;

pub use detection::{demo_detections, format_label, Color, Detection, DisplayCategory};
pub use geometry::{to_normalized, to_pixels, PercentBox, PixelCorners, PixelRect};
pub use mask::{decode_mask, DecodedMask, MaskLoader, MaskTicket};
pub use renderer::{OverlayRenderer, RenderStyle};
pub use surface::{DrawOp, RasterSurface, RecordingSurface, Surface};

use thiserror::Error;

/// Overlay error types
#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("Invalid color: {0}")]
    InvalidColor(String),

    #[error("Lane mask decode failed: {0}")]
    MaskDecode(String),

    #[error("Font loading failed: {0}")]
    Font(String),

    #[error("Image encoding failed: {0}")]
    Encode(String),
}
