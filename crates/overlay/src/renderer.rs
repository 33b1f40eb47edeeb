//! Overlay renderer: lane mask, boxes and label chips

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::detection::{Color, Detection};
use crate::geometry::{to_pixels, PixelRect};
use crate::surface::Surface;

/// Fixed drawing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderStyle {
    /// Box stroke width (px)
    pub line_width: u32,
    /// Label font size (px)
    pub font_px: f32,
    /// Label chip height (px)
    pub chip_height: f32,
    /// Horizontal padding added to the measured text width (px)
    pub chip_padding: f32,
    /// Opacity of the lane mask
    pub mask_alpha: f32,
    pub text_color: Color,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            line_width: 3,
            font_px: 14.0,
            chip_height: 25.0,
            chip_padding: 10.0,
            mask_alpha: 0.4,
            text_color: Color::WHITE,
        }
    }
}

/// Paints detections and the lane mask onto a surface
#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    style: RenderStyle,
}

impl OverlayRenderer {
    pub fn new(style: RenderStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &RenderStyle {
        &self.style
    }

    /// Repaint the whole surface.
    ///
    /// The surface is always cleared first. The mask goes underneath and
    /// detections are drawn in the order given, later ones on top.
    pub fn render<S: Surface + ?Sized>(
        &self,
        surface: &mut S,
        detections: &[Detection],
        mask: Option<&RgbaImage>,
        show_mask: bool,
    ) {
        surface.clear();

        if show_mask {
            if let Some(mask) = mask {
                surface.draw_image(mask, self.style.mask_alpha);
            }
        }

        let (width, height) = (surface.width() as f64, surface.height() as f64);
        for det in detections {
            let rect = to_pixels(det.bbox, width, height);
            surface.stroke_rect(rect, det.color, self.style.line_width);
            self.draw_label(surface, det, rect);
        }
    }

    fn draw_label<S: Surface + ?Sized>(&self, surface: &mut S, det: &Detection, rect: PixelRect) {
        let text = det.label_text();
        let text_width = surface.measure_text(&text, self.style.font_px) as f64;
        let chip = PixelRect::new(
            rect.x,
            rect.y - self.style.chip_height as f64,
            text_width + self.style.chip_padding as f64,
            self.style.chip_height as f64,
        );
        surface.fill_rect(chip, det.color);

        let inset = self.style.chip_padding / 2.0;
        let text_top = chip.y as f32 + (self.style.chip_height - self.style.font_px) / 2.0;
        surface.fill_text(&text, chip.x as f32 + inset, text_top, self.style.font_px, self.style.text_color);
    }
}
