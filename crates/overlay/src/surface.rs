//! 2D drawing surfaces
//!
//! [`RasterSurface`] paints into an RGBA buffer; [`RecordingSurface`]
//! keeps the draw operations instead of pixels.

use ab_glyph::{FontArc, PxScale};
use image::{imageops::FilterType, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::warn;

use crate::detection::Color;
use crate::geometry::PixelRect;
use crate::OverlayError;

/// Average glyph advance relative to the font size, used without a font
const FALLBACK_ADVANCE: f32 = 0.6;

/// Bundled label font (DejaVu Sans)
const DEFAULT_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// Canvas-like drawing target
pub trait Surface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Reset every pixel to transparent
    fn clear(&mut self);

    /// Draw an image scaled to fill the surface, blended at `alpha`
    fn draw_image(&mut self, image: &RgbaImage, alpha: f32);

    /// Outline a rectangle; the stroke lies inside the rectangle
    fn stroke_rect(&mut self, rect: PixelRect, color: Color, line_width: u32);

    fn fill_rect(&mut self, rect: PixelRect, color: Color);

    /// Width in pixels of `text` at `font_px`
    fn measure_text(&self, text: &str, font_px: f32) -> f32;

    /// Draw text with its top-left corner at (x, y)
    fn fill_text(&mut self, text: &str, x: f32, y: f32, font_px: f32, color: Color);
}

fn estimate_text_width(text: &str, font_px: f32) -> f32 {
    text.chars().count() as f32 * font_px * FALLBACK_ADVANCE
}

/// Straight alpha "over" blend of `src` onto `dst` with extra opacity `alpha`
pub fn blend_pixel(dst: &mut Rgba<u8>, src: Rgba<u8>, alpha: f32) {
    let sa = (src[3] as f32 / 255.0) * alpha.clamp(0.0, 1.0);
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for c in 0..3 {
        let s = src[c] as f32;
        let d = dst[c] as f32;
        let v = (s * sa + d * da * (1.0 - sa)) / out_a;
        dst[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

/// Edges further out than this are pulled in before handing to imageproc
const COORD_LIMIT: f64 = (1 << 24) as f64;

/// Integer rectangle for imageproc, `None` when empty
fn to_rect(x: f64, y: f64, w: f64, h: f64) -> Option<Rect> {
    let edge = |v: f64| v.round().clamp(-COORD_LIMIT, COORD_LIMIT);
    let (x0, y0) = (edge(x), edge(y));
    let (x1, y1) = (edge(x + w), edge(y + h));
    if !(x1 > x0 && y1 > y0) {
        return None;
    }
    let width = (x1 - x0) as u32;
    let height = (y1 - y0) as u32;
    Some(Rect::at(x0 as i32, y0 as i32).of_size(width, height))
}

/// Raster surface backed by an RGBA image
pub struct RasterSurface {
    image: RgbaImage,
    font: Option<FontArc>,
}

impl RasterSurface {
    /// Transparent surface of the given size, labelled with the bundled font
    pub fn new(width: u32, height: u32) -> Self {
        let font = match FontArc::try_from_slice(DEFAULT_FONT) {
            Ok(font) => Some(font),
            Err(e) => {
                warn!("Bundled label font unusable, labels will have no text: {}", e);
                None
            }
        };
        Self {
            image: RgbaImage::new(width, height),
            font,
        }
    }

    /// Replace the bundled label font
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    /// Load a font file for labels
    pub fn load_font(path: &std::path::Path) -> Result<FontArc, OverlayError> {
        let bytes = std::fs::read(path)
            .map_err(|e| OverlayError::Font(format!("{}: {}", path.display(), e)))?;
        FontArc::try_from_vec(bytes).map_err(|e| OverlayError::Font(e.to_string()))
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Encode the current contents as PNG
    pub fn to_png(&self) -> Result<Vec<u8>, OverlayError> {
        let mut out = std::io::Cursor::new(Vec::new());
        self.image
            .write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| OverlayError::Encode(e.to_string()))?;
        Ok(out.into_inner())
    }

    /// True if every pixel is fully transparent
    pub fn is_blank(&self) -> bool {
        self.image.pixels().all(|p| p[3] == 0)
    }
}

impl Surface for RasterSurface {
    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn clear(&mut self) {
        for p in self.image.pixels_mut() {
            *p = Rgba([0, 0, 0, 0]);
        }
    }

    fn draw_image(&mut self, image: &RgbaImage, alpha: f32) {
        let (w, h) = self.image.dimensions();
        if w == 0 || h == 0 || image.width() == 0 || image.height() == 0 {
            return;
        }
        let scaled;
        let src = if image.dimensions() == (w, h) {
            image
        } else {
            scaled = image::imageops::resize(image, w, h, FilterType::Triangle);
            &scaled
        };
        for (dst, src) in self.image.pixels_mut().zip(src.pixels()) {
            blend_pixel(dst, *src, alpha);
        }
    }

    fn stroke_rect(&mut self, rect: PixelRect, color: Color, line_width: u32) {
        let lw = (line_width.max(1) as f64).min(rect.w.abs()).min(rect.h.abs());
        let PixelRect { x, y, w, h } = rect;
        if !(w > 0.0 && h > 0.0) {
            return;
        }
        let bands = [
            to_rect(x, y, w, lw),
            to_rect(x, y + h - lw, w, lw),
            to_rect(x, y, lw, h),
            to_rect(x + w - lw, y, lw, h),
        ];
        for band in bands.into_iter().flatten() {
            draw_filled_rect_mut(&mut self.image, band, Rgba(color.0));
        }
    }

    fn fill_rect(&mut self, rect: PixelRect, color: Color) {
        if let Some(r) = to_rect(rect.x, rect.y, rect.w, rect.h) {
            draw_filled_rect_mut(&mut self.image, r, Rgba(color.0));
        }
    }

    fn measure_text(&self, text: &str, font_px: f32) -> f32 {
        match &self.font {
            Some(font) => text_size(PxScale::from(font_px), font, text).0 as f32,
            None => estimate_text_width(text, font_px),
        }
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32, font_px: f32, color: Color) {
        if let Some(font) = &self.font {
            draw_text_mut(
                &mut self.image,
                Rgba(color.0),
                x.round() as i32,
                y.round() as i32,
                PxScale::from(font_px),
                font,
                text,
            );
        }
    }
}

/// A recorded draw call
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Clear,
    Image { width: u32, height: u32, alpha: f32 },
    StrokeRect { rect: PixelRect, color: Color, line_width: u32 },
    FillRect { rect: PixelRect, color: Color },
    Text { text: String, x: f32, y: f32, font_px: f32, color: Color },
}

/// Surface that keeps draw operations since the last clear
#[derive(Debug, Clone)]
pub struct RecordingSurface {
    width: u32,
    height: u32,
    ops: Vec<DrawOp>,
}

impl RecordingSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ops: Vec::new(),
        }
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }
}

impl Surface for RecordingSurface {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn clear(&mut self) {
        self.ops.clear();
        self.ops.push(DrawOp::Clear);
    }

    fn draw_image(&mut self, image: &RgbaImage, alpha: f32) {
        self.ops.push(DrawOp::Image {
            width: image.width(),
            height: image.height(),
            alpha,
        });
    }

    fn stroke_rect(&mut self, rect: PixelRect, color: Color, line_width: u32) {
        self.ops.push(DrawOp::StrokeRect { rect, color, line_width });
    }

    fn fill_rect(&mut self, rect: PixelRect, color: Color) {
        self.ops.push(DrawOp::FillRect { rect, color });
    }

    fn measure_text(&self, text: &str, font_px: f32) -> f32 {
        estimate_text_width(text, font_px)
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32, font_px: f32, color: Color) {
        self.ops.push(DrawOp::Text {
            text: text.to_string(),
            x,
            y,
            font_px,
            color,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_over_transparent() {
        let mut dst = Rgba([0, 0, 0, 0]);
        blend_pixel(&mut dst, Rgba([200, 100, 50, 255]), 0.4);
        assert_eq!(dst, Rgba([200, 100, 50, 102]));
    }

    #[test]
    fn test_blend_over_opaque() {
        let mut dst = Rgba([0, 0, 0, 255]);
        blend_pixel(&mut dst, Rgba([250, 0, 0, 255]), 0.4);
        assert_eq!(dst, Rgba([100, 0, 0, 255]));
    }

    #[test]
    fn test_stroke_is_hollow() {
        let mut surface = RasterSurface::new(40, 40);
        surface.stroke_rect(PixelRect::new(5.0, 5.0, 20.0, 20.0), Color::VEHICLE, 3);
        let img = surface.image();
        assert_eq!(img.get_pixel(5, 5)[3], 255);
        assert_eq!(img.get_pixel(24, 24)[3], 255);
        assert_eq!(img.get_pixel(15, 15)[3], 0);
        assert_eq!(img.get_pixel(30, 30)[3], 0);
    }

    #[test]
    fn test_out_of_bounds_rects_are_clipped() {
        let mut surface = RasterSurface::new(20, 20);
        surface.stroke_rect(PixelRect::new(-50.0, -50.0, 1e6, 1e6), Color::SIGN, 3);
        surface.fill_rect(PixelRect::new(15.0, 15.0, 100.0, 100.0), Color::LANE);
        surface.fill_rect(PixelRect::new(5.0, 5.0, -3.0, 4.0), Color::LANE);
        assert_eq!(surface.image().get_pixel(19, 19), &Rgba(Color::LANE.0));
    }

    #[test]
    fn test_clear_erases_everything() {
        let mut surface = RasterSurface::new(10, 10);
        surface.fill_rect(PixelRect::new(0.0, 0.0, 10.0, 10.0), Color::WHITE);
        assert!(!surface.is_blank());
        surface.clear();
        assert!(surface.is_blank());
    }

    #[test]
    fn test_draw_image_scales_to_fill() {
        let mut surface = RasterSurface::new(8, 4);
        let mask = RgbaImage::from_pixel(2, 1, Rgba([0, 255, 0, 255]));
        surface.draw_image(&mask, 1.0);
        assert!(surface.image().pixels().all(|p| p[1] == 255 && p[3] == 255));
    }

    #[test]
    fn test_bundled_font_measures_and_paints() {
        let mut surface = RasterSurface::new(120, 30);
        let width = surface.measure_text("Car 88%", 14.0);
        assert!(width > 20.0 && width < 100.0, "unexpected width {}", width);

        surface.fill_text("Car 88%", 2.0, 5.0, 14.0, Color::WHITE);
        assert!(!surface.is_blank());
    }

    #[test]
    fn test_text_width_estimate() {
        let surface = RecordingSurface::new(10, 10);
        assert!((surface.measure_text("Car 88%", 10.0) - 42.0).abs() < 1e-3);
    }
}
