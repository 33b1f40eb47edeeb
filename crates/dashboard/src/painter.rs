//! Background overlay painter
//!
//! Repaints the raster overlay on every overlay state change and keeps the
//! latest PNG for the `/overlay.png` route. Lane masks decode off-thread;
//! a decoded mask repaints the whole frame only if it is still current,
//! and the previous one stays up until then.

use std::sync::Arc;

use capture_loop::OverlayState;
use image::RgbaImage;
use overlay::{DecodedMask, MaskLoader, OverlayError, OverlayRenderer, RasterSurface};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};

/// Latest rendered overlay, shared with the HTTP handlers
pub type RenderedOverlay = Arc<RwLock<Option<Vec<u8>>>>;

pub struct OverlayPainter {
    renderer: OverlayRenderer,
    surface: RasterSurface,
    loader: MaskLoader,
    output: RenderedOverlay,
    /// Encoded source and decoded image of the mask on screen
    mask: Option<(String, Arc<RgbaImage>)>,
    /// Encoded source of the mask being decoded
    pending: Option<String>,
}

impl OverlayPainter {
    pub fn new(renderer: OverlayRenderer, surface: RasterSurface, output: RenderedOverlay) -> Self {
        Self {
            renderer,
            surface,
            loader: MaskLoader::new(),
            output,
            mask: None,
            pending: None,
        }
    }

    /// Run until the overlay store is dropped
    pub async fn run(mut self, mut rx: watch::Receiver<OverlayState>) {
        let (mask_tx, mut mask_rx) = mpsc::channel::<(String, DecodedMask)>(4);
        info!(
            "Overlay painter started ({}x{})",
            self.surface.image().width(),
            self.surface.image().height()
        );

        loop {
            let snapshot = rx.borrow_and_update().clone();
            self.request_mask(&snapshot, &mask_tx);
            if let Err(e) = self.paint(&snapshot).await {
                warn!("Overlay paint failed: {}", e);
            }

            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some((source, decoded)) = mask_rx.recv() => {
                    if self.loader.is_current(decoded.generation) {
                        debug!("Lane mask generation {} ready", decoded.generation);
                        self.pending = None;
                        self.mask = Some((source, decoded.image));
                    }
                }
            }
        }
        info!("Overlay painter stopped");
    }

    /// Start decoding the snapshot's mask unless it is shown or in flight
    fn request_mask(&mut self, snapshot: &OverlayState, mask_tx: &mpsc::Sender<(String, DecodedMask)>) {
        let Some(encoded) = snapshot.lane_mask.as_ref() else {
            if self.mask.is_some() || self.pending.is_some() {
                self.loader.invalidate();
                self.mask = None;
                self.pending = None;
            }
            return;
        };

        let shown = self.mask.as_ref().is_some_and(|(src, _)| src == encoded);
        if shown || self.pending.as_ref() == Some(encoded) {
            return;
        }

        let ticket = self.loader.begin();
        self.pending = Some(encoded.clone());
        let loader = self.loader.clone();
        let source = encoded.clone();
        let tx = mask_tx.clone();
        tokio::spawn(async move {
            match loader.load(ticket, source.clone()).await {
                Ok(Some(decoded)) => {
                    let _ = tx.send((source, decoded)).await;
                }
                Ok(None) => {}
                Err(e) => warn!("Lane mask dropped: {}", e),
            }
        });
    }

    /// Mask to blend for `snapshot`. The last decoded mask stays up while
    /// its replacement decodes; none once the snapshot carries no mask.
    fn current_mask(&self, snapshot: &OverlayState) -> Option<Arc<RgbaImage>> {
        snapshot
            .lane_mask
            .as_ref()
            .and(self.mask.as_ref())
            .map(|(_, image)| Arc::clone(image))
    }

    /// Full repaint of the current snapshot
    async fn paint(&mut self, snapshot: &OverlayState) -> Result<(), OverlayError> {
        let mask = self.current_mask(snapshot);

        self.renderer
            .render(&mut self.surface, &snapshot.detections, mask.as_deref(), snapshot.show_mask);
        let png = self.surface.to_png()?;
        *self.output.write().await = Some(png);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use capture_loop::{FrameSample, InferenceMetrics, InferenceUpdate, OverlayStore};
    use image::Rgba;
    use overlay::{demo_detections, Detection, PercentBox, RenderStyle};
    use std::time::Duration;

    fn spawn_painter(store: &OverlayStore) -> RenderedOverlay {
        let output: RenderedOverlay = Arc::new(RwLock::new(None));
        let painter = OverlayPainter::new(
            OverlayRenderer::new(RenderStyle::default()),
            RasterSurface::new(100, 100),
            Arc::clone(&output),
        );
        tokio::spawn(painter.run(store.subscribe()));
        output
    }

    async fn wait_for_pixel(output: &RenderedOverlay, x: u32, y: u32, expected: [u8; 4]) -> RgbaImage {
        let mut last = None;
        for _ in 0..200 {
            if let Some(png) = output.read().await.clone() {
                let img = image::load_from_memory(&png).unwrap().to_rgba8();
                if img.get_pixel(x, y).0 == expected {
                    return img;
                }
                last = Some(img.get_pixel(x, y).0);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pixel ({}, {}) never became {:?}, last {:?}", x, y, expected, last);
    }

    fn encoded_mask() -> String {
        let img = RgbaImage::from_pixel(10, 10, Rgba([0, 255, 0, 255]));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(buf.into_inner())
        )
    }

    #[tokio::test]
    async fn test_static_scene_painted() {
        let store = OverlayStore::new();
        let output = spawn_painter(&store);

        store.show_static(FrameSample::from_url("https://example.com/a.jpg"), demo_detections());

        // Left edge of the Car box: x = 15% of 100, y = 60..75
        wait_for_pixel(&output, 15, 70, [0x3b, 0x82, 0xf6, 0xff]).await;
    }

    #[tokio::test]
    async fn test_mask_painted_once_decoded() {
        let store = OverlayStore::new();
        let output = spawn_painter(&store);

        let session = store.begin_session();
        store.apply_inference(InferenceUpdate {
            session,
            sequence: 1,
            detections: vec![Detection::new("1", "car", 0.9, PercentBox::new(10.0, 10.0, 10.0, 10.0))],
            lane_mask: Some(encoded_mask()),
            metrics: InferenceMetrics {
                inference_time_ms: 10.0,
                fps: 30.0,
            },
        });

        let img = wait_for_pixel(&output, 50, 50, [0, 255, 0, 102]).await;
        // Box stroke still on top of the mask
        assert_eq!(img.get_pixel(10, 15).0, [0x3b, 0x82, 0xf6, 0xff]);
    }

    #[tokio::test]
    async fn test_mask_hidden_when_segmentation_off() {
        let store = OverlayStore::new();
        let output = spawn_painter(&store);

        let session = store.begin_session();
        store.apply_inference(InferenceUpdate {
            session,
            sequence: 1,
            detections: Vec::new(),
            lane_mask: Some(encoded_mask()),
            metrics: InferenceMetrics {
                inference_time_ms: 10.0,
                fps: 30.0,
            },
        });
        wait_for_pixel(&output, 50, 50, [0, 255, 0, 102]).await;

        store.set_show_mask(false);
        wait_for_pixel(&output, 50, 50, [0, 0, 0, 0]).await;
    }

    fn painter_showing(encoded: &str) -> OverlayPainter {
        let mut painter = OverlayPainter::new(
            OverlayRenderer::new(RenderStyle::default()),
            RasterSurface::new(10, 10),
            Arc::new(RwLock::new(None)),
        );
        let image = RgbaImage::from_pixel(10, 10, Rgba([0, 255, 0, 255]));
        painter.mask = Some((encoded.to_string(), Arc::new(image)));
        painter
    }

    #[test]
    fn test_previous_mask_kept_while_next_decodes() {
        let painter = painter_showing("mask-a");
        let snapshot = OverlayState {
            lane_mask: Some("mask-b".to_string()),
            ..Default::default()
        };
        let mask = painter.current_mask(&snapshot).unwrap();
        assert_eq!(mask.get_pixel(0, 0).0, [0, 255, 0, 255]);
    }

    #[test]
    fn test_mask_dropped_when_snapshot_has_none() {
        let painter = painter_showing("mask-a");
        assert!(painter.current_mask(&OverlayState::default()).is_none());
    }

    #[tokio::test]
    async fn test_new_mask_does_not_blank_current_one() {
        let store = OverlayStore::new();
        let output = spawn_painter(&store);
        let metrics = InferenceMetrics {
            inference_time_ms: 10.0,
            fps: 30.0,
        };

        let session = store.begin_session();
        store.apply_inference(InferenceUpdate {
            session,
            sequence: 1,
            detections: Vec::new(),
            lane_mask: Some(encoded_mask()),
            metrics,
        });
        wait_for_pixel(&output, 50, 50, [0, 255, 0, 102]).await;

        // A mask that never decodes; the first one stays on screen
        store.apply_inference(InferenceUpdate {
            session,
            sequence: 2,
            detections: vec![Detection::new("1", "car", 0.9, PercentBox::new(10.0, 10.0, 10.0, 10.0))],
            lane_mask: Some("data:image/png;base64,AAAA".to_string()),
            metrics,
        });
        let img = wait_for_pixel(&output, 10, 15, [0x3b, 0x82, 0xf6, 0xff]).await;
        assert_eq!(img.get_pixel(50, 50).0, [0, 255, 0, 102]);
    }

    #[tokio::test]
    async fn test_stop_clears_overlay() {
        let store = OverlayStore::new();
        let output = spawn_painter(&store);

        store.show_static(FrameSample::from_url("https://example.com/a.jpg"), demo_detections());
        wait_for_pixel(&output, 15, 70, [0x3b, 0x82, 0xf6, 0xff]).await;

        store.end_session();
        wait_for_pixel(&output, 15, 70, [0, 0, 0, 0]).await;
    }
}
