//! Camera-like video sources
//!
//! A source must be opened before frames can be grabbed and only one
//! acquisition may be active at a time. Closing releases it.

use std::path::{Path, PathBuf};
use std::time::Instant;

use image::{Rgb, RgbImage};
use tracing::{debug, info, warn};

use crate::{CameraError, VideoFrame};

/// Exclusive, camera-like frame source
pub trait VideoSource: Send + Sync {
    /// Acquire the device. Fails with [`CameraError::Busy`] if already held.
    fn open(&mut self) -> Result<(), CameraError>;

    /// Snapshot the current frame
    fn grab(&mut self) -> Result<VideoFrame, CameraError>;

    /// Release the device. Closing an idle source is a no-op.
    fn close(&mut self);

    /// Whether the device is currently acquired
    fn is_open(&self) -> bool;

    /// Human readable name for logs
    fn name(&self) -> &str;
}

/// Synthetic road scene: sky, asphalt, and scrolling lane dashes
pub struct TestPatternSource {
    width: u32,
    height: u32,
    opened_at: Option<Instant>,
    sequence: u32,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            opened_at: None,
            sequence: 0,
        }
    }

    fn render(&self) -> RgbImage {
        let horizon = self.height * 2 / 5;
        let center = self.width / 2;
        let phase = self.sequence % 40;

        RgbImage::from_fn(self.width, self.height, |x, y| {
            if y < horizon {
                // Sky gets lighter towards the horizon
                let t = (y * 80 / horizon.max(1)) as u8;
                return Rgb([90 + t, 140 + t, 200]);
            }
            // Road narrows towards the horizon
            let depth = y - horizon;
            let half_lane = 20 + depth * self.width / (2 * self.height);
            let dx = x.abs_diff(center);
            let on_edge = dx.abs_diff(half_lane) < 3 + depth / 60;
            let on_dash = dx < 2 + depth / 80 && (depth + phase) % 40 < 20;
            if on_edge || on_dash {
                Rgb([235, 235, 220])
            } else {
                Rgb([60, 62, 66])
            }
        })
    }
}

impl VideoSource for TestPatternSource {
    fn open(&mut self) -> Result<(), CameraError> {
        if self.opened_at.is_some() {
            return Err(CameraError::Busy);
        }
        info!("Test pattern source opened ({}x{})", self.width, self.height);
        self.opened_at = Some(Instant::now());
        self.sequence = 0;
        Ok(())
    }

    fn grab(&mut self) -> Result<VideoFrame, CameraError> {
        let opened_at = self.opened_at.ok_or(CameraError::NotInitialized)?;
        let img = self.render();
        let frame = VideoFrame::from_image(
            img,
            opened_at.elapsed().as_nanos() as u64,
            self.sequence,
        );
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    fn close(&mut self) {
        if self.opened_at.take().is_some() {
            info!("Test pattern source released after {} frames", self.sequence);
        }
    }

    fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }

    fn name(&self) -> &str {
        "test-pattern"
    }
}

/// Replays still images as if they were a camera feed.
///
/// The path may be a single image or a directory; directories are
/// played in file-name order and looped.
pub struct ImageSequenceSource {
    path: PathBuf,
    frames: Vec<RgbImage>,
    cursor: usize,
    opened_at: Option<Instant>,
    sequence: u32,
}

impl ImageSequenceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frames: Vec::new(),
            cursor: 0,
            opened_at: None,
            sequence: 0,
        }
    }

    fn collect_paths(path: &Path) -> Result<Vec<PathBuf>, CameraError> {
        if path.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }
        let entries = std::fs::read_dir(path)
            .map_err(|e| CameraError::Open(format!("{}: {}", path.display(), e)))?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        Ok(paths)
    }
}

impl VideoSource for ImageSequenceSource {
    fn open(&mut self) -> Result<(), CameraError> {
        if self.opened_at.is_some() {
            return Err(CameraError::Busy);
        }
        if !self.path.exists() {
            return Err(CameraError::Open(format!("{} does not exist", self.path.display())));
        }

        let mut frames = Vec::new();
        for path in Self::collect_paths(&self.path)? {
            match image::open(&path) {
                Ok(img) => frames.push(img.to_rgb8()),
                Err(e) => warn!("Skipping unreadable frame {}: {}", path.display(), e),
            }
        }
        if frames.is_empty() {
            return Err(CameraError::Open(format!(
                "no decodable images under {}",
                self.path.display()
            )));
        }

        info!("Image sequence opened: {} frames from {}", frames.len(), self.path.display());
        self.frames = frames;
        self.cursor = 0;
        self.sequence = 0;
        self.opened_at = Some(Instant::now());
        Ok(())
    }

    fn grab(&mut self) -> Result<VideoFrame, CameraError> {
        let opened_at = self.opened_at.ok_or(CameraError::NotInitialized)?;
        let img = self
            .frames
            .get(self.cursor)
            .cloned()
            .ok_or_else(|| CameraError::Stream("sequence is empty".to_string()))?;
        debug!("Replaying frame {} of {}", self.cursor + 1, self.frames.len());
        self.cursor = (self.cursor + 1) % self.frames.len();

        let frame = VideoFrame::from_image(img, opened_at.elapsed().as_nanos() as u64, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    fn close(&mut self) {
        if self.opened_at.take().is_some() {
            self.frames.clear();
            info!("Image sequence released: {}", self.path.display());
        }
    }

    fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }

    fn name(&self) -> &str {
        "image-sequence"
    }
}
