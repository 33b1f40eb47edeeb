//! Camera Capture Library for the Perception Dashboard
//!
//! Provides camera-like video sources with exclusive acquisition and
//! the frame encoding used by the capture loop.
//! Supports:
//! - Synthetic road test pattern (always available)
//! - Image sequence replay (recorded frames stand in for a live camera)

pub mod frame;
pub mod source;

pub use frame::VideoFrame;
pub use source::{ImageSequenceSource, TestPatternSource, VideoSource};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Camera access denied: {0}")]
    PermissionDenied(String),

    #[error("Camera already acquired")]
    Busy,

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Frame encoding failed: {0}")]
    Encode(String),

    #[error("Camera not initialized")]
    NotInitialized,
}

/// Where frames come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    /// Generated road scene
    TestPattern,
    /// Replay of still images, looped in file-name order
    Images { path: PathBuf },
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Frame source
    pub source: SourceKind,
    /// Native capture width
    pub width: u32,
    /// Native capture height
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::TestPattern,
            width: 1280,
            height: 720,
        }
    }
}

impl CameraConfig {
    /// Build the configured source, not yet acquired
    pub fn build_source(&self) -> Box<dyn VideoSource> {
        match &self.source {
            SourceKind::TestPattern => Box::new(TestPatternSource::new(self.width, self.height)),
            SourceKind::Images { path } => Box::new(ImageSequenceSource::new(path.clone())),
        }
    }
}
