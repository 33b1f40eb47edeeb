//! Live Capture Loop
//!
//! Drives the live perception path:
//! - Fixed-period frame capture into an off-screen buffer
//! - Non-blocking dispatch to the inference backend
//! - Wholesale overlay state publishing with stale-response rejection

mod capture;
mod state;

pub use capture::{map_detections, CaptureConfig, CaptureLoop, CaptureStatus};
pub use state::{
    ApplyOutcome, FrameSample, ImageRef, InferenceMetrics, InferenceUpdate, OverlayState, OverlayStore,
};

use thiserror::Error;

/// Capture loop error types
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Camera absent or access denied; the loop stays idle
    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    /// The source was lost when a capture task crashed
    #[error("Video source lost after a capture task failure")]
    SourceLost,
}
