//! Perception Service Clients
//!
//! Stateless request/response wrappers around two external services:
//! - the perception backend (object detection + lane segmentation)
//! - the generative scene-analysis service
//!
//! No retries and no pooling guarantees; every call stands alone.

mod analysis;
mod backend;

pub use analysis::{AnalysisConfig, SceneAnalyst, EMPTY_ANALYSIS, FAILED_ANALYSIS, MISSING_KEY, SYSTEM_PROMPT};
pub use backend::{
    BackendDetection, ClientConfig, FrameAnalyzer, HealthStatus, PerceptionClient, PerceptionResponse,
};

use thiserror::Error;

/// Errors from the perception backend
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure (connect, timeout, reset)
    #[error("Network error: {0}")]
    Network(String),

    /// Backend answered with a non-2xx status
    #[error("Backend returned HTTP {status}")]
    Backend { status: u16 },

    /// Response body did not match the contract
    #[error("Invalid backend response: {0}")]
    Decode(String),

    /// Client could not be constructed
    #[error("Client configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}
