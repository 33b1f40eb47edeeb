//! Dashboard configuration
//!
//! Layered: built-in defaults, then an optional TOML file, then
//! `PERCEPTION__*` environment variables (`__` separates sections).

use std::path::{Path, PathBuf};

use camera_capture::CameraConfig;
use capture_loop::CaptureConfig;
use config::{Config, Environment, File};
use overlay::RenderStyle;
use perception_client::{AnalysisConfig, ClientConfig};
use serde::{Deserialize, Serialize};

use crate::DashboardError;

/// Environment variables consulted for the analysis API key, in order
const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// Full dashboard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// HTTP listen address
    pub listen_addr: String,
    /// Maximum log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Prometheus exporter address; disabled when unset
    pub metrics_addr: Option<String>,
    /// Backend health polling interval (ms)
    pub health_poll_ms: u64,
    /// Where the logged-in identity is kept between runs
    pub session_file: Option<PathBuf>,
    /// Overrides the bundled label font
    pub font_path: Option<PathBuf>,
    /// Overlay surface size
    pub surface_width: u32,
    pub surface_height: u32,
    pub backend: ClientConfig,
    pub analysis: AnalysisConfig,
    pub capture: CaptureConfig,
    pub camera: CameraConfig,
    pub render: RenderStyle,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            log_level: "info".to_string(),
            metrics_addr: None,
            health_poll_ms: 5_000,
            session_file: Some(PathBuf::from("dashboard-session.json")),
            font_path: None,
            surface_width: 1280,
            surface_height: 720,
            backend: ClientConfig::default(),
            analysis: AnalysisConfig::default(),
            capture: CaptureConfig::default(),
            camera: CameraConfig::default(),
            render: RenderStyle::default(),
        }
    }
}

impl DashboardConfig {
    /// Load configuration. An explicit file must exist; otherwise
    /// `dashboard.toml` in the working directory is used if present.
    pub fn load(path: Option<&Path>) -> Result<Self, DashboardError> {
        let defaults = Config::try_from(&DashboardConfig::default())?;
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name("dashboard").required(false),
        };

        let mut cfg: DashboardConfig = Config::builder()
            .add_source(defaults)
            .add_source(file)
            .add_source(Environment::with_prefix("PERCEPTION").separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;

        cfg.analysis.api_key = resolve_api_key(cfg.analysis.api_key.take(), |var| std::env::var(var).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), DashboardError> {
        if self.surface_width == 0 || self.surface_height == 0 {
            return Err(DashboardError::Config("surface size must be positive".to_string()));
        }
        if self.capture.buffer_width == 0 || self.capture.buffer_height == 0 {
            return Err(DashboardError::Config("capture buffer size must be positive".to_string()));
        }
        if self.capture.period_ms == 0 {
            return Err(DashboardError::Config("capture period must be positive".to_string()));
        }
        Ok(())
    }
}

/// Explicit key wins, then the well-known environment variables.
/// Blank values count as absent.
fn resolve_api_key(explicit: Option<String>, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    explicit
        .into_iter()
        .chain(API_KEY_VARS.iter().filter_map(|var| lookup(var)))
        .find(|key| !key.trim().is_empty())
}
