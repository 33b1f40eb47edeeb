//! Perception backend client

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ClientError;

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL, e.g. `http://localhost:8000`
    pub base_url: String,
    /// Timeout for `/perception/analyze` (ms)
    pub request_timeout_ms: u64,
    /// Timeout for `/health` (ms)
    pub health_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            request_timeout_ms: 10_000,
            health_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    image_base64: &'a str,
}

/// One detection as reported by the backend, absolute corner pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDetection {
    /// [x1, y1, x2, y2] in source-frame pixels
    pub bbox: [f64; 4],
    pub confidence: f64,
    pub label: String,
    #[serde(default)]
    pub class_id: i64,
}

/// Response of `POST /perception/analyze`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionResponse {
    pub detections: Vec<BackendDetection>,
    /// Base64 PNG, same size as the submitted frame
    #[serde(default)]
    pub lane_mask_base64: String,
    pub inference_time_ms: f64,
    pub fps: f64,
}

/// Response of `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<f64>,
}

impl HealthStatus {
    pub fn offline() -> Self {
        Self {
            status: "offline".to_string(),
            uptime_seconds: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Anything that can turn an encoded frame into detections
pub trait FrameAnalyzer: Send + Sync + 'static {
    fn analyze_frame(
        &self,
        image_base64: String,
    ) -> impl Future<Output = Result<PerceptionResponse, ClientError>> + Send;
}

/// HTTP client for the perception backend
#[derive(Debug, Clone)]
pub struct PerceptionClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl PerceptionClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Liveness check; never fails and never waits past the health timeout
    pub async fn check_health(&self) -> HealthStatus {
        let timeout = Duration::from_millis(self.config.health_timeout_ms);
        let request = async {
            let resp = self.http.get(self.url("/health")).timeout(timeout).send().await?;
            resp.error_for_status()?.json::<HealthStatus>().await
        };

        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(status)) => {
                debug!("Backend health: {}", status.status);
                status
            }
            Ok(Err(e)) => {
                debug!("Health check failed: {}", e);
                HealthStatus::offline()
            }
            Err(_) => {
                debug!("Health check timed out after {}ms", self.config.health_timeout_ms);
                HealthStatus::offline()
            }
        }
    }
}

impl FrameAnalyzer for PerceptionClient {
    async fn analyze_frame(&self, image_base64: String) -> Result<PerceptionResponse, ClientError> {
        let resp = self
            .http
            .post(self.url("/perception/analyze"))
            .timeout(Duration::from_millis(self.config.request_timeout_ms))
            .json(&AnalyzeRequest {
                image_base64: &image_base64,
            })
            .send()
            .await
            .map_err(|e| {
                warn!("Perception backend unreachable: {}", e);
                ClientError::Network(e.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            warn!("Perception backend returned {}", status);
            return Err(ClientError::Backend {
                status: status.as_u16(),
            });
        }

        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }
}
