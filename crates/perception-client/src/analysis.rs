//! Generative scene analysis
//!
//! Sends the current frame plus the detection list to a Gemini-style
//! `generateContent` endpoint. Failures never cross this boundary: the
//! caller always gets displayable text.

use std::time::Duration;

use base64::Engine;
use overlay::Detection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::ClientError;

/// Shown when no API key is configured
pub const MISSING_KEY: &str = "API Key missing. Please check your environment configuration.";
/// Shown on transport, quota or parse failures
pub const FAILED_ANALYSIS: &str = "Failed to analyze scene. High load or invalid request.";
/// Shown when the service answers without text
pub const EMPTY_ANALYSIS: &str = "No analysis available.";

pub const SYSTEM_PROMPT: &str = "You are a world-class ADAS (Advanced Driver Assistance Systems) Perception Engineer at a leading automotive company like BMW. \n\
Analyze the visual perception frame from a multi-task pipeline (YOLOv8 for detection, DeepLabV3 for lane segmentation). \n\
Evaluate the scene using professional automotive terminology (ego-vehicle path, TTC - Time To Collision, ODD - Operational Design Domain, ISO 26262 safety implications). \n\
Your goal is to provide a safety-critical assessment of the detected objects (Vehicles, Pedestrians, Signs) and the lane segmentation accuracy.";

/// Scene-analysis service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub base_url: String,
    pub model: String,
    /// Absent key fails closed
    #[serde(default)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub timeout_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-3-flash-preview".to_string(),
            api_key: None,
            temperature: 0.7,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// Client for the scene-analysis service
#[derive(Debug, Clone)]
pub struct SceneAnalyst {
    config: AnalysisConfig,
    http: reqwest::Client,
}

impl SceneAnalyst {
    pub fn new(config: AnalysisConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        Ok(Self { config, http })
    }

    pub fn has_credentials(&self) -> bool {
        self.config
            .api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }

    /// Natural-language assessment of `image` (data URI, raw base64 JPEG or
    /// an http(s) URL) given the detections shown on it.
    pub async fn scene_analysis(&self, image: &str, detections: &[Detection]) -> String {
        let api_key = match self.config.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => {
                warn!("Scene analysis requested without an API key");
                return MISSING_KEY.to_string();
            }
        };

        match self.request(&api_key, image, detections).await {
            Ok(Some(text)) => {
                info!("Scene analysis received ({} chars)", text.len());
                text
            }
            Ok(None) => EMPTY_ANALYSIS.to_string(),
            Err(e) => {
                error!("Scene analysis failed: {}", e);
                FAILED_ANALYSIS.to_string()
            }
        }
    }

    async fn request(&self, api_key: &str, image: &str, detections: &[Detection]) -> Result<Option<String>, String> {
        let image_data = self.inline_image(image).await?;
        let detections_json = serde_json::to_string(detections).map_err(|e| e.to_string())?;

        let body = json!({
            "systemInstruction": { "parts": [{ "text": SYSTEM_PROMPT }] },
            "contents": [{
                "role": "user",
                "parts": [
                    { "inlineData": { "mimeType": "image/jpeg", "data": image_data } },
                    { "text": format!(
                        "Analyze this driving scene. The following objects were detected: {}. \
                         Explain what the driver should be aware of and any potential false positives \
                         or occlusion risks in the segmentation mask.",
                        detections_json
                    ) }
                ]
            }],
            "generationConfig": { "temperature": self.config.temperature }
        });

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Connection error: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, text));
        }

        let parsed: GenerateResponse = resp.json().await.map_err(|e| format!("Parse error: {}", e))?;
        let text: String = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect();

        Ok(if text.trim().is_empty() { None } else { Some(text) })
    }

    /// Base64 JPEG payload without any `data:` prefix
    async fn inline_image(&self, image: &str) -> Result<String, String> {
        if image.starts_with("http://") || image.starts_with("https://") {
            let bytes = self
                .http
                .get(image)
                .timeout(Duration::from_millis(self.config.timeout_ms))
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| format!("Image fetch failed: {}", e))?
                .bytes()
                .await
                .map_err(|e| format!("Image fetch failed: {}", e))?;
            return Ok(base64::engine::general_purpose::STANDARD.encode(bytes));
        }
        match image.split_once("base64,") {
            Some((_, payload)) => Ok(payload.to_string()),
            None if !image.trim().is_empty() => Ok(image.trim().to_string()),
            None => Err("empty image".to_string()),
        }
    }
}
