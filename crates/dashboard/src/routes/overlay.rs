//! Overlay and Analysis Routes

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    Json,
};
use capture_loop::OverlayState;
use metrics::counter;
use serde::Serialize;
use tracing::info;

use crate::{DashboardError, SharedState};

/// Current overlay state
#[derive(Debug, Serialize)]
pub struct OverlayResponse {
    #[serde(flatten)]
    pub state: OverlayState,
    pub has_mask: bool,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub analysis: String,
}

/// Get detections, frame and timing
pub async fn get_overlay(State(state): State<SharedState>) -> Json<OverlayResponse> {
    let snapshot = state.read().await.store.snapshot();
    Json(OverlayResponse {
        has_mask: snapshot.has_mask(),
        state: snapshot,
    })
}

/// Latest rendered overlay as PNG
pub async fn get_overlay_png(State(state): State<SharedState>) -> Result<impl IntoResponse, DashboardError> {
    let rendered = state.read().await.rendered.clone();
    let png = rendered.read().await.clone().ok_or(DashboardError::NotReady)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png))
}

/// Ask the scene-analysis service about the frame on screen
pub async fn request_analysis(State(state): State<SharedState>) -> Result<Json<AnalysisResponse>, DashboardError> {
    let (analyst, snapshot) = {
        let state = state.read().await;
        (state.analyst.clone(), state.store.snapshot())
    };
    let frame = snapshot.frame.ok_or(DashboardError::NoFrame)?;

    counter!("scene_analysis_requests_total").increment(1);
    info!("Scene analysis requested ({} detections)", snapshot.detections.len());
    let text = analyst.scene_analysis(frame.image.as_str(), &snapshot.detections).await;
    state.write().await.view.set_analysis(text.clone());
    Ok(Json(AnalysisResponse { analysis: text }))
}
