//! View State Routes

use axum::{extract::State, Json};
use capture_loop::CaptureStatus;
use serde::{Deserialize, Serialize};

use crate::view::{Tab, ViewState};
use crate::{AppState, SharedState};

/// View state plus the capture loop status
#[derive(Debug, Serialize)]
pub struct ViewResponse {
    #[serde(flatten)]
    pub view: ViewState,
    pub capture: CaptureStatus,
}

impl ViewResponse {
    pub fn from_state(state: &AppState) -> Self {
        Self {
            view: state.view.clone(),
            capture: state.capture.status(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TabRequest {
    pub tab: Tab,
}

#[derive(Debug, Deserialize)]
pub struct SegmentationRequest {
    pub enabled: bool,
}

/// Get the view state
pub async fn get_view(State(state): State<SharedState>) -> Json<ViewResponse> {
    let state = state.read().await;
    Json(ViewResponse::from_state(&state))
}

/// Switch the active tab
pub async fn set_tab(State(state): State<SharedState>, Json(req): Json<TabRequest>) -> Json<ViewResponse> {
    let mut state = state.write().await;
    state.view.set_tab(req.tab);
    Json(ViewResponse::from_state(&state))
}

/// Show or hide the lane mask
pub async fn set_segmentation(
    State(state): State<SharedState>,
    Json(req): Json<SegmentationRequest>,
) -> Json<ViewResponse> {
    let mut state = state.write().await;
    state.view.set_segmentation(req.enabled);
    state.store.set_show_mask(req.enabled);
    Json(ViewResponse::from_state(&state))
}
