//! Live Capture Routes

use axum::{extract::State, Json};
use capture_loop::CaptureStatus;
use metrics::counter;
use tracing::{info, warn};

use crate::routes::view::ViewResponse;
use crate::{DashboardError, SharedState};

/// Start or stop live capture.
///
/// Stopping returns the overlay to the current demo scene.
pub async fn toggle_live(State(state): State<SharedState>) -> Result<Json<ViewResponse>, DashboardError> {
    let mut state = state.write().await;
    if state.reconcile_capture().await {
        // The session already ended; the view is back to static
        return Ok(Json(ViewResponse::from_state(&state)));
    }
    match state.capture.toggle().await {
        Ok(CaptureStatus::Capturing) => {
            state.view.go_live();
            info!("Live mode on");
        }
        Ok(CaptureStatus::Idle) => {
            state.view.go_static();
            state.show_scenario();
            info!("Live mode off");
        }
        Err(e) => {
            counter!("live_start_failures_total").increment(1);
            warn!("Live mode unavailable: {}", e);
            state.view.go_static();
            return Err(e.into());
        }
    }
    Ok(Json(ViewResponse::from_state(&state)))
}

/// Move to the next demo scene (static mode only)
pub async fn next_scenario(State(state): State<SharedState>) -> Result<Json<ViewResponse>, DashboardError> {
    let mut state = state.write().await;
    state.reconcile_capture().await;
    if state.view.is_live() {
        return Err(DashboardError::WrongMode("live"));
    }
    let image = state.view.next_scenario();
    state.show_scenario();
    info!("Scenario changed to {}", image);
    Ok(Json(ViewResponse::from_state(&state)))
}
