//! Session Routes

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::session::UserIdentity;
use crate::{DashboardError, SharedState};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: Option<UserIdentity>,
}

/// Current user, if any
pub async fn get_session(State(state): State<SharedState>) -> Json<SessionResponse> {
    let state = state.read().await;
    Json(SessionResponse {
        user: state.view.user().cloned(),
    })
}

pub async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, DashboardError> {
    let user = UserIdentity::login(&req.name, &req.email)?;
    let mut state = state.write().await;
    state.sessions.save(&user)?;
    state.view.login(user.clone());
    info!("User {} logged in", user.email);
    Ok(Json(SessionResponse { user: Some(user) }))
}

pub async fn logout(State(state): State<SharedState>) -> Result<Json<SessionResponse>, DashboardError> {
    let mut state = state.write().await;
    state.sessions.clear()?;
    if let Some(user) = state.view.user() {
        info!("User {} logged out", user.email);
    }
    state.view.logout();
    Ok(Json(SessionResponse { user: None }))
}
