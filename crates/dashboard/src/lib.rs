//! Perception Dashboard Server
//!
//! HTTP front end for the perception pipeline: view state, live capture
//! control, rendered overlays and scene analysis.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use capture_loop::{CaptureError, CaptureLoop, CaptureStatus, FrameSample, OverlayStore};
use overlay::{demo_detections, OverlayRenderer, RasterSurface};
use perception_client::{ClientError, PerceptionClient, SceneAnalyst};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub mod config;
pub mod painter;
mod routes;
pub mod session;
pub mod view;

pub use config::DashboardConfig;
pub use painter::{OverlayPainter, RenderedOverlay};
pub use session::{SessionStore, UserIdentity};
pub use view::{Tab, ViewMode, ViewState};

/// Dashboard error types
#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Invalid login: {0}")]
    InvalidLogin(String),

    #[error("Session storage error: {0}")]
    Session(String),

    #[error("Not available in {0} mode")]
    WrongMode(&'static str),

    #[error("No frame to analyze")]
    NoFrame,

    #[error("Overlay not rendered yet")]
    NotReady,

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for DashboardError {
    fn from(err: ::config::ConfigError) -> Self {
        DashboardError::Config(err.to_string())
    }
}

impl From<CaptureError> for DashboardError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::DeviceUnavailable(msg) => DashboardError::DeviceUnavailable(msg),
            other => DashboardError::DeviceUnavailable(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let status = match &self {
            DashboardError::DeviceUnavailable(_) | DashboardError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            DashboardError::InvalidLogin(_) => StatusCode::BAD_REQUEST,
            DashboardError::WrongMode(_) | DashboardError::NoFrame => StatusCode::CONFLICT,
            DashboardError::Client(_) => StatusCode::BAD_GATEWAY,
            DashboardError::Config(_) | DashboardError::Session(_) | DashboardError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// Application state shared across handlers
pub struct AppState {
    pub config: DashboardConfig,
    pub view: ViewState,
    pub capture: CaptureLoop<PerceptionClient>,
    pub store: OverlayStore,
    pub client: PerceptionClient,
    pub analyst: SceneAnalyst,
    pub sessions: SessionStore,
    /// Latest overlay PNG from the painter
    pub rendered: RenderedOverlay,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
}

pub type SharedState = Arc<RwLock<AppState>>;

impl AppState {
    /// Build the pipeline in static mode, restoring any saved user
    pub fn new(config: DashboardConfig) -> Result<Self, DashboardError> {
        let client = PerceptionClient::new(config.backend.clone())?;
        let analyst = SceneAnalyst::new(config.analysis.clone())?;
        if !analyst.has_credentials() {
            warn!("No scene-analysis API key configured; analysis requests will be declined");
        }

        let store = OverlayStore::new();
        let capture = CaptureLoop::new(
            config.capture.clone(),
            config.camera.build_source(),
            Arc::new(client.clone()),
            store.clone(),
        );

        let sessions = SessionStore::new(config.session_file.clone());
        let view = ViewState::new(sessions.load());
        if let Some(user) = view.user() {
            info!("Restored session for {}", user.email);
        }

        let state = Self {
            config,
            view,
            capture,
            store,
            client,
            analyst,
            sessions,
            rendered: Arc::new(RwLock::new(None)),
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        };
        state.store.set_show_mask(state.view.show_segmentation());
        state.show_scenario();
        Ok(state)
    }

    /// Put the current demo scene on screen
    pub fn show_scenario(&self) {
        self.store
            .show_static(FrameSample::from_url(self.view.scenario_image()), demo_detections());
    }

    /// Drop back to static mode if the capture session died on its own.
    ///
    /// Returns true if the view was switched.
    pub async fn reconcile_capture(&mut self) -> bool {
        let ended = self.capture.reap().await;
        if !ended && !(self.view.is_live() && self.capture.status() == CaptureStatus::Idle) {
            return false;
        }
        warn!("Capture stopped unexpectedly; leaving live mode");
        self.view.go_static();
        self.show_scenario();
        true
    }

    /// Spawn the overlay painter feeding `rendered`
    pub fn start_painter(&self) -> JoinHandle<()> {
        let mut surface = RasterSurface::new(self.config.surface_width, self.config.surface_height);
        if let Some(path) = &self.config.font_path {
            match RasterSurface::load_font(path) {
                Ok(font) => surface = surface.with_font(font),
                Err(e) => warn!("Keeping the bundled label font: {}", e),
            }
        }
        let painter = OverlayPainter::new(
            OverlayRenderer::new(self.config.render.clone()),
            surface,
            Arc::clone(&self.rendered),
        );
        tokio::spawn(painter.run(self.store.subscribe()))
    }
}

/// Poll backend health and record reachability in the view state
pub fn spawn_health_poller(state: SharedState, client: PerceptionClient, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let online = client.check_health().await.is_healthy();
            let mut state = state.write().await;
            state.reconcile_capture().await;
            if state.view.set_backend_online(online) {
                if online {
                    info!("Perception backend online");
                } else {
                    warn!("Perception backend offline");
                }
            }
        }
    })
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: ComponentStatus,
}

/// Component status
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub backend: ComponentHealth,
    pub capture: ComponentHealth,
}

/// Individual component health
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: String,
}

/// Create the application router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/view", get(routes::view::get_view))
        .route("/api/v1/view/tab", post(routes::view::set_tab))
        .route("/api/v1/view/segmentation", post(routes::view::set_segmentation))
        .route("/api/v1/live/toggle", post(routes::live::toggle_live))
        .route("/api/v1/scenario/next", post(routes::live::next_scenario))
        .route("/api/v1/overlay", get(routes::overlay::get_overlay))
        .route("/api/v1/overlay.png", get(routes::overlay::get_overlay_png))
        .route("/api/v1/analysis", post(routes::overlay::request_analysis))
        .route("/api/v1/session", get(routes::session::get_session))
        .route("/api/v1/session/login", post(routes::session::login))
        .route("/api/v1/session/logout", post(routes::session::logout))
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let state = state.read().await;
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let capture = match state.capture.status() {
        CaptureStatus::Capturing => "capturing",
        CaptureStatus::Idle => "idle",
    };
    let response = HealthResponse {
        status: "healthy".to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        components: ComponentStatus {
            backend: ComponentHealth {
                status: if state.view.backend_online() { "online" } else { "offline" }.to_string(),
            },
            capture: ComponentHealth {
                status: capture.to_string(),
            },
        },
    };

    Json(response)
}

/// Initialize logging
pub fn init_logging(level: &str) -> Result<(), DashboardError> {
    let level: Level = level
        .parse()
        .map_err(|_| DashboardError::Config(format!("unknown log level '{}'", level)))?;
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| DashboardError::Config(format!("Failed to set tracing subscriber: {}", e)))
}

/// Install the Prometheus exporter on `addr`
pub fn init_metrics(addr: &str) -> Result<(), DashboardError> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| DashboardError::Config(format!("invalid metrics address '{}': {}", addr, e)))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| DashboardError::Config(format!("metrics exporter: {}", e)))?;
    info!("Prometheus metrics on http://{}/metrics", addr);
    Ok(())
}

/// Run the server until Ctrl-C
pub async fn run_server(config: DashboardConfig) -> Result<(), DashboardError> {
    if let Some(addr) = &config.metrics_addr {
        init_metrics(addr)?;
    }

    let addr = config.listen_addr.clone();
    let poll = Duration::from_millis(config.health_poll_ms.max(1));
    let app_state = AppState::new(config)?;
    let client = app_state.client.clone();
    let painter = app_state.start_painter();

    let state = Arc::new(RwLock::new(app_state));
    let poller = spawn_health_poller(Arc::clone(&state), client, poll);
    let app = create_router(Arc::clone(&state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    info!("Starting dashboard server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    poller.abort();
    painter.abort();
    state.write().await.capture.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use camera_capture::{CameraConfig, CameraError, SourceKind, VideoFrame, VideoSource};
    use capture_loop::CaptureConfig;
    use perception_client::{ClientConfig, MISSING_KEY};
    use serde_json::{json, Value};
    use std::path::{Path, PathBuf};
    use tower::ServiceExt;

    fn test_config(dir: &Path) -> DashboardConfig {
        DashboardConfig {
            session_file: Some(dir.join("session.json")),
            surface_width: 320,
            surface_height: 180,
            backend: ClientConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                request_timeout_ms: 500,
                health_timeout_ms: 200,
            },
            capture: CaptureConfig {
                period_ms: 50,
                buffer_width: 320,
                buffer_height: 180,
                ..Default::default()
            },
            camera: CameraConfig {
                width: 320,
                height: 180,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn test_state(config: DashboardConfig) -> SharedState {
        Arc::new(RwLock::new(AppState::new(config).unwrap()))
    }

    async fn call(state: &SharedState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = create_router(Arc::clone(state)).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(test_config(dir.path()));

        let (status, body) = call(&state, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["components"]["backend"]["status"], "offline");
        assert_eq!(body["components"]["capture"]["status"], "idle");
    }

    #[tokio::test]
    async fn test_initial_view_and_tabs() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(test_config(dir.path()));

        let (_, view) = call(&state, "GET", "/api/v1/view", None).await;
        assert_eq!(view["active_tab"], "dashboard");
        assert_eq!(view["mode"], "static");
        assert_eq!(view["capture"], "idle");

        let (status, view) = call(&state, "POST", "/api/v1/view/tab", Some(json!({ "tab": "metrics" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["active_tab"], "metrics");

        let (status, _) = call(&state, "POST", "/api/v1/view/tab", Some(json!({ "tab": "home" }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(state.read().await.view.active_tab(), Tab::Metrics);
    }

    #[tokio::test]
    async fn test_segmentation_toggle_reaches_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(test_config(dir.path()));

        let (status, view) = call(
            &state,
            "POST",
            "/api/v1/view/segmentation",
            Some(json!({ "enabled": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["show_segmentation"], false);
        assert!(!state.read().await.store.snapshot().show_mask);
    }

    #[tokio::test]
    async fn test_next_scenario_replaces_frame() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(test_config(dir.path()));
        state.write().await.view.set_analysis("stale".to_string());

        let (status, _) = call(&state, "POST", "/api/v1/scenario/next", None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, overlay) = call(&state, "GET", "/api/v1/overlay", None).await;
        assert_eq!(overlay["frame"]["image"]["value"], "https://picsum.photos/id/107/1280/720");
        assert_eq!(overlay["detections"].as_array().unwrap().len(), 4);
        assert_eq!(overlay["has_mask"], false);
        assert!(state.read().await.view.analysis().is_none());
    }

    #[tokio::test]
    async fn test_live_toggle_without_camera() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.camera.source = SourceKind::Images {
            path: PathBuf::from("/nonexistent/frames"),
        };
        let state = test_state(config);

        let (status, body) = call(&state, "POST", "/api/v1/live/toggle", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().starts_with("Camera unavailable"));

        let (_, view) = call(&state, "GET", "/api/v1/view", None).await;
        assert_eq!(view["mode"], "static");
        assert_eq!(view["capture"], "idle");
    }

    /// Opens fine, then every grab fails
    struct BrokenStream {
        open: bool,
    }

    impl VideoSource for BrokenStream {
        fn open(&mut self) -> Result<(), CameraError> {
            self.open = true;
            Ok(())
        }

        fn grab(&mut self) -> Result<VideoFrame, CameraError> {
            Err(CameraError::Stream("cable unplugged".to_string()))
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    async fn go_live_on_broken_stream(state: &SharedState) {
        {
            let mut guard = state.write().await;
            guard.capture = CaptureLoop::new(
                guard.config.capture.clone(),
                Box::new(BrokenStream { open: false }),
                Arc::new(guard.client.clone()),
                guard.store.clone(),
            );
        }
        let (status, view) = call(state, "POST", "/api/v1/live/toggle", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["mode"], "live");

        for _ in 0..200 {
            if state.read().await.capture.status() == CaptureStatus::Idle {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("capture never stopped on a failing source");
    }

    #[tokio::test]
    async fn test_scenario_change_after_source_failure() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(test_config(dir.path()));
        go_live_on_broken_stream(&state).await;

        let (status, view) = call(&state, "POST", "/api/v1/scenario/next", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["mode"], "static");
        assert_eq!(view["capture"], "idle");

        let snapshot = state.read().await.store.snapshot();
        assert_eq!(
            snapshot.frame.unwrap(),
            FrameSample::from_url("https://picsum.photos/id/107/1280/720")
        );
    }

    #[tokio::test]
    async fn test_toggle_after_source_failure_returns_to_static() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(test_config(dir.path()));
        go_live_on_broken_stream(&state).await;

        let (status, view) = call(&state, "POST", "/api/v1/live/toggle", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["mode"], "static");
        assert_eq!(view["capture"], "idle");
        assert_eq!(state.read().await.store.snapshot().detections, demo_detections());

        // The source came back, so live mode can be entered again
        let (status, view) = call(&state, "POST", "/api/v1/live/toggle", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["mode"], "live");
    }

    #[tokio::test]
    async fn test_live_toggle_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(test_config(dir.path()));

        let (status, view) = call(&state, "POST", "/api/v1/live/toggle", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["mode"], "live");
        assert_eq!(view["capture"], "capturing");

        let (status, _) = call(&state, "POST", "/api/v1/scenario/next", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, view) = call(&state, "POST", "/api/v1/live/toggle", None).await;
        assert_eq!(view["mode"], "static");
        assert_eq!(view["capture"], "idle");

        let snapshot = state.read().await.store.snapshot();
        assert_eq!(snapshot.detections, demo_detections());
        assert_eq!(
            snapshot.frame.unwrap(),
            FrameSample::from_url("https://picsum.photos/id/191/1280/720")
        );
    }

    #[tokio::test]
    async fn test_login_logout() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let session_file = config.session_file.clone().unwrap();
        let state = test_state(config.clone());

        let (status, _) = call(
            &state,
            "POST",
            "/api/v1/session/login",
            Some(json!({ "name": "Ada", "email": "not-an-email" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &state,
            "POST",
            "/api/v1/session/login",
            Some(json!({ "name": "Ada", "email": "ada@example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["name"], "Ada");
        assert!(session_file.exists());

        // Survives a restart
        let restarted = test_state(config);
        let (_, body) = call(&restarted, "GET", "/api/v1/session", None).await;
        assert_eq!(body["user"]["email"], "ada@example.com");

        let (status, body) = call(&state, "POST", "/api/v1/session/logout", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["user"].is_null());
        assert!(!session_file.exists());
    }

    #[tokio::test]
    async fn test_analysis_without_key() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(test_config(dir.path()));

        let (status, body) = call(&state, "POST", "/api/v1/analysis", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["analysis"], MISSING_KEY);
        assert_eq!(state.read().await.view.analysis(), Some(MISSING_KEY));
    }

    #[tokio::test]
    async fn test_overlay_png() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(test_config(dir.path()));

        let (status, _) = call(&state, "GET", "/api/v1/overlay.png", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let _painter = state.read().await.start_painter();
        for _ in 0..200 {
            let request = Request::get("/api/v1/overlay.png").body(Body::empty()).unwrap();
            let response = create_router(Arc::clone(&state)).oneshot(request).await.unwrap();
            if response.status() == StatusCode::OK {
                assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
                let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
                let img = image::load_from_memory(&bytes).unwrap();
                assert_eq!((img.width(), img.height()), (320, 180));
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("overlay never rendered");
    }
}
