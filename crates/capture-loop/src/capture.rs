//! Capture loop: Idle ⇄ Capturing
//!
//! While capturing, a fixed-period timer grabs a frame, encodes it,
//! publishes it and fires an inference request without waiting for the
//! previous one. Results are applied through [`OverlayStore`], which drops
//! anything older than what is already shown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use camera_capture::{CameraError, VideoSource};
use chrono::Utc;
use metrics::{counter, histogram};
use overlay::{to_normalized, Detection, PixelCorners};
use perception_client::{FrameAnalyzer, PerceptionResponse};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::state::{ApplyOutcome, FrameSample, InferenceMetrics, InferenceUpdate, OverlayStore};
use crate::CaptureError;

/// Capture loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Time between capture cycles (ms)
    pub period_ms: u64,
    /// Off-screen buffer width; defines the request coordinate space
    pub buffer_width: u32,
    /// Off-screen buffer height
    pub buffer_height: u32,
    /// JPEG quality for transmitted frames (1-100)
    pub jpeg_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            period_ms: 250,
            buffer_width: 1280,
            buffer_height: 720,
            jpeg_quality: 70,
        }
    }
}

/// Loop state as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Idle,
    Capturing,
}

/// Map backend corner boxes into percentage detections.
///
/// Boxes outside the frame are clamped and logged.
pub fn map_detections(response: &PerceptionResponse, frame_width: u32, frame_height: u32) -> Vec<Detection> {
    response
        .detections
        .iter()
        .enumerate()
        .map(|(i, det)| {
            let mut bbox = to_normalized(
                PixelCorners::from(det.bbox),
                frame_width as f64,
                frame_height as f64,
            );
            if !bbox.is_well_formed() {
                warn!("Clamping out-of-range box for '{}': {:?}", det.label, det.bbox);
                counter!("boxes_clamped_total").increment(1);
                bbox = bbox.sanitized();
            }
            let confidence = if det.confidence.is_finite() {
                det.confidence.clamp(0.0, 1.0)
            } else {
                0.0
            };
            Detection::new((i + 1).to_string(), det.label.clone(), confidence, bbox)
        })
        .collect()
}

/// Everything a capture cycle needs, shared with the timer task
struct CycleContext<A> {
    config: CaptureConfig,
    analyzer: Arc<A>,
    store: OverlayStore,
    session: u64,
}

/// Grab one frame and encode it at the buffer size.
///
/// `Ok(None)` means the frame was unusable and the cycle is skipped.
fn encode_frame(
    source: &mut dyn VideoSource,
    config: &CaptureConfig,
    sequence: u64,
) -> Result<Option<String>, CameraError> {
    let frame = source.grab()?;
    match frame
        .resize(config.buffer_width, config.buffer_height)
        .and_then(|buffer| buffer.to_data_uri(config.jpeg_quality))
    {
        Ok(uri) => Ok(Some(uri)),
        Err(e) => {
            warn!("Skipping cycle {}: {}", sequence, e);
            Ok(None)
        }
    }
}

impl<A: FrameAnalyzer> CycleContext<A> {
    /// Run [`encode_frame`] on the blocking pool, handing the source back.
    ///
    /// `None` if the blocking task died and took the source with it.
    async fn capture(
        &self,
        mut source: Box<dyn VideoSource>,
        sequence: u64,
    ) -> Option<(Box<dyn VideoSource>, Result<Option<String>, CameraError>)> {
        let config = self.config.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let encoded = encode_frame(source.as_mut(), &config, sequence);
            (source, encoded)
        })
        .await;
        match joined {
            Ok(pair) => Some(pair),
            Err(e) => {
                error!("Frame capture for cycle {} failed: {}", sequence, e);
                None
            }
        }
    }

    /// Publish the frame and fire its inference request without waiting
    fn dispatch(&self, data_uri: String, sequence: u64) {
        let (width, height) = (self.config.buffer_width, self.config.buffer_height);
        self.store
            .publish_frame(self.session, FrameSample::captured(data_uri.clone(), Utc::now()));
        counter!("capture_cycles_total").increment(1);

        let analyzer = Arc::clone(&self.analyzer);
        let store = self.store.clone();
        let session = self.session;
        tokio::spawn(async move {
            let started = Instant::now();
            match analyzer.analyze_frame(data_uri).await {
                Ok(response) => {
                    histogram!("inference_round_trip_ms").record(started.elapsed().as_secs_f64() * 1000.0);
                    histogram!("inference_latency_ms").record(response.inference_time_ms);
                    let update = InferenceUpdate {
                        session,
                        sequence,
                        detections: map_detections(&response, width, height),
                        lane_mask: Some(response.lane_mask_base64).filter(|m| !m.is_empty()),
                        metrics: InferenceMetrics {
                            inference_time_ms: response.inference_time_ms,
                            fps: response.fps,
                        },
                    };
                    match store.apply_inference(update) {
                        ApplyOutcome::Applied => debug!("Cycle {} applied", sequence),
                        ApplyOutcome::Stale => {
                            debug!("Dropping stale response for cycle {}", sequence);
                            counter!("stale_responses_dropped_total").increment(1);
                        }
                        ApplyOutcome::Expired => debug!("Dropping response for ended session {}", session),
                    }
                }
                Err(e) => {
                    // Keep the previous overlay on screen
                    warn!("Inference failed for cycle {}: {}", sequence, e);
                    counter!("inference_failures_total").increment(1);
                }
            }
        });
    }
}

/// Timer task body. Hands the closed source back unless it was lost.
async fn run_timer<A: FrameAnalyzer>(
    ctx: CycleContext<A>,
    mut source: Box<dyn VideoSource>,
    mut shutdown: oneshot::Receiver<()>,
) -> Option<Box<dyn VideoSource>> {
    let mut ticker = tokio::time::interval(Duration::from_millis(ctx.config.period_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sequence: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                sequence += 1;
                let Some((returned, encoded)) = ctx.capture(source, sequence).await else {
                    ctx.store.end_session();
                    return None;
                };
                source = returned;
                match encoded {
                    Ok(Some(data_uri)) => ctx.dispatch(data_uri, sequence),
                    Ok(None) => {}
                    Err(e) => {
                        error!("Capture source {} failed: {}", source.name(), e);
                        ctx.store.end_session();
                        break;
                    }
                }
            }
        }
    }

    source.close();
    info!("Capture timer stopped after {} cycles", sequence);
    Some(source)
}

struct ActiveCapture {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Option<Box<dyn VideoSource>>>,
    session: u64,
}

/// Timer-driven capture loop owning an exclusive video source
pub struct CaptureLoop<A: FrameAnalyzer> {
    config: CaptureConfig,
    analyzer: Arc<A>,
    store: OverlayStore,
    /// Present while idle; moved into the timer task while capturing
    source: Option<Box<dyn VideoSource>>,
    active: Option<ActiveCapture>,
}

impl<A: FrameAnalyzer> CaptureLoop<A> {
    pub fn new(config: CaptureConfig, source: Box<dyn VideoSource>, analyzer: Arc<A>, store: OverlayStore) -> Self {
        info!(
            "Creating capture loop: period={}ms buffer={}x{} source={}",
            config.period_ms,
            config.buffer_width,
            config.buffer_height,
            source.name()
        );
        Self {
            config,
            analyzer,
            store,
            source: Some(source),
            active: None,
        }
    }

    pub fn store(&self) -> &OverlayStore {
        &self.store
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn status(&self) -> CaptureStatus {
        match &self.active {
            Some(active) if !active.handle.is_finished() => CaptureStatus::Capturing,
            _ => CaptureStatus::Idle,
        }
    }

    /// Acquire the source and start the timer
    pub async fn start(&mut self) -> Result<(), CaptureError> {
        self.reap().await;
        if self.active.is_some() {
            debug!("Capture loop already running");
            return Ok(());
        }

        let source = self.source.take().ok_or(CaptureError::SourceLost)?;
        // Opening may decode files; keep it off the async workers
        let (source, opened) = tokio::task::spawn_blocking(move || {
            let mut source = source;
            let opened = source.open();
            (source, opened)
        })
        .await
        .map_err(|e| {
            error!("Video source open task failed: {}", e);
            CaptureError::SourceLost
        })?;
        if let Err(e) = opened {
            warn!("Video source {} unavailable: {}", source.name(), e);
            self.source = Some(source);
            return Err(CaptureError::DeviceUnavailable(e.to_string()));
        }

        let session = self.store.begin_session();
        let ctx = CycleContext {
            config: self.config.clone(),
            analyzer: Arc::clone(&self.analyzer),
            store: self.store.clone(),
            session,
        };
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_timer(ctx, source, shutdown_rx));
        self.active = Some(ActiveCapture {
            shutdown,
            handle,
            session,
        });

        info!("Capture loop started (session {})", session);
        Ok(())
    }

    /// Cancel the timer, release the source and clear live overlay state.
    ///
    /// Returns once the timer task has exited; no cycle runs afterwards.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let ActiveCapture {
            shutdown,
            handle,
            session,
        } = active;
        let _ = shutdown.send(());
        self.finish(handle, session).await;
        info!("Capture loop stopped");
    }

    /// Start when idle, stop when capturing
    pub async fn toggle(&mut self) -> Result<CaptureStatus, CaptureError> {
        match self.status() {
            CaptureStatus::Capturing => {
                self.stop().await;
                Ok(CaptureStatus::Idle)
            }
            CaptureStatus::Idle => {
                self.start().await?;
                Ok(CaptureStatus::Capturing)
            }
        }
    }

    /// Collect a timer task that ended on its own (source failure).
    ///
    /// Returns true if one was collected by this call.
    pub async fn reap(&mut self) -> bool {
        if !self.active.as_ref().is_some_and(|a| a.handle.is_finished()) {
            return false;
        }
        let Some(active) = self.active.take() else {
            return false;
        };
        warn!("Capture session {} ended unexpectedly", active.session);
        self.finish(active.handle, active.session).await;
        true
    }

    async fn finish(
        &mut self,
        handle: JoinHandle<Option<Box<dyn VideoSource>>>,
        session: u64,
    ) {
        match handle.await {
            Ok(Some(source)) => self.source = Some(source),
            Ok(None) => error!("Video source lost in capture session {}", session),
            Err(e) => error!("Capture task for session {} failed: {}", session, e),
        }
        self.store.end_session();
    }
}

impl<A: FrameAnalyzer> Drop for CaptureLoop<A> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.shutdown.send(());
        }
    }
}
