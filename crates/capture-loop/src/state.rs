//! Overlay state and its publisher
//!
//! All cross-cycle state is replaced wholesale through a watch channel;
//! nothing is mutated in place by readers.

use chrono::{DateTime, Utc};
use overlay::Detection;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// A displayable image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ImageRef {
    /// Remote image
    Url(String),
    /// `data:` URI with an encoded bitmap
    Inline(String),
}

impl ImageRef {
    pub fn as_str(&self) -> &str {
        match self {
            ImageRef::Url(s) | ImageRef::Inline(s) => s,
        }
    }
}

/// One unit of visual input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    pub image: ImageRef,
    /// Only set for live captures
    pub captured_at: Option<DateTime<Utc>>,
}

impl FrameSample {
    /// Static scenario frame
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            image: ImageRef::Url(url.into()),
            captured_at: None,
        }
    }

    /// Live capture encoded as a data URI
    pub fn captured(data_uri: String, captured_at: DateTime<Utc>) -> Self {
        Self {
            image: ImageRef::Inline(data_uri),
            captured_at: Some(captured_at),
        }
    }
}

/// Timing reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferenceMetrics {
    pub inference_time_ms: f64,
    pub fps: f64,
}

/// Render input snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayState {
    pub frame: Option<FrameSample>,
    pub detections: Vec<Detection>,
    /// Base64 PNG lane mask from the backend
    #[serde(skip)]
    pub lane_mask: Option<String>,
    pub show_mask: bool,
    pub metrics: Option<InferenceMetrics>,
    /// Sequence number of the last applied inference response
    pub applied_sequence: u64,
    /// Capture session the live fields belong to
    #[serde(skip)]
    pub session: u64,
}

impl Default for OverlayState {
    fn default() -> Self {
        Self {
            frame: None,
            detections: Vec::new(),
            lane_mask: None,
            show_mask: true,
            metrics: None,
            applied_sequence: 0,
            session: 0,
        }
    }
}

impl OverlayState {
    pub fn has_mask(&self) -> bool {
        self.lane_mask.is_some()
    }
}

/// A completed inference, already mapped to percentage boxes
#[derive(Debug, Clone)]
pub struct InferenceUpdate {
    pub session: u64,
    pub sequence: u64,
    pub detections: Vec<Detection>,
    pub lane_mask: Option<String>,
    pub metrics: InferenceMetrics,
}

/// Outcome of applying an inference result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Older than the last applied response
    Stale,
    /// Belongs to a stopped session
    Expired,
}

/// Owner of the overlay state; clones share the same channel
#[derive(Debug, Clone)]
pub struct OverlayStore {
    tx: watch::Sender<OverlayState>,
}

impl Default for OverlayStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(OverlayState::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<OverlayState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> OverlayState {
        self.tx.borrow().clone()
    }

    /// Start a live session: clears stale live state and returns its id
    pub fn begin_session(&self) -> u64 {
        let mut session = 0;
        self.tx.send_modify(|state| {
            state.session += 1;
            state.applied_sequence = 0;
            state.detections.clear();
            state.lane_mask = None;
            state.metrics = None;
            session = state.session;
        });
        debug!("Overlay session {} started", session);
        session
    }

    /// End the live session; in-flight results for it are ignored afterwards
    pub fn end_session(&self) {
        self.tx.send_modify(|state| {
            state.session += 1;
            state.applied_sequence = 0;
            state.frame = None;
            state.detections.clear();
            state.lane_mask = None;
            state.metrics = None;
        });
    }

    /// Replace the displayed frame for a live session
    pub fn publish_frame(&self, session: u64, frame: FrameSample) -> bool {
        self.tx.send_if_modified(|state| {
            if state.session != session {
                return false;
            }
            state.frame = Some(frame);
            true
        })
    }

    /// Apply an inference result if it is newer than what is shown
    pub fn apply_inference(&self, update: InferenceUpdate) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::Applied;
        self.tx.send_if_modified(|state| {
            if state.session != update.session {
                outcome = ApplyOutcome::Expired;
                return false;
            }
            if update.sequence <= state.applied_sequence {
                outcome = ApplyOutcome::Stale;
                return false;
            }
            state.detections = update.detections;
            state.lane_mask = update.lane_mask;
            state.metrics = Some(update.metrics);
            state.applied_sequence = update.sequence;
            true
        });
        outcome
    }

    /// Show a fixed scenario (static mode)
    pub fn show_static(&self, frame: FrameSample, detections: Vec<Detection>) {
        self.tx.send_modify(|state| {
            state.frame = Some(frame);
            state.detections = detections;
            state.lane_mask = None;
            state.metrics = None;
        });
    }

    pub fn set_show_mask(&self, show: bool) {
        self.tx.send_if_modified(|state| {
            let changed = state.show_mask != show;
            state.show_mask = show;
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay::{demo_detections, PercentBox};

    fn update(session: u64, sequence: u64, label: &str) -> InferenceUpdate {
        InferenceUpdate {
            session,
            sequence,
            detections: vec![Detection::new("1", label, 0.9, PercentBox::new(1.0, 1.0, 2.0, 2.0))],
            lane_mask: Some("mask".to_string()),
            metrics: InferenceMetrics {
                inference_time_ms: 12.0,
                fps: 30.0,
            },
        }
    }

    #[test]
    fn test_newer_response_wins() {
        let store = OverlayStore::new();
        let session = store.begin_session();

        assert_eq!(store.apply_inference(update(session, 2, "car")), ApplyOutcome::Applied);
        assert_eq!(store.apply_inference(update(session, 1, "truck")), ApplyOutcome::Stale);

        let snap = store.snapshot();
        assert_eq!(snap.detections[0].label, "car");
        assert_eq!(snap.applied_sequence, 2);
    }

    #[test]
    fn test_ended_session_rejects_late_results() {
        let store = OverlayStore::new();
        let session = store.begin_session();
        store.publish_frame(session, FrameSample::captured("data:x".into(), Utc::now()));
        store.end_session();

        assert_eq!(store.apply_inference(update(session, 1, "car")), ApplyOutcome::Expired);
        assert!(!store.publish_frame(session, FrameSample::from_url("late")));
        let snap = store.snapshot();
        assert!(snap.frame.is_none());
        assert!(snap.detections.is_empty());
        assert!(!snap.has_mask());
    }

    #[test]
    fn test_subscribers_see_changes() {
        let store = OverlayStore::new();
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        store.show_static(FrameSample::from_url("https://example.com/1.jpg"), demo_detections());
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().detections.len(), 4);

        store.set_show_mask(true);
        assert!(!rx.has_changed().unwrap());
        store.set_show_mask(false);
        assert!(rx.has_changed().unwrap());
    }
}
