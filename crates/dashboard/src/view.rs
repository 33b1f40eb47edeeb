//! View state container
//!
//! Everything the page shell shows besides the overlay itself. Handlers
//! change it only through the transitions below.

use serde::{Deserialize, Serialize};

use crate::session::UserIdentity;

/// Demo scene image ids
pub const SCENARIO_IMAGE_IDS: [u32; 4] = [191, 107, 183, 119];

/// Image URL for a demo scene
pub fn scenario_url(image_id: u32) -> String {
    format!("https://picsum.photos/id/{}/1280/720", image_id)
}

/// Dashboard tabs; exactly one is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tab {
    #[default]
    Dashboard,
    Pipeline,
    Metrics,
    Settings,
}

/// What feeds the overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    /// Demo scenario with fixed detections
    #[default]
    Static,
    /// Capture loop running
    Live,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ViewState {
    active_tab: Tab,
    mode: ViewMode,
    backend_online: bool,
    show_segmentation: bool,
    user: Option<UserIdentity>,
    analysis: Option<String>,
    scenario_index: usize,
}

impl ViewState {
    pub fn new(user: Option<UserIdentity>) -> Self {
        Self {
            show_segmentation: true,
            user,
            ..Default::default()
        }
    }

    pub fn active_tab(&self) -> Tab {
        self.active_tab
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn is_live(&self) -> bool {
        self.mode == ViewMode::Live
    }

    pub fn backend_online(&self) -> bool {
        self.backend_online
    }

    pub fn show_segmentation(&self) -> bool {
        self.show_segmentation
    }

    pub fn user(&self) -> Option<&UserIdentity> {
        self.user.as_ref()
    }

    pub fn analysis(&self) -> Option<&str> {
        self.analysis.as_deref()
    }

    /// Image of the current demo scene
    pub fn scenario_image(&self) -> String {
        scenario_url(SCENARIO_IMAGE_IDS[self.scenario_index % SCENARIO_IMAGE_IDS.len()])
    }

    pub fn set_tab(&mut self, tab: Tab) {
        self.active_tab = tab;
    }

    pub fn go_live(&mut self) {
        self.mode = ViewMode::Live;
        self.analysis = None;
    }

    pub fn go_static(&mut self) {
        self.mode = ViewMode::Static;
    }

    /// Returns true when reachability flipped
    pub fn set_backend_online(&mut self, online: bool) -> bool {
        let changed = self.backend_online != online;
        self.backend_online = online;
        changed
    }

    pub fn set_segmentation(&mut self, enabled: bool) {
        self.show_segmentation = enabled;
    }

    pub fn login(&mut self, user: UserIdentity) {
        self.user = Some(user);
    }

    pub fn logout(&mut self) {
        self.user = None;
        self.analysis = None;
    }

    pub fn set_analysis(&mut self, text: String) {
        self.analysis = Some(text);
    }

    /// Advance to the next demo scene and drop the previous analysis
    pub fn next_scenario(&mut self) -> String {
        self.scenario_index = (self.scenario_index + 1) % SCENARIO_IMAGE_IDS.len();
        self.analysis = None;
        self.scenario_image()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let view = ViewState::new(None);
        assert_eq!(view.active_tab(), Tab::Dashboard);
        assert_eq!(view.mode(), ViewMode::Static);
        assert!(view.show_segmentation());
        assert!(!view.backend_online());
        assert_eq!(view.scenario_image(), "https://picsum.photos/id/191/1280/720");
    }

    #[test]
    fn test_scenarios_cycle_and_clear_analysis() {
        let mut view = ViewState::new(None);
        view.set_analysis("old".to_string());

        assert_eq!(view.next_scenario(), "https://picsum.photos/id/107/1280/720");
        assert!(view.analysis().is_none());
        view.next_scenario();
        view.next_scenario();
        assert_eq!(view.next_scenario(), "https://picsum.photos/id/191/1280/720");
    }

    #[test]
    fn test_backend_flip_reported_once() {
        let mut view = ViewState::new(None);
        assert!(view.set_backend_online(true));
        assert!(!view.set_backend_online(true));
        assert!(view.set_backend_online(false));
    }

    #[test]
    fn test_tab_serialization() {
        let tab: Tab = serde_json::from_str("\"pipeline\"").unwrap();
        assert_eq!(tab, Tab::Pipeline);
        assert!(serde_json::from_str::<Tab>("\"home\"").is_err());
    }
}
