use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use crate::constitution::{AgentConstitution, FailureStore};
use crate::detectors::Detectors;
use crate::driver::Page;
use crate::rules::observer_constitution;
use crate::schemas::UIState;

/// Agent A3: captures one UI state per executed step and keeps the ordered,
/// append-only state log for the attempt. The log is handed to the
/// archivist once execution finishes.
pub struct Observer {
    page: Arc<dyn Page>,
    detectors: Detectors,
    save_dir: Option<PathBuf>,
    failure_store: Option<Arc<FailureStore>>,
    constitution: AgentConstitution<(), UIState>,
    states: Vec<UIState>,
    index: usize,
}

impl Observer {
    pub fn new(page: Arc<dyn Page>, detectors: Detectors, save_dir: Option<PathBuf>) -> Self {
        Self {
            page,
            detectors,
            save_dir,
            failure_store: None,
            constitution: observer_constitution(),
            states: Vec::new(),
            index: 0,
        }
    }

    pub fn with_failure_store(mut self, store: Arc<FailureStore>) -> Self {
        self.failure_store = Some(store);
        self
    }

    pub fn with_task_context(mut self, task: &str) -> Self {
        self.detectors.set_task_context(task);
        self
    }

    /// Capture the current page as a UI state. Called exactly once per step,
    /// success or failure; the index counter advances only on capture.
    pub async fn observe(&mut self, action_desc: Option<&str>) -> Result<UIState> {
        let state = self
            .detectors
            .capture_state(self.page.as_ref(), action_desc, self.save_dir.as_deref(), self.index)
            .await?;

        let mut context = serde_json::Map::new();
        if let Some(dir) = &self.save_dir {
            context.insert("save_dir".into(), json!(dir.display().to_string()));
        }
        context.insert("action_desc".into(), json!(action_desc));
        context.insert("index".into(), json!(self.index));

        let report = self.constitution.validate(&(), &state, context.clone());
        if !report.passed || !report.warnings.is_empty() {
            if let Some(store) = &self.failure_store {
                store.save(&report);
            }
        }
        if !report.passed {
            self.constitution.must_pass(&(), &state, context)?;
        }

        self.states.push(state.clone());
        self.index += 1;
        Ok(state)
    }

    pub fn states(&self) -> &[UIState] {
        &self.states
    }

    pub fn into_states(self) -> Vec<UIState> {
        self.states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakePage;
    use parallax_config::Config;

    fn observer_for(page: Arc<FakePage>, dir: &std::path::Path) -> Observer {
        let cfg = Config::default();
        let mut capture = cfg.capture.clone();
        capture.multi_viewport = false;
        Observer::new(
            page,
            Detectors::new(cfg.observer.clone(), capture),
            Some(dir.to_path_buf()),
        )
    }

    #[tokio::test]
    async fn observe_appends_states_in_order() {
        let page = FakePage::new();
        let dir = tempfile::tempdir().unwrap();
        let mut observer = observer_for(page.clone(), dir.path());

        observer.observe(Some("navigate(https://example.com)")).await.unwrap();
        page.set_url("https://example.com/about");
        observer.observe(Some("click(About)")).await.unwrap();

        let states = observer.states();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].action.as_deref(), Some("navigate(https://example.com)"));
        assert_eq!(states[1].action.as_deref(), Some("click(About)"));
        assert_eq!(states[0].screenshots["desktop"], "00_desktop.png");
        assert_eq!(states[1].screenshots["desktop"], "01_desktop.png");
    }

    #[tokio::test]
    async fn failed_actions_still_capture() {
        let page = FakePage::new();
        let dir = tempfile::tempdir().unwrap();
        let mut observer = observer_for(page, dir.path());
        let state = observer
            .observe(Some("[FAILED] click(Missing)"))
            .await
            .unwrap();
        assert!(state.action.as_deref().unwrap().starts_with("[FAILED]"));
    }

    #[tokio::test]
    async fn every_state_has_screenshot_and_signature() {
        let page = FakePage::new();
        let dir = tempfile::tempdir().unwrap();
        let mut observer = observer_for(page, dir.path());
        let state = observer.observe(None).await.unwrap();

        assert!(!state.screenshots.is_empty());
        for filename in state.screenshots.values() {
            let path = dir.path().join(filename);
            assert!(std::fs::metadata(&path).unwrap().len() >= 1);
        }
        assert_eq!(state.state_signature.len(), 64);
        assert!(!state.description.is_empty());
    }
}
