use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use crate::constitution::{AgentConstitution, FailureStore};
use crate::report;
use crate::rules::archivist_constitution;
use crate::schemas::UIState;
use crate::store::DatasetStore;

/// Agent A4: persists the attempt's state log into the dataset layout and
/// validates the result. Writing is idempotent per (app, slug).
pub struct Archivist {
    store: DatasetStore,
    failure_store: Option<Arc<FailureStore>>,
    constitution: AgentConstitution<Vec<UIState>, PathBuf>,
    min_states: usize,
}

impl Archivist {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: DatasetStore::new(base_dir.into()),
            failure_store: None,
            constitution: archivist_constitution(),
            min_states: 1,
        }
    }

    pub fn with_failure_store(mut self, store: Arc<FailureStore>) -> Self {
        self.failure_store = Some(store);
        self
    }

    pub fn write_states(
        &self,
        app: &str,
        task_slug: &str,
        states: &[UIState],
        trace_zip: &str,
    ) -> Result<PathBuf> {
        let root = self.store.path_for(app, task_slug)?;

        self.store.write_steps_jsonl(&root, states)?;
        self.store.write_sqlite(&root, states)?;
        report::write_markdown_report(&root, states)?;
        report::write_html_report(&root, states, trace_zip)?;

        let mut context = serde_json::Map::new();
        context.insert("app".into(), json!(app));
        context.insert("task_slug".into(), json!(task_slug));
        context.insert("states_count".into(), json!(states.len()));
        context.insert("min_states".into(), json!(self.min_states));

        let states_vec = states.to_vec();
        let report = self
            .constitution
            .validate(&states_vec, &root, context.clone());
        if !report.passed || !report.warnings.is_empty() {
            if let Some(store) = &self.failure_store {
                store.save(&report);
            }
        }
        if !report.passed {
            self.constitution.must_pass(&states_vec, &root, context)?;
        }

        tracing::info!(path = %root.display(), states = states.len(), "dataset saved");
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn state(idx: usize) -> UIState {
        let mut screenshots = BTreeMap::new();
        screenshots.insert("desktop".to_string(), format!("{idx:02}_desktop.png"));
        UIState {
            id: format!("state_{idx:08x}"),
            url: "https://example.com".into(),
            description: format!("Step {idx}"),
            has_modal: false,
            action: None,
            screenshots,
            metadata: Default::default(),
            state_signature: format!("{idx:064x}"),
        }
    }

    #[test]
    fn write_states_produces_complete_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let archivist = Archivist::new(dir.path());
        let states: Vec<UIState> = (0..3).map(state).collect();

        let root = archivist
            .write_states("linear", "create-project", &states, "trace.zip")
            .unwrap();

        assert!(root.ends_with("linear/create-project"));
        for file in ["steps.jsonl", "dataset.db", "report.md", "report.html"] {
            assert!(root.join(file).is_file(), "missing {file}");
        }
        let lines = std::fs::read_to_string(root.join("steps.jsonl"))
            .unwrap()
            .lines()
            .count();
        assert_eq!(lines, 3);
    }

    #[test]
    fn empty_states_fail_minimum_states() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FailureStore::new(dir.path().join("_failures")).unwrap());
        let archivist = Archivist::new(dir.path()).with_failure_store(store.clone());

        let err = archivist
            .write_states("linear", "empty-task", &[], "trace.zip")
            .unwrap_err();
        assert!(err.to_string().contains("minimum_states"));
        assert!(!store.failures(None, 10).is_empty());
    }

    #[test]
    fn rewrite_overwrites_previous_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let archivist = Archivist::new(dir.path());

        let first: Vec<UIState> = (0..4).map(state).collect();
        archivist
            .write_states("app", "task", &first, "trace.zip")
            .unwrap();
        let second: Vec<UIState> = (0..2).map(state).collect();
        let root = archivist
            .write_states("app", "task", &second, "trace.zip")
            .unwrap();

        let lines = std::fs::read_to_string(root.join("steps.jsonl"))
            .unwrap()
            .lines()
            .count();
        assert_eq!(lines, 2);
    }
}
