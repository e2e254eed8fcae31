use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use crate::schemas::UIState;

/// Writes captured states into the dataset layout:
/// `{base}/{app}/{slug}/steps.jsonl` plus an embedded SQLite store with
/// `states` and `screenshots` tables.
pub struct DatasetStore {
    base_dir: PathBuf,
}

impl DatasetStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn path_for(&self, app: &str, task_slug: &str) -> Result<PathBuf> {
        let path = self.base_dir.join(app).join(task_slug);
        std::fs::create_dir_all(&path).context("Failed to create dataset dir")?;
        Ok(path)
    }

    /// One UIState per line, UTF-8. Overwrites any previous file so the
    /// write is idempotent for a given (app, slug).
    pub fn write_steps_jsonl(&self, root: &Path, states: &[UIState]) -> Result<()> {
        let mut file = std::fs::File::create(root.join("steps.jsonl"))
            .context("Failed to create steps.jsonl")?;
        for state in states {
            let line = serde_json::to_string(state)?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    pub fn read_steps_jsonl(root: &Path) -> Result<Vec<UIState>> {
        let content = std::fs::read_to_string(root.join("steps.jsonl"))
            .context("Failed to read steps.jsonl")?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).context("Malformed state line"))
            .collect()
    }

    pub fn write_sqlite(&self, root: &Path, states: &[UIState]) -> Result<PathBuf> {
        let db_path = root.join("dataset.db");
        let store = SqliteStates::open(&db_path)?;
        store.replace_states(states)?;
        Ok(db_path)
    }
}

pub struct SqliteStates {
    conn: Mutex<Connection>,
}

impl SqliteStates {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS states (
                id TEXT PRIMARY KEY,
                url TEXT,
                description TEXT,
                has_modal INTEGER,
                action TEXT,
                state_signature TEXT,
                metadata TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS screenshots (
                state_id TEXT REFERENCES states(id),
                viewport TEXT,
                filename TEXT
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn replace_states(&self, states: &[UIState]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM screenshots", [])?;
        conn.execute("DELETE FROM states", [])?;
        for state in states {
            conn.execute(
                "INSERT OR REPLACE INTO states
                 (id, url, description, has_modal, action, state_signature, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    state.id,
                    state.url,
                    state.description,
                    state.has_modal as i64,
                    state.action,
                    state.state_signature,
                    serde_json::to_string(&state.metadata)?,
                ],
            )?;
            for (viewport, filename) in &state.screenshots {
                conn.execute(
                    "INSERT OR REPLACE INTO screenshots (state_id, viewport, filename)
                     VALUES (?1, ?2, ?3)",
                    params![state.id, viewport, filename],
                )?;
            }
        }
        Ok(())
    }

    pub fn state_count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM states", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    pub fn screenshot_count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM screenshots", [], |r| r.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn state(idx: usize) -> UIState {
        let mut screenshots = BTreeMap::new();
        screenshots.insert("desktop".to_string(), format!("{idx:02}_desktop.png"));
        let mut metadata = serde_json::Map::new();
        metadata.insert("has_toast".into(), serde_json::json!(idx % 2 == 0));
        UIState {
            id: format!("state_{idx:08x}"),
            url: format!("https://example.com/page-{idx}"),
            description: format!("Page {idx}"),
            has_modal: false,
            action: Some(format!("click(step {idx})")),
            screenshots,
            metadata,
            state_signature: format!("{idx:064x}"),
        }
    }

    #[test]
    fn jsonl_round_trip_preserves_states() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        let root = store.path_for("linear", "create-project").unwrap();
        let states: Vec<UIState> = (0..3).map(state).collect();

        store.write_steps_jsonl(&root, &states).unwrap();
        let back = DatasetStore::read_steps_jsonl(&root).unwrap();
        assert_eq!(states, back);
    }

    #[test]
    fn jsonl_lines_match_sqlite_rows_match_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        let root = store.path_for("linear", "create-project").unwrap();
        let states: Vec<UIState> = (0..4).map(state).collect();

        store.write_steps_jsonl(&root, &states).unwrap();
        let db_path = store.write_sqlite(&root, &states).unwrap();

        let lines = std::fs::read_to_string(root.join("steps.jsonl"))
            .unwrap()
            .lines()
            .count();
        let db = SqliteStates::open(&db_path).unwrap();
        assert_eq!(lines, states.len());
        assert_eq!(db.state_count().unwrap(), states.len());
        assert_eq!(db.screenshot_count().unwrap(), states.len());
    }

    #[test]
    fn rewrite_is_idempotent_for_same_slug() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        let root = store.path_for("app", "task").unwrap();

        let first: Vec<UIState> = (0..5).map(state).collect();
        store.write_steps_jsonl(&root, &first).unwrap();
        store.write_sqlite(&root, &first).unwrap();

        let second: Vec<UIState> = (0..2).map(state).collect();
        store.write_steps_jsonl(&root, &second).unwrap();
        let db_path = store.write_sqlite(&root, &second).unwrap();

        let db = SqliteStates::open(&db_path).unwrap();
        assert_eq!(db.state_count().unwrap(), 2);
        assert_eq!(
            DatasetStore::read_steps_jsonl(&root).unwrap().len(),
            2
        );
    }
}
