//! Persistent state storage (`state.json`).
//!
//! Every mutation is a read-modify-write under an exclusive advisory lock on a
//! sidecar `<state>.lock` file, followed by an atomic temp-file rename.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs4::FileExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{BackgroundProcessRecord, ExecutionResult};

/// Persisted bookkeeping shared by every run in a workspace.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistentState {
    /// Paths written by `create_file`/`modify_file`, each listed once.
    #[serde(default)]
    pub files: Vec<String>,
    /// Every execution result, in the order it happened.
    #[serde(default)]
    pub actions: Vec<ExecutionResult>,
    /// Detached processes that have not been killed yet.
    #[serde(default)]
    pub background_processes: Vec<BackgroundProcessRecord>,
}

/// Handle to the state document at a fixed path.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current state. A missing file is the empty state.
    pub fn load(&self) -> Result<PersistentState> {
        load_state(&self.path)
    }

    pub fn record_action(&self, result: &ExecutionResult) -> Result<()> {
        self.update(|state| state.actions.push(result.clone()))
    }

    /// Add `path` to the file set unless it is already present.
    pub fn record_file(&self, path: &str) -> Result<()> {
        self.update(|state| {
            if !state.files.iter().any(|existing| existing == path) {
                state.files.push(path.to_string());
            }
        })
    }

    pub fn record_background(&self, record: BackgroundProcessRecord) -> Result<()> {
        self.update(|state| state.background_processes.push(record))
    }

    /// Remove and return every background process record.
    pub fn take_background_processes(&self) -> Result<Vec<BackgroundProcessRecord>> {
        let mut taken = Vec::new();
        self.update(|state| taken = std::mem::take(&mut state.background_processes))?;
        Ok(taken)
    }

    fn update<F: FnOnce(&mut PersistentState)>(&self, mutate: F) -> Result<()> {
        let _lock = StateLock::acquire(&self.path)?;
        let mut state = load_state(&self.path)?;
        mutate(&mut state);
        write_state(&self.path, &state)
    }
}

/// Exclusive lock on `<state>.lock`, released on drop.
struct StateLock {
    file: File,
}

impl StateLock {
    fn acquire(state_path: &Path) -> Result<Self> {
        let lock_path = lock_path(state_path);
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("open state lock {}", lock_path.display()))?;
        FileExt::lock_exclusive(&file)
            .with_context(|| format!("lock state {}", lock_path.display()))?;
        Ok(Self { file })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn lock_path(state_path: &Path) -> PathBuf {
    let mut name = state_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn load_state(path: &Path) -> Result<PersistentState> {
    if !path.exists() {
        debug!(path = %path.display(), "state missing, starting empty");
        return Ok(PersistentState::default());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read state {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(PersistentState::default());
    }
    let state: PersistentState = serde_json::from_str(&contents)
        .with_context(|| format!("parse state {}", path.display()))?;
    Ok(state)
}

fn write_state(path: &Path, state: &PersistentState) -> Result<()> {
    debug!(
        path = %path.display(),
        files = state.files.len(),
        actions = state.actions.len(),
        background = state.background_processes.len(),
        "writing state"
    );
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace state {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(index: usize, action: &str) -> ExecutionResult {
        ExecutionResult {
            step_index: index,
            action: action.to_string(),
            success: true,
            output: String::new(),
        }
    }

    #[test]
    fn missing_file_is_empty_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("state.json"));
        assert_eq!(store.load().expect("load"), PersistentState::default());
    }

    #[test]
    fn empty_state_serializes_to_three_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        let store = StateStore::new(&path);
        store.take_background_processes().expect("take");

        let contents = fs::read_to_string(&path).expect("read");
        let expected =
            "{\n  \"files\": [],\n  \"actions\": [],\n  \"background_processes\": []\n}\n";
        assert_eq!(contents, expected);
    }

    #[test]
    fn files_are_deduplicated_in_first_seen_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("state.json"));
        store.record_file("b.txt").expect("record");
        store.record_file("a.txt").expect("record");
        store.record_file("b.txt").expect("record");

        assert_eq!(store.load().expect("load").files, vec!["b.txt", "a.txt"]);
    }

    #[test]
    fn actions_are_appended_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("state.json"));
        store.record_action(&result(0, "create_file")).expect("record");
        store.record_action(&result(1, "run_command")).expect("record");

        let actions = store.load().expect("load").actions;
        assert_eq!(actions, vec![result(0, "create_file"), result(1, "run_command")]);
    }

    #[test]
    fn take_background_processes_empties_the_list() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("state.json"));
        for pid in [101, 102] {
            store
                .record_background(BackgroundProcessRecord {
                    command: "serve".to_string(),
                    pid,
                })
                .expect("record");
        }

        let taken = store.take_background_processes().expect("take");
        assert_eq!(taken.len(), 2);
        assert!(store.load().expect("load").background_processes.is_empty());
        assert!(store.take_background_processes().expect("take").is_empty());
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = StateStore::new(&path);
                std::thread::spawn(move || {
                    for i in 0..5 {
                        store
                            .record_action(&result(worker * 10 + i, "run_command"))
                            .expect("record");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        assert_eq!(StateStore::new(&path).load().expect("load").actions.len(), 20);
    }
}
