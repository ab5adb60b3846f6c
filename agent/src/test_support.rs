//! Scripted collaborators and temp workspaces for tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::TempDir;

use crate::io::config::AgentConfig;
use crate::io::ide::IdeControl;
use crate::io::oracle::{Oracle, OracleRequest, SENTINEL_RESPONSE};
use crate::io::state_store::{PersistentState, StateStore};

/// Oracle that replays canned replies in order and records every request.
///
/// Once the script runs out it answers with [`SENTINEL_RESPONSE`].
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    replies: RefCell<VecDeque<String>>,
    requests: RefCell<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: RefCell::new(replies.into_iter().map(Into::into).collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.borrow().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl Oracle for ScriptedOracle {
    fn ask(&self, request: &OracleRequest) -> String {
        self.requests.borrow_mut().push(request.clone());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| SENTINEL_RESPONSE.to_string())
    }
}

/// `{"steps": [...]}` reply text for a list of step objects.
pub fn steps_reply(steps: Vec<Value>) -> String {
    serde_json::json!({ "steps": steps }).to_string()
}

/// IDE double that records calls and answers with fixed results.
#[derive(Debug)]
pub struct RecordingIde {
    calls: RefCell<Vec<String>>,
    terminal: Option<String>,
    succeed: bool,
}

impl RecordingIde {
    /// IDE that accepts every call and hands out terminal `t-1`.
    pub fn accepting() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            terminal: Some("t-1".to_string()),
            succeed: true,
        }
    }

    /// IDE that cannot create terminals and rejects every call.
    pub fn unavailable() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            terminal: None,
            succeed: false,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

impl IdeControl for RecordingIde {
    fn open(&self, path: &str) -> bool {
        self.record(format!("open {path}"));
        self.succeed
    }

    fn create_terminal(&self, name: &str) -> Option<String> {
        self.record(format!("create_terminal {name}"));
        self.terminal.clone()
    }

    fn run_in_terminal(&self, terminal_id: &str, command: &str) -> bool {
        self.record(format!("run_in_terminal {terminal_id} {command}"));
        self.succeed
    }

    fn modify(&self, path: &str, _content: &str) -> bool {
        self.record(format!("modify {path}"));
        self.succeed
    }
}

/// Temporary workspace with a test-friendly config.
pub struct TestWorkspace {
    dir: TempDir,
    pub config: AgentConfig,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AgentConfig::default();
        config.command_timeout_secs = 20;
        config.max_recovery_depth = 2;
        config.ide.mock = true;
        Self { dir, config }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.path().join(&self.config.state_file)
    }

    pub fn state(&self) -> PersistentState {
        StateStore::new(self.state_path()).load().expect("load state")
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.dir.path().join(relative)).expect("read workspace file")
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write workspace file");
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
