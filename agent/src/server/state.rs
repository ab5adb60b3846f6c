//! Shared application state for the API server.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::io::config::AgentConfig;
use crate::io::state_store::StateStore;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Workspace the agent operates on.
    pub workdir: PathBuf,
    pub config: Arc<AgentConfig>,
    /// Held for the duration of any request that executes steps, so runs never interleave.
    pub run_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(workdir: PathBuf, config: AgentConfig) -> Self {
        Self {
            workdir,
            config: Arc::new(config),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn state_store(&self) -> StateStore {
        StateStore::new(self.workdir.join(&self.config.state_file))
    }
}
