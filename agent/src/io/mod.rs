//! Side-effecting collaborators: config, processes, files, state, oracle, IDE.

pub mod config;
pub mod files;
pub mod ide;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod state_store;
