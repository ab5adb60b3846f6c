//! LLM-driven step execution engine.
//!
//! An instruction oracle turns a task into a JSON list of steps (create a
//! virtualenv, write a file, run a command, ...). The engine executes those
//! steps against a workspace, persists what it did, and feeds failures back
//! to a debugger role for a bounded number of recovery rounds.
//!
//! - **[`core`]**: Pure logic (step decoding, parsing, tier selection,
//!   recovery budget). No I/O.
//! - **[`io`]**: Side effects (config, files, processes, persisted state,
//!   oracle backends, IDE control, prompt templates).
//! - **[`agents`]**: Role helpers that turn prompts into steps or code.
//!
//! Orchestration lives in [`executor`] (step execution with recovery) and
//! [`router`] (task analysis and dispatch). [`server`] exposes both over HTTP.

pub mod agents;
pub mod core;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod router;
pub mod server;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
