//! Stable exit codes for devagent CLI commands.

/// The command ran and its task succeeded.
pub const OK: i32 = 0;
/// The task failed: steps failed past recovery, no instructions, or a runtime error.
pub const FAILED: i32 = 1;
/// The configuration could not be loaded or validated.
pub const INVALID: i32 = 2;
