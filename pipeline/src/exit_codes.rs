//! Stable exit codes for pipeline CLI commands.

/// Run finished successfully, or the session is valid.
pub const OK: i32 = 0;
/// Run failed, or the session/config could not be loaded.
pub const FAILED: i32 = 1;
/// Run was interrupted by a shutdown signal; state was persisted.
pub const INTERRUPTED: i32 = 130;
/// Run completed but some subtasks failed or blocking bugs remain.
pub const INCOMPLETE: i32 = 2;
