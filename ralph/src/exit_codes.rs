//! Stable exit codes for the ralph CLI.

/// The loop stopped (for any reason) or a read-only command succeeded.
pub const OK: i32 = 0;
/// Startup failed: invalid config or arguments, not a git work tree, missing
/// instruction template, or an unreadable status file.
pub const INVALID: i32 = 1;
