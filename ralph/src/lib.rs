//! Supervisory loop that repeatedly runs an autonomous coding worker against a
//! git repository.
//!
//! Each iteration hands the same mode-specific instructions to the worker,
//! waits for it to exit, and checks whether the branch head moved. A circuit
//! breaker stops the session when the worker keeps failing or keeps producing
//! no commits. The layout keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (progress, breaker, rate window,
//!   status snapshot). No I/O, clock passed in.
//! - **[`io`]**: Side-effecting operations (git, worker processes, config,
//!   templates, status file).
//! - **[`notify`]**: Best-effort delivery of lifecycle events.
//!
//! [`looping`] ties them together into the loop controller.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod notify;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
