//! I/O helpers for the loop controller: git, worker processes, config,
//! instruction templates, and the status artifact.

pub mod clock;
pub mod config;
pub mod git;
pub mod prompt;
pub mod status;
pub mod worker;
