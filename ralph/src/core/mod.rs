//! Deterministic, pure logic shared by the loop controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures, take wall-clock time as an argument, and return
//! deterministic outputs suitable for tests.

pub mod breaker;
pub mod progress;
pub mod rate;
pub mod session;
pub mod snapshot;
