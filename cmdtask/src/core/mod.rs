//! Deterministic logic shared by the command runner.
//!
//! Core modules perform no process or file I/O. They operate on in-memory
//! values and synchronization primitives so they can be tested in isolation.

pub mod signal;
pub mod state;
pub mod summary;
