//! Side-effecting helpers: processes, sinks, console and configuration.

pub mod config;
pub mod console;
pub mod process;
pub mod sink;
