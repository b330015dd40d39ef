//! Run external commands with merged output capture and cross-thread cancellation.
//!
//! The centerpiece is [`command::ManagedCommand`]: one command line, split with
//! POSIX shell rules, run either on the caller's thread or as its own task,
//! with a completion [`Signal`](core::signal::Signal) and a best-effort
//! `cancel()` callable from any other thread.
//!
//! - **[`core`]**: Pure logic (states, summaries, the single-shot signal).
//! - **[`io`]**: Side effects (child processes, sinks, console, config).
//!
//! [`run`] coordinates both to implement the `cmdtask run` CLI command.

pub mod command;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
