//! Human-facing diagnostics for verbose runs and launch failures.
//!
//! This is product output, not tracing: it is printed whenever a command is
//! verbose or fails to launch, regardless of `RUST_LOG`.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use colored::Colorize;
use tracing::warn;

/// Append-only writer behind a console.
pub type ConsoleWriter = Arc<Mutex<dyn Write + Send>>;

#[derive(Clone)]
pub struct Console {
    writer: ConsoleWriter,
    color: bool,
}

impl Console {
    pub fn new(writer: ConsoleWriter, color: bool) -> Self {
        Self { writer, color }
    }

    /// Console printing to stderr.
    pub fn stderr(color: bool) -> Self {
        Self::new(Arc::new(Mutex::new(io::stderr())), color)
    }

    /// Echo a command line before it runs.
    pub fn command(&self, line: &str) {
        let text = if self.color {
            line.green().bold().to_string()
        } else {
            line.to_string()
        };
        self.emit(&text);
    }

    /// Echo the `rc = ...` summary of a finished run.
    pub fn summary(&self, summary: &str) {
        let text = if self.color {
            summary.yellow().to_string()
        } else {
            summary.to_string()
        };
        self.emit(&text);
    }

    /// Report a command that could not be run.
    pub fn failure(&self, line: &str) {
        let notice = format!("Failed ---> {line}");
        let text = if self.color {
            notice.red().bold().to_string()
        } else {
            notice
        };
        self.emit(&text);
    }

    fn emit(&self, text: &str) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(writer, "{text}").and_then(|()| writer.flush()) {
            warn!(err = %e, "failed to write console diagnostics");
        }
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("color", &self.color)
            .finish_non_exhaustive()
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::stderr(true)
    }
}
