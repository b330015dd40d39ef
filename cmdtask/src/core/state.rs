//! Lifecycle states of a managed command.

use std::fmt;

use anyhow::{Result, anyhow};

/// Lifecycle of a single `ManagedCommand`.
///
/// ```text
/// Idle ──► Running ──► Completed | Cancelled | Failed
///   └────► Simulated
/// ```
///
/// Every state right of `Running` is terminal; instances are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Idle,
    Running,
    /// The child exited on its own.
    Completed,
    /// Dry run: no process was spawned.
    Simulated,
    /// `cancel()` interrupted the run before it finished.
    Cancelled,
    /// Launching or waiting on the child failed; the error went to the caller.
    Failed,
}

impl CommandState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Simulated | Self::Cancelled | Self::Failed
        )
    }

    /// Leave `Idle`, either into a real run or straight into a dry run.
    pub fn begin(self, simulate: bool) -> Result<Self> {
        match self {
            Self::Idle if simulate => Ok(Self::Simulated),
            Self::Idle => Ok(Self::Running),
            other => Err(anyhow!("command already started (state: {other})")),
        }
    }

    /// Leave `Running` once the child is gone.
    pub fn finish(self, cancelled: bool) -> Result<Self> {
        match self {
            Self::Running if cancelled => Ok(Self::Cancelled),
            Self::Running => Ok(Self::Completed),
            other => Err(anyhow!("command is not running (state: {other})")),
        }
    }

    pub fn fail(self) -> Result<Self> {
        match self {
            Self::Running => Ok(Self::Failed),
            other => Err(anyhow!("command is not running (state: {other})")),
        }
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Simulated => "simulated",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
