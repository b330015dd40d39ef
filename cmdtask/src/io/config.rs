//! Runner configuration stored in `cmdtask.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default configuration file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "cmdtask.toml";

/// Runner configuration (TOML).
///
/// Passed explicitly into every run; nothing here is global. Missing fields
/// fall back to the defaults below, and command-line flags override them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CmdtaskConfig {
    /// Echo each command line and its `rc = ...` summary.
    pub verbose: bool,

    /// Never spawn anything; every command reports `rc = 0` with no output.
    pub dry_run: bool,

    /// Colorize console diagnostics.
    pub color: bool,

    /// Append a raw record of every run to this file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump_path: Option<PathBuf>,

    /// Cancel a command that is still running after this many seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// How often a waiting task re-checks its child and cancellation state.
    pub poll_interval_ms: u64,
}

impl Default for CmdtaskConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            dry_run: false,
            color: true,
            dump_path: None,
            timeout_secs: None,
            poll_interval_ms: 20,
        }
    }
}

impl CmdtaskConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be > 0"));
        }
        if self.timeout_secs == Some(0) {
            return Err(anyhow!("timeout_secs must be > 0 when set"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CmdtaskConfig::default()`.
pub fn load_config(path: &Path) -> Result<CmdtaskConfig> {
    if !path.exists() {
        let cfg = CmdtaskConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CmdtaskConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &CmdtaskConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write the default config unless one exists and `force` is false.
///
/// Returns whether a file was written.
pub fn init_config(path: &Path, force: bool) -> Result<bool> {
    if !force && path.exists() {
        return Ok(false);
    }
    write_config(path, &CmdtaskConfig::default())?;
    Ok(true)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
