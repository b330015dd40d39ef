//! Caller-owned output sinks that receive a raw record of each run.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};

/// Shared writable target. The runner only appends; opening and closing
/// belong to whoever created it.
pub type OutputSink = Arc<Mutex<dyn Write + Send>>;

/// Open `path` for appending, creating it and its parent directory if needed.
pub fn open_append(path: &Path) -> Result<OutputSink> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create dump dir {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open dump file {}", path.display()))?;
    Ok(Arc::new(Mutex::new(file)))
}

/// Append the command line (newline-terminated) followed by the run summary.
pub fn append_record(sink: &OutputSink, command_line: &str, summary: &str) -> Result<()> {
    let mut writer = sink
        .lock()
        .map_err(|_| anyhow!("output sink lock poisoned"))?;
    writer
        .write_all(command_line.as_bytes())
        .and_then(|()| writer.write_all(b"\n"))
        .context("write command line to output sink")?;
    writer
        .write_all(summary.as_bytes())
        .context("write summary to output sink")?;
    writer.flush().context("flush output sink")?;
    Ok(())
}
