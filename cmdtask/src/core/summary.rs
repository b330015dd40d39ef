//! Text produced from a finished child process.

use std::process::ExitStatus;

/// Decode child output, replacing invalid UTF-8 with U+FFFD.
pub fn decode_lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Numeric result of a finished child.
///
/// A child ended by a signal has no exit code; it reports the negated signal
/// number instead (`-9` after SIGKILL).
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

/// Human-readable record of a run: `"\nrc = <rc>\n<output>"`.
pub fn format_summary(rc: i32, output: &str) -> String {
    format!("\nrc = {rc}\n{output}")
}
