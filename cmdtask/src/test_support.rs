//! Test-only helpers for capturing console and sink output.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::io::console::{Console, ConsoleWriter};
use crate::io::sink::OutputSink;

/// In-memory buffer that can back a console or an output sink.
pub type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// Output sink writing into a buffer the test can read back.
pub fn memory_sink() -> (OutputSink, SharedBuffer) {
    let buf: SharedBuffer = Arc::new(Mutex::new(Vec::new()));
    let sink: OutputSink = buf.clone();
    (sink, buf)
}

/// Uncolored console writing into a buffer the test can read back.
pub fn memory_console() -> (Console, SharedBuffer) {
    let buf: SharedBuffer = Arc::new(Mutex::new(Vec::new()));
    let writer: ConsoleWriter = buf.clone();
    (Console::new(writer, false), buf)
}

/// Buffer contents as UTF-8 text (lossy).
pub fn buffer_text(buf: &SharedBuffer) -> String {
    let bytes = buf.lock().map(|b| b.clone()).unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Command line running `script` under `sh -c`.
pub fn sh(script: &str) -> String {
    let quoted = shlex::try_quote(script).unwrap_or_else(|_| script.into());
    format!("sh -c {quoted}")
}

/// Writer whose every write fails, for exercising sink errors.
#[derive(Debug, Default)]
pub struct FailingWriter;

impl Write for FailingWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::other("sink closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::other("sink closed"))
    }
}
