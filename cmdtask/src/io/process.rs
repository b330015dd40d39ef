//! Helpers for launching a child process with merged output and interruptible waits.
//!
//! Stdout and stderr share one OS pipe, drained by a single reader thread, so
//! the capture is one stream in the order the child wrote it. Waiting never holds
//! the process slot lock while parked, so another thread can always reach the
//! child to kill it.

use std::io::{self, ErrorKind, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::signal::Signal;

/// Bound on reaping a child after it was sent SIGKILL.
pub const REAP_GRACE: Duration = Duration::from_secs(5);

/// Slot holding the live child while it runs.
///
/// A child is removed from the slot (under the lock) as soon as it has been
/// reaped, so its pid is never signaled after the OS may have reused it.
pub type ProcessSlot = Mutex<Option<Child>>;

/// Split a command line into an argument vector using POSIX shell rules.
pub fn split_command_line(line: &str) -> Result<Vec<String>> {
    let argv = shlex::split(line)
        .ok_or_else(|| anyhow!("cannot split command line (unbalanced quotes?): {line}"))?;
    if argv.is_empty() {
        bail!("empty command line");
    }
    Ok(argv)
}

/// Byte buffer filled by the output reader.
#[derive(Debug, Clone, Default)]
struct MergedOutput {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MergedOutput {
    fn append(&self, chunk: &[u8]) {
        self.lock().extend_from_slice(chunk);
    }

    fn snapshot(&self) -> Vec<u8> {
        self.lock().clone()
    }

    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Output collected from a child.
#[derive(Debug)]
pub struct CapturedOutput {
    pub bytes: Vec<u8>,
    /// False when the reader was abandoned before the pipe closed.
    pub complete: bool,
}

/// Reader thread draining the pipe shared by a child's stdout and stderr.
#[derive(Debug)]
pub struct OutputCapture {
    output: MergedOutput,
    reader: thread::JoinHandle<Result<()>>,
    drained: Arc<Signal>,
}

impl OutputCapture {
    /// Wait for the pipe to close, or give up once `interrupt` is set.
    ///
    /// After an interrupt the reader is detached and whatever has been
    /// collected so far is returned: a grandchild that inherited the pipe
    /// must not keep the caller blocked.
    pub fn finish(self, interrupt: &Signal, poll: Duration) -> Result<CapturedOutput> {
        let Self {
            output,
            reader,
            drained,
        } = self;
        loop {
            if drained.wait_timeout(poll) {
                join_reader(reader)?;
                return Ok(CapturedOutput {
                    bytes: output.take(),
                    complete: true,
                });
            }
            if interrupt.is_set() {
                warn!("output pipe still open after interrupt, abandoning reader");
                return Ok(CapturedOutput {
                    bytes: output.snapshot(),
                    complete: false,
                });
            }
        }
    }
}

fn join_reader(handle: thread::JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Spawn `argv` with stdin disconnected and stdout/stderr sharing one pipe.
///
/// Both streams write to the same pipe, so the capture keeps the order in
/// which the child wrote, as `2>&1` would.
#[instrument(skip_all, fields(program = %argv.first().map(String::as_str).unwrap_or_default()))]
pub fn spawn_merged(argv: &[String]) -> Result<(Child, OutputCapture)> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty argument vector"))?;
    let (pipe_reader, pipe_writer) = io::pipe().context("create output pipe")?;
    let stderr_writer = pipe_writer
        .try_clone()
        .context("duplicate output pipe for stderr")?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(pipe_writer)
        .stderr(stderr_writer);

    debug!("spawning child process");
    let spawned = cmd.spawn();
    // The parent's write ends live in `cmd`; the reader only sees EOF once
    // they are closed.
    drop(cmd);
    let child = match spawned {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {program}"));
        }
    };

    let output = MergedOutput::default();
    let drained = Arc::new(Signal::new());
    let reader = spawn_reader(pipe_reader, &output, &drained);

    debug!(pid = child.id(), "child process started");
    Ok((
        child,
        OutputCapture {
            output,
            reader,
            drained,
        },
    ))
}

fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    output: &MergedOutput,
    drained: &Arc<Signal>,
) -> thread::JoinHandle<Result<()>> {
    let output = output.clone();
    let drained = Arc::clone(drained);
    thread::spawn(move || {
        let result = drain_into(reader, &output);
        drained.set();
        result
    })
}

fn drain_into<R: Read>(mut reader: R, output: &MergedOutput) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("read child output"),
        };
        if n == 0 {
            return Ok(());
        }
        output.append(&chunk[..n]);
    }
}

/// How a wait on a child ended.
#[derive(Debug)]
pub enum WaitOutcome {
    /// The child exited and was reaped; it is no longer in the slot.
    Exited(ExitStatus),
    /// The interrupt signal was raised; the child is still in the slot.
    Interrupted,
}

/// Poll the child in `slot` until it exits or `interrupt` is set.
pub fn wait_interruptible(
    slot: &ProcessSlot,
    interrupt: &Signal,
    poll: Duration,
) -> Result<WaitOutcome> {
    loop {
        {
            let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            let child = guard
                .as_mut()
                .ok_or_else(|| anyhow!("no live child process to wait for"))?;
            if let Some(status) = child.try_wait().context("poll child process")? {
                guard.take();
                debug!(?status, "child process exited");
                return Ok(WaitOutcome::Exited(status));
            }
        }
        if interrupt.wait_timeout(poll) {
            debug!("wait interrupted");
            return Ok(WaitOutcome::Interrupted);
        }
    }
}

/// Ask the child to terminate, then kill it without waiting for the request to land.
///
/// Best-effort: failures (typically because the child already exited) are
/// only traced.
pub fn terminate_then_kill(child: &mut Child) {
    let pid = child.id();
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal as OsSignal, kill};
        use nix::unistd::Pid;

        match i32::try_from(pid) {
            Ok(raw) => {
                if let Err(e) = kill(Pid::from_raw(raw), OsSignal::SIGTERM) {
                    debug!(pid, err = %e, "SIGTERM not delivered");
                }
            }
            Err(_) => warn!(pid, "pid out of range, skipping SIGTERM"),
        }
    }
    if let Err(e) = child.kill() {
        debug!(pid, err = %e, "kill not delivered");
    }
}

/// Reap a child that has been sent a kill, waiting at most `grace` before blocking.
pub fn reap_killed(child: &mut Child, grace: Duration) -> Result<ExitStatus> {
    match child.wait_timeout(grace).context("wait for killed child")? {
        Some(status) => Ok(status),
        None => {
            warn!(
                pid = child.id(),
                grace_secs = grace.as_secs(),
                "child still alive after kill, waiting"
            );
            child.kill().ok();
            child.wait().context("wait killed child")
        }
    }
}
