//! A single external command run with captured output and best-effort cancellation.
//!
//! [`ManagedCommand`] runs either on the caller's thread ([`ManagedCommand::execute`])
//! or as its own task ([`ManagedCommand::spawn`]). Any other thread may call
//! [`ManagedCommand::cancel`] at any time: the live child is sent SIGTERM and
//! then killed, and the waiting task is woken so it returns promptly even if
//! the child's pipes stay open.

use std::fmt;
use std::process::Child;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};

use crate::core::signal::Signal;
use crate::core::state::CommandState;
use crate::core::summary::{decode_lossy, exit_code, format_summary};
use crate::io::console::Console;
use crate::io::process::{
    ProcessSlot, REAP_GRACE, WaitOutcome, reap_killed, spawn_merged, split_command_line,
    terminate_then_kill, wait_interruptible,
};
use crate::io::sink::{OutputSink, append_record};

/// Default interval between checks of a running child.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Result of one run: the exit code and the decoded merged output.
///
/// A simulated run yields `rc = 0` with empty output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub output: String,
}

#[derive(Debug)]
struct Progress {
    state: CommandState,
    result: Option<CommandResult>,
}

/// One external command invocation.
pub struct ManagedCommand {
    command_line: String,
    simulate: bool,
    verbose: bool,
    output_sink: Option<OutputSink>,
    completion_signal: Option<Arc<Signal>>,
    console: Console,
    poll_interval: Duration,
    process: ProcessSlot,
    interrupt: Signal,
    progress: Mutex<Progress>,
}

/// Builder for [`ManagedCommand`]; all settings are fixed once built.
pub struct ManagedCommandBuilder {
    command_line: String,
    simulate: bool,
    verbose: bool,
    output_sink: Option<OutputSink>,
    completion_signal: Option<Arc<Signal>>,
    console: Option<Console>,
    poll_interval: Duration,
}

impl ManagedCommandBuilder {
    /// Skip spawning entirely and report `rc = 0` with no output.
    pub fn simulate(mut self, simulate: bool) -> Self {
        self.simulate = simulate;
        self
    }

    /// Echo the command line and the run summary to the console.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn output_sink(mut self, sink: OutputSink) -> Self {
        self.output_sink = Some(sink);
        self
    }

    /// Signal set once the task started by [`ManagedCommand::spawn`] ends.
    pub fn completion_signal(mut self, signal: Arc<Signal>) -> Self {
        self.completion_signal = Some(signal);
        self
    }

    pub fn console(mut self, console: Console) -> Self {
        self.console = Some(console);
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn build(self) -> ManagedCommand {
        ManagedCommand {
            command_line: self.command_line,
            simulate: self.simulate,
            verbose: self.verbose,
            output_sink: self.output_sink,
            completion_signal: self.completion_signal,
            console: self.console.unwrap_or_default(),
            poll_interval: self.poll_interval,
            process: Mutex::new(None),
            interrupt: Signal::new(),
            progress: Mutex::new(Progress {
                state: CommandState::Idle,
                result: None,
            }),
        }
    }
}

impl ManagedCommand {
    pub fn builder(command_line: impl Into<String>) -> ManagedCommandBuilder {
        ManagedCommandBuilder {
            command_line: command_line.into(),
            simulate: false,
            verbose: false,
            output_sink: None,
            completion_signal: None,
            console: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn new(command_line: impl Into<String>) -> Self {
        Self::builder(command_line).build()
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn state(&self) -> CommandState {
        self.progress().state
    }

    /// Exit code of the finished run; 0 until then.
    pub fn exit_code(&self) -> i32 {
        self.progress()
            .result
            .as_ref()
            .map_or(0, |result| result.exit_code)
    }

    /// Decoded output of the finished run; empty until then.
    pub fn captured_output(&self) -> String {
        self.progress()
            .result
            .as_ref()
            .map(|result| result.output.clone())
            .unwrap_or_default()
    }

    pub fn result(&self) -> Option<CommandResult> {
        self.progress().result.clone()
    }

    /// Pid of the live child, if one is running.
    pub fn pid(&self) -> Option<u32> {
        self.slot().as_ref().map(Child::id)
    }

    /// Run the command on the current thread.
    ///
    /// Blocks until the child exits or [`cancel`](Self::cancel) interrupts the
    /// wait. A cancelled run still returns `Ok`, carrying the signal-derived
    /// exit code and whatever output was captured before the interrupt.
    #[instrument(skip_all, fields(command = %self.command_line, simulate = self.simulate))]
    pub fn execute(&self) -> Result<CommandResult> {
        let state = self.advance(|state| state.begin(self.simulate))?;
        if self.verbose {
            self.console.command(&self.command_line);
        }
        if state == CommandState::Simulated {
            debug!("simulated run, nothing spawned");
            let result = CommandResult::default();
            self.progress().result = Some(result.clone());
            return Ok(result);
        }
        if self.interrupt.is_set() {
            debug!("cancelled before launch, nothing spawned");
            let result = CommandResult::default();
            let mut progress = self.progress();
            progress.state = progress.state.finish(true)?;
            progress.result = Some(result.clone());
            return Ok(result);
        }

        let (result, cancelled) = match self.run_child() {
            Ok(ran) => ran,
            Err(err) => {
                self.discard_child();
                self.advance(CommandState::fail)?;
                error!(err = %format!("{err:#}"), "command failed");
                self.console.failure(&self.command_line);
                return Err(err).with_context(|| format!("run `{}`", self.command_line));
            }
        };

        {
            let mut progress = self.progress();
            progress.state = progress.state.finish(cancelled)?;
            progress.result = Some(result.clone());
        }
        debug!(exit_code = result.exit_code, cancelled, "command finished");

        let summary = format_summary(result.exit_code, &result.output);
        if self.verbose {
            self.console.summary(&summary);
        }
        if let Some(sink) = &self.output_sink {
            append_record(sink, &self.command_line, &summary)?;
        }
        Ok(result)
    }

    /// Run [`execute`](Self::execute) on a dedicated thread.
    ///
    /// The completion signal, if any, is set once the task ends, whether the
    /// run succeeded, failed, was cancelled or was simulated. Errors are
    /// returned by [`TaskHandle::join`].
    pub fn spawn(self: &Arc<Self>) -> Result<TaskHandle> {
        let command = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("cmdtask-command".to_string())
            .spawn(move || {
                let _done = SetOnDrop(command.completion_signal.clone());
                command.execute()
            })
            .context("spawn command thread")?;
        Ok(TaskHandle {
            handle,
            command: Arc::clone(self),
        })
    }

    /// Terminate the live child and wake the waiting task.
    ///
    /// Best-effort and non-blocking: the call never waits for the child to
    /// die and a miss (nothing running, already finished) is silent. Cancelling
    /// before the run starts makes it end `Cancelled` without launching anything.
    #[instrument(skip_all, fields(command = %self.command_line))]
    pub fn cancel(&self) {
        {
            let mut slot = self.slot();
            match slot.as_mut() {
                Some(child) => {
                    debug!(pid = child.id(), "terminating child process");
                    terminate_then_kill(child);
                }
                None => debug!("no live child process"),
            }
        }
        self.interrupt.set();
    }

    fn run_child(&self) -> Result<(CommandResult, bool)> {
        let argv = split_command_line(&self.command_line)?;
        let (child, capture) = spawn_merged(&argv)?;
        // A cancel that lands between the launch check and here is caught by
        // the interrupt check in the wait.
        *self.slot() = Some(child);

        let (status, interrupted) =
            match wait_interruptible(&self.process, &self.interrupt, self.poll_interval)? {
                WaitOutcome::Exited(status) => (status, false),
                WaitOutcome::Interrupted => (self.reap_interrupted()?, true),
            };
        let captured = capture.finish(&self.interrupt, self.poll_interval)?;
        let cancelled = interrupted || !captured.complete;

        Ok((
            CommandResult {
                exit_code: exit_code(status),
                output: decode_lossy(&captured.bytes),
            },
            cancelled,
        ))
    }

    fn reap_interrupted(&self) -> Result<std::process::ExitStatus> {
        let mut child = self
            .slot()
            .take()
            .ok_or_else(|| anyhow!("interrupted child already reaped"))?;
        // cancel() may have arrived before the child existed.
        terminate_then_kill(&mut child);
        reap_killed(&mut child, REAP_GRACE)
    }

    fn discard_child(&self) {
        let Some(mut child) = self.slot().take() else {
            return;
        };
        terminate_then_kill(&mut child);
        if let Err(e) = reap_killed(&mut child, REAP_GRACE) {
            warn!(err = %format!("{e:#}"), "failed to reap discarded child");
        }
    }

    fn advance(
        &self,
        step: impl FnOnce(CommandState) -> Result<CommandState>,
    ) -> Result<CommandState> {
        let mut progress = self.progress();
        progress.state = step(progress.state)?;
        Ok(progress.state)
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self) -> MutexGuard<'_, Option<Child>> {
        self.process.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ManagedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedCommand")
            .field("command_line", &self.command_line)
            .field("simulate", &self.simulate)
            .field("verbose", &self.verbose)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Sets the completion signal when the task body ends, including by panic.
struct SetOnDrop(Option<Arc<Signal>>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        if let Some(signal) = &self.0 {
            signal.set();
        }
    }
}

/// Handle to a command running on its own thread.
#[derive(Debug)]
pub struct TaskHandle {
    handle: thread::JoinHandle<Result<CommandResult>>,
    command: Arc<ManagedCommand>,
}

impl TaskHandle {
    pub fn command(&self) -> &Arc<ManagedCommand> {
        &self.command
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(&self) {
        self.command.cancel();
    }

    /// Wait for the task and return its result or the error that ended it.
    pub fn join(self) -> Result<CommandResult> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "command task panicked: {}",
                self.command.command_line
            )),
        }
    }
}
