//! Orchestration for `cmdtask run`: one or more commands, in order or concurrently.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::command::{CommandResult, DEFAULT_POLL_INTERVAL, ManagedCommand, TaskHandle};
use crate::core::signal::Signal;
use crate::core::state::CommandState;
use crate::exit_codes;
use crate::io::config::CmdtaskConfig;
use crate::io::console::Console;
use crate::io::sink::{OutputSink, open_append};

/// Everything needed to run a batch of command lines.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub commands: Vec<String>,
    /// Start every command at once instead of one after another.
    pub parallel: bool,
    /// Cancel any command still running after this long.
    pub timeout: Option<Duration>,
    /// Append a raw record of every run to this file.
    pub dump_path: Option<PathBuf>,
    pub simulate: bool,
    pub verbose: bool,
    pub color: bool,
    pub poll_interval: Duration,
}

impl RunRequest {
    /// Request seeded from config; callers override individual fields afterwards.
    pub fn from_config(cfg: &CmdtaskConfig, commands: Vec<String>) -> Self {
        Self {
            commands,
            parallel: false,
            timeout: cfg.timeout(),
            dump_path: cfg.dump_path.clone(),
            simulate: cfg.dry_run,
            verbose: cfg.verbose,
            color: cfg.color,
            poll_interval: cfg.poll_interval(),
        }
    }
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            parallel: false,
            timeout: None,
            dump_path: None,
            simulate: false,
            verbose: false,
            color: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// What happened to one command of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReport {
    pub command_line: String,
    pub state: CommandState,
    pub result: CommandResult,
    /// The watchdog cancelled this command.
    pub timed_out: bool,
}

/// Reports for the commands that ran, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub reports: Vec<CommandReport>,
}

impl RunOutcome {
    pub fn timed_out(&self) -> bool {
        self.reports.iter().any(|report| report.timed_out)
    }

    pub fn failed(&self) -> bool {
        self.reports
            .iter()
            .any(|report| report.result.exit_code != 0)
    }

    /// Process exit code for the batch.
    pub fn exit_code(&self) -> i32 {
        if self.timed_out() {
            exit_codes::TIMED_OUT
        } else if self.failed() {
            exit_codes::COMMAND_FAILED
        } else {
            exit_codes::OK
        }
    }
}

/// Run every command in `request`.
///
/// Sequential runs stop at the first command with a non-zero exit code.
/// A command that cannot be launched aborts the batch with its error.
#[instrument(skip_all, fields(count = request.commands.len(), parallel = request.parallel))]
pub fn run_commands(request: &RunRequest, console: &Console) -> Result<RunOutcome> {
    let sink = match &request.dump_path {
        Some(path) => Some(open_append(path)?),
        None => None,
    };

    if request.parallel {
        run_parallel(request, console, sink.as_ref())
    } else {
        run_sequential(request, console, sink.as_ref())
    }
}

fn run_sequential(
    request: &RunRequest,
    console: &Console,
    sink: Option<&OutputSink>,
) -> Result<RunOutcome> {
    let mut outcome = RunOutcome::default();
    for line in &request.commands {
        let task = start(request, console, sink, line)?;
        let report = task.finish()?;
        let failed = report.result.exit_code != 0;
        outcome.reports.push(report);
        if failed {
            warn!(command = %line, "command failed, stopping");
            break;
        }
    }
    Ok(outcome)
}

fn run_parallel(
    request: &RunRequest,
    console: &Console,
    sink: Option<&OutputSink>,
) -> Result<RunOutcome> {
    let mut started = Vec::with_capacity(request.commands.len());
    let mut launch_error = None;
    for line in &request.commands {
        match start(request, console, sink, line) {
            Ok(task) => started.push(task),
            Err(err) => {
                launch_error = Some(err);
                break;
            }
        }
    }

    // Join everything that started before surfacing any error.
    let mut outcome = RunOutcome::default();
    let mut first_error = launch_error;
    for task in started {
        match task.finish() {
            Ok(report) => outcome.reports.push(report),
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(outcome),
    }
}

/// A command task plus the watchdog guarding its timeout.
struct StartedCommand {
    task: TaskHandle,
    watchdog: Option<thread::JoinHandle<bool>>,
}

impl StartedCommand {
    fn finish(self) -> Result<CommandReport> {
        let command = Arc::clone(self.task.command());
        let result = self.task.join();
        let fired = match self.watchdog {
            Some(handle) => handle.join().unwrap_or(false),
            None => false,
        };
        let result = result?;
        let state = command.state();
        Ok(CommandReport {
            command_line: command.command_line().to_string(),
            state,
            result,
            timed_out: timed_out(fired, state),
        })
    }
}

/// A fired watchdog only counts when its cancel actually ended the run; the
/// command may have exited on its own just before `cancel()` landed.
fn timed_out(fired: bool, state: CommandState) -> bool {
    fired && state == CommandState::Cancelled
}

fn start(
    request: &RunRequest,
    console: &Console,
    sink: Option<&OutputSink>,
    line: &str,
) -> Result<StartedCommand> {
    let done = Arc::new(Signal::new());
    let mut builder = ManagedCommand::builder(line)
        .simulate(request.simulate)
        .verbose(request.verbose)
        .console(console.clone())
        .poll_interval(request.poll_interval)
        .completion_signal(Arc::clone(&done));
    if let Some(sink) = sink {
        builder = builder.output_sink(Arc::clone(sink));
    }
    let command = Arc::new(builder.build());
    let task = command.spawn()?;
    debug!(command = %line, "command task started");

    let watchdog = match request.timeout {
        Some(timeout) => Some(arm_watchdog(&command, &done, timeout)?),
        None => None,
    };
    Ok(StartedCommand { task, watchdog })
}

/// Cancel `command` unless `done` is set within `timeout`.
///
/// The returned handle yields whether the watchdog fired, which does not by
/// itself mean the command was cut short.
fn arm_watchdog(
    command: &Arc<ManagedCommand>,
    done: &Arc<Signal>,
    timeout: Duration,
) -> Result<thread::JoinHandle<bool>> {
    let command = Arc::clone(command);
    let done = Arc::clone(done);
    thread::Builder::new()
        .name("cmdtask-watchdog".to_string())
        .spawn(move || {
            if done.wait_timeout(timeout) {
                return false;
            }
            info!(
                command = %command.command_line(),
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "command timed out, cancelling"
            );
            command.cancel();
            true
        })
        .context("spawn watchdog thread")
}
