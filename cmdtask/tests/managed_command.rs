//! Behavioral tests for `ManagedCommand` against real child processes.
//!
//! Commands run through `/bin/sh` or plain coreutils, so these tests are
//! unix-only.
#![cfg(unix)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cmdtask::command::{CommandResult, ManagedCommand};
use cmdtask::core::signal::Signal;
use cmdtask::core::state::CommandState;
use cmdtask::io::sink::OutputSink;
use cmdtask::test_support::{FailingWriter, buffer_text, memory_console, memory_sink, sh};
use nix::errno::Errno;
use nix::sys::signal::{Signal as OsSignal, kill};
use nix::unistd::Pid;

/// Poll until the command has a live child, or panic after `limit`.
fn wait_for_pid(command: &ManagedCommand, limit: Duration) -> u32 {
    let start = Instant::now();
    loop {
        if let Some(pid) = command.pid() {
            return pid;
        }
        assert!(start.elapsed() < limit, "child never started");
        thread::sleep(Duration::from_millis(5));
    }
}

fn process_gone(pid: u32) -> bool {
    let raw = i32::try_from(pid).expect("pid fits i32");
    kill(Pid::from_raw(raw), None::<OsSignal>) == Err(Errno::ESRCH)
}

#[test]
fn simulate_returns_zero_without_spawning() {
    let (console, log) = memory_console();
    let command = ManagedCommand::builder("cmdtask-definitely-missing --x 'y z'")
        .simulate(true)
        .verbose(true)
        .console(console)
        .build();

    let result = command.execute().expect("simulate");

    assert_eq!(result, CommandResult::default());
    assert_eq!(command.state(), CommandState::Simulated);
    // The command line is still echoed, but no summary is produced.
    assert_eq!(
        buffer_text(&log),
        "cmdtask-definitely-missing --x 'y z'\n"
    );
}

#[test]
fn exit_code_is_preserved() {
    for code in [0, 1, 42, 255] {
        let command = ManagedCommand::new(sh(&format!("exit {code}")));
        let result = command.execute().expect("execute");
        assert_eq!(result.exit_code, code);
        assert_eq!(command.state(), CommandState::Completed);
    }
}

#[test]
fn stdout_is_captured_exactly() {
    let command = ManagedCommand::new(sh(r"printf 'hello\nworld'"));
    let result = command.execute().expect("execute");
    assert_eq!(result.output, "hello\nworld");
}

#[test]
fn stdout_and_stderr_are_merged() {
    let command = ManagedCommand::new(sh("printf A; printf B >&2; printf C"));
    let result = command.execute().expect("execute");
    assert_eq!(result.output, "ABC");
}

#[test]
fn merged_output_keeps_write_order_across_runs() {
    for _ in 0..50 {
        let command = ManagedCommand::new(sh("printf 1; printf 2 >&2; printf 3; printf 4 >&2"));
        let result = command.execute().expect("execute");
        assert_eq!(result.output, "1234");
    }
}

#[test]
fn cancel_before_execute_never_launches() {
    let temp = tempfile::tempdir().expect("tempdir");
    let marker = temp.path().join("touched");
    let (sink, buf) = memory_sink();
    let command = ManagedCommand::builder(format!("touch {}", marker.display()))
        .output_sink(sink)
        .build();

    command.cancel();
    let result = command.execute().expect("execute");

    assert_eq!(command.state(), CommandState::Cancelled);
    assert_eq!(result, CommandResult::default());
    assert!(!marker.exists());
    assert_eq!(buffer_text(&buf), "");
}

#[test]
fn invalid_utf8_is_replaced() {
    let command = ManagedCommand::new(sh(r"printf 'ok\377\376'"));
    let result = command.execute().expect("execute");
    assert!(result.output.starts_with("ok"));
    assert!(result.output.contains('\u{FFFD}'));
}

#[test]
fn arguments_follow_shell_quoting() {
    let command = ManagedCommand::new(r#"printf '%s|' "two words" 'a b' c"#);
    let result = command.execute().expect("execute");
    assert_eq!(result.output, "two words|a b|c|");
}

#[test]
fn launch_failure_is_reported_and_propagated() {
    let (console, log) = memory_console();
    let command = ManagedCommand::builder("cmdtask-definitely-missing --flag")
        .console(console)
        .build();

    let err = command.execute().unwrap_err();

    assert!(format!("{err:#}").contains("cmdtask-definitely-missing"));
    assert_eq!(command.state(), CommandState::Failed);
    assert_eq!(
        buffer_text(&log),
        "Failed ---> cmdtask-definitely-missing --flag\n"
    );
}

#[test]
fn unbalanced_quotes_fail_before_launch() {
    let (console, log) = memory_console();
    let command = ManagedCommand::builder("echo \"unterminated")
        .console(console)
        .build();

    assert!(command.execute().is_err());
    assert_eq!(command.state(), CommandState::Failed);
    assert!(buffer_text(&log).starts_with("Failed ---> echo"));
}

#[test]
fn verbose_echoes_command_and_summary() {
    let (console, log) = memory_console();
    let command = ManagedCommand::builder(sh("printf hi"))
        .verbose(true)
        .console(console)
        .build();

    command.execute().expect("execute");

    let text = buffer_text(&log);
    assert!(text.starts_with("sh -c"));
    assert!(text.ends_with("\nrc = 0\nhi\n"));
}

#[test]
fn sink_receives_command_line_and_summary() {
    let (sink, buf) = memory_sink();
    let line = sh("printf captured; exit 5");
    let command = ManagedCommand::builder(line.clone())
        .output_sink(sink)
        .build();

    let result = command.execute().expect("execute");

    assert_eq!(result.exit_code, 5);
    // The returned output excludes the summary header.
    assert_eq!(result.output, "captured");
    assert_eq!(buffer_text(&buf), format!("{line}\n\nrc = 5\ncaptured"));
}

#[test]
fn shared_sink_collects_every_command() {
    let (sink, buf) = memory_sink();
    for script in ["printf one", "printf two"] {
        ManagedCommand::builder(sh(script))
            .output_sink(Arc::clone(&sink))
            .build()
            .execute()
            .expect("execute");
    }
    let text = buffer_text(&buf);
    assert!(text.contains("\nrc = 0\none"));
    assert!(text.contains("\nrc = 0\ntwo"));
}

#[test]
fn sink_write_failure_propagates() {
    let sink: OutputSink = Arc::new(Mutex::new(FailingWriter));
    let command = ManagedCommand::builder(sh("exit 0"))
        .output_sink(sink)
        .build();

    let err = command.execute().unwrap_err();
    assert!(format!("{err:#}").contains("output sink"));
    // The run itself finished; only the record could not be written.
    assert_eq!(command.state(), CommandState::Completed);
}

#[test]
fn completion_signal_is_set_for_success_and_failure() {
    for (script, expected) in [("exit 0", 0), ("exit 1", 1)] {
        let done = Arc::new(Signal::new());
        let command = Arc::new(
            ManagedCommand::builder(sh(script))
                .completion_signal(Arc::clone(&done))
                .build(),
        );

        let task = command.spawn().expect("spawn");
        let result = task.join().expect("join");

        assert!(done.is_set());
        assert_eq!(result.exit_code, expected);
        assert_eq!(command.exit_code(), expected);
        assert_eq!(command.state(), CommandState::Completed);
    }
}

#[test]
fn completion_signal_is_set_when_launch_fails() {
    let (console, _log) = memory_console();
    let done = Arc::new(Signal::new());
    let command = Arc::new(
        ManagedCommand::builder("cmdtask-definitely-missing")
            .console(console)
            .completion_signal(Arc::clone(&done))
            .build(),
    );

    let task = command.spawn().expect("spawn");
    assert!(done.wait_timeout(Duration::from_secs(10)));
    assert!(task.join().is_err());
    assert_eq!(command.state(), CommandState::Failed);
}

#[test]
fn waiters_can_block_on_completion_signal() {
    let done = Arc::new(Signal::new());
    let command = Arc::new(
        ManagedCommand::builder(sh("sleep 0.1; printf late"))
            .completion_signal(Arc::clone(&done))
            .build(),
    );

    let task = command.spawn().expect("spawn");
    done.wait();

    assert_eq!(command.captured_output(), "late");
    task.join().expect("join");
}

#[test]
fn cancel_stops_long_running_task_promptly() {
    let command = Arc::new(ManagedCommand::new("sleep 60"));
    let task = command.spawn().expect("spawn");
    let pid = wait_for_pid(&command, Duration::from_secs(5));

    let start = Instant::now();
    command.cancel();
    let result = task.join().expect("join");

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(command.state(), CommandState::Cancelled);
    assert!(result.exit_code < 0, "killed child reports a signal");
    assert!(process_gone(pid));
    assert_eq!(command.pid(), None);
}

#[test]
fn cancel_does_not_wait_for_inherited_pipes() {
    // The shell forks `sleep`, which keeps the output pipe open after the
    // shell itself is killed.
    let command = Arc::new(ManagedCommand::new(sh("printf early; sleep 30; printf never")));
    let task = command.spawn().expect("spawn");
    wait_for_pid(&command, Duration::from_secs(5));
    thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    task.cancel();
    let result = task.join().expect("join");

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(command.state(), CommandState::Cancelled);
    assert!(result.output.starts_with("early"));
    assert!(!result.output.contains("never"));
}

#[test]
fn cancel_sets_completion_signal() {
    let done = Arc::new(Signal::new());
    let command = Arc::new(
        ManagedCommand::builder("sleep 60")
            .completion_signal(Arc::clone(&done))
            .build(),
    );
    let task = command.spawn().expect("spawn");
    wait_for_pid(&command, Duration::from_secs(5));

    command.cancel();

    assert!(done.wait_timeout(Duration::from_secs(2)));
    task.join().expect("join");
}

#[test]
fn late_cancel_has_no_effect() {
    let command = Arc::new(ManagedCommand::new(sh("printf finished")));
    let task = command.spawn().expect("spawn");
    let result = task.join().expect("join");

    command.cancel();
    command.cancel();

    assert_eq!(command.state(), CommandState::Completed);
    assert_eq!(command.result(), Some(result));
    assert_eq!(command.captured_output(), "finished");
}

#[test]
fn concurrent_commands_are_independent() {
    let commands: Vec<Arc<ManagedCommand>> = (0..4)
        .map(|i| Arc::new(ManagedCommand::new(sh(&format!("printf {i}; exit {i}")))))
        .collect();
    let tasks: Vec<_> = commands
        .iter()
        .map(|command| command.spawn().expect("spawn"))
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        let result = task.join().expect("join");
        let expected = i32::try_from(i).expect("small index");
        assert_eq!(result.exit_code, expected);
        assert_eq!(result.output, i.to_string());
    }
}
