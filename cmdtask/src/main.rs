//! Command runner with captured output, dry runs and cancellation.
//!
//! Each command line is split with POSIX shell rules and run without a shell.
//! Defaults come from `cmdtask.toml`; flags override them.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cmdtask::exit_codes;
use cmdtask::io::config::{DEFAULT_CONFIG_FILE, init_config, load_config};
use cmdtask::io::console::Console;
use cmdtask::logging;
use cmdtask::run::{RunRequest, run_commands};

#[derive(Parser)]
#[command(
    name = "cmdtask",
    version,
    about = "Run external commands with captured output and cancellation"
)]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default configuration file if missing.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one or more command lines.
    Run {
        /// Command lines, each split with POSIX shell rules.
        #[arg(required = true, value_name = "COMMAND")]
        commands: Vec<String>,
        /// Report success without running anything.
        #[arg(short, long)]
        dry_run: bool,
        /// Echo each command line and its `rc = ...` summary.
        #[arg(short, long)]
        verbose: bool,
        /// Start every command at once.
        #[arg(short, long)]
        parallel: bool,
        /// Cancel commands still running after this many seconds.
        #[arg(short, long, value_name = "SECS")]
        timeout: Option<u64>,
        /// Append a raw record of every run to this file.
        #[arg(long, value_name = "PATH")]
        dump: Option<PathBuf>,
        /// Disable colored diagnostics.
        #[arg(long)]
        no_color: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Run {
            commands,
            dry_run,
            verbose,
            parallel,
            timeout,
            dump,
            no_color,
        } => {
            let cfg = load_config(&cli.config)?;
            let mut request = RunRequest::from_config(&cfg, commands);
            request.parallel = parallel;
            request.simulate |= dry_run;
            request.verbose |= verbose;
            request.color &= !no_color;
            if let Some(secs) = timeout {
                anyhow::ensure!(secs > 0, "--timeout must be > 0");
                request.timeout = Some(Duration::from_secs(secs));
            }
            if dump.is_some() {
                request.dump_path = dump;
            }
            cmd_run(&request)
        }
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if init_config(path, force)? {
        println!("wrote {}", path.display());
    } else {
        println!("{} already exists (use --force to overwrite)", path.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_run(request: &RunRequest) -> Result<i32> {
    let console = Console::stderr(request.color);
    let outcome = run_commands(request, &console)?;

    let mut stdout = std::io::stdout().lock();
    for report in &outcome.reports {
        stdout
            .write_all(report.result.output.as_bytes())
            .context("write command output")?;
        if report.timed_out {
            console.failure(&format!("{} (timed out)", report.command_line));
        }
    }
    stdout.flush().context("flush stdout")?;
    Ok(outcome.exit_code())
}
