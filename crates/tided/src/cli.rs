//! tided command line: start, stop and status.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! tided start
//!
//! # Start the daemon (background/daemonized)
//! tided start -d
//!
//! # Stop the daemon
//! tided stop
//!
//! # Check daemon status
//! tided status
//!
//! # Custom socket and debug logging
//! TIDE_SOCKET=/run/tide.sock RUST_LOG=tided=debug tided start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use tide_tmux::runner::DEFAULT_COMMAND_TIMEOUT;
use tide_tmux::{CommandRunner, PaneLocator, ProcessRunner, TmuxPaneLocator};

use crate::config::DaemonConfig;
use crate::engine::{spawn_engine, EngineContext, EngineHandle};
use crate::ingest::{HookIngestServer, PendingPermissions};

/// tidewatch daemon - Claude Code session engine
#[derive(Parser, Debug)]
#[command(name = "tided", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tidewatch")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("tided.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("tided.log")
}

fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks that the process exists
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

/// Entry point of the `tided` binary.
pub fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start { daemon: false });

    match command {
        Command::Start { daemon } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'tided stop' to stop it first.");
                process::exit(1);
            }

            // Fail before forking so config errors reach the terminal
            let config = DaemonConfig::load().context("Failed to load configuration")?;

            if daemon {
                daemonize()?;
            }

            write_pid()?;
            let result = run_daemon(config);
            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");

                let config = DaemonConfig::load().unwrap_or_default();
                if config.socket_path.exists() {
                    println!("Socket: {}", config.socket_path.display());
                }
                println!("TCP: {}", config.tcp_addr());

                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout.try_clone().context("Failed to open log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tided=info".parse()?)
                .add_directive("tide_core=info".parse()?)
                .add_directive("tide_protocol=info".parse()?)
                .add_directive("tide_tmux=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        projects_root = %config.projects_root.display(),
        "tidewatch daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let pending = Arc::new(PendingPermissions::new());
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new(
        config.remote.connect_timeout_secs,
        DEFAULT_COMMAND_TIMEOUT,
    ));
    let locator: Arc<dyn PaneLocator> = Arc::new(TmuxPaneLocator::new(Arc::clone(&runner)));

    let engine = spawn_engine(EngineContext::new(&config, Arc::clone(&pending), runner, locator));
    info!("Session engine started");
    spawn_snapshot_logger(&engine, cancel_token.clone());

    let server = HookIngestServer::new(
        config.socket_path.clone(),
        Some(config.tcp_addr()),
        engine,
        pending,
        cancel_token,
    );

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("tidewatch daemon stopped");
    Ok(())
}

/// Logs a one-line summary whenever the published session list changes.
fn spawn_snapshot_logger(engine: &EngineHandle, cancel: CancellationToken) {
    let mut rx = engine.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let (total, waiting) = {
                        let sessions = rx.borrow_and_update();
                        let waiting = sessions.iter().filter(|s| s.phase.is_waiting_for_approval()).count();
                        (sessions.len(), waiting)
                    };
                    debug!(sessions = total, waiting_for_approval = waiting, "sessions updated");
                }
            }
        }
    });
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}
