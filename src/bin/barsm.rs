//! BARSM - application supervisor for the monitoring unit
//!
//! Launches the manager (AACM) and every application in the watched
//! directories, keeps them under watch, and serves the manager's restart
//! requests.
//!
//! # Usage
//!
//! ```bash
//! # Start the supervisor (foreground)
//! barsm start
//!
//! # Start in the background with a config file
//! barsm start -d --config /etc/barsm.toml
//!
//! # Stop the supervisor
//! barsm stop
//!
//! # Show supervisor status and the last registry snapshot
//! barsm status
//! ```

use std::fs::{self, File};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use barsmd::supervisor::launcher;
use barsmd::{
    spawn_bridge, spawn_monitor_task, DirectoryResult, ProcessSupervisor, StateStore,
    SupervisorConfig,
};

/// Polls made by `stop` while waiting for the supervisor to exit.
const STOP_POLLS: u32 = 50;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// BARSM - launches, watches and restarts the unit's applications
#[derive(Parser, Debug)]
#[command(name = "barsm", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the supervisor
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// TOML config file (default: $BARSM_CONFIG, else built-in defaults)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Stop the running supervisor
    Stop,
    /// Show supervisor status
    Status,
}

fn running_pid(store: &StateStore) -> Option<u32> {
    match store.read_pid() {
        Ok(Some(pid)) if launcher::is_running(pid) => Some(pid),
        Ok(Some(_)) | Err(_) => {
            store.remove_pid();
            None
        }
        Ok(None) => None,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let store = StateStore::new(StateStore::default_dir());

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
    });

    match command {
        Command::Start { daemon, config } => {
            if let Some(pid) = running_pid(&store) {
                eprintln!("Supervisor is already running (PID {pid})");
                eprintln!("Use 'barsm stop' to stop it first.");
                process::exit(1);
            }

            let config = SupervisorConfig::load(config.as_deref()).context("Failed to load configuration")?;

            if daemon {
                daemonize(&store)?;
            }

            store.write_pid(process::id()).context("Failed to write PID file")?;
            let result = run_supervisor(config, store.clone());
            store.remove_pid();

            match result {
                Ok(true) => Ok(()),
                Ok(false) => process::exit(1),
                Err(e) => Err(e),
            }
        }
        Command::Stop => {
            let Some(pid) = running_pid(&store) else {
                println!("Supervisor is not running.");
                return Ok(());
            };
            println!("Stopping supervisor (PID {pid})...");
            if let Err(e) = launcher::terminate(pid) {
                bail!("Failed to send SIGTERM to process {pid}: {e}");
            }

            for _ in 0..STOP_POLLS {
                if !launcher::is_running(pid) {
                    println!("Supervisor stopped.");
                    return Ok(());
                }
                std::thread::sleep(STOP_POLL_INTERVAL);
            }

            eprintln!("Supervisor did not stop within 5 seconds.");
            process::exit(1);
        }
        Command::Status => {
            let Some(pid) = running_pid(&store) else {
                println!("Supervisor is not running.");
                process::exit(1);
            };
            println!("Supervisor is running (PID {pid})");

            match store.read_snapshot().context("Failed to read registry snapshot")? {
                Some(snapshot) => {
                    println!("Snapshot: {}", snapshot.written_at.to_rfc3339());
                    println!("{:<6} {:>8} {:<12} {:>8}  PATH", "NAME", "PID", "STATE", "ATTEMPTS");
                    for child in &snapshot.children {
                        let state = if child.disabled {
                            "disabled".to_string()
                        } else {
                            child.liveness_state().to_string()
                        };
                        let pid = child.process_id.map_or_else(|| "-".to_string(), |p| p.to_string());
                        println!(
                            "{:<6} {:>8} {:<12} {:>8}  {}",
                            child.assigned_name.display_name(),
                            pid,
                            state,
                            child.launch_attempt_count,
                            child.executable().display()
                        );
                    }
                }
                None => println!("No registry snapshot yet."),
            }
            Ok(())
        }
    }
}

fn daemonize(store: &StateStore) -> Result<()> {
    use daemonize::Daemonize;

    fs::create_dir_all(store.dir()).context("Failed to create state directory")?;
    let log_path = store.dir().join("barsm.log");

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout.try_clone().context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

/// Runs the supervisor until a shutdown signal. Returns `false` on a
/// terminal startup failure.
#[tokio::main]
async fn run_supervisor(config: SupervisorConfig, store: StateStore) -> Result<bool> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("barsmd=info".parse()?)
                .add_directive("fdl_core=info".parse()?)
                .add_directive("fdl_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        dirs = config.watch_dirs.len(),
        "BARSM starting"
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

    let (supervisor, handle) = ProcessSupervisor::new(config.clone(), cancel_token.clone());
    let mut supervisor = supervisor.with_state_store(store);

    match supervisor.launch_manager().await {
        DirectoryResult::TerminalError => {
            error!("Manager could not be started, shutting down");
            supervisor.shutdown();
            return Ok(false);
        }
        DirectoryResult::Cancelled => {
            supervisor.shutdown();
            info!("BARSM stopped during startup");
            return Ok(true);
        }
        DirectoryResult::Normal | DirectoryResult::Empty => {}
    }

    if config.bridge_enabled {
        let _bridge = spawn_bridge(
            &config,
            handle.clone(),
            cancel_token.clone(),
            config.bridge_start_delay(),
        );
        info!(addr = %config.aacm_addr, "Messaging bridge scheduled");
    }

    if supervisor.launch_applications().await == DirectoryResult::Cancelled {
        supervisor.shutdown();
        info!("BARSM stopped during startup");
        return Ok(true);
    }

    let _monitor = spawn_monitor_task(handle, config.monitor.clone(), cancel_token.clone());

    supervisor.run().await;
    info!("BARSM stopped");
    Ok(true)
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
