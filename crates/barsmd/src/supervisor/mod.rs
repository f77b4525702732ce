//! Process supervisor.
//!
//! `ProcessSupervisor` discovers the executables in the watched
//! directories, launches them under a bounded retry policy, and keeps
//! their records in a [`ChildRegistry`]. It is the only owner of the
//! registry. Child exits reach it as messages from the reaper task;
//! outside requests arrive as [`SupervisorCommand`]s through a
//! [`SupervisorHandle`].
//!
//! # Startup order
//!
//! The first watched directory holds the manager. It is launched alone
//! and must come up; if it cannot, startup stops with
//! [`DirectoryResult::TerminalError`]. The other directories follow in
//! order, and their failures are logged only. A shutdown request during
//! startup stops launching at once with [`DirectoryResult::Cancelled`].
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply and event send failures are ignored (the receiver went away)

mod commands;
mod handle;
pub mod launcher;
mod reaper;
mod registry;

pub use commands::{CheckReport, DirectoryResult, SupervisorCommand, SupervisorError, SupervisorEvent};
pub use handle::SupervisorHandle;
pub use reaper::{spawn_reaper, ChildExit, ReaperHandle};
pub use registry::ChildRegistry;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fdl_core::{AppName, ChildProcess, ChildRole, LivenessState};

use crate::config::SupervisorConfig;
use crate::state::{RegistrySnapshot, StateStore};

/// Capacity of the command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct ProcessSupervisor {
    config: SupervisorConfig,
    registry: ChildRegistry,
    reaper: ReaperHandle,
    exits: mpsc::UnboundedReceiver<ChildExit>,
    receiver: mpsc::Receiver<SupervisorCommand>,
    event_sender: broadcast::Sender<SupervisorEvent>,
    state_store: Option<StateStore>,
    cancel_token: CancellationToken,
    reaper_token: CancellationToken,
}

impl ProcessSupervisor {
    /// Creates the supervisor and its handle. Starts the reaper task, so
    /// this must be called inside a tokio runtime.
    pub fn new(config: SupervisorConfig, cancel_token: CancellationToken) -> (Self, SupervisorHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let reaper_token = cancel_token.child_token();
        let (reaper, exits) = spawn_reaper(reaper_token.clone());

        let supervisor = Self {
            config,
            registry: ChildRegistry::new(),
            reaper,
            exits,
            receiver: cmd_rx,
            event_sender: event_tx.clone(),
            state_store: None,
            cancel_token,
            reaper_token,
        };
        (supervisor, SupervisorHandle::new(cmd_tx, event_tx))
    }

    /// Writes `registry.json` into `store` after launches and checks.
    pub fn with_state_store(mut self, store: StateStore) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn registry(&self) -> &ChildRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    // ========================================================================
    // Launching
    // ========================================================================

    /// Launches the manager directory.
    pub async fn launch_manager(&mut self) -> DirectoryResult {
        let Some(dir) = self.config.aacm_dir().map(Path::to_path_buf) else {
            error!("No manager directory configured");
            return DirectoryResult::TerminalError;
        };
        let result = self.launch_directory(&dir, ChildRole::Manager).await;
        if result == DirectoryResult::Empty {
            warn!(dir = %dir.display(), "Manager directory is empty");
        }
        result
    }

    /// Launches every directory after the manager's, in order.
    pub async fn launch_applications(&mut self) -> DirectoryResult {
        let dirs: Vec<PathBuf> = self.config.watch_dirs.iter().skip(1).cloned().collect();
        for dir in dirs {
            let result = self.launch_directory(&dir, ChildRole::Application).await;
            debug!(dir = %dir.display(), ?result, "Directory done");
            if result == DirectoryResult::Cancelled {
                return result;
            }
        }
        DirectoryResult::Normal
    }

    /// Manager first, then applications. Stops early on a terminal error
    /// or a shutdown request.
    pub async fn launch_all(&mut self) -> DirectoryResult {
        match self.launch_manager().await {
            result @ (DirectoryResult::TerminalError | DirectoryResult::Cancelled) => result,
            DirectoryResult::Normal | DirectoryResult::Empty => self.launch_applications().await,
        }
    }

    /// Launches every item in `dir` with `role`.
    ///
    /// Only a manager directory can produce `TerminalError`: when it cannot
    /// be read, or when one of its items ends up disabled.
    pub async fn launch_directory(&mut self, dir: &Path, role: ChildRole) -> DirectoryResult {
        let is_manager = role == ChildRole::Manager;
        let items = match launcher::discover(dir).await {
            Ok(items) => items,
            Err(e) if is_manager => {
                error!(dir = %dir.display(), error = %e, "Cannot read manager directory");
                return DirectoryResult::TerminalError;
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Cannot read directory, skipping");
                return DirectoryResult::Empty;
            }
        };

        if items.is_empty() {
            info!(dir = %dir.display(), "Nothing to launch");
            return DirectoryResult::Empty;
        }

        info!(dir = %dir.display(), count = items.len(), ?role, "Launching directory");
        let mut result = DirectoryResult::Normal;
        for item in items {
            if self.cancel_token.is_cancelled() {
                info!(dir = %dir.display(), "Shutdown requested, launching stopped");
                result = DirectoryResult::Cancelled;
                break;
            }
            let name = match self.registry.register(dir, &item, role) {
                Ok(name) => name,
                Err(e) => {
                    error!(dir = %dir.display(), item = %item, error = %e, "Cannot register item");
                    if is_manager {
                        result = DirectoryResult::TerminalError;
                        break;
                    }
                    continue;
                }
            };

            let state = self.ensure_started(name).await;
            if self.cancel_token.is_cancelled() {
                info!(dir = %dir.display(), name = %name, "Shutdown requested, launching stopped");
                result = DirectoryResult::Cancelled;
                break;
            }
            if is_manager && state != LivenessState::Alive {
                error!(item = %item, name = %name, "Manager failed to start");
                result = DirectoryResult::TerminalError;
                break;
            }
        }

        self.save_snapshot();
        result
    }

    /// Spawns one launch attempt for `name` and hands the child to the reaper.
    fn launch_child(&mut self, name: AppName) -> Option<u32> {
        let child = self.registry.get_mut(name)?;
        let path = child.executable();
        match launcher::spawn(&path) {
            Ok(process) => {
                let pid = process.id();
                child.record_launch(pid);
                info!(
                    name = %name,
                    path = %path.display(),
                    pid = ?pid,
                    attempt = child.launch_attempt_count,
                    "Child launched"
                );
                if let Some(pid) = pid {
                    if !self.reaper.watch(pid, process) {
                        warn!(name = %name, pid, "Reaper stopped, exit will not be observed");
                    }
                }
                pid
            }
            Err(e) => {
                child.record_launch(None);
                warn!(
                    name = %name,
                    path = %path.display(),
                    attempt = child.launch_attempt_count,
                    error = %e,
                    "Spawn failed"
                );
                None
            }
        }
    }

    /// Launches `name` and retries until it stays up or the policy runs out.
    ///
    /// Each pass sleeps one check period, then looks at the child. A dead
    /// child is relaunched and its run time starts over. The loop ends at
    /// `max_attempts` launches, or once the child has run longer than the
    /// start-ensure delay. After a final settle delay the child is either
    /// confirmed alive or disabled for good.
    ///
    /// On shutdown the wait is abandoned and the child is left unsettled.
    async fn ensure_started(&mut self, name: AppName) -> LivenessState {
        let policy = self.config.launch.clone();
        let check = policy.check_period();
        let settle = policy.start_ensure_delay();

        if self.cancel_token.is_cancelled() {
            return self.liveness(name);
        }
        self.launch_child(name);
        let mut run_time = Duration::ZERO;
        while self.attempts(name) < policy.max_attempts && run_time <= settle {
            if !self.pause(check).await {
                return self.liveness(name);
            }
            self.drain_exits();
            if self.has_exited(name) {
                debug!(name = %name, attempts = self.attempts(name), "Child died during startup, retrying");
                self.launch_child(name);
                run_time = Duration::ZERO;
            } else {
                run_time += check;
            }
        }

        if !self.pause(settle).await {
            return self.liveness(name);
        }
        self.drain_exits();
        self.settle(name)
    }

    /// Sleeps for `duration`. Returns false if shutdown came first.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => false,
            _ = sleep(duration) => true,
        }
    }

    fn liveness(&self, name: AppName) -> LivenessState {
        self.registry.get(name).map_or(LivenessState::Dead, ChildProcess::liveness_state)
    }

    fn attempts(&self, name: AppName) -> u32 {
        self.registry.get(name).map_or(0, |c| c.launch_attempt_count)
    }

    fn has_exited(&self, name: AppName) -> bool {
        self.registry.get(name).map_or(true, ChildProcess::has_exited)
    }

    fn settle(&mut self, name: AppName) -> LivenessState {
        let Some(child) = self.registry.get_mut(name) else {
            return LivenessState::Dead;
        };

        if child.has_exited() {
            child.disabled = true;
            error!(
                name = %name,
                attempts = child.launch_attempt_count,
                exit_code = ?child.exit_code,
                "Launch retries exhausted, child disabled"
            );
            let _ = self.event_sender.send(SupervisorEvent::ChildDisabled { name });
            return LivenessState::Dead;
        }

        if let Err(e) = child.transition(LivenessState::Alive) {
            debug!(name = %name, error = %e, "Liveness already settled");
        }
        info!(name = %name, pid = ?child.process_id, "Child confirmed alive");
        child.liveness_state()
    }

    // ========================================================================
    // Exits and checks
    // ========================================================================

    fn drain_exits(&mut self) {
        while let Ok(exit) = self.exits.try_recv() {
            self.handle_exit(exit);
        }
    }

    /// Records an exit reported by the reaper.
    ///
    /// Exits of earlier launches (the pid no longer matches) are ignored.
    /// A child that had been confirmed alive raises `HealthFailure`.
    pub fn handle_exit(&mut self, exit: ChildExit) {
        let Some(child) = self.registry.by_pid_mut(exit.pid) else {
            debug!(pid = exit.pid, code = ?exit.code, "Exit of untracked pid");
            return;
        };

        let was_alive = child.liveness_state() == LivenessState::Alive;
        if child.transition(LivenessState::Dead).is_err() {
            return;
        }
        child.exit_code = exit.code;
        let name = child.assigned_name;

        let _ = self.event_sender.send(SupervisorEvent::ChildExited {
            name,
            pid: exit.pid,
            code: exit.code,
        });

        if !was_alive {
            debug!(name = %name, pid = exit.pid, code = ?exit.code, "Child exited during startup");
            return;
        }
        if child.is_manager() {
            error!(name = %name, pid = exit.pid, code = ?exit.code, "Manager exited");
        } else {
            warn!(
                name = %name,
                pid = exit.pid,
                code = ?exit.code,
                "Application exited, waiting for a restart request"
            );
        }
        let _ = self.event_sender.send(SupervisorEvent::HealthFailure { name });
    }

    /// Applies pending exits, then probes every pid still believed to run.
    pub fn reap_and_check(&mut self) -> CheckReport {
        self.drain_exits();

        let vanished: Vec<u32> = self
            .registry
            .running_pids()
            .into_iter()
            .filter(|pid| !launcher::is_running(*pid))
            .collect();
        for pid in vanished {
            warn!(pid, "Child vanished without an exit report");
            self.handle_exit(ChildExit { pid, code: None });
        }

        let report = CheckReport {
            alive: self.registry.count_in(LivenessState::Alive),
            unconfirmed: self.registry.count_in(LivenessState::Unconfirmed),
            dead: self.registry.count_in(LivenessState::Dead),
            disabled: self.registry.iter().filter(|c| c.disabled).count(),
        };
        info!(
            alive = report.alive,
            unconfirmed = report.unconfirmed,
            dead = report.dead,
            disabled = report.disabled,
            "Fleet check"
        );
        self.save_snapshot();
        report
    }

    // ========================================================================
    // Restart on demand
    // ========================================================================

    /// Stops `name` if it runs, then relaunches it with a fresh retry budget.
    ///
    /// # Errors
    ///
    /// - `ChildNotFound` if no child has this name
    /// - `ChildDisabled` if the child was disabled, or ends up disabled
    /// - `ChannelClosed` if shutdown interrupted the relaunch
    pub async fn restart(&mut self, name: AppName) -> Result<LivenessState, SupervisorError> {
        let child = self
            .registry
            .get_mut(name)
            .ok_or(SupervisorError::ChildNotFound(name))?;
        if child.disabled {
            return Err(SupervisorError::ChildDisabled(name));
        }

        let running = if child.has_exited() { None } else { child.process_id };
        child.launch_attempt_count = 0;
        if let Some(pid) = running {
            info!(name = %name, pid, "Stopping child for restart");
            if let Err(e) = launcher::terminate(pid) {
                warn!(name = %name, pid, error = %e, "SIGTERM failed");
            }
        }

        let state = self.ensure_started(name).await;
        let pid = self.registry.get(name).and_then(|c| c.process_id);
        self.save_snapshot();
        if self.cancel_token.is_cancelled() {
            return Err(SupervisorError::ChannelClosed);
        }
        if state != LivenessState::Alive {
            return Err(SupervisorError::ChildDisabled(name));
        }
        let _ = self.event_sender.send(SupervisorEvent::ChildRestarted { name, pid });
        Ok(state)
    }

    // ========================================================================
    // Control loop
    // ========================================================================

    /// Runs until cancelled, then terminates every child.
    pub async fn run(mut self) {
        let period = self.config.check_interval();
        let mut tick = interval_at(Instant::now() + period, period);
        info!(children = self.registry.len(), interval_secs = period.as_secs(), "Supervisor running");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    info!("Supervisor shutting down");
                    break;
                }

                Some(cmd) = self.receiver.recv() => {
                    self.handle_command(cmd).await;
                }

                Some(exit) = self.exits.recv() => {
                    self.handle_exit(exit);
                }

                _ = tick.tick() => {
                    self.reap_and_check();
                }
            }
        }

        self.shutdown();
    }

    async fn handle_command(&mut self, cmd: SupervisorCommand) {
        match cmd {
            SupervisorCommand::Restart { name, respond_to } => {
                let result = self.restart(name).await;
                let _ = respond_to.send(result);
            }
            SupervisorCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.registry.snapshot());
            }
            SupervisorCommand::CheckNow { respond_to } => {
                let report = self.reap_and_check();
                let _ = respond_to.send(report);
            }
        }
    }

    /// Sends SIGTERM to every child still believed to run. Best effort.
    pub fn shutdown(&mut self) {
        let pids = self.registry.running_pids();
        info!(count = pids.len(), "Terminating children");
        for pid in pids {
            if let Err(e) = launcher::terminate(pid) {
                warn!(pid, error = %e, "Failed to terminate child");
            }
        }
        self.save_snapshot();
        self.reaper_token.cancel();
    }

    fn save_snapshot(&self) {
        let Some(store) = &self.state_store else {
            return;
        };
        let snapshot = RegistrySnapshot::now(self.registry.snapshot());
        if let Err(e) = store.write_snapshot(&snapshot) {
            warn!(error = %e, "Failed to write registry snapshot");
        }
    }
}
