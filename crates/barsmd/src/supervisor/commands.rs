//! Supervisor commands, errors, and events.
//!
//! - `SupervisorCommand`: requests to the control loop, each with a oneshot reply
//! - `SupervisorError`: failures of supervisor operations
//! - `SupervisorEvent`: fleet changes broadcast to the bridge and other listeners

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use fdl_core::{AppName, ChildProcess, LivenessState};

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug)]
pub enum SupervisorCommand {
    /// Stop (if running) and relaunch a child under the launch policy.
    ///
    /// # Errors
    /// - `SupervisorError::ChildNotFound` for an unknown name
    /// - `SupervisorError::ChildDisabled` for a child whose retries ran out
    Restart {
        name: AppName,
        respond_to: oneshot::Sender<Result<LivenessState, SupervisorError>>,
    },

    /// Copy of every child record.
    Snapshot {
        respond_to: oneshot::Sender<Vec<ChildProcess>>,
    },

    /// Run a reap-and-check pass now.
    CheckNow {
        respond_to: oneshot::Sender<CheckReport>,
    },
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of launching one watched directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryResult {
    /// At least one item was found and processed.
    Normal,
    /// Nothing to launch, or a non-manager directory could not be read.
    Empty,
    /// The manager could not be started. Startup must stop.
    TerminalError,
    /// Shutdown was requested before the directory was done.
    Cancelled,
}

/// Fleet counts after a reap-and-check pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub alive: usize,
    pub unconfirmed: usize,
    pub dead: usize,
    pub disabled: usize,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    #[error("no child named {0}")]
    ChildNotFound(AppName),

    #[error("child {0} is disabled")]
    ChildDisabled(AppName),

    /// The control loop has stopped or is stopping.
    #[error("supervisor channel closed")]
    ChannelClosed,
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    ChildExited {
        name: AppName,
        pid: u32,
        code: Option<i32>,
    },
    ChildDisabled {
        name: AppName,
    },
    ChildRestarted {
        name: AppName,
        pid: Option<u32>,
    },
    /// A child that was running has died; the manager should hear about it.
    HealthFailure {
        name: AppName,
    },
}

impl SupervisorEvent {
    pub fn name(&self) -> AppName {
        match self {
            Self::ChildExited { name, .. }
            | Self::ChildDisabled { name }
            | Self::ChildRestarted { name, .. }
            | Self::HealthFailure { name } => *name,
        }
    }
}
