//! Supervised child process records.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::AppName;

/// Whether a launched child is known to be running.
///
/// Moves forward only: `Unconfirmed -> Alive -> Dead` or
/// `Unconfirmed -> Dead`. A relaunch is the one way back to `Unconfirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessState {
    Unconfirmed,
    Alive,
    Dead,
}

impl LivenessState {
    fn rank(self) -> u8 {
        match self {
            Self::Unconfirmed => 0,
            Self::Alive => 1,
            Self::Dead => 2,
        }
    }
}

impl fmt::Display for LivenessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconfirmed => write!(f, "unconfirmed"),
            Self::Alive => write!(f, "alive"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

/// Where a child sits in the startup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildRole {
    /// Lives in the first watched directory; gates the rest of startup.
    Manager,
    /// Any module or application.
    Application,
}

/// One discovered and launched item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildProcess {
    /// OS pid of the latest launch; `None` when the last spawn failed outright.
    pub process_id: Option<u32>,
    pub owning_directory: PathBuf,
    pub item_name: String,
    pub assigned_name: AppName,
    pub role: ChildRole,
    liveness_state: LivenessState,
    pub launch_attempt_count: u32,
    /// Set once retries are exhausted; the supervisor never touches it again.
    pub disabled: bool,
    pub last_launched_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

impl ChildProcess {
    pub fn new(
        owning_directory: PathBuf,
        item_name: impl Into<String>,
        assigned_name: AppName,
        role: ChildRole,
    ) -> Self {
        Self {
            process_id: None,
            owning_directory,
            item_name: item_name.into(),
            assigned_name,
            role,
            liveness_state: LivenessState::Unconfirmed,
            launch_attempt_count: 0,
            disabled: false,
            last_launched_at: None,
            exit_code: None,
        }
    }

    /// Full path of the executable.
    pub fn executable(&self) -> PathBuf {
        self.owning_directory.join(&self.item_name)
    }

    pub fn liveness_state(&self) -> LivenessState {
        self.liveness_state
    }

    pub fn is_manager(&self) -> bool {
        self.role == ChildRole::Manager
    }

    /// Moves liveness forward. Backward or repeated moves are rejected.
    pub fn transition(&mut self, to: LivenessState) -> DomainResult<()> {
        if to.rank() <= self.liveness_state.rank() {
            return Err(DomainError::IllegalTransition {
                from: self.liveness_state,
                to,
            });
        }
        self.liveness_state = to;
        Ok(())
    }

    /// Records a new launch attempt and resets liveness to `Unconfirmed`.
    ///
    /// `pid` is `None` when the spawn itself failed, in which case the
    /// child is immediately dead.
    pub fn record_launch(&mut self, pid: Option<u32>) {
        self.launch_attempt_count = self.launch_attempt_count.saturating_add(1);
        self.process_id = pid;
        self.exit_code = None;
        self.last_launched_at = Some(Utc::now());
        self.liveness_state = if pid.is_some() {
            LivenessState::Unconfirmed
        } else {
            LivenessState::Dead
        };
    }

    /// Returns true if the latest launch is known to have ended.
    pub fn has_exited(&self) -> bool {
        self.liveness_state == LivenessState::Dead
    }

    /// Status code used in process listings sent to the manager.
    pub fn status_code(&self) -> u32 {
        if self.disabled {
            return 3;
        }
        u32::from(self.liveness_state.rank())
    }
}
