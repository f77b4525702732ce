//! On-disk daemon state: the pid file and the registry snapshot.
//!
//! Both live in one directory, `$XDG_STATE_HOME/barsm` by default.
//! `barsm stop` reads the pid file; `barsm status` prints the snapshot.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use fdl_core::ChildProcess;

const PID_FILE: &str = "barsm.pid";
const SNAPSHOT_FILE: &str = "registry.json";
const FALLBACK_DIR: &str = "/tmp/barsm";

#[derive(Error, Debug)]
pub enum StateError {
    #[error("state I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("bad pid file {path}: {content:?}")]
    BadPid { path: PathBuf, content: String },

    #[error("bad snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// What `registry.json` holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub written_at: DateTime<Utc>,
    pub supervisor_pid: u32,
    pub children: Vec<ChildProcess>,
}

impl RegistrySnapshot {
    pub fn now(children: Vec<ChildProcess>) -> Self {
        Self {
            written_at: Utc::now(),
            supervisor_pid: std::process::id(),
            children,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `dirs::state_dir()/barsm`, or `/tmp/barsm` where there is no state dir.
    pub fn default_dir() -> PathBuf {
        dirs::state_dir()
            .map(|d| d.join("barsm"))
            .unwrap_or_else(|| PathBuf::from(FALLBACK_DIR))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pid_file(&self) -> PathBuf {
        self.dir.join(PID_FILE)
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    fn ensure_dir(&self) -> Result<(), StateError> {
        fs::create_dir_all(&self.dir).map_err(|source| StateError::Io {
            path: self.dir.clone(),
            source,
        })
    }

    pub fn write_pid(&self, pid: u32) -> Result<(), StateError> {
        self.ensure_dir()?;
        let path = self.pid_file();
        fs::write(&path, pid.to_string()).map_err(|source| StateError::Io { path, source })
    }

    /// Pid from the pid file, `None` if there is no file.
    pub fn read_pid(&self) -> Result<Option<u32>, StateError> {
        let path = self.pid_file();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StateError::Io { path, source }),
        };
        content
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| StateError::BadPid { path, content })
    }

    pub fn remove_pid(&self) {
        let path = self.pid_file();
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove pid file");
            }
        }
    }

    /// Writes the snapshot through a temp file so readers never see half of it.
    pub fn write_snapshot(&self, snapshot: &RegistrySnapshot) -> Result<(), StateError> {
        self.ensure_dir()?;
        let path = self.snapshot_file();
        let json = serde_json::to_vec_pretty(snapshot).map_err(|source| StateError::Snapshot {
            path: path.clone(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| StateError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StateError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), children = snapshot.children.len(), "Snapshot written");
        Ok(())
    }

    pub fn read_snapshot(&self) -> Result<Option<RegistrySnapshot>, StateError> {
        let path = self.snapshot_file();
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StateError::Io { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StateError::Snapshot { path, source })
    }
}
