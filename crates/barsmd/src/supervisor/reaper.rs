//! Child reaper.
//!
//! A single task owns every spawned [`Child`]. Each one waits inside a
//! `JoinSet`, and `join_next` gives the task a wait-for-any-child
//! primitive. Exits are posted to the supervisor as [`ChildExit`] messages;
//! the reaper never touches the registry.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A closed exit channel stops the reaper instead of failing

use std::io;
use std::process::ExitStatus;

use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A child's latest launch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub pid: u32,
    /// Exit code, or `None` when killed by a signal or the wait failed.
    pub code: Option<i32>,
}

/// Hands spawned children to the reaper task.
#[derive(Debug, Clone)]
pub struct ReaperHandle {
    sender: mpsc::UnboundedSender<(u32, Child)>,
}

impl ReaperHandle {
    /// Starts watching `child`. Returns false if the reaper has stopped.
    pub fn watch(&self, pid: u32, child: Child) -> bool {
        self.sender.send((pid, child)).is_ok()
    }
}

/// Spawns the reaper task.
pub fn spawn_reaper(cancel_token: CancellationToken) -> (ReaperHandle, mpsc::UnboundedReceiver<ChildExit>) {
    let (child_tx, child_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_reaper(child_rx, exit_tx, cancel_token));
    (ReaperHandle { sender: child_tx }, exit_rx)
}

async fn run_reaper(
    mut children: mpsc::UnboundedReceiver<(u32, Child)>,
    exits: mpsc::UnboundedSender<ChildExit>,
    cancel_token: CancellationToken,
) {
    let mut waiting: JoinSet<(u32, io::Result<ExitStatus>)> = JoinSet::new();
    info!("Reaper started");

    loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                info!(watched = waiting.len(), "Reaper shutting down");
                break;
            }

            Some(joined) = waiting.join_next(), if !waiting.is_empty() => {
                let exit = match joined {
                    Ok((pid, Ok(status))) => ChildExit { pid, code: status.code() },
                    Ok((pid, Err(e))) => {
                        warn!(pid, error = %e, "Wait on child failed");
                        ChildExit { pid, code: None }
                    }
                    Err(e) => {
                        warn!(error = %e, "Reaper wait task failed");
                        continue;
                    }
                };
                debug!(pid = exit.pid, code = ?exit.code, "Child reaped");
                if exits.send(exit).is_err() {
                    debug!("Exit channel closed, reaper stopping");
                    break;
                }
            }

            spawned = children.recv() => {
                match spawned {
                    Some((pid, mut child)) => {
                        waiting.spawn(async move { (pid, child.wait().await) });
                    }
                    None => {
                        debug!("All reaper handles dropped");
                        if waiting.is_empty() {
                            break;
                        }
                        // drain what is still running
                        while let Some(Ok((pid, status))) = waiting.join_next().await {
                            let code = status.ok().and_then(|s| s.code());
                            if exits.send(ChildExit { pid, code }).is_err() {
                                break;
                            }
                        }
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::process::Command;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_reports_exit_codes_in_completion_order() {
        let cancel = CancellationToken::new();
        let (reaper, mut exits) = spawn_reaper(cancel.clone());

        let slow = Command::new("sh").args(["-c", "sleep 0.3; exit 4"]).spawn().unwrap();
        let fast = Command::new("sh").args(["-c", "exit 7"]).spawn().unwrap();
        let slow_pid = slow.id().unwrap();
        let fast_pid = fast.id().unwrap();
        assert!(reaper.watch(slow_pid, slow));
        assert!(reaper.watch(fast_pid, fast));

        let first = timeout(Duration::from_secs(3), exits.recv()).await.unwrap().unwrap();
        assert_eq!(first, ChildExit { pid: fast_pid, code: Some(7) });
        let second = timeout(Duration::from_secs(3), exits.recv()).await.unwrap().unwrap();
        assert_eq!(second, ChildExit { pid: slow_pid, code: Some(4) });
        cancel.cancel();
    }
}
