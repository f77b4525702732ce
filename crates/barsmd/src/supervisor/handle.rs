//! Client interface for the supervisor control loop.
//!
//! `SupervisorHandle` is cheap to clone. Every request goes over the
//! command channel with a oneshot reply; events are available through
//! [`SupervisorHandle::subscribe`].
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `SupervisorError::ChannelClosed`

use tokio::sync::{broadcast, mpsc, oneshot};

use fdl_core::{AppName, ChildProcess, LivenessState};

use super::commands::{CheckReport, SupervisorCommand, SupervisorError, SupervisorEvent};

#[derive(Clone)]
pub struct SupervisorHandle {
    sender: mpsc::Sender<SupervisorCommand>,
    event_sender: broadcast::Sender<SupervisorEvent>,
}

impl SupervisorHandle {
    pub fn new(
        sender: mpsc::Sender<SupervisorCommand>,
        event_sender: broadcast::Sender<SupervisorEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Restarts the child named `name` and returns its liveness afterwards.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::ChildNotFound` if no child has this name
    /// - `SupervisorError::ChildDisabled` if the child is disabled
    /// - `SupervisorError::ChannelClosed` if the supervisor has stopped
    pub async fn restart(&self, name: AppName) -> Result<LivenessState, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorCommand::Restart {
                name,
                respond_to: tx,
            })
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;
        rx.await.map_err(|_| SupervisorError::ChannelClosed)?
    }

    /// Copy of every child record.
    pub async fn snapshot(&self) -> Result<Vec<ChildProcess>, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorCommand::Snapshot { respond_to: tx })
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;
        rx.await.map_err(|_| SupervisorError::ChannelClosed)
    }

    /// Runs a reap-and-check pass and returns the fleet counts.
    pub async fn check_now(&self) -> Result<CheckReport, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorCommand::CheckNow { respond_to: tx })
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;
        rx.await.map_err(|_| SupervisorError::ChannelClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.event_sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_supervisor_reports_channel_closed() {
        let (tx, rx) = mpsc::channel(1);
        let (event_tx, _) = broadcast::channel(1);
        let handle = SupervisorHandle::new(tx, event_tx);
        drop(rx);

        assert!(matches!(handle.snapshot().await, Err(SupervisorError::ChannelClosed)));
        assert!(matches!(
            handle.restart(AppName::from_bytes(*b"simm")).await,
            Err(SupervisorError::ChannelClosed)
        ));
    }
}
