//! Messaging bridge between the supervisor and the manager (AACM).
//!
//! The bridge holds the supervisor's own protocol session. After the
//! handshake it reports every supervised process, then serves two
//! streams until cancelled:
//!
//! - restart requests from the manager, answered with an ack
//! - health failures from the supervisor, forwarded as notices
//!
//! A failure here ends the bridge task only. The supervisor keeps running.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Malformed frames are logged and dropped

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fdl_core::{AppIdentity, AppName, SIMM_CATALOG};
use fdl_protocol::{
    control_command, decode, DataChannelMode, ErrorCode, Header, HealthNotice, HealthNoticeAck,
    ProcessEntry, ProcessList, ProtocolSession, RestartAck, RestartRequest, SessionConfig,
    SessionError,
};

use crate::config::SupervisorConfig;
use crate::supervisor::{SupervisorError, SupervisorEvent, SupervisorHandle};

/// Name the supervisor reports for itself.
pub const SUPERVISOR_NAME: AppName = AppName::from_bytes(*b"BRSM");

/// Listing state for the supervisor's own row.
const SELF_STATE: u32 = 1;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("bridge session: {0}")]
    Session(#[from] SessionError),

    #[error("bridge supervisor: {0}")]
    Supervisor(#[from] SupervisorError),
}

pub struct SupervisorMessagingBridge {
    session: ProtocolSession,
    handle: SupervisorHandle,
    events: broadcast::Receiver<SupervisorEvent>,
    cancel_token: CancellationToken,
}

impl SupervisorMessagingBridge {
    /// Creates the bridge. Event subscription starts here, so failures that
    /// happen before [`run`](Self::run) are still forwarded.
    pub fn new(config: &SupervisorConfig, handle: SupervisorHandle, cancel_token: CancellationToken) -> Self {
        let events = handle.subscribe();
        Self {
            session: ProtocolSession::new(session_config(config)),
            handle,
            events,
            cancel_token,
        }
    }

    pub fn session(&self) -> &ProtocolSession {
        &self.session
    }

    /// Connect, INIT handshake, OPEN and SYSINIT, then the process listing.
    pub async fn setup(&mut self) -> Result<(), BridgeError> {
        self.session.connect().await?;
        self.session.initialize().await?;
        self.session
            .open_data_channel(DataChannelMode::AwaitSysInit)
            .await?;
        let count = self.send_process_list().await?;
        info!(processes = count, "Bridge ready");
        Ok(())
    }

    /// Sends the supervisor's own row followed by one row per child.
    pub async fn send_process_list(&mut self) -> Result<usize, BridgeError> {
        let children = self.handle.snapshot().await?;
        let mut entries = Vec::with_capacity(children.len() + 1);
        entries.push(ProcessEntry {
            pid: std::process::id(),
            name: SUPERVISOR_NAME,
            state: SELF_STATE,
        });
        entries.extend(children.iter().map(|c| ProcessEntry {
            pid: c.process_id.unwrap_or(0),
            name: c.assigned_name,
            state: c.status_code(),
        }));

        let count = entries.len();
        self.session.send_message(&ProcessList { entries }).await?;
        debug!(count, "Process list sent");
        Ok(count)
    }

    /// Runs setup, then serves until cancelled or the manager goes away.
    pub async fn run(mut self) -> Result<(), BridgeError> {
        self.setup().await?;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    info!("Bridge shutting down");
                    break;
                }

                frame = self.session.recv_frame() => {
                    let frame = frame?;
                    self.handle_frame(frame).await?;
                }

                event = self.events.recv() => {
                    match event {
                        Ok(event) => self.handle_event(event).await?,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Bridge lagged behind supervisor events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Supervisor event stream closed");
                            break;
                        }
                    }
                }
            }
        }

        self.session.close();
        Ok(())
    }

    async fn handle_frame(&mut self, frame: Bytes) -> Result<(), BridgeError> {
        match Header::peek(&frame).map(|h| h.command_id) {
            Some(control_command::RESTART_REQUEST) => {
                let Ok(request) = decode::<RestartRequest>(&frame) else {
                    return Ok(());
                };
                let error = self.restart(request.name).await;
                self.session.send_message(&RestartAck { error }).await?;
            }
            Some(control_command::HEALTH_NOTICE_ACK) => {
                if let Ok(ack) = decode::<HealthNoticeAck>(&frame) {
                    if ack.error.is_success() {
                        debug!("Health notice acknowledged");
                    } else {
                        warn!(error = %ack.error, "Manager rejected health notice");
                    }
                }
            }
            other => {
                warn!(command = ?other, len = frame.len(), "Unexpected frame from manager");
            }
        }
        Ok(())
    }

    async fn restart(&self, name: AppName) -> ErrorCode {
        info!(name = %name, "Restart requested by manager");
        match self.handle.restart(name).await {
            Ok(state) => {
                info!(name = %name, %state, "Restart done");
                ErrorCode::Success
            }
            Err(e) => {
                warn!(name = %name, error = %e, "Restart failed");
                ErrorCode::ManagerToSupervisor
            }
        }
    }

    async fn handle_event(&mut self, event: SupervisorEvent) -> Result<(), BridgeError> {
        if let SupervisorEvent::HealthFailure { name } = event {
            info!(name = %name, "Reporting health failure to manager");
            self.session
                .send_message(&HealthNotice {
                    error: ErrorCode::SupervisorToManager,
                    name,
                })
                .await?;
        }
        Ok(())
    }
}

fn session_config(config: &SupervisorConfig) -> SessionConfig {
    SessionConfig::new(
        config.aacm_addr.clone(),
        config.data_bind,
        config.data_dest,
        AppIdentity::current(SUPERVISOR_NAME),
        &SIMM_CATALOG,
    )
}

/// Spawns the bridge after `delay`. Errors are logged, never propagated.
pub fn spawn_bridge(
    config: &SupervisorConfig,
    handle: SupervisorHandle,
    cancel_token: CancellationToken,
    delay: Duration,
) -> tokio::task::JoinHandle<()> {
    let bridge = SupervisorMessagingBridge::new(config, handle, cancel_token.clone());
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel_token.cancelled() => return,
            _ = sleep(delay) => {}
        }
        if let Err(e) = bridge.run().await {
            error!(error = %e, "Bridge stopped");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_name() {
        assert_eq!(SUPERVISOR_NAME.to_string(), "BRSM");
    }

    #[tokio::test]
    async fn test_setup_fails_without_manager() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = SupervisorConfig {
            aacm_addr: addr.to_string(),
            ..SupervisorConfig::default()
        };
        let cancel = CancellationToken::new();
        let (_supervisor, handle) = crate::supervisor::ProcessSupervisor::new(config.clone(), cancel.clone());
        let mut bridge = SupervisorMessagingBridge::new(&config, handle, cancel);

        assert!(matches!(
            bridge.setup().await,
            Err(BridgeError::Session(SessionError::Connect { .. }))
        ));
    }
}
