//! Establishing a registered session with the manager.
//!
//! The manager may come up after the application, so refused connections
//! are retried with exponential backoff until cancelled. Registration
//! itself is never retried: once connected, the application has one
//! registration budget to get it right.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fdl_protocol::{ProtocolSession, SessionError};

use crate::config::AppConfig;
use crate::error::{AppError, Result};

/// Connects (retrying refused connections) and registers.
pub async fn connect_registered(
    config: &AppConfig,
    cancel_token: &CancellationToken,
) -> Result<ProtocolSession> {
    let mut delay = config.retry_initial_delay;
    let mut attempt = 0u32;

    let mut session = loop {
        attempt = attempt.saturating_add(1);
        debug!(attempt, peer = %config.peer_addr, "Attempting to connect to manager");

        let mut session = ProtocolSession::new(config.session_config());
        match session.connect().await {
            Ok(()) => break session,
            Err(SessionError::Connect { source, .. }) => {
                if attempt == 1 {
                    warn!(peer = %config.peer_addr, error = %source, "Manager not reachable, will retry");
                }
            }
            Err(e) => return Err(e.into()),
        }

        tokio::select! {
            _ = sleep(delay) => {
                let next_delay_ms = (delay.as_millis() as f64 * config.retry_multiplier) as u64;
                delay = Duration::from_millis(next_delay_ms).min(config.retry_max_delay);
            }
            _ = cancel_token.cancelled() => {
                info!("Connection retry cancelled");
                return Err(AppError::Cancelled);
            }
        }
    };

    session.register(config.registration_budget).await?;
    info!(attempts = attempt, app = %config.app_name, "Session registered");
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_cancel_stops_retrying() {
        // a port with no listener
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let config = AppConfig {
            peer_addr: addr.to_string(),
            retry_initial_delay: Duration::from_millis(20),
            ..AppConfig::default()
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = connect_registered(&config, &cancel).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }
}
