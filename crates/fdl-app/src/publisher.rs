//! Publisher runtime (the SIMM role).
//!
//! One task owns the session. It waits on two things at once: SUBSCRIBE
//! frames arriving on the control connection, and the publish ticker.
//! A SUBSCRIBE is validated into a topic and acknowledged immediately.
//! On each tick the publisher, holding the sample store lock:
//!
//! 1. sends HEARTBEAT with the next counter value,
//! 2. publishes every ready topic,
//! 3. advances the publish clock and recomputes readiness.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Short writes and encode failures are logged and the tick continues

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fdl_core::{SubscriptionRequest, SubscriptionTable, Topic};
use fdl_protocol::{DataChannelMode, ProtocolSession, SessionError};

use crate::client::connect_registered;
use crate::config::AppConfig;
use crate::error::Result;
use crate::samples::SharedSampleStore;

pub struct Publisher {
    config: AppConfig,
    session: ProtocolSession,
    table: SubscriptionTable,
    store: SharedSampleStore,
    heartbeat_counter: u32,
    cancel_token: CancellationToken,
}

impl Publisher {
    /// Connects, registers, announces the catalog and opens the data channel.
    pub async fn start(
        config: AppConfig,
        store: SharedSampleStore,
        cancel_token: CancellationToken,
    ) -> Result<Self> {
        let mut session = connect_registered(&config, &cancel_token).await?;

        let mps: Vec<_> = config.catalog.ids().collect();
        session.register_data(&mps).await?;
        session
            .open_data_channel(DataChannelMode::FireAndForget)
            .await?;

        info!(
            app = %config.app_name,
            catalog = config.catalog.family,
            points = mps.len(),
            "Publisher ready"
        );

        Ok(Self {
            table: SubscriptionTable::new(config.catalog),
            config,
            session,
            store,
            heartbeat_counter: 0,
            cancel_token,
        })
    }

    pub fn table(&self) -> &SubscriptionTable {
        &self.table
    }

    pub fn heartbeat_counter(&self) -> u32 {
        self.heartbeat_counter
    }

    /// Runs until cancelled or the session fails.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = interval(self.config.publish_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick fires immediately; publishing starts one interval in
        ticker.tick().await;

        let result = loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    info!("Publisher shutting down");
                    break Ok(());
                }

                // receive_subscription keeps partial frames inside the codec,
                // so dropping it for a tick loses nothing.
                request = self.session.receive_subscription() => {
                    match request {
                        Ok(request) => {
                            if let Err(e) = self.handle_subscription(&request).await {
                                break Err(e);
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Control connection failed");
                            break Err(e.into());
                        }
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Publish tick failed");
                        break Err(e);
                    }
                }
            }
        };

        self.session.close();
        result
    }

    async fn handle_subscription(&mut self, request: &SubscriptionRequest) -> Result<Topic> {
        let topic = self.table.validate(request);
        self.session.acknowledge_subscription(&topic).await?;
        Ok(topic)
    }

    /// One publish cycle.
    pub async fn tick(&mut self) -> Result<()> {
        let store = self.store.lock().await;

        self.heartbeat_counter = self.heartbeat_counter.wrapping_add(1);
        self.session.heartbeat(self.heartbeat_counter).await?;

        let ready: Vec<Topic> = self.table.ready_topics().cloned().collect();
        for topic in &ready {
            match self.session.publish(topic, |s| store.values_for(s)).await {
                Ok(bytes) => debug!(topic_id = topic.topic_id, bytes, "Topic published"),
                Err(e) if is_transient(&e) => {
                    warn!(topic_id = topic.topic_id, error = %e, "Topic publish skipped");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let next = self.table.advance();
        debug!(
            heartbeat = self.heartbeat_counter,
            published = ready.len(),
            next_publish_period_ms = self.table.next_publish_period_ms(),
            next_ready = next.len(),
            "Publish tick complete"
        );
        Ok(())
    }
}

/// Publish failures confined to one topic; the session stays usable.
fn is_transient(error: &SessionError) -> bool {
    matches!(error, SessionError::ShortWrite { .. } | SessionError::Encode(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdl_protocol::EncodeError;

    #[test]
    fn test_topic_failures_are_transient() {
        let overflow = SessionError::Encode(EncodeError::Overflow {
            needed: 1002,
            capacity: 1000,
        });
        assert!(is_transient(&overflow));
        assert!(is_transient(&SessionError::ShortWrite {
            expected: 30,
            written: 12,
        }));
    }

    #[test]
    fn test_session_failures_are_fatal() {
        let closed = SessionError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(!is_transient(&closed));
    }
}
