//! Subscriber runtime (the FDL role).
//!
//! Subscribes once to the first `max_subscription` points of the target
//! catalog, every point at the minimum period with one sample, then
//! receives PUBLISH datagrams until cancelled.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use fdl_core::{PointRequest, TopicId};
use fdl_protocol::{DataChannelMode, ProtocolSession, Publish};

use crate::client::connect_registered;
use crate::config::AppConfig;
use crate::error::Result;

pub struct Subscriber {
    session: ProtocolSession,
    topic_id: TopicId,
    received: u64,
    event_tx: Option<mpsc::UnboundedSender<Publish>>,
    cancel_token: CancellationToken,
}

/// Points requested by a subscriber of `config.catalog`.
pub fn default_points(config: &AppConfig) -> Vec<PointRequest> {
    config
        .catalog
        .ids()
        .take(config.catalog.max_subscription)
        .map(PointRequest::every_period)
        .collect()
}

impl Subscriber {
    /// Connects, registers, opens the data channel and subscribes.
    pub async fn start(config: AppConfig, cancel_token: CancellationToken) -> Result<Self> {
        let mut session = connect_registered(&config, &cancel_token).await?;
        session
            .open_data_channel(DataChannelMode::FireAndForget)
            .await?;

        let points = default_points(&config);
        let ack = session.subscribe(&points).await?;
        info!(
            app = %config.app_name,
            catalog = config.catalog.family,
            topic_id = ack.topic_id,
            points = points.len(),
            "Subscriber ready"
        );

        Ok(Self {
            session,
            topic_id: ack.topic_id,
            received: 0,
            event_tx: None,
            cancel_token,
        })
    }

    /// Forwards every received PUBLISH to `tx` as well as logging it.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<Publish>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn topic_id(&self) -> TopicId {
        self.topic_id
    }

    /// Receives until cancelled; returns how many PUBLISH datagrams arrived.
    pub async fn run(mut self) -> Result<u64> {
        let result = loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    info!(received = self.received, "Subscriber shutting down");
                    break Ok(self.received);
                }

                publish = self.session.receive_publish() => {
                    match publish {
                        Ok(publish) => self.handle_publish(publish),
                        Err(e) => {
                            error!(error = %e, "Data channel failed");
                            break Err(e.into());
                        }
                    }
                }
            }
        };
        self.session.close();
        result
    }

    fn handle_publish(&mut self, publish: Publish) {
        self.received = self.received.saturating_add(1);
        for point in &publish.points {
            debug!(
                topic_id = publish.topic_id,
                seq_num = publish.seq_num,
                mp = point.mp,
                values = ?point.values.values(),
                "Point received"
            );
        }
        info!(
            topic_id = publish.topic_id,
            seq_num = publish.seq_num,
            points = publish.points.len(),
            values = publish.value_count(),
            "PUBLISH received"
        );
        if let Some(tx) = &self.event_tx {
            // receiver may be gone during shutdown
            let _ = tx.send(publish);
        }
    }
}
