//! Subscription table and publish planner.
//!
//! The publisher keeps one [`Topic`] per SUBSCRIBE it has answered. Every
//! publish tick, [`publish_manager`] decides which topics are due by
//! comparing the running publish clock against each topic's period.
//!
//! # Panic-Free Guarantees
//!
//! Arithmetic is done in `i128`/`u64` so that hostile periods cannot
//! overflow; no indexing is used.

use tracing::{debug, info, warn};

use crate::catalog::{Catalog, MINIMUM_PERIOD_MS};
use crate::subscription::{
    Subscription, SubscriptionRequest, Topic, TopicId, MAX_PUBLISH_SIZE, TOPIC_ID_BASE,
};

/// Most topics one publisher keeps.
pub const MAX_TOPICS: usize = 64;

/// Spread of the requested periods in a topic.
///
/// Sample variance (divided by `n - 1`), rounded up so that any non-zero
/// spread yields a non-zero result. Topics with fewer than two
/// subscriptions have zero variance.
pub fn variance_of_periods(topic: &Topic) -> i64 {
    variance(topic.subscriptions.iter().map(|s| s.requested_period_ms))
}

fn variance(periods: impl Iterator<Item = u32>) -> i64 {
    let (n, sum, sum_sq) = periods.fold((0i128, 0i128, 0i128), |(n, s, sq), p| {
        let p = i128::from(p);
        (n + 1, s + p, sq + p * p)
    });
    if n < 2 {
        return 0;
    }
    // n * sum((p - mean)^2) == n * sum_sq - sum^2
    let scaled = n * sum_sq - sum * sum;
    let denom = n * (n - 1);
    let rounded_up = (scaled + denom - 1) / denom;
    i64::try_from(rounded_up).unwrap_or(i64::MAX)
}

/// Marks each topic ready or not for this tick and returns the ready ids.
///
/// A topic is ready iff its period is non-zero and divides
/// `next_publish_period_ms`.
pub fn publish_manager(topics: &mut [Topic], next_publish_period_ms: u64) -> Vec<TopicId> {
    topics
        .iter_mut()
        .filter_map(|topic| {
            topic.publish_ready = topic.period_ms != 0
                && next_publish_period_ms % u64::from(topic.period_ms) == 0;
            topic.publish_ready.then_some(topic.topic_id)
        })
        .collect()
}

/// Owns every topic built by one publisher and the publish clock.
#[derive(Debug, Clone)]
pub struct SubscriptionTable {
    catalog: &'static Catalog,
    topics: Vec<Topic>,
    next_publish_period_ms: u64,
}

impl SubscriptionTable {
    pub fn new(catalog: &'static Catalog) -> Self {
        Self {
            catalog,
            topics: Vec::new(),
            next_publish_period_ms: u64::from(MINIMUM_PERIOD_MS),
        }
    }

    pub fn catalog(&self) -> &'static Catalog {
        self.catalog
    }

    /// Validates a received subscription, stores the resulting topic and
    /// returns a copy of it for the SUBSCRIBE_ACK.
    ///
    /// Each point is checked against the catalog and the period rule. The
    /// whole topic is rejected (every subscription invalid, period zero,
    /// id [`INVALID_TOPIC_ID`](crate::subscription::INVALID_TOPIC_ID)) when:
    ///
    /// - the requested periods differ from one another
    /// - its largest PUBLISH would not fit in [`MAX_PUBLISH_SIZE`]
    ///
    /// Otherwise the topic takes the common period and the next id after
    /// [`TOPIC_ID_BASE`]. Once [`MAX_TOPICS`] topics are stored, further
    /// requests are rejected and not stored.
    pub fn validate(&mut self, request: &SubscriptionRequest) -> Topic {
        let subscriptions: Vec<Subscription> = request
            .points
            .iter()
            .map(|p| Subscription::evaluate(self.catalog, p))
            .collect();

        let slot = i32::try_from(self.topics.len()).unwrap_or(i32::MAX - TOPIC_ID_BASE);
        let mut topic = Topic {
            topic_id: TOPIC_ID_BASE.saturating_add(slot),
            owning_app_name: request.requester.app_name,
            period_ms: subscriptions
                .first()
                .map(|s| s.requested_period_ms)
                .unwrap_or(0),
            subscriptions,
            publish_ready: false,
        };

        if self.topics.len() >= MAX_TOPICS {
            warn!(
                requester = %request.requester.app_name,
                topics = self.topics.len(),
                "Topic table full, rejecting subscription"
            );
            topic.reject();
            return topic;
        }

        let spread = variance_of_periods(&topic);
        let size = topic.worst_case_publish_size();
        if spread != 0 {
            warn!(
                requester = %request.requester.app_name,
                variance = spread,
                points = topic.subscriptions.len(),
                "Subscription periods differ, invalidating topic"
            );
            topic.reject();
        } else if size > MAX_PUBLISH_SIZE {
            warn!(
                requester = %request.requester.app_name,
                size,
                capacity = MAX_PUBLISH_SIZE,
                "Topic would not fit in one PUBLISH, invalidating topic"
            );
            topic.reject();
        } else if topic.period_ms == 0 && topic.valid_subscriptions().next().is_some() {
            warn!(
                requester = %request.requester.app_name,
                "Topic has a zero period and will never be published"
            );
        }
        topic.publish_ready =
            topic.period_ms != 0 && self.next_publish_period_ms % u64::from(topic.period_ms) == 0;

        info!(
            topic_id = topic.topic_id,
            period_ms = topic.period_ms,
            valid = topic.valid_subscriptions().count(),
            total = topic.subscriptions.len(),
            "Topic built"
        );

        self.topics.push(topic.clone());
        topic
    }

    /// Recomputes readiness for the current publish clock.
    pub fn publish_manager(&mut self) -> Vec<TopicId> {
        let ready = publish_manager(&mut self.topics, self.next_publish_period_ms);
        debug!(
            next_publish_period_ms = self.next_publish_period_ms,
            ready = ready.len(),
            "Publish readiness computed"
        );
        ready
    }

    /// Moves the publish clock forward one minimum period and recomputes readiness.
    pub fn advance(&mut self) -> Vec<TopicId> {
        self.next_publish_period_ms = self
            .next_publish_period_ms
            .saturating_add(u64::from(MINIMUM_PERIOD_MS));
        self.publish_manager()
    }

    pub fn next_publish_period_ms(&self) -> u64 {
        self.next_publish_period_ms
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn topic(&self, topic_id: TopicId) -> Option<&Topic> {
        self.topics.iter().find(|t| t.topic_id == topic_id)
    }

    /// Topics currently marked ready.
    pub fn ready_topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.iter().filter(|t| t.publish_ready)
    }
}
