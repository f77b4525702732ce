//! Subscription and topic entities.

use serde::{Deserialize, Serialize};

use crate::app::AppIdentity;
use crate::catalog::{Catalog, MpId, MpKind, MINIMUM_PERIOD_MS, TIMESTAMP_BURST_LEN};
use crate::AppName;

/// Topic identifier returned in SUBSCRIBE_ACK and stamped on every PUBLISH.
pub type TopicId = i32;

/// Topic id given to a subscription whose periods cannot be grouped.
pub const INVALID_TOPIC_ID: TopicId = -1;

/// First topic id handed out; each later topic takes the next one.
pub const TOPIC_ID_BASE: TopicId = 1000;

/// Largest PUBLISH datagram, header included.
pub const MAX_PUBLISH_SIZE: usize = 1000;

/// Header, topic id, point count and sequence number.
const PUBLISH_OVERHEAD: usize = 14;

/// One requested (point, period, sample count) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointRequest {
    pub mp: MpId,
    pub period_ms: u32,
    pub sample_count: u32,
}

impl PointRequest {
    pub const fn new(mp: MpId, period_ms: u32, sample_count: u32) -> Self {
        Self {
            mp,
            period_ms,
            sample_count,
        }
    }

    /// A single sample every minimum period.
    pub const fn every_period(mp: MpId) -> Self {
        Self::new(mp, MINIMUM_PERIOD_MS, 1)
    }
}

/// A SUBSCRIBE request as received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub requester: AppIdentity,
    pub seq_num: u16,
    pub points: Vec<PointRequest>,
}

/// One point of a topic, with validity computed locally.
///
/// Validity is never taken from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub measurement_point_id: MpId,
    pub requested_period_ms: u32,
    pub requested_sample_count: u32,
    pub kind: MpKind,
    pub is_valid: bool,
}

impl Subscription {
    /// Builds a subscription for `request` and computes its validity against `catalog`.
    pub fn evaluate(catalog: &Catalog, request: &PointRequest) -> Self {
        let kind = catalog.kind_of(request.mp);
        Self {
            measurement_point_id: request.mp,
            requested_period_ms: request.period_ms,
            requested_sample_count: request.sample_count,
            kind: kind.unwrap_or(MpKind::Logical),
            is_valid: kind.is_some() && is_schedulable(request.period_ms, request.sample_count),
        }
    }

    pub fn is_logical(&self) -> bool {
        self.kind == MpKind::Logical
    }
}

/// Period/sample rule for a single point.
///
/// The period must be a whole number of minimum periods and the sample
/// count must cover it exactly, one sample per minimum period.
pub fn is_schedulable(period_ms: u32, sample_count: u32) -> bool {
    period_ms % MINIMUM_PERIOD_MS == 0
        && u64::from(sample_count) * u64::from(MINIMUM_PERIOD_MS) == u64::from(period_ms)
}

/// A group of points published together on one schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub topic_id: TopicId,
    pub owning_app_name: AppName,
    /// Zero when the topic can never be scheduled.
    pub period_ms: u32,
    pub subscriptions: Vec<Subscription>,
    pub publish_ready: bool,
}

impl Topic {
    /// Subscriptions that will be written into PUBLISH datagrams.
    pub fn valid_subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.iter().filter(|s| s.is_valid)
    }

    pub fn has_invalid(&self) -> bool {
        self.subscriptions.iter().any(|s| !s.is_valid)
    }

    /// Returns true if the topic can ever be published.
    pub fn is_schedulable(&self) -> bool {
        self.period_ms != 0 && self.topic_id != INVALID_TOPIC_ID
    }

    /// Size of the largest PUBLISH this topic can produce.
    ///
    /// Each point costs its id plus one word per sample; a timestamp
    /// point is counted as a full burst.
    pub fn worst_case_publish_size(&self) -> usize {
        self.valid_subscriptions().fold(PUBLISH_OVERHEAD, |size, s| {
            let values = match s.kind {
                MpKind::Timestamp => TIMESTAMP_BURST_LEN,
                MpKind::Logical => usize::try_from(s.requested_sample_count).unwrap_or(usize::MAX),
            };
            size.saturating_add(values.saturating_add(1).saturating_mul(4))
        })
    }

    /// Marks every point invalid and takes the topic off the schedule.
    pub fn reject(&mut self) {
        for sub in &mut self.subscriptions {
            sub.is_valid = false;
        }
        self.period_ms = 0;
        self.topic_id = INVALID_TOPIC_ID;
        self.publish_ready = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{mp, SIMM_CATALOG};

    #[test]
    fn test_validity_formula() {
        let cases = [
            (1000, 1, true),
            (1500, 1, false),
            (2000, 1, false),
            (2000, 2, true),
            (3000, 3, true),
            (0, 0, true),
            (1000, 0, false),
            (999, 1, false),
        ];
        for (period, samples, expected) in cases {
            assert_eq!(
                is_schedulable(period, samples),
                expected,
                "period={period} samples={samples}"
            );
        }
    }

    #[test]
    fn test_point_outside_catalog_is_invalid() {
        let sub = Subscription::evaluate(&SIMM_CATALOG, &PointRequest::every_period(mp::TURBO_REAL));
        assert!(!sub.is_valid);

        let sub = Subscription::evaluate(&SIMM_CATALOG, &PointRequest::every_period(mp::TCMP));
        assert!(sub.is_valid);
        assert!(sub.is_logical());
    }

    fn topic(points: &[PointRequest]) -> Topic {
        Topic {
            topic_id: TOPIC_ID_BASE,
            owning_app_name: AppName::default(),
            period_ms: points.first().map_or(0, |p| p.period_ms),
            subscriptions: points
                .iter()
                .map(|p| Subscription::evaluate(&SIMM_CATALOG, p))
                .collect(),
            publish_ready: false,
        }
    }

    #[test]
    fn test_worst_case_publish_size() {
        assert_eq!(topic(&[]).worst_case_publish_size(), 14);
        // 14 + (4 + 4 * 3) * 2
        let logical = topic(&[PointRequest::new(mp::PFP_VALUE, 3000, 3), PointRequest::new(mp::TCMP, 3000, 3)]);
        assert_eq!(logical.worst_case_publish_size(), 46);
        // a timestamp point always counts as a full burst
        let stamps = topic(&[PointRequest::every_period(mp::CAM_NSEC_9)]);
        assert_eq!(stamps.worst_case_publish_size(), 14 + 4 + 4 * TIMESTAMP_BURST_LEN);
        // invalid points are never written
        let skipped = topic(&[PointRequest::every_period(mp::TURBO_REAL)]);
        assert_eq!(skipped.worst_case_publish_size(), 14);
    }

    #[test]
    fn test_reject_takes_topic_off_schedule() {
        let mut t = topic(&[PointRequest::every_period(mp::PFP_VALUE)]);
        t.publish_ready = true;
        t.reject();
        assert_eq!(t.topic_id, INVALID_TOPIC_ID);
        assert!(!t.is_schedulable());
        assert!(!t.publish_ready);
        assert_eq!(t.valid_subscriptions().count(), 0);
    }

    #[test]
    fn test_sample_count_overflow_does_not_wrap() {
        assert!(!is_schedulable(0, u32::MAX));
    }
}
