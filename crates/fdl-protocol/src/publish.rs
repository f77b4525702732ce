//! PUBLISH datagrams.
//!
//! Layout: topic_id(4), num_mps(4), seq_num(2), then per point the point
//! id(4) followed by its values(4 each). Logical points carry exactly
//! their requested sample count. Timestamp points carry their non-zero
//! stamps, at most [`TIMESTAMP_BURST_LEN`], and a single zero terminator
//! when the burst is shorter than that.
//!
//! The value count is not on the wire, so decoding needs a
//! [`PublishLayout`] describing each subscribed point.

use fdl_core::{Catalog, MpId, MpKind, PointRequest, Topic, TopicId, TIMESTAMP_BURST_LEN};

use crate::codec::{decode_with, WireMessage};
use crate::command::app;
use crate::cursor::{WireReader, WireWriter};
use crate::error::{DecodeError, EncodeError};

/// Values carried for one point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointValues {
    /// One raw 32-bit value per requested sample.
    Samples(Vec<u32>),
    /// Non-zero stamps only.
    Stamps(Vec<u32>),
}

impl PointValues {
    /// Keeps the leading non-zero stamps of a burst.
    pub fn stamps(burst: &[u32]) -> Self {
        Self::Stamps(
            burst
                .iter()
                .copied()
                .take(TIMESTAMP_BURST_LEN)
                .take_while(|s| *s != 0)
                .collect(),
        )
    }

    pub fn values(&self) -> &[u32] {
        match self {
            Self::Samples(v) | Self::Stamps(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPoint {
    pub mp: MpId,
    pub values: PointValues,
}

/// `PUBLISH` datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic_id: TopicId,
    pub seq_num: u16,
    pub points: Vec<PublishedPoint>,
}

impl WireMessage for Publish {
    const COMMAND_ID: u16 = app::PUBLISH;
    const MIN_PAYLOAD: usize = 10;

    fn encode_payload(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        w.put_i32(self.topic_id)?;
        let count = u32::try_from(self.points.len()).map_err(|_| EncodeError::Overflow {
            needed: self.points.len(),
            capacity: u32::MAX as usize,
        })?;
        w.put_u32(count)?;
        w.put_u16(self.seq_num)?;
        for point in &self.points {
            w.put_u32(point.mp)?;
            match &point.values {
                PointValues::Samples(values) => {
                    values.iter().try_for_each(|v| w.put_u32(*v))?;
                }
                PointValues::Stamps(stamps) => {
                    let burst: Vec<u32> = stamps
                        .iter()
                        .copied()
                        .take(TIMESTAMP_BURST_LEN)
                        .take_while(|s| *s != 0)
                        .collect();
                    burst.iter().try_for_each(|v| w.put_u32(*v))?;
                    if burst.len() < TIMESTAMP_BURST_LEN {
                        w.put_u32(0)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Publish {
    /// Decodes a datagram using the receiver's view of the topic.
    pub fn decode(bytes: &[u8], layout: &PublishLayout) -> Result<Self, DecodeError> {
        decode_with(bytes, Self::COMMAND_ID, Self::MIN_PAYLOAD, |r| {
            let topic_id = r.get_i32()?;
            let count = r.get_u32()?;
            let seq_num = r.get_u16()?;
            let mut points = Vec::new();
            for _ in 0..count {
                let mp = r.get_u32()?;
                let values = match layout.shape_of(mp) {
                    Some(PointShape::Samples(n)) => {
                        let mut values = Vec::with_capacity(n.min(r.remaining() / 4));
                        for _ in 0..n {
                            values.push(r.get_u32()?);
                        }
                        PointValues::Samples(values)
                    }
                    Some(PointShape::Stamps) => PointValues::Stamps(read_burst(r)?),
                    None => return Err(DecodeError::UnexpectedPoint { mp }),
                };
                points.push(PublishedPoint { mp, values });
            }
            Ok(Self {
                topic_id,
                seq_num,
                points,
            })
        })
    }

    /// Total values carried, across all points.
    pub fn value_count(&self) -> usize {
        self.points.iter().map(|p| p.values.values().len()).sum()
    }
}

fn read_burst(r: &mut WireReader<'_>) -> Result<Vec<u32>, DecodeError> {
    let mut stamps = Vec::new();
    while stamps.len() < TIMESTAMP_BURST_LEN {
        let stamp = r.get_u32()?;
        if stamp == 0 {
            break;
        }
        stamps.push(stamp);
    }
    Ok(stamps)
}

/// Shape of one point's values in a PUBLISH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointShape {
    Samples(usize),
    Stamps,
}

/// Receiver-side description of the points a topic carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishLayout {
    shapes: Vec<(MpId, PointShape)>,
}

impl PublishLayout {
    /// Layout for the points a subscriber asked for.
    pub fn from_requests(catalog: &Catalog, requests: &[PointRequest]) -> Self {
        let shapes = requests
            .iter()
            .map(|req| {
                let shape = match catalog.kind_of(req.mp) {
                    Some(MpKind::Timestamp) => PointShape::Stamps,
                    _ => PointShape::Samples(req.sample_count as usize),
                };
                (req.mp, shape)
            })
            .collect();
        Self { shapes }
    }

    /// Layout of a topic as built by its publisher.
    pub fn from_topic(topic: &Topic) -> Self {
        let shapes = topic
            .valid_subscriptions()
            .map(|s| {
                let shape = match s.kind {
                    MpKind::Timestamp => PointShape::Stamps,
                    MpKind::Logical => PointShape::Samples(s.requested_sample_count as usize),
                };
                (s.measurement_point_id, shape)
            })
            .collect();
        Self { shapes }
    }

    pub fn shape_of(&self, mp: MpId) -> Option<PointShape> {
        self.shapes
            .iter()
            .find(|(id, _)| *id == mp)
            .map(|(_, shape)| *shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use fdl_core::{mp, publish_manager, AppName, Subscription, SIMM_CATALOG};

    fn two_point_topic() -> Topic {
        Topic {
            topic_id: 1000,
            owning_app_name: AppName::from_bytes(*b"aacm"),
            period_ms: 1000,
            subscriptions: [mp::PFP_VALUE, mp::TCMP]
                .iter()
                .map(|id| Subscription::evaluate(&SIMM_CATALOG, &PointRequest::every_period(*id)))
                .collect(),
            publish_ready: false,
        }
    }

    #[test]
    fn test_two_logical_points_at_one_hertz() {
        let mut topics = vec![two_point_topic()];
        assert_eq!(publish_manager(&mut topics, 1000), vec![1000]);

        let msg = Publish {
            topic_id: 1000,
            seq_num: 0,
            points: vec![
                PublishedPoint {
                    mp: mp::PFP_VALUE,
                    values: PointValues::Samples(vec![1.5f32.to_bits()]),
                },
                PublishedPoint {
                    mp: mp::TCMP,
                    values: PointValues::Samples(vec![42]),
                },
            ],
        };
        let bytes = encode(&msg).unwrap();
        let expected_total = 4 + 4 + 4 + 2 + 2 * (4 + 4);
        assert_eq!(bytes.len(), expected_total);
        assert_eq!(
            usize::from(u16::from_be_bytes([bytes[2], bytes[3]])),
            expected_total - 4
        );

        let layout = PublishLayout::from_topic(&topics[0]);
        let back = Publish::decode(&bytes, &layout).unwrap();
        assert_eq!(back, msg);
        assert_eq!(f32::from_bits(back.points[0].values.values()[0]), 1.5);
    }

    #[test]
    fn test_short_burst_is_zero_terminated() {
        let msg = Publish {
            topic_id: 1001,
            seq_num: 3,
            points: vec![PublishedPoint {
                mp: mp::CAM_SEC_1,
                values: PointValues::stamps(&[10, 11, 0, 12]),
            }],
        };
        let bytes = encode(&msg).unwrap();
        // header + fixed + mp + two stamps + terminator
        assert_eq!(bytes.len(), 4 + 10 + 4 + 2 * 4 + 4);

        let layout =
            PublishLayout::from_requests(&SIMM_CATALOG, &[PointRequest::every_period(mp::CAM_SEC_1)]);
        let back = Publish::decode(&bytes, &layout).unwrap();
        assert_eq!(back.points[0].values, PointValues::Stamps(vec![10, 11]));
    }

    #[test]
    fn test_full_burst_has_no_terminator() {
        let burst: Vec<u32> = (1..=12).collect();
        let msg = Publish {
            topic_id: 1001,
            seq_num: 0,
            points: vec![PublishedPoint {
                mp: mp::CAM_NSEC_2,
                values: PointValues::stamps(&burst),
            }],
        };
        let bytes = encode(&msg).unwrap();
        assert_eq!(bytes.len(), 4 + 10 + 4 + TIMESTAMP_BURST_LEN * 4);
        let layout =
            PublishLayout::from_requests(&SIMM_CATALOG, &[PointRequest::every_period(mp::CAM_NSEC_2)]);
        assert_eq!(Publish::decode(&bytes, &layout).unwrap().value_count(), 9);
    }

    #[test]
    fn test_empty_burst_is_just_terminator() {
        assert_eq!(PointValues::stamps(&[0, 5]), PointValues::Stamps(vec![]));
    }

    #[test]
    fn test_unknown_point_is_rejected() {
        let msg = Publish {
            topic_id: 1000,
            seq_num: 0,
            points: vec![PublishedPoint {
                mp: mp::TURBO_REAL,
                values: PointValues::Samples(vec![1]),
            }],
        };
        let bytes = encode(&msg).unwrap();
        let err = Publish::decode(&bytes, &PublishLayout::default()).unwrap_err();
        assert_eq!(err, DecodeError::UnexpectedPoint { mp: mp::TURBO_REAL });
    }

    #[test]
    fn test_extra_trailing_value_is_length_mismatch() {
        let msg = Publish {
            topic_id: 1000,
            seq_num: 0,
            points: vec![PublishedPoint {
                mp: mp::PFP_VALUE,
                values: PointValues::Samples(vec![1, 2]),
            }],
        };
        let bytes = encode(&msg).unwrap();
        let layout =
            PublishLayout::from_requests(&SIMM_CATALOG, &[PointRequest::every_period(mp::PFP_VALUE)]);
        assert!(matches!(
            Publish::decode(&bytes, &layout),
            Err(DecodeError::LengthMismatch { declared: 22, actual: 18 })
        ));
    }
}
