//! Application message schemas.
//!
//! Field order and widths match the peer exactly; see each type for its
//! layout. All integers are big-endian.

use fdl_core::{AppIdentity, AppName, HostOs, MpId, PointRequest, SubscriptionRequest, Topic, TopicId};
use tracing::warn;

use crate::codec::{decode_with, WireDecode, WireMessage};
use crate::command::{app, ErrorCode};
use crate::cursor::{WireReader, WireWriter};
use crate::error::{DecodeError, EncodeError};

fn put_identity(w: &mut WireWriter, id: &AppIdentity) -> Result<(), EncodeError> {
    w.put_u8(id.host_os.code())?;
    w.put_u32(id.process_id)?;
    w.put_bytes(&id.app_name.as_bytes())
}

fn get_identity(r: &mut WireReader<'_>) -> Result<AppIdentity, DecodeError> {
    Ok(AppIdentity {
        host_os: HostOs::from(r.get_u8()?),
        process_id: r.get_u32()?,
        app_name: AppName::from_bytes(r.get_array4()?),
    })
}

fn put_codes(w: &mut WireWriter, codes: &[ErrorCode]) -> Result<(), EncodeError> {
    codes.iter().try_for_each(|c| w.put_u16(c.code()))
}

/// Reads error codes until the payload runs out.
fn get_codes(r: &mut WireReader<'_>) -> Result<Vec<ErrorCode>, DecodeError> {
    let mut codes = Vec::with_capacity(r.remaining() / 2);
    while r.remaining() >= 2 {
        codes.push(ErrorCode::from(r.get_u16()?));
    }
    Ok(codes)
}

fn count_to_u32(n: usize) -> Result<u32, EncodeError> {
    u32::try_from(n).map_err(|_| EncodeError::Overflow {
        needed: n,
        capacity: u32::MAX as usize,
    })
}

// ============================================================================
// Registration
// ============================================================================

/// `REGISTER_APP`: host_os(1), src_proc_id(4), src_app_name(4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterApp {
    pub identity: AppIdentity,
}

impl WireMessage for RegisterApp {
    const COMMAND_ID: u16 = app::REGISTER_APP;
    const MIN_PAYLOAD: usize = 9;

    fn encode_payload(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        put_identity(w, &self.identity)
    }
}

impl WireDecode for RegisterApp {
    fn decode_payload(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            identity: get_identity(r)?,
        })
    }
}

/// `REGISTER_APP_ACK`: error(2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterAppAck {
    pub error: ErrorCode,
}

impl RegisterAppAck {
    /// Total encoded size, header included.
    pub const WIRE_SIZE: usize = 6;
}

impl WireMessage for RegisterAppAck {
    const COMMAND_ID: u16 = app::REGISTER_APP_ACK;
    const MIN_PAYLOAD: usize = 2;

    fn encode_payload(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        w.put_u16(self.error.code())
    }
}

impl WireDecode for RegisterAppAck {
    fn decode_payload(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            error: ErrorCode::from(r.get_u16()?),
        })
    }
}

/// `REGISTER_DATA`: identity, num_mps(4), mp_id(4) x num_mps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterData {
    pub identity: AppIdentity,
    pub mps: Vec<MpId>,
}

impl WireMessage for RegisterData {
    const COMMAND_ID: u16 = app::REGISTER_DATA;
    const MIN_PAYLOAD: usize = 13;

    fn encode_payload(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        put_identity(w, &self.identity)?;
        w.put_u32(count_to_u32(self.mps.len())?)?;
        self.mps.iter().try_for_each(|mp| w.put_u32(*mp))
    }
}

impl WireDecode for RegisterData {
    fn decode_payload(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let identity = get_identity(r)?;
        let count = r.get_u32()?;
        let mut mps = Vec::new();
        for _ in 0..count {
            mps.push(r.get_u32()?);
        }
        Ok(Self { identity, mps })
    }
}

/// `REGISTER_DATA_ACK`: error(2), per-mp error(2) x N.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterDataAck {
    pub error: ErrorCode,
    pub mp_errors: Vec<ErrorCode>,
}

impl WireMessage for RegisterDataAck {
    const COMMAND_ID: u16 = app::REGISTER_DATA_ACK;
    const MIN_PAYLOAD: usize = 2;

    fn encode_payload(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        w.put_u16(self.error.code())?;
        put_codes(w, &self.mp_errors)
    }
}

impl WireDecode for RegisterDataAck {
    fn decode_payload(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            error: ErrorCode::from(r.get_u16()?),
            mp_errors: get_codes(r)?,
        })
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// How to treat a SUBSCRIBE whose `num_mps` disagrees with its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MpCountPolicy {
    /// Reject the message with a length mismatch.
    #[default]
    Strict,
    /// Use the count implied by the length, capped at `fallback_max`.
    Lenient { fallback_max: usize },
}

/// `SUBSCRIBE`: identity, num_mps(4), seq_num(2), (mp(4), period(4), num_samples(4)) x num_mps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub identity: AppIdentity,
    pub seq_num: u16,
    pub points: Vec<PointRequest>,
}

impl Subscribe {
    const FIXED: usize = 15;
    const PER_POINT: usize = 12;

    /// Decodes under the given MP-count policy.
    pub fn decode_with_policy(bytes: &[u8], policy: MpCountPolicy) -> Result<Self, DecodeError> {
        decode_with(bytes, Self::COMMAND_ID, Self::MIN_PAYLOAD, |r| {
            let identity = get_identity(r)?;
            let declared_count = r.get_u32()?;
            let seq_num = r.get_u16()?;
            let count = match policy {
                MpCountPolicy::Strict => declared_count as usize,
                MpCountPolicy::Lenient { fallback_max } => {
                    let implied = r.remaining() / Self::PER_POINT;
                    if implied != declared_count as usize {
                        warn!(
                            declared = declared_count,
                            implied,
                            fallback_max,
                            "SUBSCRIBE point count disagrees with length, clamping"
                        );
                        implied.min(fallback_max)
                    } else {
                        implied
                    }
                }
            };
            let mut points = Vec::with_capacity(count.min(r.remaining() / Self::PER_POINT));
            for _ in 0..count {
                points.push(PointRequest {
                    mp: r.get_u32()?,
                    period_ms: r.get_u32()?,
                    sample_count: r.get_u32()?,
                });
            }
            Ok(Self {
                identity,
                seq_num,
                points,
            })
        })
    }

    pub fn into_request(self) -> SubscriptionRequest {
        SubscriptionRequest {
            requester: self.identity,
            seq_num: self.seq_num,
            points: self.points,
        }
    }

    /// Encoded size for `n` points, header included.
    pub const fn wire_size(n: usize) -> usize {
        4 + Self::FIXED + n * Self::PER_POINT
    }
}

impl WireMessage for Subscribe {
    const COMMAND_ID: u16 = app::SUBSCRIBE;
    const MIN_PAYLOAD: usize = Self::FIXED;

    fn encode_payload(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        put_identity(w, &self.identity)?;
        w.put_u32(count_to_u32(self.points.len())?)?;
        w.put_u16(self.seq_num)?;
        self.points.iter().try_for_each(|p| {
            w.put_u32(p.mp)?;
            w.put_u32(p.period_ms)?;
            w.put_u32(p.sample_count)
        })
    }
}

impl WireDecode for Subscribe {
    fn decode_payload(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let identity = get_identity(r)?;
        let count = r.get_u32()?;
        let seq_num = r.get_u16()?;
        let mut points = Vec::new();
        for _ in 0..count {
            points.push(PointRequest {
                mp: r.get_u32()?,
                period_ms: r.get_u32()?,
                sample_count: r.get_u32()?,
            });
        }
        Ok(Self {
            identity,
            seq_num,
            points,
        })
    }
}

/// `SUBSCRIBE_ACK`: topic_id(4), error(2), per-mp error(2) x N.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeAck {
    pub topic_id: TopicId,
    pub error: ErrorCode,
    pub mp_errors: Vec<ErrorCode>,
}

impl SubscribeAck {
    /// Builds the ack for a validated topic.
    ///
    /// The general error is `InvalidMpNumber` if any point was rejected.
    pub fn from_topic(topic: &Topic) -> Self {
        let mp_errors: Vec<ErrorCode> = topic
            .subscriptions
            .iter()
            .map(|s| {
                if s.is_valid {
                    ErrorCode::Success
                } else {
                    ErrorCode::InvalidMpNumber
                }
            })
            .collect();
        let error = if topic.has_invalid() {
            ErrorCode::InvalidMpNumber
        } else {
            ErrorCode::Success
        };
        Self {
            topic_id: topic.topic_id,
            error,
            mp_errors,
        }
    }

    /// Number of non-success per-point codes.
    pub fn error_count(&self) -> usize {
        self.mp_errors.iter().filter(|e| !e.is_success()).count()
    }
}

impl WireMessage for SubscribeAck {
    const COMMAND_ID: u16 = app::SUBSCRIBE_ACK;
    const MIN_PAYLOAD: usize = 6;

    fn encode_payload(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        w.put_i32(self.topic_id)?;
        w.put_u16(self.error.code())?;
        put_codes(w, &self.mp_errors)
    }
}

impl WireDecode for SubscribeAck {
    fn decode_payload(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            topic_id: r.get_i32()?,
            error: ErrorCode::from(r.get_u16()?),
            mp_errors: get_codes(r)?,
        })
    }
}

// ============================================================================
// Liveness and data channel
// ============================================================================

/// `HEARTBEAT`: counter(4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub counter: u32,
}

impl WireMessage for Heartbeat {
    const COMMAND_ID: u16 = app::HEARTBEAT;
    const MIN_PAYLOAD: usize = 4;

    fn encode_payload(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        w.put_u32(self.counter)
    }
}

impl WireDecode for Heartbeat {
    fn decode_payload(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            counter: r.get_u32()?,
        })
    }
}

/// `OPEN`: app_id(4). Sent on the UDP data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Open {
    pub app_id: AppName,
}

impl WireMessage for Open {
    const COMMAND_ID: u16 = app::OPEN;
    const MIN_PAYLOAD: usize = 4;

    fn encode_payload(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        w.put_bytes(&self.app_id.as_bytes())
    }
}

impl WireDecode for Open {
    fn decode_payload(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            app_id: AppName::from_bytes(r.get_array4()?),
        })
    }
}

/// `CLOSE`: reserved, header only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Close;

impl WireMessage for Close {
    const COMMAND_ID: u16 = app::CLOSE;
    const MIN_PAYLOAD: usize = 0;

    fn encode_payload(&self, _w: &mut WireWriter) -> Result<(), EncodeError> {
        Ok(())
    }
}

impl WireDecode for Close {
    fn decode_payload(_r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self)
    }
}

/// `SYSINIT`: header only, sent by the manager on the data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SysInit;

impl WireMessage for SysInit {
    const COMMAND_ID: u16 = app::SYSINIT;
    const MIN_PAYLOAD: usize = 0;

    fn encode_payload(&self, _w: &mut WireWriter) -> Result<(), EncodeError> {
        Ok(())
    }
}

impl WireDecode for SysInit {
    fn decode_payload(_r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self)
    }
}
