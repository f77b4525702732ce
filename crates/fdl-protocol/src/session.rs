//! Protocol session: one TCP control connection plus one UDP data channel.
//!
//! A session walks `Disconnected -> Connected -> Registered -> Subscribed
//! -> Streaming -> Closed`. Every request that has an ack waits for it
//! before returning, so two requests on the same session never overlap.
//! OPEN, PUBLISH and HEARTBEAT have no ack.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Every failure is logged before it is returned

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{timeout, Instant};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use fdl_core::{
    AppIdentity, Catalog, PointRequest, Subscription, SubscriptionRequest, Topic, TopicId,
};

use crate::codec::{decode, encode, WireMessage};
use crate::command::{app, control, ErrorCode};
use crate::control::ManagerInit;
use crate::cursor::{Header, HEADER_LEN, MAX_MESSAGE_SIZE};
use crate::error::{DecodeError, EncodeError};
use crate::frame::{FrameCodec, FrameError};
use crate::message::{
    Heartbeat, MpCountPolicy, Open, RegisterApp, RegisterData, RegisterDataAck,
    Subscribe, SubscribeAck, SysInit,
};
use crate::publish::{PointValues, Publish, PublishLayout, PublishedPoint};

// ============================================================================
// Configuration
// ============================================================================

/// Registration must be sent within this long after connecting.
pub const REGISTRATION_BUDGET: Duration = Duration::from_secs(1);

/// How long to wait for any ack.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Endpoints and limits for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Control peer, `host:port`.
    pub peer_addr: String,
    /// Local address for the UDP data channel.
    pub data_bind: SocketAddr,
    /// Where OPEN and PUBLISH datagrams go.
    pub data_dest: SocketAddr,
    pub identity: AppIdentity,
    /// Catalog used to shape received PUBLISH datagrams.
    pub catalog: &'static Catalog,
    pub ack_timeout: Duration,
    pub mp_count_policy: MpCountPolicy,
}

impl SessionConfig {
    pub fn new(
        peer_addr: impl Into<String>,
        data_bind: SocketAddr,
        data_dest: SocketAddr,
        identity: AppIdentity,
        catalog: &'static Catalog,
    ) -> Self {
        Self {
            peer_addr: peer_addr.into(),
            data_bind,
            data_dest,
            identity,
            catalog,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            mp_count_policy: MpCountPolicy::Strict,
        }
    }
}

// ============================================================================
// State and errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Registered,
    Subscribed,
    Streaming,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Registered => "registered",
            Self::Subscribed => "subscribed",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// How the data channel is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannelMode {
    /// Send OPEN and carry on.
    FireAndForget,
    /// Send OPEN, then wait for the peer's SYSINIT.
    AwaitSysInit,
}

/// One way an ack differed from what was expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckMismatch {
    Size { expected: usize, received: usize },
    Command { expected: u16, found: u16 },
    Length { expected: u16, declared: u16 },
    Error(ErrorCode),
}

impl fmt::Display for AckMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size { expected, received } => {
                write!(f, "received {received} bytes, expected {expected}")
            }
            Self::Command { expected, found } => {
                write!(f, "command {found:#06x}, expected {expected:#06x}")
            }
            Self::Length { expected, declared } => {
                write!(f, "length field {declared}, expected {expected}")
            }
            Self::Error(code) => write!(f, "error field {code}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to bind data channel on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Registration not sent within {budget:?} of connecting ({elapsed:?} elapsed)")]
    RegistrationTimeout { elapsed: Duration, budget: Duration },

    #[error("Registration rejected: {}", describe(.mismatches))]
    RegistrationRejected { mismatches: Vec<AckMismatch> },

    #[error("Subscription rejected for topic {topic_id}: {error_count} point errors")]
    SubscriptionRejected { topic_id: TopicId, error_count: usize },

    #[error("No ack for command {command:#06x} within {timeout:?}")]
    AckTimeout { command: u16, timeout: Duration },

    #[error("Peer closed the control connection")]
    PeerClosed,

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Short write: {written} of {expected} bytes sent")]
    ShortWrite { expected: usize, written: usize },

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn describe(mismatches: &[AckMismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Compares a fixed-size ack against expectations.
///
/// Size, command, length and error field are each checked on their own so
/// that every discrepancy is reported, not just the first.
pub fn check_fixed_ack(
    frame: &[u8],
    expected_command: u16,
    expected_length: u16,
    has_error_field: bool,
) -> Vec<AckMismatch> {
    let mut mismatches = Vec::new();
    let expected_size = HEADER_LEN + usize::from(expected_length);
    if frame.len() != expected_size {
        mismatches.push(AckMismatch::Size {
            expected: expected_size,
            received: frame.len(),
        });
    }
    if let Some(header) = Header::peek(frame) {
        if header.command_id != expected_command {
            mismatches.push(AckMismatch::Command {
                expected: expected_command,
                found: header.command_id,
            });
        }
        if header.length != expected_length {
            mismatches.push(AckMismatch::Length {
                expected: expected_length,
                declared: header.length,
            });
        }
    }
    if has_error_field {
        if let Some([hi, lo]) = frame.get(HEADER_LEN..HEADER_LEN + 2).and_then(|b| <[u8; 2]>::try_from(b).ok()) {
            let code = ErrorCode::from(u16::from_be_bytes([hi, lo]));
            if !code.is_success() {
                mismatches.push(AckMismatch::Error(code));
            }
        }
    }
    mismatches
}

// ============================================================================
// Session
// ============================================================================

pub struct ProtocolSession {
    config: SessionConfig,
    state: SessionState,
    control: Option<Framed<TcpStream, FrameCodec>>,
    data: Option<UdpSocket>,
    connected_at: Option<Instant>,
    seq_num: u16,
    subscription: Option<(TopicId, PublishLayout)>,
}

impl ProtocolSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Disconnected,
            control: None,
            data: None,
            connected_at: None,
            seq_num: 0,
            subscription: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Local address of the data channel, once open.
    pub fn data_local_addr(&self) -> Option<SocketAddr> {
        self.data.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            warn!(operation, state = %self.state, "Operation not allowed in this state");
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn next_seq(&mut self) -> u16 {
        let seq = self.seq_num;
        self.seq_num = self.seq_num.wrapping_add(1);
        seq
    }

    // ------------------------------------------------------------------------
    // Control channel
    // ------------------------------------------------------------------------

    /// Opens the TCP control connection.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        self.require("connect", &[SessionState::Disconnected])?;
        let addr = self.config.peer_addr.clone();
        let stream = TcpStream::connect(&addr).await.map_err(|source| {
            error!(addr = %addr, error = %source, "Control connection failed");
            SessionError::Connect {
                addr: addr.clone(),
                source,
            }
        })?;
        // Acks are tiny; don't let Nagle hold requests back.
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %addr, error = %e, "Cannot disable Nagle on control connection");
        }
        self.control = Some(Framed::new(stream, FrameCodec::new()));
        self.connected_at = Some(Instant::now());
        self.state = SessionState::Connected;
        info!(peer = %addr, app = %self.config.identity.app_name, "Control connection established");
        Ok(())
    }

    /// Sends one message on the control connection.
    pub async fn send_message<M: WireMessage>(&mut self, msg: &M) -> Result<(), SessionError> {
        let bytes = encode(msg)?;
        let control = self.control.as_mut().ok_or(SessionError::InvalidState {
            operation: "send",
            state: self.state,
        })?;
        control.send(bytes).await.map_err(|e| {
            error!(command = M::COMMAND_ID, error = %e, "Control send failed");
            SessionError::from(e)
        })
    }

    /// Waits for the next whole frame on the control connection.
    pub async fn recv_frame(&mut self) -> Result<Bytes, SessionError> {
        let control = self.control.as_mut().ok_or(SessionError::InvalidState {
            operation: "receive",
            state: self.state,
        })?;
        match control.next().await {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => {
                error!(error = %e, "Control receive failed");
                Err(e.into())
            }
            None => {
                info!("Peer closed the control connection");
                Err(SessionError::PeerClosed)
            }
        }
    }

    /// Like [`recv_frame`](Self::recv_frame), bounded by the ack timeout.
    async fn recv_ack(&mut self, command: u16) -> Result<Bytes, SessionError> {
        let limit = self.config.ack_timeout;
        match timeout(limit, self.recv_frame()).await {
            Ok(result) => result,
            Err(_) => {
                error!(command, timeout = ?limit, "Ack wait timed out");
                Err(SessionError::AckTimeout {
                    command,
                    timeout: limit,
                })
            }
        }
    }

    /// Registers this application, which must happen within `within` of connecting.
    ///
    /// Nothing is sent if the budget has already run out.
    pub async fn register(&mut self, within: Duration) -> Result<(), SessionError> {
        self.require("register", &[SessionState::Connected])?;
        let elapsed = self.connected_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
        if elapsed >= within {
            error!(elapsed = ?elapsed, budget = ?within, "Too late to register");
            return Err(SessionError::RegistrationTimeout {
                elapsed,
                budget: within,
            });
        }

        self.send_message(&RegisterApp {
            identity: self.config.identity,
        })
        .await?;
        let frame = self.recv_ack(app::REGISTER_APP_ACK).await?;

        let mismatches = check_fixed_ack(&frame, app::REGISTER_APP_ACK, 2, true);
        if !mismatches.is_empty() {
            for mismatch in &mismatches {
                warn!(%mismatch, "REGISTER_APP_ACK mismatch");
            }
            return Err(SessionError::RegistrationRejected { mismatches });
        }

        self.state = SessionState::Registered;
        info!(app = %self.config.identity.app_name, "Registered with peer");
        Ok(())
    }

    /// Announces the points this application can publish.
    ///
    /// Returns the per-point codes from the ack.
    pub async fn register_data(&mut self, mps: &[u32]) -> Result<Vec<ErrorCode>, SessionError> {
        self.require(
            "register data",
            &[SessionState::Registered, SessionState::Subscribed],
        )?;
        self.send_message(&RegisterData {
            identity: self.config.identity,
            mps: mps.to_vec(),
        })
        .await?;
        let frame = self.recv_ack(app::REGISTER_DATA_ACK).await?;
        let ack: RegisterDataAck = decode(&frame)?;

        let mut mismatches: Vec<AckMismatch> = std::iter::once(ack.error)
            .chain(ack.mp_errors.iter().copied())
            .filter(|code| !code.is_success())
            .map(AckMismatch::Error)
            .collect();
        if ack.mp_errors.len() != mps.len() {
            mismatches.push(AckMismatch::Length {
                expected: u16::try_from(2 + 2 * mps.len()).unwrap_or(u16::MAX),
                declared: u16::try_from(2 + 2 * ack.mp_errors.len()).unwrap_or(u16::MAX),
            });
        }
        if !mismatches.is_empty() {
            for mismatch in &mismatches {
                warn!(%mismatch, "REGISTER_DATA_ACK mismatch");
            }
            return Err(SessionError::RegistrationRejected { mismatches });
        }
        info!(points = mps.len(), "Data points registered");
        Ok(ack.mp_errors)
    }

    // ------------------------------------------------------------------------
    // Supervisor handshake
    // ------------------------------------------------------------------------

    /// Supervisor-side handshake: INIT, then a 4-byte INIT_ACK.
    pub async fn initialize(&mut self) -> Result<(), SessionError> {
        self.require("initialize", &[SessionState::Connected])?;
        self.send_message(&ManagerInit).await?;
        let frame = self.recv_ack(control::INIT_ACK).await?;
        let mismatches = check_fixed_ack(&frame, control::INIT_ACK, 0, false);
        if !mismatches.is_empty() {
            for mismatch in &mismatches {
                warn!(%mismatch, "INIT_ACK mismatch");
            }
            return Err(SessionError::RegistrationRejected { mismatches });
        }
        self.state = SessionState::Registered;
        info!("Manager handshake complete");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Data channel
    // ------------------------------------------------------------------------

    /// Binds the UDP data channel and sends OPEN.
    pub async fn open_data_channel(&mut self, mode: DataChannelMode) -> Result<(), SessionError> {
        self.require(
            "open data channel",
            &[SessionState::Registered, SessionState::Subscribed],
        )?;
        let bind = self.config.data_bind;
        let socket = UdpSocket::bind(bind).await.map_err(|source| {
            error!(addr = %bind, error = %source, "Data channel bind failed");
            SessionError::Bind { addr: bind, source }
        })?;

        let open = encode(&Open {
            app_id: self.config.identity.app_name,
        })?;
        let written = socket.send_to(&open, self.config.data_dest).await?;
        if written != open.len() {
            warn!(expected = open.len(), written, "Short write on OPEN");
        }
        self.data = Some(socket);
        info!(bind = %bind, dest = %self.config.data_dest, ?mode, "Data channel open");

        if mode == DataChannelMode::AwaitSysInit {
            self.await_sysinit().await?;
        }
        Ok(())
    }

    async fn await_sysinit(&mut self) -> Result<(), SessionError> {
        let limit = self.config.ack_timeout;
        let socket = self.data.as_ref().ok_or(SessionError::InvalidState {
            operation: "await sysinit",
            state: self.state,
        })?;
        let wait = async {
            let mut buf = [0u8; MAX_MESSAGE_SIZE];
            loop {
                let (len, from) = socket.recv_from(&mut buf).await?;
                let datagram = buf.get(..len).unwrap_or_default();
                match Header::peek(datagram).map(|h| h.command_id) {
                    Some(app::OPEN) => debug!(%from, "Ignoring echoed OPEN"),
                    Some(app::SYSINIT) => {
                        if decode::<SysInit>(datagram).is_ok() {
                            info!(%from, "SYSINIT received");
                            return Ok::<(), SessionError>(());
                        }
                    }
                    other => warn!(%from, command = ?other, len, "Unexpected datagram while awaiting SYSINIT"),
                }
            }
        };
        match timeout(limit, wait).await {
            Ok(result) => result,
            Err(_) => {
                error!(timeout = ?limit, "No SYSINIT from peer");
                Err(SessionError::AckTimeout {
                    command: app::SYSINIT,
                    timeout: limit,
                })
            }
        }
    }

    // ------------------------------------------------------------------------
    // Subscriber role
    // ------------------------------------------------------------------------

    /// Sends SUBSCRIBE and waits for SUBSCRIBE_ACK.
    ///
    /// Any non-zero per-point code rejects the subscription.
    pub async fn subscribe(&mut self, points: &[PointRequest]) -> Result<SubscribeAck, SessionError> {
        self.require("subscribe", &[SessionState::Registered])?;
        let max = self.config.catalog.max_subscription;
        if points.len() > max {
            warn!(requested = points.len(), max, "Subscription exceeds catalog maximum");
            return Err(SessionError::Encode(EncodeError::Overflow {
                needed: points.len(),
                capacity: max,
            }));
        }

        let seq_num = self.next_seq();
        self.send_message(&Subscribe {
            identity: self.config.identity,
            seq_num,
            points: points.to_vec(),
        })
        .await?;
        let frame = self.recv_ack(app::SUBSCRIBE_ACK).await?;
        let ack: SubscribeAck = decode(&frame)?;

        let error_count = ack.error_count();
        if error_count > 0 {
            warn!(topic_id = ack.topic_id, error_count, "Subscription rejected");
            return Err(SessionError::SubscriptionRejected {
                topic_id: ack.topic_id,
                error_count,
            });
        }
        if ack.mp_errors.len() != points.len() {
            warn!(
                expected = points.len(),
                received = ack.mp_errors.len(),
                "SUBSCRIBE_ACK carries the wrong number of point codes"
            );
        }

        self.subscription = Some((
            ack.topic_id,
            PublishLayout::from_requests(self.config.catalog, points),
        ));
        self.state = SessionState::Subscribed;
        info!(topic_id = ack.topic_id, points = points.len(), "Subscribed");
        Ok(ack)
    }

    /// Waits for the next PUBLISH for the subscribed topic.
    ///
    /// Datagrams that fail to decode or carry another topic are logged
    /// and dropped.
    pub async fn receive_publish(&mut self) -> Result<Publish, SessionError> {
        self.require(
            "receive publish",
            &[SessionState::Subscribed, SessionState::Streaming],
        )?;
        let (Some(socket), Some((topic_id, layout))) = (self.data.as_ref(), self.subscription.as_ref()) else {
            return Err(SessionError::InvalidState {
                operation: "receive publish",
                state: self.state,
            });
        };

        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        let publish = loop {
            let (len, from) = socket.recv_from(&mut buf).await?;
            let datagram = buf.get(..len).unwrap_or_default();
            if Header::peek(datagram).map(|h| h.command_id) != Some(app::PUBLISH) {
                debug!(%from, len, "Ignoring non-PUBLISH datagram");
                continue;
            }
            let Ok(publish) = Publish::decode(datagram, layout) else {
                continue;
            };
            if publish.topic_id != *topic_id {
                warn!(expected = *topic_id, found = publish.topic_id, "PUBLISH for unknown topic");
                continue;
            }
            break publish;
        };
        self.state = SessionState::Streaming;
        Ok(publish)
    }

    // ------------------------------------------------------------------------
    // Publisher role
    // ------------------------------------------------------------------------

    /// Waits for the next SUBSCRIBE from the peer.
    ///
    /// Malformed frames and other commands are logged and skipped; the
    /// connection stays open.
    pub async fn receive_subscription(&mut self) -> Result<SubscriptionRequest, SessionError> {
        self.require(
            "receive subscription",
            &[
                SessionState::Registered,
                SessionState::Subscribed,
                SessionState::Streaming,
            ],
        )?;
        loop {
            let frame = self.recv_frame().await?;
            match Header::peek(&frame).map(|h| h.command_id) {
                Some(app::SUBSCRIBE) => {
                    if let Ok(msg) = Subscribe::decode_with_policy(&frame, self.config.mp_count_policy) {
                        info!(
                            requester = %msg.identity.app_name,
                            points = msg.points.len(),
                            seq_num = msg.seq_num,
                            "SUBSCRIBE received"
                        );
                        return Ok(msg.into_request());
                    }
                }
                other => warn!(command = ?other, len = frame.len(), "Unexpected control frame"),
            }
        }
    }

    /// Answers a SUBSCRIBE with the topic built for it.
    pub async fn acknowledge_subscription(&mut self, topic: &Topic) -> Result<SubscribeAck, SessionError> {
        self.require(
            "acknowledge subscription",
            &[
                SessionState::Registered,
                SessionState::Subscribed,
                SessionState::Streaming,
            ],
        )?;
        let ack = SubscribeAck::from_topic(topic);
        self.send_message(&ack).await?;
        if self.state == SessionState::Registered {
            self.state = SessionState::Subscribed;
        }
        info!(topic_id = ack.topic_id, error = %ack.error, "SUBSCRIBE_ACK sent");
        Ok(ack)
    }

    /// Sends one PUBLISH datagram for `topic`.
    ///
    /// Only valid subscriptions are written. `values` supplies each
    /// point's values. Returns the datagram size.
    pub async fn publish<F>(&mut self, topic: &Topic, values: F) -> Result<usize, SessionError>
    where
        F: Fn(&Subscription) -> PointValues,
    {
        self.require(
            "publish",
            &[SessionState::Subscribed, SessionState::Streaming],
        )?;
        let points = topic
            .valid_subscriptions()
            .map(|s| PublishedPoint {
                mp: s.measurement_point_id,
                values: values(s),
            })
            .collect();
        let msg = Publish {
            topic_id: topic.topic_id,
            seq_num: self.next_seq(),
            points,
        };
        let bytes = encode(&msg)?;

        let socket = self.data.as_ref().ok_or(SessionError::InvalidState {
            operation: "publish",
            state: self.state,
        })?;
        let written = socket.send_to(&bytes, self.config.data_dest).await?;
        if written < bytes.len() {
            warn!(
                topic_id = topic.topic_id,
                expected = bytes.len(),
                written,
                "Short write on PUBLISH"
            );
            return Err(SessionError::ShortWrite {
                expected: bytes.len(),
                written,
            });
        }
        self.state = SessionState::Streaming;
        debug!(topic_id = topic.topic_id, bytes = written, "PUBLISH sent");
        Ok(written)
    }

    /// Sends HEARTBEAT on the control connection.
    pub async fn heartbeat(&mut self, counter: u32) -> Result<(), SessionError> {
        self.require(
            "heartbeat",
            &[
                SessionState::Registered,
                SessionState::Subscribed,
                SessionState::Streaming,
            ],
        )?;
        self.send_message(&Heartbeat { counter }).await?;
        debug!(counter, "HEARTBEAT sent");
        Ok(())
    }

    /// Drops both channels.
    pub fn close(&mut self) {
        self.control = None;
        self.data = None;
        self.subscription = None;
        self.state = SessionState::Closed;
        info!(app = %self.config.identity.app_name, "Session closed");
    }
}
