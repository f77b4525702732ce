//! FDL Protocol - Wire format and sessions for the FDL/SIMM interface
//!
//! This crate provides the fixed-layout big-endian message codec shared
//! by applications, the manager (AACM) and the BARSM supervisor, the
//! length-prefixed framing used on the TCP control connection, and
//! [`ProtocolSession`], which drives one application's control and data
//! channels through registration, subscription and streaming.
//!
//! Every message starts with `command_id(2) | length(2)`, where `length`
//! counts the bytes that follow. No message exceeds
//! [`MAX_MESSAGE_SIZE`] bytes.

pub mod codec;
pub mod command;
pub mod control;
pub mod cursor;
pub mod error;
pub mod frame;
pub mod message;
pub mod publish;
pub mod session;

pub use codec::{decode, diagnose_with, encode, WireDecode, WireMessage};
pub use command::{app, control as control_command, ErrorCode};
pub use control::{
    HealthNotice, HealthNoticeAck, ManagerInit, ManagerInitAck, ProcessEntry, ProcessList,
    RestartAck, RestartRequest,
};
pub use cursor::{Header, WireReader, WireWriter, HEADER_LEN, MAX_MESSAGE_SIZE};
pub use error::{DecodeError, EncodeError};
pub use frame::{FrameCodec, FrameError};
pub use message::{
    Close, Heartbeat, MpCountPolicy, Open, RegisterApp, RegisterAppAck, RegisterData,
    RegisterDataAck, Subscribe, SubscribeAck, SysInit,
};
pub use publish::{PointShape, PointValues, Publish, PublishLayout, PublishedPoint};
pub use session::{
    check_fixed_ack, AckMismatch, DataChannelMode, ProtocolSession, SessionConfig, SessionError,
    SessionState, DEFAULT_ACK_TIMEOUT, REGISTRATION_BUDGET,
};
