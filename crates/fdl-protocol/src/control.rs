//! Supervisor <-> manager control messages.

use fdl_core::AppName;

use crate::codec::{WireDecode, WireMessage};
use crate::command::{control, ErrorCode};
use crate::cursor::{WireReader, WireWriter};
use crate::error::{DecodeError, EncodeError};

/// Supervisor announces itself to the manager. Header only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManagerInit;

impl WireMessage for ManagerInit {
    const COMMAND_ID: u16 = control::INIT;
    const MIN_PAYLOAD: usize = 0;

    fn encode_payload(&self, _w: &mut WireWriter) -> Result<(), EncodeError> {
        Ok(())
    }
}

impl WireDecode for ManagerInit {
    fn decode_payload(_r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self)
    }
}

/// Manager accepts the supervisor. Exactly four bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManagerInitAck;

impl ManagerInitAck {
    pub const WIRE_SIZE: usize = 4;
}

impl WireMessage for ManagerInitAck {
    const COMMAND_ID: u16 = control::INIT_ACK;
    const MIN_PAYLOAD: usize = 0;

    fn encode_payload(&self, _w: &mut WireWriter) -> Result<(), EncodeError> {
        Ok(())
    }
}

impl WireDecode for ManagerInitAck {
    fn decode_payload(_r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self)
    }
}

/// One row of the process list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: AppName,
    /// 0 unconfirmed, 1 alive, 2 dead, 3 disabled.
    pub state: u32,
}

/// Every supervised process, sent once after the handshake.
///
/// Layout: num(2), (pid(4), name(4), state(4)) x num.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessList {
    pub entries: Vec<ProcessEntry>,
}

impl WireMessage for ProcessList {
    const COMMAND_ID: u16 = control::PROCESS_LIST;
    const MIN_PAYLOAD: usize = 2;

    fn encode_payload(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        let count = u16::try_from(self.entries.len()).map_err(|_| EncodeError::Overflow {
            needed: self.entries.len(),
            capacity: usize::from(u16::MAX),
        })?;
        w.put_u16(count)?;
        for entry in &self.entries {
            w.put_u32(entry.pid)?;
            w.put_bytes(&entry.name.as_bytes())?;
            w.put_u32(entry.state)?;
        }
        Ok(())
    }
}

impl WireDecode for ProcessList {
    fn decode_payload(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let count = r.get_u16()?;
        let mut entries = Vec::with_capacity(usize::from(count).min(r.remaining() / 12));
        for _ in 0..count {
            entries.push(ProcessEntry {
                pid: r.get_u32()?,
                name: AppName::from_bytes(r.get_array4()?),
                state: r.get_u32()?,
            });
        }
        Ok(Self { entries })
    }
}

/// Supervisor reports a failed application. Layout: error(2), name(4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthNotice {
    pub error: ErrorCode,
    pub name: AppName,
}

impl WireMessage for HealthNotice {
    const COMMAND_ID: u16 = control::HEALTH_NOTICE;
    const MIN_PAYLOAD: usize = 6;

    fn encode_payload(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        w.put_u16(self.error.code())?;
        w.put_bytes(&self.name.as_bytes())
    }
}

impl WireDecode for HealthNotice {
    fn decode_payload(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            error: ErrorCode::from(r.get_u16()?),
            name: AppName::from_bytes(r.get_array4()?),
        })
    }
}

/// Manager acknowledges a health notice. Layout: error(2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthNoticeAck {
    pub error: ErrorCode,
}

impl WireMessage for HealthNoticeAck {
    const COMMAND_ID: u16 = control::HEALTH_NOTICE_ACK;
    const MIN_PAYLOAD: usize = 2;

    fn encode_payload(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        w.put_u16(self.error.code())
    }
}

impl WireDecode for HealthNoticeAck {
    fn decode_payload(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            error: ErrorCode::from(r.get_u16()?),
        })
    }
}

/// Manager asks the supervisor to restart an application. Layout: name(4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartRequest {
    pub name: AppName,
}

impl WireMessage for RestartRequest {
    const COMMAND_ID: u16 = control::RESTART_REQUEST;
    const MIN_PAYLOAD: usize = 4;

    fn encode_payload(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        w.put_bytes(&self.name.as_bytes())
    }
}

impl WireDecode for RestartRequest {
    fn decode_payload(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: AppName::from_bytes(r.get_array4()?),
        })
    }
}

/// Supervisor's answer to a restart request. Layout: error(2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartAck {
    pub error: ErrorCode,
}

impl WireMessage for RestartAck {
    const COMMAND_ID: u16 = control::RESTART_ACK;
    const MIN_PAYLOAD: usize = 2;

    fn encode_payload(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        w.put_u16(self.error.code())
    }
}

impl WireDecode for RestartAck {
    fn decode_payload(r: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            error: ErrorCode::from(r.get_u16()?),
        })
    }
}
