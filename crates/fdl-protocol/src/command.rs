//! Command ids and error codes.

use std::fmt;

/// Commands exchanged between applications and the manager.
pub mod app {
    pub const REGISTER_APP: u16 = 0x0001;
    pub const REGISTER_APP_ACK: u16 = 0x0002;
    pub const REGISTER_DATA: u16 = 0x0003;
    pub const REGISTER_DATA_ACK: u16 = 0x0004;
    pub const SUBSCRIBE: u16 = 0x0005;
    pub const SUBSCRIBE_ACK: u16 = 0x0006;
    pub const HEARTBEAT: u16 = 0x0007;
    pub const OPEN: u16 = 0x0008;
    pub const CLOSE: u16 = 0x0009;
    pub const PUBLISH: u16 = 0x000A;
    pub const SYSINIT: u16 = 0x000B;
}

/// Commands exchanged between the supervisor and the manager.
///
/// This is a separate id space; `INIT` shares its value with
/// `app::REGISTER_APP`.
pub mod control {
    pub const INIT: u16 = 0x0001;
    pub const HEALTH_NOTICE: u16 = 0x000C;
    pub const HEALTH_NOTICE_ACK: u16 = 0x000D;
    pub const RESTART_REQUEST: u16 = 0x000E;
    pub const RESTART_ACK: u16 = 0x000F;
    pub const INIT_ACK: u16 = 0x0010;
    pub const PROCESS_LIST: u16 = 0x0011;
}

/// Error field values carried in acks and notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success,
    RegistrationTimeout,
    PacketError,
    InvalidCommandId,
    InvalidHostOs,
    InvalidProcessId,
    InvalidProcessName,
    InvalidNumberOfMps,
    InvalidMpNumber,
    StaleData,
    DataNotAvailable,
    SupervisorToManager,
    ManagerToSupervisor,
    /// A code this build does not know; carried verbatim.
    Other(u16),
}

impl ErrorCode {
    pub const fn code(self) -> u16 {
        match self {
            Self::Success => 0,
            Self::RegistrationTimeout => 1,
            Self::PacketError => 2,
            Self::InvalidCommandId => 3,
            Self::InvalidHostOs => 4,
            Self::InvalidProcessId => 5,
            Self::InvalidProcessName => 6,
            Self::InvalidNumberOfMps => 7,
            Self::InvalidMpNumber => 8,
            Self::StaleData => 9,
            Self::DataNotAvailable => 10,
            Self::SupervisorToManager => 11,
            Self::ManagerToSupervisor => 12,
            Self::Other(code) => code,
        }
    }

    pub const fn is_success(self) -> bool {
        self.code() == 0
    }
}

impl From<u16> for ErrorCode {
    fn from(code: u16) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::RegistrationTimeout,
            2 => Self::PacketError,
            3 => Self::InvalidCommandId,
            4 => Self::InvalidHostOs,
            5 => Self::InvalidProcessId,
            6 => Self::InvalidProcessName,
            7 => Self::InvalidNumberOfMps,
            8 => Self::InvalidMpNumber,
            9 => Self::StaleData,
            10 => Self::DataNotAvailable,
            11 => Self::SupervisorToManager,
            12 => Self::ManagerToSupervisor,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "unknown error {code}"),
            known => write!(f, "{known:?} ({})", known.code()),
        }
    }
}
