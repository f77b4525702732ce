//! Application identity as carried in REGISTER and SUBSCRIBE payloads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Four-byte application name.
///
/// Names shorter than four characters are right-padded with NUL on the
/// wire, which is how the peers compare them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AppName([u8; 4]);

impl AppName {
    /// Width of the name field in every message that carries one.
    pub const LEN: usize = 4;

    /// Builds a name from raw wire bytes.
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Returns the raw wire bytes.
    pub const fn as_bytes(&self) -> [u8; 4] {
        self.0
    }

    /// Interprets a numeric application id as a name.
    ///
    /// Some subscribers identify themselves with a number rather than text;
    /// both forms occupy the same four bytes.
    pub const fn from_u32(value: u32) -> Self {
        Self(value.to_be_bytes())
    }

    /// Returns the name as a 32-bit value (big-endian interpretation).
    pub const fn to_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// Returns the printable part of the name, trailing NULs stripped.
    pub fn display_name(&self) -> String {
        self.0
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| if b.is_ascii_graphic() { *b as char } else { '?' })
            .collect()
    }
}

impl FromStr for AppName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > Self::LEN || !s.is_ascii() {
            return Err(DomainError::InvalidAppName {
                value: s.to_string(),
            });
        }
        let mut bytes = [0u8; 4];
        for (slot, b) in bytes.iter_mut().zip(s.bytes()) {
            *slot = b;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Host operating system code sent in registration messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostOs {
    PetaLinux,
    /// Any code this build does not know; carried verbatim.
    Other(u8),
}

impl HostOs {
    pub const fn code(self) -> u8 {
        match self {
            Self::PetaLinux => 0,
            Self::Other(code) => code,
        }
    }
}

impl From<u8> for HostOs {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::PetaLinux,
            other => Self::Other(other),
        }
    }
}

impl Default for HostOs {
    fn default() -> Self {
        Self::PetaLinux
    }
}

/// Who this process claims to be when it registers with a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppIdentity {
    pub host_os: HostOs,
    pub process_id: u32,
    pub app_name: AppName,
}

impl AppIdentity {
    /// Identity for the current OS process.
    pub fn current(app_name: AppName) -> Self {
        Self {
            host_os: HostOs::PetaLinux,
            process_id: std::process::id(),
            app_name,
        }
    }
}
