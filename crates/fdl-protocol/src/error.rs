//! Codec error types.

use thiserror::Error;

use fdl_core::MpId;

/// Errors produced while encoding a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The message would not fit in one frame
    #[error("Message overflow: {needed} bytes needed, capacity {capacity}")]
    Overflow { needed: usize, capacity: usize },
}

/// Reasons a received message is rejected.
///
/// A single message can fail for several reasons at once; the decoder
/// logs every one it detects and returns the first.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than the message's fixed part
    #[error("Truncated message: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Header carries a different command id
    #[error("Command mismatch: expected {expected:#06x}, found {found:#06x}")]
    CommandMismatch { expected: u16, found: u16 },

    /// Declared length disagrees with the bytes received or consumed
    #[error("Length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// A published point the receiver has no layout for
    #[error("Unexpected measurement point {mp} in message")]
    UnexpectedPoint { mp: MpId },
}

impl DecodeError {
    /// Short tag used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Truncated { .. } => "truncated",
            Self::CommandMismatch { .. } => "command",
            Self::LengthMismatch { .. } => "length",
            Self::UnexpectedPoint { .. } => "point",
        }
    }
}
