//! Length-prefixed framing for the TCP control connection.
//!
//! A frame is `command_id(2) | length(2) | payload(length)`. Frames are
//! passed up whole, header included, so the message decoders can run
//! their own header checks.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::cursor::{Header, HEADER_LEN, MAX_MESSAGE_SIZE};

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Declared length exceeds the maximum message size
    #[error("Frame too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
}

/// Splits a byte stream into whole messages.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(header) = Header::peek(&src[..]) else {
            return Ok(None);
        };
        let size = HEADER_LEN + usize::from(header.length);
        if size > self.max_size {
            return Err(FrameError::TooLarge {
                size,
                max: self.max_size,
            });
        }
        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }
        Ok(Some(src.split_to(size).freeze()))
    }
}

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_size {
            return Err(FrameError::TooLarge {
                size: item.len(),
                max: self.max_size,
            });
        }
        dst.extend_from_slice(&item);
        Ok(())
    }
}
