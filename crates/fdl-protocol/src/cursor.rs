//! Byte cursor and writer for the fixed-layout wire format.
//!
//! Every scalar is written and read big-endian, field by field. The writer
//! reserves the 4-byte header up front and back-patches the length field
//! in [`WireWriter::finish`].

use crate::error::{DecodeError, EncodeError};

/// Size of `command_id(2) | length(2)`.
pub const HEADER_LEN: usize = 4;

/// Largest encoded message, header included.
pub const MAX_MESSAGE_SIZE: usize = 1000;

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub command_id: u16,
    /// Bytes following the length field.
    pub length: u16,
}

impl Header {
    /// Reads the header from the front of `bytes`.
    pub fn peek(bytes: &[u8]) -> Option<Self> {
        let mut reader = WireReader::new(bytes);
        let command_id = reader.get_u16().ok()?;
        let length = reader.get_u16().ok()?;
        Some(Self { command_id, length })
    }
}

/// Appends fields to an outgoing message with a hard capacity.
#[derive(Debug, Clone)]
pub struct WireWriter {
    buf: Vec<u8>,
    capacity: usize,
}

impl WireWriter {
    /// Starts a message: command id plus a zero length placeholder.
    pub fn new(command_id: u16) -> Self {
        Self::with_capacity(command_id, MAX_MESSAGE_SIZE)
    }

    pub fn with_capacity(command_id: u16, capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(capacity.min(MAX_MESSAGE_SIZE));
        buf.extend_from_slice(&command_id.to_be_bytes());
        buf.extend_from_slice(&[0, 0]);
        Self { buf, capacity }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        let needed = self.buf.len() + bytes.len();
        if needed > self.capacity {
            return Err(EncodeError::Overflow {
                needed,
                capacity: self.capacity,
            });
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn put_u8(&mut self, v: u8) -> Result<(), EncodeError> {
        self.put(&[v])
    }

    pub fn put_u16(&mut self, v: u16) -> Result<(), EncodeError> {
        self.put(&v.to_be_bytes())
    }

    pub fn put_u32(&mut self, v: u32) -> Result<(), EncodeError> {
        self.put(&v.to_be_bytes())
    }

    pub fn put_i32(&mut self, v: i32) -> Result<(), EncodeError> {
        self.put(&v.to_be_bytes())
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        self.put(bytes)
    }

    /// Bytes written so far, header included.
    pub fn written(&self) -> usize {
        self.buf.len()
    }

    /// Back-patches the length field with `written - 4` and returns the frame.
    pub fn finish(mut self) -> Result<Vec<u8>, EncodeError> {
        let payload = self.buf.len().saturating_sub(HEADER_LEN);
        let length = u16::try_from(payload).map_err(|_| EncodeError::Overflow {
            needed: self.buf.len(),
            capacity: usize::from(u16::MAX) + HEADER_LEN,
        })?;
        if let Some(field) = self.buf.get_mut(2..HEADER_LEN) {
            field.copy_from_slice(&length.to_be_bytes());
        }
        Ok(self.buf)
    }
}

/// Reads fields from a received payload, tracking how much was consumed.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.pos + N;
        let slice = self.buf.get(self.pos..end).ok_or(DecodeError::Truncated {
            needed: end,
            available: self.buf.len(),
        })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, DecodeError> {
        self.take::<1>().map(|[b]| b)
    }

    pub fn get_u16(&mut self) -> Result<u16, DecodeError> {
        self.take::<2>().map(u16::from_be_bytes)
    }

    pub fn get_u32(&mut self) -> Result<u32, DecodeError> {
        self.take::<4>().map(u32::from_be_bytes)
    }

    pub fn get_i32(&mut self) -> Result<i32, DecodeError> {
        self.take::<4>().map(i32::from_be_bytes)
    }

    pub fn get_array4(&mut self) -> Result<[u8; 4], DecodeError> {
        self.take::<4>()
    }

    /// Bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Returns the next u32 without consuming it.
    pub fn peek_u32(&self) -> Option<u32> {
        self.clone().get_u32().ok()
    }
}
