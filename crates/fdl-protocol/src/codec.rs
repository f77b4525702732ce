//! Message encode/decode entry points.
//!
//! [`encode`] lays out the header, then the message's fields in schema
//! order, then back-patches the length. [`decode`] checks the header and
//! the typed fields and rejects any message whose declared length does not
//! match what was received and consumed.
//!
//! # Diagnostics
//!
//! A rejected message may be wrong in more than one way at once (wrong
//! command and wrong length, say). Every independently detected problem is
//! logged at `warn`; the first one is returned.
//!
//! # Panic-Free Guarantees
//!
//! No indexing or arithmetic that can overflow; all reads go through
//! [`WireReader`].

use tracing::warn;

use crate::cursor::{Header, WireReader, WireWriter, HEADER_LEN};
use crate::error::{DecodeError, EncodeError};

/// A message with a fixed command id and schema.
pub trait WireMessage: Sized {
    const COMMAND_ID: u16;

    /// Payload bytes every valid instance has at least.
    const MIN_PAYLOAD: usize;

    fn encode_payload(&self, w: &mut WireWriter) -> Result<(), EncodeError>;
}

/// A message that can be decoded without outside context.
pub trait WireDecode: WireMessage {
    fn decode_payload(r: &mut WireReader<'_>) -> Result<Self, DecodeError>;
}

/// Encodes a message into one frame.
pub fn encode<M: WireMessage>(msg: &M) -> Result<Vec<u8>, EncodeError> {
    let mut w = WireWriter::new(M::COMMAND_ID);
    msg.encode_payload(&mut w)?;
    w.finish()
}

/// Decodes a message, logging every mismatch found.
pub fn decode<M: WireDecode>(bytes: &[u8]) -> Result<M, DecodeError> {
    decode_with(bytes, M::COMMAND_ID, M::MIN_PAYLOAD, M::decode_payload)
}

/// Decodes with a custom payload parser, logging every mismatch found.
pub fn decode_with<T>(
    bytes: &[u8],
    expected_command_id: u16,
    min_payload: usize,
    parse: impl FnOnce(&mut WireReader<'_>) -> Result<T, DecodeError>,
) -> Result<T, DecodeError> {
    match diagnose_with(bytes, expected_command_id, min_payload, parse) {
        Ok(value) => Ok(value),
        Err(problems) => {
            for problem in &problems {
                warn!(
                    command = expected_command_id,
                    kind = problem.kind(),
                    error = %problem,
                    "Discarding message"
                );
            }
            Err(problems
                .into_iter()
                .next()
                .unwrap_or(DecodeError::Truncated {
                    needed: HEADER_LEN,
                    available: bytes.len(),
                }))
        }
    }
}

/// Runs every check and returns all problems found, in detection order.
///
/// Checks: header present, command id, received size against the
/// declared length, fixed-part size, typed fields, and bytes consumed
/// against the declared length.
pub fn diagnose_with<T>(
    bytes: &[u8],
    expected_command_id: u16,
    min_payload: usize,
    parse: impl FnOnce(&mut WireReader<'_>) -> Result<T, DecodeError>,
) -> Result<T, Vec<DecodeError>> {
    let Some(header) = Header::peek(bytes) else {
        return Err(vec![DecodeError::Truncated {
            needed: HEADER_LEN,
            available: bytes.len(),
        }]);
    };
    let body = bytes.get(HEADER_LEN..).unwrap_or_default();
    let declared = usize::from(header.length);
    let mut problems = Vec::new();

    if header.command_id != expected_command_id {
        note(
            DecodeError::CommandMismatch {
                expected: expected_command_id,
                found: header.command_id,
            },
            &mut problems,
        );
    }

    if body.len() != declared {
        note(
            DecodeError::LengthMismatch {
                declared,
                actual: body.len(),
            },
            &mut problems,
        );
    }

    if body.len() < min_payload {
        note(
            DecodeError::Truncated {
                needed: HEADER_LEN + min_payload,
                available: bytes.len(),
            },
            &mut problems,
        );
        return Err(problems);
    }

    let mut reader = WireReader::new(body);
    match parse(&mut reader) {
        Ok(value) => {
            if reader.consumed() != declared {
                note(
                    DecodeError::LengthMismatch {
                        declared,
                        actual: reader.consumed(),
                    },
                    &mut problems,
                );
            }
            if problems.is_empty() {
                Ok(value)
            } else {
                Err(problems)
            }
        }
        // Past the fixed part, running out of bytes means the counts and
        // the declared length disagree.
        Err(DecodeError::Truncated { needed, .. }) => {
            note(
                DecodeError::LengthMismatch {
                    declared,
                    actual: needed,
                },
                &mut problems,
            );
            Err(problems)
        }
        Err(other) => {
            note(other, &mut problems);
            Err(problems)
        }
    }
}

fn note(problem: DecodeError, problems: &mut Vec<DecodeError>) {
    if !problems.contains(&problem) {
        problems.push(problem);
    }
}
