//! Reference binary encoding of protocol messages.
//!
//! Every message is a tag byte followed by big-endian `u32` fields:
//!
//! | tag  | message                    | fields                            |
//! |------|----------------------------|-----------------------------------|
//! | 0x01 | `Advertisement`            | site                              |
//! | 0x02 | `Ready`                    |                                   |
//! | 0x03 | `Event`                    | seqno, site, len, `len` bytes     |
//! | 0x04 | `Done` (incoming)          |                                   |
//! | 0x11 | `Acknowledge`              | site, next                        |
//! | 0x12 | `Request`                  | site, count                       |
//! | 0x13 | `Done` (outgoing)          |                                   |
//!
//! Sequence numbers travel in packed form (`value + 1`), so a zero on the
//! wire is the unspecified sentinel and is rejected, as is site `0`.

use crate::causal::{CausalError, EventIdentifier, SequenceNumber, SiteIdentifier, pack_seqno};
use crate::error::ErrorCode;

use super::{IncomingMessage, OutgoingMessage};

const TAG_ADVERTISEMENT: u8 = 0x01;
const TAG_READY: u8 = 0x02;
const TAG_EVENT: u8 = 0x03;
const TAG_INCOMING_DONE: u8 = 0x04;
const TAG_ACKNOWLEDGE: u8 = 0x11;
const TAG_REQUEST: u8 = 0x12;
const TAG_OUTGOING_DONE: u8 = 0x13;

/// Errors from decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The frame ended early.
    #[error("frame truncated: needed {needed} more byte(s), {available} available")]
    Truncated {
        /// Bytes the next field needs.
        needed: usize,
        /// Bytes left in the frame.
        available: usize,
    },

    /// Unknown message tag.
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),

    /// Bytes left over after a complete message.
    #[error("{0} trailing byte(s) after message")]
    TrailingBytes(usize),

    /// The frame is empty.
    #[error("empty frame")]
    Empty,

    /// An identifier field held a sentinel or out-of-range value.
    #[error(transparent)]
    Identifier(#[from] CausalError),

    /// A payload longer than a `u32` length prefix allows.
    #[error("payload of {0} bytes is too large to encode")]
    PayloadTooLarge(usize),
}

impl CodecError {
    /// Stable error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Identifier(err) => err.code(),
            _ => ErrorCode::CodecFailed,
        }
    }
}

/// Encode a message of the incoming role.
///
/// # Errors
///
/// [`CodecError::PayloadTooLarge`] for a payload over `u32::MAX` bytes.
pub fn encode_incoming(message: &IncomingMessage) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    match message {
        IncomingMessage::Advertisement { site } => {
            out.push(TAG_ADVERTISEMENT);
            put_u32(&mut out, site.get());
        }
        IncomingMessage::Ready => out.push(TAG_READY),
        IncomingMessage::Event {
            seqno,
            site,
            payload,
        } => {
            let len =
                u32::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge(payload.len()))?;
            out.reserve(13 + payload.len());
            out.push(TAG_EVENT);
            put_u32(&mut out, pack_seqno(Some(*seqno)));
            put_u32(&mut out, site.get());
            put_u32(&mut out, len);
            out.extend_from_slice(payload);
        }
        IncomingMessage::Done => out.push(TAG_INCOMING_DONE),
    }
    Ok(out)
}

/// Encode a message of the outgoing role.
#[must_use]
pub fn encode_outgoing(message: &OutgoingMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    match message {
        OutgoingMessage::Acknowledge { site, next } => {
            out.push(TAG_ACKNOWLEDGE);
            put_u32(&mut out, site.get());
            put_u32(&mut out, pack_seqno(Some(*next)));
        }
        OutgoingMessage::Request { site, count } => {
            out.push(TAG_REQUEST);
            put_u32(&mut out, site.get());
            put_u32(&mut out, *count);
        }
        OutgoingMessage::Done => out.push(TAG_OUTGOING_DONE),
    }
    out
}

/// Decode a message of the incoming role.
///
/// # Errors
///
/// [`CodecError`] for truncated frames, unknown tags, trailing bytes and
/// sentinel identifiers.
pub fn decode_incoming(frame: &[u8]) -> Result<IncomingMessage, CodecError> {
    let mut reader = Reader::new(frame);
    let message = match reader.tag()? {
        TAG_ADVERTISEMENT => IncomingMessage::Advertisement {
            site: reader.site()?,
        },
        TAG_READY => IncomingMessage::Ready,
        TAG_EVENT => {
            let raw_seqno = reader.u32()?;
            let raw_site = reader.u32()?;
            let id = EventIdentifier::from_raw(raw_seqno, raw_site)?;
            let len = reader.u32()? as usize;
            let payload = reader.bytes(len)?.to_vec();
            IncomingMessage::Event {
                seqno: id.seqno(),
                site: id.site(),
                payload,
            }
        }
        TAG_INCOMING_DONE => IncomingMessage::Done,
        other => return Err(CodecError::UnknownTag(other)),
    };
    reader.finish()?;
    Ok(message)
}

/// Decode a message of the outgoing role.
///
/// # Errors
///
/// As [`decode_incoming`].
pub fn decode_outgoing(frame: &[u8]) -> Result<OutgoingMessage, CodecError> {
    let mut reader = Reader::new(frame);
    let message = match reader.tag()? {
        TAG_ACKNOWLEDGE => OutgoingMessage::Acknowledge {
            site: reader.site()?,
            next: reader.seqno()?,
        },
        TAG_REQUEST => OutgoingMessage::Request {
            site: reader.site()?,
            count: reader.u32()?,
        },
        TAG_OUTGOING_DONE => OutgoingMessage::Done,
        other => return Err(CodecError::UnknownTag(other)),
    };
    reader.finish()?;
    Ok(message)
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

struct Reader<'a> {
    rest: &'a [u8],
}

impl<'a> Reader<'a> {
    const fn new(frame: &'a [u8]) -> Self {
        Self { rest: frame }
    }

    fn tag(&mut self) -> Result<u8, CodecError> {
        let (&tag, rest) = self.rest.split_first().ok_or(CodecError::Empty)?;
        self.rest = rest;
        Ok(tag)
    }

    fn bytes(&mut self, count: usize) -> Result<&'a [u8], CodecError> {
        if self.rest.len() < count {
            return Err(CodecError::Truncated {
                needed: count,
                available: self.rest.len(),
            });
        }
        let (head, rest) = self.rest.split_at(count);
        self.rest = rest;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let mut raw = [0; 4];
        raw.copy_from_slice(self.bytes(4)?);
        Ok(u32::from_be_bytes(raw))
    }

    fn site(&mut self) -> Result<SiteIdentifier, CodecError> {
        Ok(SiteIdentifier::try_from(self.u32()?)?)
    }

    fn seqno(&mut self) -> Result<SequenceNumber, CodecError> {
        crate::causal::unpack_seqno(self.u32()?)
            .ok_or(CodecError::Identifier(CausalError::UnspecifiedSequenceNumber))
    }

    fn finish(&self) -> Result<(), CodecError> {
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes(self.rest.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(n: u32) -> SequenceNumber {
        SequenceNumber::new(n).unwrap()
    }

    fn site(n: u32) -> SiteIdentifier {
        SiteIdentifier::new(n).unwrap()
    }

    #[test]
    fn event_layout_is_tag_then_big_endian_fields() {
        let frame = encode_incoming(&IncomingMessage::Event {
            seqno: seq(0),
            site: site(0x0102_0304),
            payload: b"hi".to_vec(),
        })
        .unwrap();
        assert_eq!(
            frame,
            vec![0x03, 0, 0, 0, 1, 1, 2, 3, 4, 0, 0, 0, 2, b'h', b'i']
        );
    }

    #[test]
    fn every_message_decodes_to_itself() {
        let incoming = [
            IncomingMessage::Advertisement { site: site(7) },
            IncomingMessage::Ready,
            IncomingMessage::Event {
                seqno: SequenceNumber::MAX,
                site: SiteIdentifier::MAX,
                payload: vec![0, 255, 1],
            },
            IncomingMessage::Done,
        ];
        for message in incoming {
            assert_eq!(decode_incoming(&encode_incoming(&message).unwrap()), Ok(message));
        }
        let outgoing = [
            OutgoingMessage::Acknowledge { site: site(1), next: seq(42) },
            OutgoingMessage::Request { site: site(1), count: 0 },
            OutgoingMessage::Done,
        ];
        for message in outgoing {
            assert_eq!(decode_outgoing(&encode_outgoing(&message)), Ok(message));
        }
    }

    #[test]
    fn sentinel_identifiers_are_rejected() {
        let zero_site = [TAG_ADVERTISEMENT, 0, 0, 0, 0];
        assert_eq!(
            decode_incoming(&zero_site),
            Err(CodecError::Identifier(CausalError::UnspecifiedSite))
        );
        let zero_seqno = [TAG_ACKNOWLEDGE, 0, 0, 0, 1, 0, 0, 0, 0];
        let err = decode_outgoing(&zero_seqno).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnspecifiedIdentifier);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert_eq!(decode_incoming(&[]), Err(CodecError::Empty));
        assert_eq!(decode_incoming(&[0x7f]), Err(CodecError::UnknownTag(0x7f)));
        assert_eq!(
            decode_incoming(&[TAG_READY, 0]),
            Err(CodecError::TrailingBytes(1))
        );
        assert_eq!(
            decode_incoming(&[TAG_EVENT, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 9, b'x']),
            Err(CodecError::Truncated { needed: 9, available: 1 })
        );
        // An outgoing tag is not an incoming message.
        assert_eq!(
            decode_incoming(&[TAG_OUTGOING_DONE]),
            Err(CodecError::UnknownTag(TAG_OUTGOING_DONE))
        );
    }
}
