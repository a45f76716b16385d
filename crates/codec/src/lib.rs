//! ## Wire codec for the identity-profile hosting protocol
//!
//! Every byte exchanged between a client, a peer node, or the directory
//! and this server goes through the same framing: a 5-byte header
//! followed by a tagged, length-prefixed body.
//!
//! ```text
//! +--------+------------------------+----------------------------+
//! | tag:u8 | body_len:u32 (LE)      | body (body_len bytes)      |
//! +--------+------------------------+----------------------------+
//! ```
//!
//! `tag` is currently always [`FRAME_TAG`]; it is kept as a distinct byte
//! (rather than folded into the body) so that a future framing revision
//! can be introduced without re-reading already-buffered bytes.

pub mod crypto;
pub mod message;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum body size accepted on the wire. A body length field larger than
/// this is a fatal framing error, not a validation error — the connection
/// is closed without a response.
pub const MAX_BODY_SIZE: u32 = 1_048_576;

/// The only framing tag currently defined.
pub const FRAME_TAG: u8 = 1;

/// Size in bytes of the frame header (tag + body length).
pub const HEADER_SIZE: usize = 5;

/// Reserved `msg_id` for an error response sent outside any request
/// context (a framing violation with no decoded request to answer).
pub const PROTOCOL_VIOLATION_MSG_ID: u32 = 0x0BADC0DE;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("frame body exceeds MAX_BODY_SIZE ({0} bytes)")]
    FrameTooLarge(u32),
    #[error("unknown frame tag {0}")]
    UnknownFrameTag(u8),
    #[error("malformed body: {0}")]
    ProtocolViolation(&'static str),
    #[error("unknown message tag {0}")]
    UnknownMessageTag(u8),
    #[error("unknown status tag {0}")]
    UnknownStatusTag(u8),
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    #[error("buffer underrun while decoding")]
    UnexpectedEof,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Try to pull one complete frame's body out of `buf`, advancing it past
/// the frame on success. Returns `Ok(None)` when more bytes are needed.
///
/// This is the function a connection's read loop calls after every socket
/// read; it never blocks and never allocates beyond what is needed to hold
/// the returned body.
pub fn try_decode_frame(buf: &mut BytesMut) -> Result<Option<Bytes>> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let tag = buf[0];
    if tag != FRAME_TAG {
        return Err(Error::UnknownFrameTag(tag));
    }

    let body_len = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
    if body_len > MAX_BODY_SIZE {
        return Err(Error::FrameTooLarge(body_len));
    }

    let frame_len = HEADER_SIZE + body_len as usize;
    if buf.len() < frame_len {
        buf.reserve(frame_len - buf.len());
        return Ok(None);
    }

    buf.advance(HEADER_SIZE);
    Ok(Some(buf.split_to(body_len as usize).freeze()))
}

/// Encode a body into a full frame (header + body), ready to be written to
/// the stream.
pub fn encode_frame(body: &[u8]) -> Result<BytesMut> {
    if body.len() as u64 > MAX_BODY_SIZE as u64 {
        return Err(Error::FrameTooLarge(body.len() as u32));
    }

    let mut out = BytesMut::with_capacity(HEADER_SIZE + body.len());
    out.put_u8(FRAME_TAG);
    out.put_u32_le(body.len() as u32);
    out.extend_from_slice(body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_frame() {
        let frame = encode_frame(b"hello").unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame);

        let body = try_decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&body[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_more_bytes() {
        let frame = encode_frame(b"hello").unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame[..frame.len() - 1]);

        assert!(try_decode_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_oversized_body() {
        let mut buf = BytesMut::new();
        buf.put_u8(FRAME_TAG);
        buf.put_u32_le(MAX_BODY_SIZE + 1);

        assert!(matches!(
            try_decode_frame(&mut buf),
            Err(Error::FrameTooLarge(_))
        ));
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut buf = BytesMut::new();
        buf.put_u8(0xFF);
        buf.put_u32_le(0);

        assert!(matches!(
            try_decode_frame(&mut buf),
            Err(Error::UnknownFrameTag(0xFF))
        ));
    }
}
