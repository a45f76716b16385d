//! Shared value types and the small hand-rolled binary encoding helpers
//! every request/response body is built from.
//!
//! The wire format intentionally avoids a generic serialization crate:
//! every field is length-prefixed exactly once, by the narrowest integer
//! that can hold its maximum size, mirroring how the teacher encodes STUN
//! attributes by hand rather than through `serde`.

use crate::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Byte limits for the variable-length fields carried on the wire. These
/// are wire-level caps (enforced while decoding, independent of whatever
/// the store additionally enforces for semantic validity).
pub mod limits {
    pub const NAME_MAX: usize = 64;
    pub const TYPE_MAX: usize = 64;
    pub const EXTRA_MAX: usize = 1024;
    pub const IMAGE_MAX: usize = 5 * 1024 * 1024;
    pub const SERVICE_NAME_MAX: usize = 64;
    pub const APPLICATION_ID_MAX: usize = 32;
    pub const DETAILS_MAX: usize = 256;
    pub const PING_PAYLOAD_MAX: usize = 256;
    pub const APP_MESSAGE_MAX: usize = 65_536;
    pub const SEARCH_REGEX_MAX: usize = 256;
}

pub fn read_u8(buf: &mut &[u8]) -> Result<u8> {
    if buf.is_empty() {
        return Err(Error::UnexpectedEof);
    }
    Ok(buf.get_u8())
}

pub fn read_u16(buf: &mut &[u8]) -> Result<u16> {
    if buf.len() < 2 {
        return Err(Error::UnexpectedEof);
    }
    Ok(buf.get_u16_le())
}

pub fn read_u32(buf: &mut &[u8]) -> Result<u32> {
    if buf.len() < 4 {
        return Err(Error::UnexpectedEof);
    }
    Ok(buf.get_u32_le())
}

pub fn read_u64(buf: &mut &[u8]) -> Result<u64> {
    if buf.len() < 8 {
        return Err(Error::UnexpectedEof);
    }
    Ok(buf.get_u64_le())
}

pub fn read_i32(buf: &mut &[u8]) -> Result<i32> {
    if buf.len() < 4 {
        return Err(Error::UnexpectedEof);
    }
    Ok(buf.get_i32_le())
}

pub fn read_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N]> {
    if buf.len() < N {
        return Err(Error::UnexpectedEof);
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[..N]);
    buf.advance(N);
    Ok(out)
}

/// Read a `u16`-length-prefixed UTF-8 string, rejecting anything over
/// `max_bytes`.
pub fn read_string(buf: &mut &[u8], max_bytes: usize) -> Result<String> {
    let len = read_u16(buf)? as usize;
    if len > max_bytes {
        return Err(Error::ProtocolViolation("string field exceeds its limit"));
    }
    if buf.len() < len {
        return Err(Error::UnexpectedEof);
    }
    let bytes = &buf[..len];
    buf.advance(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::InvalidUtf8)
}

/// Read a `u32`-length-prefixed opaque byte blob (images), rejecting
/// anything over `max_bytes`.
pub fn read_blob(buf: &mut &[u8], max_bytes: usize) -> Result<Vec<u8>> {
    let len = read_u32(buf)? as usize;
    if len > max_bytes {
        return Err(Error::ProtocolViolation("blob field exceeds its limit"));
    }
    if buf.len() < len {
        return Err(Error::UnexpectedEof);
    }
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    Ok(bytes)
}

pub fn write_string(out: &mut BytesMut, value: &str) {
    out.put_u16_le(value.len() as u16);
    out.extend_from_slice(value.as_bytes());
}

pub fn write_blob(out: &mut BytesMut, value: &[u8]) {
    out.put_u32_le(value.len() as u32);
    out.extend_from_slice(value);
}

/// Read an `Option<T>` encoded as a one-byte presence flag followed by
/// `T` when present.
pub fn read_option<T>(buf: &mut &[u8], read: impl FnOnce(&mut &[u8]) -> Result<T>) -> Result<Option<T>> {
    if read_u8(buf)? == 0 {
        Ok(None)
    } else {
        Ok(Some(read(buf)?))
    }
}

pub fn write_option<T>(out: &mut BytesMut, value: &Option<T>, write: impl FnOnce(&mut BytesMut, &T)) {
    match value {
        None => out.put_u8(0),
        Some(v) => {
            out.put_u8(1);
            write(out, v);
        }
    }
}

/// SHA-256(PublicKey) — the primary key of a hosted or neighbor identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityId(pub [u8; 32]);

impl IdentityId {
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self(crate::crypto::identity_id(&public_key.0))
    }
}

/// 32-byte Ed25519 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; 32]);

/// 64-byte Ed25519 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

/// SHA-256 identifier of a relationship card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CardId(pub [u8; 32]);

/// `major.minor.patch`. `ZERO` marks an uninitialized profile; `V1` is the
/// only version the store currently accepts for initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Version {
    pub const ZERO: Version = Version { major: 0, minor: 0, patch: 0 };
    pub const V1: Version = Version { major: 1, minor: 0, patch: 0 };

    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }
}

/// GPS location in micro-degrees. [`GpsLocation::NONE`] is a sentinel
/// value used before a profile's location is initialized; it lies outside
/// any valid latitude/longitude range so it can never be produced by a
/// real reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpsLocation {
    pub lat_micro: i32,
    pub lon_micro: i32,
}

impl GpsLocation {
    pub const NONE: GpsLocation = GpsLocation { lat_micro: i32::MIN, lon_micro: i32::MIN };

    pub fn is_set(self) -> bool {
        self != Self::NONE
    }

    pub fn latitude(self) -> f64 {
        self.lat_micro as f64 / 1_000_000.0
    }

    pub fn longitude(self) -> f64 {
        self.lon_micro as f64 / 1_000_000.0
    }

    pub fn from_degrees(lat: f64, lon: f64) -> Self {
        Self {
            lat_micro: (lat * 1_000_000.0).round() as i32,
            lon_micro: (lon * 1_000_000.0).round() as i32,
        }
    }
}

pub(crate) fn write_id32(out: &mut BytesMut, id: &[u8; 32]) {
    out.extend_from_slice(id);
}

pub(crate) fn write_version(out: &mut BytesMut, v: Version) {
    out.put_u8(v.major);
    out.put_u8(v.minor);
    out.put_u8(v.patch);
}

pub(crate) fn read_version(buf: &mut &[u8]) -> Result<Version> {
    Ok(Version {
        major: read_u8(buf)?,
        minor: read_u8(buf)?,
        patch: read_u8(buf)?,
    })
}

pub(crate) fn write_location(out: &mut BytesMut, loc: GpsLocation) {
    out.put_i32_le(loc.lat_micro);
    out.put_i32_le(loc.lon_micro);
}

pub(crate) fn read_location(buf: &mut &[u8]) -> Result<GpsLocation> {
    Ok(GpsLocation {
        lat_micro: read_i32(buf)?,
        lon_micro: read_i32(buf)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_location_is_outside_valid_range() {
        assert!(GpsLocation::NONE.latitude() < -90.0 || GpsLocation::NONE.latitude() > 90.0);
    }

    #[test]
    fn location_round_trips_through_micro_degrees() {
        let loc = GpsLocation::from_degrees(50.0, 14.4);
        assert!((loc.latitude() - 50.0).abs() < 1e-6);
        assert!((loc.longitude() - 14.4).abs() < 1e-6);
    }

    #[test]
    fn string_round_trips() {
        let mut out = BytesMut::new();
        write_string(&mut out, "Alice");

        let mut slice = &out[..];
        assert_eq!(read_string(&mut slice, limits::NAME_MAX).unwrap(), "Alice");
    }

    #[test]
    fn string_over_limit_is_rejected() {
        let mut out = BytesMut::new();
        write_string(&mut out, &"x".repeat(100));

        let mut slice = &out[..];
        assert!(read_string(&mut slice, 10).is_err());
    }
}
