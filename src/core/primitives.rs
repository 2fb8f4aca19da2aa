//! # Primitive Codec
//!
//! Little-endian encoding of the OPC UA binary built-in types used by UACP.
//!
//! ## Wire Format
//! ```text
//! UInt32      [b0 b1 b2 b3]                  little-endian
//! UInt64      [b0 .. b7]                     little-endian
//! String      [Length(i32 LE)] [UTF-8 bytes] -1 = null, 0 = empty
//! ByteString  [Length(i32 LE)] [bytes]       same prefix convention
//! ```
//!
//! Decoders read from any [`bytes::Buf`] and never consume past what they
//! validate: a short buffer yields [`ProtocolError::TruncatedInput`], a negative
//! prefix other than `-1` yields [`ProtocolError::InvalidLength`].

use crate::error::{ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes};
use std::fmt;

/// Length prefix marking a null string or byte string.
pub const NULL_LENGTH: i32 = -1;

/// Size of a length prefix on the wire.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Longest string or byte string an `i32` length prefix can describe.
pub const MAX_PREFIXED_LENGTH: usize = i32::MAX as usize;

/// Fail with `MessageTooLarge` if `len` does not fit a length prefix.
pub fn check_prefixed_len(len: usize) -> Result<()> {
    if len > MAX_PREFIXED_LENGTH {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_PREFIXED_LENGTH,
        });
    }
    Ok(())
}

/// Types with a fixed OPC UA binary representation.
pub trait Encode {
    /// Number of bytes [`Encode::encode`] will write.
    fn encoded_len(&self) -> usize;

    /// Append the binary representation to `buf`.
    fn encode<B: BufMut>(&self, buf: &mut B);
}

/// Types that can be read back from their OPC UA binary representation.
pub trait Decode: Sized {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self>;
}

#[inline]
fn ensure_remaining<B: Buf>(buf: &B, needed: usize) -> Result<()> {
    let available = buf.remaining();
    if available < needed {
        return Err(ProtocolError::TruncatedInput { needed, available });
    }
    Ok(())
}

#[inline]
pub fn encode_u32<B: BufMut>(buf: &mut B, value: u32) {
    buf.put_u32_le(value);
}

#[inline]
pub fn decode_u32<B: Buf>(buf: &mut B) -> Result<u32> {
    ensure_remaining(buf, 4)?;
    Ok(buf.get_u32_le())
}

#[inline]
pub fn encode_i32<B: BufMut>(buf: &mut B, value: i32) {
    buf.put_i32_le(value);
}

#[inline]
pub fn decode_i32<B: Buf>(buf: &mut B) -> Result<i32> {
    ensure_remaining(buf, 4)?;
    Ok(buf.get_i32_le())
}

#[inline]
pub fn encode_u64<B: BufMut>(buf: &mut B, value: u64) {
    buf.put_u64_le(value);
}

#[inline]
pub fn decode_u64<B: Buf>(buf: &mut B) -> Result<u64> {
    ensure_remaining(buf, 8)?;
    Ok(buf.get_u64_le())
}

/// Write a length prefix followed by the raw bytes, or `-1` for `None`.
///
/// Values longer than [`MAX_PREFIXED_LENGTH`] cannot be represented on the
/// wire; callers check with [`check_prefixed_len`] first.
pub fn encode_bytes<B: BufMut>(buf: &mut B, value: Option<&[u8]>) {
    match value {
        None => buf.put_i32_le(NULL_LENGTH),
        Some(bytes) => {
            buf.put_i32_le(bytes.len() as i32);
            buf.put_slice(bytes);
        }
    }
}

/// Read a length prefix and the bytes it declares. `None` is the null value.
pub fn decode_bytes<B: Buf>(buf: &mut B) -> Result<Option<Bytes>> {
    let length = decode_i32(buf)?;
    if length == NULL_LENGTH {
        return Ok(None);
    }
    if length < 0 {
        return Err(ProtocolError::InvalidLength(length));
    }
    let length = length as usize;
    ensure_remaining(buf, length)?;
    Ok(Some(buf.copy_to_bytes(length)))
}

pub fn encode_string<B: BufMut>(buf: &mut B, value: Option<&str>) {
    encode_bytes(buf, value.map(str::as_bytes));
}

pub fn decode_string<B: Buf>(buf: &mut B) -> Result<Option<String>> {
    match decode_bytes(buf)? {
        None => Ok(None),
        Some(bytes) => String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|_| ProtocolError::InvalidString),
    }
}

impl Encode for u32 {
    fn encoded_len(&self) -> usize {
        4
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        encode_u32(buf, *self);
    }
}

impl Decode for u32 {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        decode_u32(buf)
    }
}

impl Encode for u64 {
    fn encoded_len(&self) -> usize {
        8
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        encode_u64(buf, *self);
    }
}

impl Decode for u64 {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        decode_u64(buf)
    }
}

/// An OPC UA `String`: UTF-8 text that may be null.
///
/// The null string and the empty string are different values and encode to
/// different length prefixes (`-1` and `0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct UaString(Option<String>);

impl UaString {
    /// The null string.
    pub const fn null() -> Self {
        UaString(None)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// True for both the null and the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.as_deref().map_or(true, str::is_empty)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn into_inner(self) -> Option<String> {
        self.0
    }
}

impl From<&str> for UaString {
    fn from(value: &str) -> Self {
        UaString(Some(value.to_string()))
    }
}

impl From<String> for UaString {
    fn from(value: String) -> Self {
        UaString(Some(value))
    }
}

impl From<Option<String>> for UaString {
    fn from(value: Option<String>) -> Self {
        UaString(value)
    }
}

impl fmt::Display for UaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str().unwrap_or_default())
    }
}

impl UaString {
    /// Byte length of the value, 0 for null.
    pub fn len(&self) -> usize {
        self.0.as_ref().map_or(0, String::len)
    }
}

impl Encode for UaString {
    fn encoded_len(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        encode_string(buf, self.as_str());
    }
}

impl Decode for UaString {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        decode_string(buf).map(UaString)
    }
}

/// An OPC UA `ByteString`: opaque bytes that may be null.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ByteString(Option<Bytes>);

impl ByteString {
    pub const fn null() -> Self {
        ByteString(None)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.0.as_deref()
    }
}

impl From<&[u8]> for ByteString {
    fn from(value: &[u8]) -> Self {
        ByteString(Some(Bytes::copy_from_slice(value)))
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(value: Vec<u8>) -> Self {
        ByteString(Some(Bytes::from(value)))
    }
}

impl From<Bytes> for ByteString {
    fn from(value: Bytes) -> Self {
        ByteString(Some(value))
    }
}

impl Encode for ByteString {
    fn encoded_len(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.0.as_ref().map_or(0, Bytes::len)
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        encode_bytes(buf, self.as_bytes());
    }
}

impl Decode for ByteString {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        decode_bytes(buf).map(ByteString)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_prefixed_length_bound() {
        assert!(check_prefixed_len(0).is_ok());
        assert!(check_prefixed_len(MAX_PREFIXED_LENGTH).is_ok());
        assert!(matches!(
            check_prefixed_len(MAX_PREFIXED_LENGTH + 1),
            Err(ProtocolError::MessageTooLarge { max, .. }) if max == MAX_PREFIXED_LENGTH
        ));
    }

    #[test]
    fn test_u32_little_endian() {
        let mut buf = BytesMut::new();
        encode_u32(&mut buf, 65280);
        assert_eq!(&buf[..], &[0x00, 0xff, 0x00, 0x00]);

        let mut input = &buf[..];
        assert_eq!(decode_u32(&mut input).unwrap(), 65280);
        assert!(input.is_empty());
    }

    #[test]
    fn test_u32_truncated() {
        let mut input: &[u8] = &[0x01, 0x02, 0x03];
        match decode_u32(&mut input) {
            Err(ProtocolError::TruncatedInput {
                needed: 4,
                available: 3,
            }) => {}
            other => panic!("unexpected: {other:?}"),
        }
        // nothing consumed
        assert_eq!(input.len(), 3);
    }

    #[test]
    fn test_null_and_empty_string_are_distinct() {
        let mut null = BytesMut::new();
        UaString::null().encode(&mut null);
        assert_eq!(&null[..], &[0xff, 0xff, 0xff, 0xff]);

        let mut empty = BytesMut::new();
        UaString::from("").encode(&mut empty);
        assert_eq!(&empty[..], &[0x00, 0x00, 0x00, 0x00]);

        let decoded_null = UaString::decode(&mut &null[..]).unwrap();
        let decoded_empty = UaString::decode(&mut &empty[..]).unwrap();
        assert!(decoded_null.is_null());
        assert!(!decoded_empty.is_null());
        assert_ne!(decoded_null, decoded_empty);
    }

    #[test]
    fn test_string_payload() {
        let mut buf = BytesMut::new();
        encode_string(&mut buf, Some("foobar"));
        assert_eq!(
            &buf[..],
            &[0x06, 0x00, 0x00, 0x00, 0x66, 0x6f, 0x6f, 0x62, 0x61, 0x72]
        );
        assert_eq!(
            decode_string(&mut &buf[..]).unwrap().as_deref(),
            Some("foobar")
        );
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut input: &[u8] = &[0xfe, 0xff, 0xff, 0xff];
        assert!(matches!(
            decode_bytes(&mut input),
            Err(ProtocolError::InvalidLength(-2))
        ));
    }

    #[test]
    fn test_length_longer_than_input() {
        let mut input: &[u8] = &[0x05, 0x00, 0x00, 0x00, b'a', b'b'];
        assert!(matches!(
            decode_string(&mut input),
            Err(ProtocolError::TruncatedInput {
                needed: 5,
                available: 2
            })
        ));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut input: &[u8] = &[0x02, 0x00, 0x00, 0x00, 0xc3, 0x28];
        assert!(matches!(
            decode_string(&mut input),
            Err(ProtocolError::InvalidString)
        ));
    }

    #[test]
    fn test_byte_string_null() {
        let mut buf = BytesMut::new();
        ByteString::null().encode(&mut buf);
        assert_eq!(ByteString::null().encoded_len(), 4);
        assert!(ByteString::decode(&mut &buf[..]).unwrap().is_null());
    }
}
