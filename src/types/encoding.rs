//! Binary encoding primitives.
//!
//! All OPC UA binary encodings are little-endian. Strings and arrays are
//! length-prefixed by an `i32` where `-1` denotes null. Decoders check
//! [`DecodingLimits`] so a hostile peer cannot make us allocate unbounded
//! memory from a four-byte length prefix.

use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

use super::status::StatusCode;

/// Result of an encode or decode step. Failures carry the status code that
/// should be surfaced to the peer (`Bad_DecodingError` and friends).
pub type EncodingResult<T> = Result<T, StatusCode>;

/// Limits applied while decoding untrusted bytes.
#[derive(Debug, Clone)]
pub struct DecodingLimits {
    /// Maximum decoded string length in bytes.
    pub max_string_length: usize,
    /// Maximum decoded byte-string length.
    pub max_byte_string_length: usize,
    /// Maximum number of elements in a single array.
    pub max_array_length: usize,
}

impl Default for DecodingLimits {
    fn default() -> Self {
        Self {
            max_string_length: 65_536,
            max_byte_string_length: 1 << 20,
            max_array_length: 65_536,
        }
    }
}

/// A value that can be written to an OPC UA binary stream.
pub trait BinaryEncode {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()>;
}

/// A value that can be read from an OPC UA binary stream.
pub trait BinaryDecode: Sized {
    fn decode<B: Buf>(buf: &mut B, limits: &DecodingLimits) -> EncodingResult<Self>;
}

fn need<B: Buf>(buf: &B, n: usize) -> EncodingResult<()> {
    if buf.remaining() < n {
        Err(StatusCode::BAD_DECODING_ERROR)
    } else {
        Ok(())
    }
}

macro_rules! impl_prim {
    ($ty:ty, $put:ident, $get:ident, $size:expr) => {
        impl BinaryEncode for $ty {
            fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
                buf.$put(*self);
                Ok(())
            }
        }
        impl BinaryDecode for $ty {
            fn decode<B: Buf>(buf: &mut B, _limits: &DecodingLimits) -> EncodingResult<Self> {
                need(buf, $size)?;
                Ok(buf.$get())
            }
        }
    };
}

impl_prim!(u8, put_u8, get_u8, 1);
impl_prim!(i8, put_i8, get_i8, 1);
impl_prim!(u16, put_u16_le, get_u16_le, 2);
impl_prim!(i16, put_i16_le, get_i16_le, 2);
impl_prim!(u32, put_u32_le, get_u32_le, 4);
impl_prim!(i32, put_i32_le, get_i32_le, 4);
impl_prim!(u64, put_u64_le, get_u64_le, 8);
impl_prim!(i64, put_i64_le, get_i64_le, 8);
impl_prim!(f32, put_f32_le, get_f32_le, 4);
impl_prim!(f64, put_f64_le, get_f64_le, 8);

impl BinaryEncode for bool {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        buf.put_u8(u8::from(*self));
        Ok(())
    }
}

impl BinaryDecode for bool {
    fn decode<B: Buf>(buf: &mut B, _limits: &DecodingLimits) -> EncodingResult<Self> {
        need(buf, 1)?;
        Ok(buf.get_u8() != 0)
    }
}

impl BinaryEncode for StatusCode {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        buf.put_u32_le(self.0);
        Ok(())
    }
}

impl BinaryDecode for StatusCode {
    fn decode<B: Buf>(buf: &mut B, _limits: &DecodingLimits) -> EncodingResult<Self> {
        need(buf, 4)?;
        Ok(StatusCode(buf.get_u32_le()))
    }
}

// ============================================================================
// STRINGS
// ============================================================================

/// OPC UA strings are nullable; `None` encodes as length `-1`.
pub type UaString = Option<String>;

impl BinaryEncode for UaString {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        match self {
            None => buf.put_i32_le(-1),
            Some(s) => {
                let len = i32::try_from(s.len()).map_err(|_| StatusCode::BAD_ENCODING_ERROR)?;
                buf.put_i32_le(len);
                buf.put_slice(s.as_bytes());
            }
        }
        Ok(())
    }
}

impl BinaryDecode for UaString {
    fn decode<B: Buf>(buf: &mut B, limits: &DecodingLimits) -> EncodingResult<Self> {
        need(buf, 4)?;
        let len = buf.get_i32_le();
        if len < 0 {
            return Ok(None);
        }
        let len = len as usize;
        if len > limits.max_string_length {
            return Err(StatusCode::BAD_ENCODING_LIMITS_EXCEEDED);
        }
        need(buf, len)?;
        let mut bytes = vec![0u8; len];
        buf.copy_to_slice(&mut bytes);
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| StatusCode::BAD_DECODING_ERROR)
    }
}

impl BinaryEncode for String {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        let len = i32::try_from(self.len()).map_err(|_| StatusCode::BAD_ENCODING_ERROR)?;
        buf.put_i32_le(len);
        buf.put_slice(self.as_bytes());
        Ok(())
    }
}

impl BinaryDecode for String {
    fn decode<B: Buf>(buf: &mut B, limits: &DecodingLimits) -> EncodingResult<Self> {
        Ok(UaString::decode(buf, limits)?.unwrap_or_default())
    }
}

// ============================================================================
// BYTE STRINGS
// ============================================================================

/// Nullable byte string. Distinct from `String` on the wire only in that the
/// content need not be UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ByteString(pub Option<Vec<u8>>);

impl ByteString {
    pub fn null() -> Self {
        ByteString(None)
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        ByteString(Some(bytes.into()))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.0.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.0.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => write!(f, "<null>"),
            Some(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl BinaryEncode for ByteString {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        match &self.0 {
            None => buf.put_i32_le(-1),
            Some(b) => {
                let len = i32::try_from(b.len()).map_err(|_| StatusCode::BAD_ENCODING_ERROR)?;
                buf.put_i32_le(len);
                buf.put_slice(b);
            }
        }
        Ok(())
    }
}

impl BinaryDecode for ByteString {
    fn decode<B: Buf>(buf: &mut B, limits: &DecodingLimits) -> EncodingResult<Self> {
        need(buf, 4)?;
        let len = buf.get_i32_le();
        if len < 0 {
            return Ok(ByteString(None));
        }
        let len = len as usize;
        if len > limits.max_byte_string_length {
            return Err(StatusCode::BAD_ENCODING_LIMITS_EXCEEDED);
        }
        need(buf, len)?;
        let mut bytes = vec![0u8; len];
        buf.copy_to_slice(&mut bytes);
        Ok(ByteString(Some(bytes)))
    }
}

// ============================================================================
// ARRAYS
// ============================================================================

/// Write a nullable array: `i32` count then the elements.
pub fn write_array<T: BinaryEncode>(
    buf: &mut BytesMut,
    array: Option<&[T]>,
) -> EncodingResult<()> {
    match array {
        None => buf.put_i32_le(-1),
        Some(items) => {
            let len = i32::try_from(items.len()).map_err(|_| StatusCode::BAD_ENCODING_ERROR)?;
            buf.put_i32_le(len);
            for item in items {
                item.encode(buf)?;
            }
        }
    }
    Ok(())
}

/// Nullable arrays appear in nearly every service message; `None` encodes
/// as length `-1`.
impl<T: BinaryEncode> BinaryEncode for Option<Vec<T>> {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        write_array(buf, self.as_deref())
    }
}

impl<T: BinaryDecode> BinaryDecode for Option<Vec<T>> {
    fn decode<B: Buf>(buf: &mut B, limits: &DecodingLimits) -> EncodingResult<Self> {
        read_array(buf, limits)
    }
}

/// Read a nullable array written by [`write_array`].
pub fn read_array<T: BinaryDecode, B: Buf>(
    buf: &mut B,
    limits: &DecodingLimits,
) -> EncodingResult<Option<Vec<T>>> {
    need(buf, 4)?;
    let len = buf.get_i32_le();
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if len > limits.max_array_length {
        return Err(StatusCode::BAD_ENCODING_LIMITS_EXCEEDED);
    }
    let mut items = Vec::with_capacity(len.min(4096));
    for _ in 0..len {
        items.push(T::decode(buf, limits)?);
    }
    Ok(Some(items))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: BinaryEncode + BinaryDecode + PartialEq + fmt::Debug>(value: T) {
        let mut buf = BytesMut::new();
        value.encode(&mut buf).unwrap();
        let mut bytes = buf.freeze();
        let decoded = T::decode(&mut bytes, &DecodingLimits::default()).unwrap();
        assert_eq!(value, decoded);
        assert_eq!(bytes.remaining(), 0, "trailing bytes after decode");
    }

    #[test]
    fn primitives_round_trip() {
        round_trip(true);
        round_trip(0x1234_5678u32);
        round_trip(-1i64);
        round_trip(3.5f64);
        round_trip(StatusCode::BAD_TIMEOUT);
    }

    #[test]
    fn strings() {
        round_trip(Some("hello".to_string()));
        round_trip(None::<String>);
        round_trip(Some(String::new()));
        round_trip(ByteString::from_bytes(vec![0u8, 1, 255]));
        round_trip(ByteString::null());
    }

    #[test]
    fn null_string_is_minus_one() {
        let mut buf = BytesMut::new();
        None::<String>.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &(-1i32).to_le_bytes());
    }

    #[test]
    fn string_limit_enforced() {
        let mut buf = BytesMut::new();
        Some("abcdef".to_string()).encode(&mut buf).unwrap();
        let limits = DecodingLimits {
            max_string_length: 3,
            ..Default::default()
        };
        let err = UaString::decode(&mut buf.freeze(), &limits).unwrap_err();
        assert_eq!(err, StatusCode::BAD_ENCODING_LIMITS_EXCEEDED);
    }

    #[test]
    fn truncated_input_is_decoding_error() {
        let mut bytes = bytes::Bytes::from_static(&[0x05, 0x00, 0x00, 0x00, b'a']);
        let err = UaString::decode(&mut bytes, &DecodingLimits::default()).unwrap_err();
        assert_eq!(err, StatusCode::BAD_DECODING_ERROR);
    }
}
