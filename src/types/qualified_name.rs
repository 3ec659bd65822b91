//! Browse names and display texts.

use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

use super::encoding::{BinaryDecode, BinaryEncode, DecodingLimits, EncodingResult, UaString};
use super::status::StatusCode;

/// A name qualified by a namespace index. Comparison is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QualifiedName {
    pub namespace_index: u16,
    pub name: UaString,
}

impl QualifiedName {
    pub fn new(namespace_index: u16, name: impl Into<String>) -> Self {
        Self {
            namespace_index,
            name: Some(name.into()),
        }
    }

    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.name.is_none()
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.namespace_index,
            self.name.as_deref().unwrap_or("")
        )
    }
}

impl BinaryEncode for QualifiedName {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        buf.put_u16_le(self.namespace_index);
        self.name.encode(buf)
    }
}

impl BinaryDecode for QualifiedName {
    fn decode<B: Buf>(buf: &mut B, limits: &DecodingLimits) -> EncodingResult<Self> {
        if buf.remaining() < 2 {
            return Err(StatusCode::BAD_DECODING_ERROR);
        }
        let namespace_index = buf.get_u16_le();
        let name = UaString::decode(buf, limits)?;
        Ok(Self {
            namespace_index,
            name,
        })
    }
}

const HAS_LOCALE: u8 = 0x01;
const HAS_TEXT: u8 = 0x02;

/// Human-readable text with an optional locale id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LocalizedText {
    pub locale: UaString,
    pub text: UaString,
}

impl LocalizedText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            locale: None,
            text: Some(text.into()),
        }
    }
}

impl fmt::Display for LocalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text.as_deref().unwrap_or(""))
    }
}

impl BinaryEncode for LocalizedText {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        let mut mask = 0u8;
        if self.locale.is_some() {
            mask |= HAS_LOCALE;
        }
        if self.text.is_some() {
            mask |= HAS_TEXT;
        }
        buf.put_u8(mask);
        if self.locale.is_some() {
            self.locale.encode(buf)?;
        }
        if self.text.is_some() {
            self.text.encode(buf)?;
        }
        Ok(())
    }
}

impl BinaryDecode for LocalizedText {
    fn decode<B: Buf>(buf: &mut B, limits: &DecodingLimits) -> EncodingResult<Self> {
        if buf.remaining() < 1 {
            return Err(StatusCode::BAD_DECODING_ERROR);
        }
        let mask = buf.get_u8();
        let locale = if mask & HAS_LOCALE != 0 {
            UaString::decode(buf, limits)?
        } else {
            None
        };
        let text = if mask & HAS_TEXT != 0 {
            UaString::decode(buf, limits)?
        } else {
            None
        };
        Ok(Self { locale, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_round_trip() {
        let qn = QualifiedName::new(2, "Temperature");
        let mut buf = BytesMut::new();
        qn.encode(&mut buf).unwrap();
        let decoded = QualifiedName::decode(&mut buf.freeze(), &DecodingLimits::default()).unwrap();
        assert_eq!(qn, decoded);
    }

    #[test]
    fn qualified_name_is_case_sensitive() {
        assert_ne!(QualifiedName::new(0, "Server"), QualifiedName::new(0, "server"));
    }

    #[test]
    fn localized_text_mask() {
        let lt = LocalizedText::new("Boiler");
        let mut buf = BytesMut::new();
        lt.encode(&mut buf).unwrap();
        assert_eq!(buf[0], HAS_TEXT);
        let decoded = LocalizedText::decode(&mut buf.freeze(), &DecodingLimits::default()).unwrap();
        assert_eq!(lt, decoded);

        let empty = LocalizedText::default();
        let mut buf = BytesMut::new();
        empty.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0u8]);
    }
}
