//! Attribute values with quality and timestamps.

use bytes::{Buf, BufMut, BytesMut};

use super::date_time::DateTime;
use super::encoding::{BinaryDecode, BinaryEncode, DecodingLimits, EncodingResult, UaString};
use super::status::StatusCode;
use super::variant::Variant;

const HAS_VALUE: u8 = 0x01;
const HAS_STATUS: u8 = 0x02;
const HAS_SOURCE_TIMESTAMP: u8 = 0x04;
const HAS_SERVER_TIMESTAMP: u8 = 0x08;
const HAS_SOURCE_PICOSECONDS: u8 = 0x10;
const HAS_SERVER_PICOSECONDS: u8 = 0x20;

/// A value read from or written to a node attribute.
///
/// A value with a non-good status may carry an empty variant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    pub value: Variant,
    pub status: StatusCode,
    pub source_timestamp: Option<DateTime>,
    pub source_picoseconds: Option<u16>,
    pub server_timestamp: Option<DateTime>,
    pub server_picoseconds: Option<u16>,
}

impl DataValue {
    /// A good value stamped with the given source time.
    pub fn new(value: impl Into<Variant>, source_timestamp: DateTime) -> Self {
        Self {
            value: value.into(),
            status: StatusCode::GOOD,
            source_timestamp: Some(source_timestamp),
            source_picoseconds: None,
            server_timestamp: None,
            server_picoseconds: None,
        }
    }

    /// A valueless placeholder carrying only a bad status.
    pub fn bad(status: StatusCode) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn is_good(&self) -> bool {
        self.status.is_good()
    }
}

impl BinaryEncode for DataValue {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        let mut mask = 0u8;
        if !self.value.is_empty() {
            mask |= HAS_VALUE;
        }
        if self.status != StatusCode::GOOD {
            mask |= HAS_STATUS;
        }
        if self.source_timestamp.is_some() {
            mask |= HAS_SOURCE_TIMESTAMP;
        }
        if self.source_picoseconds.is_some() {
            mask |= HAS_SOURCE_PICOSECONDS;
        }
        if self.server_timestamp.is_some() {
            mask |= HAS_SERVER_TIMESTAMP;
        }
        if self.server_picoseconds.is_some() {
            mask |= HAS_SERVER_PICOSECONDS;
        }
        buf.put_u8(mask);
        if mask & HAS_VALUE != 0 {
            self.value.encode(buf)?;
        }
        if mask & HAS_STATUS != 0 {
            self.status.encode(buf)?;
        }
        if let Some(ts) = self.source_timestamp {
            ts.encode(buf)?;
        }
        if let Some(ps) = self.source_picoseconds {
            buf.put_u16_le(ps);
        }
        if let Some(ts) = self.server_timestamp {
            ts.encode(buf)?;
        }
        if let Some(ps) = self.server_picoseconds {
            buf.put_u16_le(ps);
        }
        Ok(())
    }
}

impl BinaryDecode for DataValue {
    fn decode<B: Buf>(buf: &mut B, limits: &DecodingLimits) -> EncodingResult<Self> {
        if buf.remaining() < 1 {
            return Err(StatusCode::BAD_DECODING_ERROR);
        }
        let mask = buf.get_u8();
        let value = if mask & HAS_VALUE != 0 {
            Variant::decode(buf, limits)?
        } else {
            Variant::Empty
        };
        let status = if mask & HAS_STATUS != 0 {
            StatusCode::decode(buf, limits)?
        } else {
            StatusCode::GOOD
        };
        let source_timestamp = if mask & HAS_SOURCE_TIMESTAMP != 0 {
            Some(DateTime::decode(buf, limits)?)
        } else {
            None
        };
        let source_picoseconds = if mask & HAS_SOURCE_PICOSECONDS != 0 {
            Some(u16::decode(buf, limits)?)
        } else {
            None
        };
        let server_timestamp = if mask & HAS_SERVER_TIMESTAMP != 0 {
            Some(DateTime::decode(buf, limits)?)
        } else {
            None
        };
        let server_picoseconds = if mask & HAS_SERVER_PICOSECONDS != 0 {
            Some(u16::decode(buf, limits)?)
        } else {
            None
        };
        Ok(Self {
            value,
            status,
            source_timestamp,
            source_picoseconds,
            server_timestamp,
            server_picoseconds,
        })
    }
}

// ============================================================================
// DIAGNOSTIC INFO
// ============================================================================

const DI_HAS_SYMBOLIC_ID: u8 = 0x01;
const DI_HAS_NAMESPACE: u8 = 0x02;
const DI_HAS_LOCALIZED_TEXT: u8 = 0x04;
const DI_HAS_LOCALE: u8 = 0x08;
const DI_HAS_ADDITIONAL_INFO: u8 = 0x10;
const DI_HAS_INNER_STATUS: u8 = 0x20;
const DI_HAS_INNER_DIAGNOSTIC: u8 = 0x40;

/// Vendor diagnostics attached to a response. The engine emits empty
/// diagnostic infos; the full wire form is still decoded for symmetry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiagnosticInfo {
    pub symbolic_id: Option<i32>,
    pub namespace_uri: Option<i32>,
    pub localized_text: Option<i32>,
    pub locale: Option<i32>,
    pub additional_info: UaString,
    pub inner_status_code: Option<StatusCode>,
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

impl BinaryEncode for DiagnosticInfo {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        let mut mask = 0u8;
        if self.symbolic_id.is_some() {
            mask |= DI_HAS_SYMBOLIC_ID;
        }
        if self.namespace_uri.is_some() {
            mask |= DI_HAS_NAMESPACE;
        }
        if self.localized_text.is_some() {
            mask |= DI_HAS_LOCALIZED_TEXT;
        }
        if self.locale.is_some() {
            mask |= DI_HAS_LOCALE;
        }
        if self.additional_info.is_some() {
            mask |= DI_HAS_ADDITIONAL_INFO;
        }
        if self.inner_status_code.is_some() {
            mask |= DI_HAS_INNER_STATUS;
        }
        if self.inner_diagnostic_info.is_some() {
            mask |= DI_HAS_INNER_DIAGNOSTIC;
        }
        buf.put_u8(mask);
        if let Some(v) = self.symbolic_id {
            buf.put_i32_le(v);
        }
        if let Some(v) = self.namespace_uri {
            buf.put_i32_le(v);
        }
        if let Some(v) = self.locale {
            buf.put_i32_le(v);
        }
        if let Some(v) = self.localized_text {
            buf.put_i32_le(v);
        }
        if mask & DI_HAS_ADDITIONAL_INFO != 0 {
            self.additional_info.encode(buf)?;
        }
        if let Some(v) = self.inner_status_code {
            v.encode(buf)?;
        }
        if let Some(v) = &self.inner_diagnostic_info {
            v.encode(buf)?;
        }
        Ok(())
    }
}

impl BinaryDecode for DiagnosticInfo {
    fn decode<B: Buf>(buf: &mut B, limits: &DecodingLimits) -> EncodingResult<Self> {
        if buf.remaining() < 1 {
            return Err(StatusCode::BAD_DECODING_ERROR);
        }
        let mask = buf.get_u8();
        let mut info = DiagnosticInfo::default();
        if mask & DI_HAS_SYMBOLIC_ID != 0 {
            info.symbolic_id = Some(i32::decode(buf, limits)?);
        }
        if mask & DI_HAS_NAMESPACE != 0 {
            info.namespace_uri = Some(i32::decode(buf, limits)?);
        }
        if mask & DI_HAS_LOCALE != 0 {
            info.locale = Some(i32::decode(buf, limits)?);
        }
        if mask & DI_HAS_LOCALIZED_TEXT != 0 {
            info.localized_text = Some(i32::decode(buf, limits)?);
        }
        if mask & DI_HAS_ADDITIONAL_INFO != 0 {
            info.additional_info = UaString::decode(buf, limits)?;
        }
        if mask & DI_HAS_INNER_STATUS != 0 {
            info.inner_status_code = Some(StatusCode::decode(buf, limits)?);
        }
        if mask & DI_HAS_INNER_DIAGNOSTIC != 0 {
            info.inner_diagnostic_info = Some(Box::new(DiagnosticInfo::decode(buf, limits)?));
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_value_round_trip() {
        let dv = DataValue {
            value: Variant::Double(21.5),
            status: StatusCode::GOOD_CLAMPED,
            source_timestamp: Some(DateTime::now()),
            source_picoseconds: Some(10),
            server_timestamp: Some(DateTime::now()),
            server_picoseconds: None,
        };
        let mut buf = BytesMut::new();
        dv.encode(&mut buf).unwrap();
        let decoded = DataValue::decode(&mut buf.freeze(), &DecodingLimits::default()).unwrap();
        assert_eq!(dv, decoded);
    }

    #[test]
    fn bad_status_with_empty_value() {
        let dv = DataValue::bad(StatusCode::BAD_NODE_ID_UNKNOWN);
        let mut buf = BytesMut::new();
        dv.encode(&mut buf).unwrap();
        // Only the mask byte and the status code.
        assert_eq!(buf.len(), 5);
        let decoded = DataValue::decode(&mut buf.freeze(), &DecodingLimits::default()).unwrap();
        assert_eq!(dv, decoded);
        assert!(decoded.value.is_empty());
    }

    #[test]
    fn empty_diagnostic_info_is_one_byte() {
        let mut buf = BytesMut::new();
        DiagnosticInfo::default().encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0u8]);
    }
}
