//! The OPC UA variant type.
//!
//! A [`Variant`] holds any built-in scalar, a single- or multi-dimensional
//! array of one scalar type, or an extension object. The wire form is a
//! one-byte encoding mask (type id, array bit 0x80, dimensions bit 0x40)
//! followed by the value.

use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

use super::data_value::DataValue;
use super::date_time::DateTime;
use super::encoding::{
    read_array, write_array, BinaryDecode, BinaryEncode, ByteString, DecodingLimits,
    EncodingResult, UaString,
};
use super::extension_object::ExtensionObject;
use super::guid::Guid;
use super::node_id::{ExpandedNodeId, NodeId};
use super::qualified_name::{LocalizedText, QualifiedName};
use super::status::StatusCode;

const ARRAY_BIT: u8 = 0x80;
const DIMENSIONS_BIT: u8 = 0x40;

/// Built-in type ids as used in the variant encoding mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VariantType {
    Null = 0,
    Boolean = 1,
    SByte = 2,
    Byte = 3,
    Int16 = 4,
    UInt16 = 5,
    Int32 = 6,
    UInt32 = 7,
    Int64 = 8,
    UInt64 = 9,
    Float = 10,
    Double = 11,
    String = 12,
    DateTime = 13,
    Guid = 14,
    ByteString = 15,
    XmlElement = 16,
    NodeId = 17,
    ExpandedNodeId = 18,
    StatusCode = 19,
    QualifiedName = 20,
    LocalizedText = 21,
    ExtensionObject = 22,
    DataValue = 23,
    Variant = 24,
}

impl VariantType {
    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0 => Self::Null,
            1 => Self::Boolean,
            2 => Self::SByte,
            3 => Self::Byte,
            4 => Self::Int16,
            5 => Self::UInt16,
            6 => Self::Int32,
            7 => Self::UInt32,
            8 => Self::Int64,
            9 => Self::UInt64,
            10 => Self::Float,
            11 => Self::Double,
            12 => Self::String,
            13 => Self::DateTime,
            14 => Self::Guid,
            15 => Self::ByteString,
            16 => Self::XmlElement,
            17 => Self::NodeId,
            18 => Self::ExpandedNodeId,
            19 => Self::StatusCode,
            20 => Self::QualifiedName,
            21 => Self::LocalizedText,
            22 => Self::ExtensionObject,
            23 => Self::DataValue,
            24 => Self::Variant,
            _ => return None,
        })
    }

    /// The namespace-0 DataType node id for this built-in type.
    pub fn data_type_id(self) -> u32 {
        self as u32
    }
}

/// Any OPC UA value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    #[default]
    Empty,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(UaString),
    DateTime(DateTime),
    Guid(Guid),
    ByteString(ByteString),
    XmlElement(UaString),
    NodeId(NodeId),
    ExpandedNodeId(ExpandedNodeId),
    StatusCode(StatusCode),
    QualifiedName(QualifiedName),
    LocalizedText(LocalizedText),
    ExtensionObject(Box<ExtensionObject>),
    DataValue(Box<DataValue>),
    /// Array of one scalar type, optionally multi-dimensional.
    Array(Box<VariantArray>),
}

/// Array payload of a [`Variant`].
#[derive(Debug, Clone, PartialEq)]
pub struct VariantArray {
    pub value_type: VariantType,
    pub values: Vec<Variant>,
    /// Multi-dimensional shape; `None` for a plain single-dimension array.
    pub dimensions: Option<Vec<i32>>,
}

impl Variant {
    pub fn variant_type(&self) -> VariantType {
        match self {
            Variant::Empty => VariantType::Null,
            Variant::Boolean(_) => VariantType::Boolean,
            Variant::SByte(_) => VariantType::SByte,
            Variant::Byte(_) => VariantType::Byte,
            Variant::Int16(_) => VariantType::Int16,
            Variant::UInt16(_) => VariantType::UInt16,
            Variant::Int32(_) => VariantType::Int32,
            Variant::UInt32(_) => VariantType::UInt32,
            Variant::Int64(_) => VariantType::Int64,
            Variant::UInt64(_) => VariantType::UInt64,
            Variant::Float(_) => VariantType::Float,
            Variant::Double(_) => VariantType::Double,
            Variant::String(_) => VariantType::String,
            Variant::DateTime(_) => VariantType::DateTime,
            Variant::Guid(_) => VariantType::Guid,
            Variant::ByteString(_) => VariantType::ByteString,
            Variant::XmlElement(_) => VariantType::XmlElement,
            Variant::NodeId(_) => VariantType::NodeId,
            Variant::ExpandedNodeId(_) => VariantType::ExpandedNodeId,
            Variant::StatusCode(_) => VariantType::StatusCode,
            Variant::QualifiedName(_) => VariantType::QualifiedName,
            Variant::LocalizedText(_) => VariantType::LocalizedText,
            Variant::ExtensionObject(_) => VariantType::ExtensionObject,
            Variant::DataValue(_) => VariantType::DataValue,
            Variant::Array(a) => a.value_type,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Variant::Empty)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Variant::Array(_))
    }

    /// Numeric view for deadband evaluation; `None` for non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::SByte(v) => Some(f64::from(*v)),
            Variant::Byte(v) => Some(f64::from(*v)),
            Variant::Int16(v) => Some(f64::from(*v)),
            Variant::UInt16(v) => Some(f64::from(*v)),
            Variant::Int32(v) => Some(f64::from(*v)),
            Variant::UInt32(v) => Some(f64::from(*v)),
            Variant::Int64(v) => Some(*v as f64),
            Variant::UInt64(v) => Some(*v as f64),
            Variant::Float(v) => Some(f64::from(*v)),
            Variant::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Single-dimension array from homogeneous scalar values.
    pub fn array(value_type: VariantType, values: Vec<Variant>) -> Self {
        Variant::Array(Box::new(VariantArray {
            value_type,
            values,
            dimensions: None,
        }))
    }

    pub fn string_array(values: Vec<String>) -> Self {
        Self::array(
            VariantType::String,
            values.into_iter().map(|s| Variant::String(Some(s))).collect(),
        )
    }

    /// Write just the value portion, without the encoding mask.
    fn encode_value(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        match self {
            Variant::Empty => Ok(()),
            Variant::Boolean(v) => v.encode(buf),
            Variant::SByte(v) => v.encode(buf),
            Variant::Byte(v) => v.encode(buf),
            Variant::Int16(v) => v.encode(buf),
            Variant::UInt16(v) => v.encode(buf),
            Variant::Int32(v) => v.encode(buf),
            Variant::UInt32(v) => v.encode(buf),
            Variant::Int64(v) => v.encode(buf),
            Variant::UInt64(v) => v.encode(buf),
            Variant::Float(v) => v.encode(buf),
            Variant::Double(v) => v.encode(buf),
            Variant::String(v) => v.encode(buf),
            Variant::DateTime(v) => v.encode(buf),
            Variant::Guid(v) => v.encode(buf),
            Variant::ByteString(v) => v.encode(buf),
            Variant::XmlElement(v) => v.encode(buf),
            Variant::NodeId(v) => v.encode(buf),
            Variant::ExpandedNodeId(v) => v.encode(buf),
            Variant::StatusCode(v) => v.encode(buf),
            Variant::QualifiedName(v) => v.encode(buf),
            Variant::LocalizedText(v) => v.encode(buf),
            Variant::ExtensionObject(v) => v.encode(buf),
            Variant::DataValue(v) => v.encode(buf),
            Variant::Array(_) => Err(StatusCode::BAD_ENCODING_ERROR),
        }
    }

    fn decode_value<B: Buf>(
        value_type: VariantType,
        buf: &mut B,
        limits: &DecodingLimits,
    ) -> EncodingResult<Self> {
        Ok(match value_type {
            VariantType::Null => Variant::Empty,
            VariantType::Boolean => Variant::Boolean(bool::decode(buf, limits)?),
            VariantType::SByte => Variant::SByte(i8::decode(buf, limits)?),
            VariantType::Byte => Variant::Byte(u8::decode(buf, limits)?),
            VariantType::Int16 => Variant::Int16(i16::decode(buf, limits)?),
            VariantType::UInt16 => Variant::UInt16(u16::decode(buf, limits)?),
            VariantType::Int32 => Variant::Int32(i32::decode(buf, limits)?),
            VariantType::UInt32 => Variant::UInt32(u32::decode(buf, limits)?),
            VariantType::Int64 => Variant::Int64(i64::decode(buf, limits)?),
            VariantType::UInt64 => Variant::UInt64(u64::decode(buf, limits)?),
            VariantType::Float => Variant::Float(f32::decode(buf, limits)?),
            VariantType::Double => Variant::Double(f64::decode(buf, limits)?),
            VariantType::String => Variant::String(UaString::decode(buf, limits)?),
            VariantType::DateTime => Variant::DateTime(DateTime::decode(buf, limits)?),
            VariantType::Guid => Variant::Guid(Guid::decode(buf, limits)?),
            VariantType::ByteString => Variant::ByteString(ByteString::decode(buf, limits)?),
            VariantType::XmlElement => Variant::XmlElement(UaString::decode(buf, limits)?),
            VariantType::NodeId => Variant::NodeId(NodeId::decode(buf, limits)?),
            VariantType::ExpandedNodeId => {
                Variant::ExpandedNodeId(ExpandedNodeId::decode(buf, limits)?)
            }
            VariantType::StatusCode => Variant::StatusCode(StatusCode::decode(buf, limits)?),
            VariantType::QualifiedName => {
                Variant::QualifiedName(QualifiedName::decode(buf, limits)?)
            }
            VariantType::LocalizedText => {
                Variant::LocalizedText(LocalizedText::decode(buf, limits)?)
            }
            VariantType::ExtensionObject => {
                Variant::ExtensionObject(Box::new(ExtensionObject::decode(buf, limits)?))
            }
            VariantType::DataValue => Variant::DataValue(Box::new(DataValue::decode(buf, limits)?)),
            VariantType::Variant => return Err(StatusCode::BAD_DECODING_ERROR),
        })
    }
}

impl BinaryEncode for Variant {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        match self {
            Variant::Empty => {
                buf.put_u8(0);
                Ok(())
            }
            Variant::Array(array) => {
                let mut mask = array.value_type as u8 | ARRAY_BIT;
                if array.dimensions.is_some() {
                    mask |= DIMENSIONS_BIT;
                }
                buf.put_u8(mask);
                let len = i32::try_from(array.values.len())
                    .map_err(|_| StatusCode::BAD_ENCODING_ERROR)?;
                buf.put_i32_le(len);
                for value in &array.values {
                    if value.variant_type() != array.value_type {
                        return Err(StatusCode::BAD_ENCODING_ERROR);
                    }
                    value.encode_value(buf)?;
                }
                if let Some(dimensions) = &array.dimensions {
                    write_array(buf, Some(dimensions))?;
                }
                Ok(())
            }
            scalar => {
                buf.put_u8(scalar.variant_type() as u8);
                scalar.encode_value(buf)
            }
        }
    }
}

impl BinaryDecode for Variant {
    fn decode<B: Buf>(buf: &mut B, limits: &DecodingLimits) -> EncodingResult<Self> {
        if buf.remaining() < 1 {
            return Err(StatusCode::BAD_DECODING_ERROR);
        }
        let mask = buf.get_u8();
        let value_type =
            VariantType::from_id(mask & 0x3F).ok_or(StatusCode::BAD_DECODING_ERROR)?;
        if mask & ARRAY_BIT == 0 {
            if mask & DIMENSIONS_BIT != 0 {
                return Err(StatusCode::BAD_DECODING_ERROR);
            }
            return Self::decode_value(value_type, buf, limits);
        }

        if buf.remaining() < 4 {
            return Err(StatusCode::BAD_DECODING_ERROR);
        }
        let len = buf.get_i32_le();
        if len < 0 {
            return Ok(Variant::Array(Box::new(VariantArray {
                value_type,
                values: Vec::new(),
                dimensions: None,
            })));
        }
        let len = len as usize;
        if len > limits.max_array_length {
            return Err(StatusCode::BAD_ENCODING_LIMITS_EXCEEDED);
        }
        let mut values = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            values.push(Self::decode_value(value_type, buf, limits)?);
        }
        let dimensions = if mask & DIMENSIONS_BIT != 0 {
            let dims = read_array::<i32, _>(buf, limits)?;
            // The flat value count must match the dimension product.
            if let Some(dims) = &dims {
                let product: i64 = dims.iter().map(|d| i64::from(*d)).product();
                if product != len as i64 {
                    return Err(StatusCode::BAD_DECODING_ERROR);
                }
            }
            dims
        } else {
            None
        };
        Ok(Variant::Array(Box::new(VariantArray {
            value_type,
            values,
            dimensions,
        })))
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Empty => write!(f, "<empty>"),
            Variant::Boolean(v) => write!(f, "{v}"),
            Variant::Int32(v) => write!(f, "{v}"),
            Variant::UInt32(v) => write!(f, "{v}"),
            Variant::Double(v) => write!(f, "{v}"),
            Variant::String(v) => write!(f, "{:?}", v.as_deref().unwrap_or("<null>")),
            Variant::Array(a) => write!(f, "[{} x {:?}]", a.values.len(), a.value_type),
            other => write!(f, "{:?}", other.variant_type()),
        }
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Boolean(v)
    }
}

impl From<i8> for Variant {
    fn from(v: i8) -> Self {
        Variant::SByte(v)
    }
}

impl From<u8> for Variant {
    fn from(v: u8) -> Self {
        Variant::Byte(v)
    }
}

impl From<i16> for Variant {
    fn from(v: i16) -> Self {
        Variant::Int16(v)
    }
}

impl From<u16> for Variant {
    fn from(v: u16) -> Self {
        Variant::UInt16(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Variant::Int32(v)
    }
}

impl From<u32> for Variant {
    fn from(v: u32) -> Self {
        Variant::UInt32(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::Int64(v)
    }
}

impl From<u64> for Variant {
    fn from(v: u64) -> Self {
        Variant::UInt64(v)
    }
}

impl From<f32> for Variant {
    fn from(v: f32) -> Self {
        Variant::Float(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Double(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(Some(v.to_string()))
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(Some(v))
    }
}

impl From<DateTime> for Variant {
    fn from(v: DateTime) -> Self {
        Variant::DateTime(v)
    }
}

impl From<NodeId> for Variant {
    fn from(v: NodeId) -> Self {
        Variant::NodeId(v)
    }
}

impl From<StatusCode> for Variant {
    fn from(v: StatusCode) -> Self {
        Variant::StatusCode(v)
    }
}

impl From<LocalizedText> for Variant {
    fn from(v: LocalizedText) -> Self {
        Variant::LocalizedText(v)
    }
}
