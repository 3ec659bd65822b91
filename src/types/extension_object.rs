//! Extension objects and the runtime type registry.
//!
//! An [`ExtensionObject`] carries a structured value keyed by its binary
//! encoding node id. When the decoder does not know the type, the body is
//! kept as opaque bytes and re-encodes bit-exactly. Types learned at
//! runtime (from DataTypeDefinition attributes or schema files) register a
//! [`TypeFactory`] so their bodies can be lifted into [`DynamicStruct`]
//! values and lowered back.

use bytes::{Buf, BufMut, BytesMut};
use std::collections::HashMap;
use std::sync::Arc;

use super::encoding::{
    BinaryDecode, BinaryEncode, ByteString, DecodingLimits, EncodingResult, UaString,
};
use super::node_id::NodeId;
use super::status::StatusCode;
use super::variant::{Variant, VariantType};

const BODY_NONE: u8 = 0x00;
const BODY_BYTE_STRING: u8 = 0x01;
const BODY_XML: u8 = 0x02;

/// Body of an [`ExtensionObject`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ExtensionObjectBody {
    #[default]
    None,
    /// Binary-encoded body, length-prefixed on the wire.
    ByteString(ByteString),
    /// XML-encoded body. Carried opaquely; this stack never interprets XML.
    Xml(UaString),
}

/// A type-tagged opaque value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtensionObject {
    pub type_id: NodeId,
    pub body: ExtensionObjectBody,
}

impl ExtensionObject {
    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.type_id.is_null() && matches!(self.body, ExtensionObjectBody::None)
    }

    /// Build from a value that knows its own binary encoding.
    pub fn from_encodable(type_id: NodeId, value: &impl BinaryEncode) -> EncodingResult<Self> {
        let mut buf = BytesMut::new();
        value.encode(&mut buf)?;
        Ok(Self {
            type_id,
            body: ExtensionObjectBody::ByteString(ByteString::from_bytes(buf.to_vec())),
        })
    }

    /// Decode the binary body as `T`. Fails when the body is absent or XML.
    pub fn decode_body<T: BinaryDecode>(&self, limits: &DecodingLimits) -> EncodingResult<T> {
        match &self.body {
            ExtensionObjectBody::ByteString(bytes) => {
                let mut cursor = bytes.as_slice();
                T::decode(&mut cursor, limits)
            }
            _ => Err(StatusCode::BAD_DECODING_ERROR),
        }
    }
}

impl BinaryEncode for ExtensionObject {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        self.type_id.encode(buf)?;
        match &self.body {
            ExtensionObjectBody::None => buf.put_u8(BODY_NONE),
            ExtensionObjectBody::ByteString(bytes) => {
                buf.put_u8(BODY_BYTE_STRING);
                bytes.encode(buf)?;
            }
            ExtensionObjectBody::Xml(xml) => {
                buf.put_u8(BODY_XML);
                xml.encode(buf)?;
            }
        }
        Ok(())
    }
}

impl BinaryDecode for ExtensionObject {
    fn decode<B: Buf>(buf: &mut B, limits: &DecodingLimits) -> EncodingResult<Self> {
        let type_id = NodeId::decode(buf, limits)?;
        if buf.remaining() < 1 {
            return Err(StatusCode::BAD_DECODING_ERROR);
        }
        let body = match buf.get_u8() {
            BODY_NONE => ExtensionObjectBody::None,
            BODY_BYTE_STRING => ExtensionObjectBody::ByteString(ByteString::decode(buf, limits)?),
            BODY_XML => ExtensionObjectBody::Xml(UaString::decode(buf, limits)?),
            _ => return Err(StatusCode::BAD_DECODING_ERROR),
        };
        Ok(Self { type_id, body })
    }
}

// ============================================================================
// DYNAMIC TYPES
// ============================================================================

/// In-memory representation of a structure whose schema was learned at
/// runtime: ordered `(field name, value)` pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicStruct {
    pub type_id: NodeId,
    pub fields: Vec<(String, Variant)>,
}

impl DynamicStruct {
    pub fn field(&self, name: &str) -> Option<&Variant> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Encoder/decoder for one runtime-registered structured type.
pub trait TypeFactory: Send + Sync {
    fn decode(&self, body: &[u8], limits: &DecodingLimits) -> EncodingResult<DynamicStruct>;
    fn encode(&self, value: &DynamicStruct, buf: &mut BytesMut) -> EncodingResult<()>;
}

/// Field-list driven factory: each field is one built-in scalar type encoded
/// in declaration order. Covers the flat structures that binary schemas and
/// DataTypeDefinition attributes describe most of the time; anything richer
/// supplies its own [`TypeFactory`].
pub struct StructureFactory {
    type_id: NodeId,
    fields: Vec<(String, VariantType)>,
}

impl StructureFactory {
    pub fn new(type_id: NodeId, fields: Vec<(String, VariantType)>) -> Self {
        Self { type_id, fields }
    }
}

impl TypeFactory for StructureFactory {
    fn decode(&self, body: &[u8], limits: &DecodingLimits) -> EncodingResult<DynamicStruct> {
        let mut cursor = body;
        let mut fields = Vec::with_capacity(self.fields.len());
        for (name, value_type) in &self.fields {
            // Re-use the variant scalar decoders by synthesizing the mask byte.
            let mut tagged = BytesMut::with_capacity(1 + cursor.len());
            tagged.put_u8(*value_type as u8);
            tagged.put_slice(cursor);
            let mut tagged = tagged.freeze();
            let before = tagged.len();
            let value = Variant::decode(&mut tagged, limits)?;
            let consumed = before - tagged.len() - 1;
            cursor = &cursor[consumed..];
            fields.push((name.clone(), value));
        }
        Ok(DynamicStruct {
            type_id: self.type_id.clone(),
            fields,
        })
    }

    fn encode(&self, value: &DynamicStruct, buf: &mut BytesMut) -> EncodingResult<()> {
        if value.fields.len() != self.fields.len() {
            return Err(StatusCode::BAD_ENCODING_ERROR);
        }
        for ((_, declared), (_, field_value)) in self.fields.iter().zip(&value.fields) {
            if field_value.variant_type() != *declared {
                return Err(StatusCode::BAD_ENCODING_ERROR);
            }
            let mut tagged = BytesMut::new();
            field_value.encode(&mut tagged)?;
            // Strip the variant mask byte; structure fields are raw values.
            buf.put_slice(&tagged[1..]);
        }
        Ok(())
    }
}

/// Registry of [`TypeFactory`] instances keyed by binary encoding node id.
#[derive(Default)]
pub struct TypeRegistry {
    factories: HashMap<NodeId, Arc<dyn TypeFactory>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, encoding_id: NodeId, factory: Arc<dyn TypeFactory>) {
        self.factories.insert(encoding_id, factory);
    }

    pub fn knows(&self, encoding_id: &NodeId) -> bool {
        self.factories.contains_key(encoding_id)
    }

    /// Lift an extension object into a [`DynamicStruct`] when the type is
    /// registered; `None` when unknown (the caller keeps the opaque bytes).
    pub fn resolve(
        &self,
        object: &ExtensionObject,
        limits: &DecodingLimits,
    ) -> Option<EncodingResult<DynamicStruct>> {
        let factory = self.factories.get(&object.type_id)?;
        match &object.body {
            ExtensionObjectBody::ByteString(bytes) => {
                Some(factory.decode(bytes.as_slice(), limits))
            }
            _ => Some(Err(StatusCode::BAD_DECODING_ERROR)),
        }
    }

    /// Lower a [`DynamicStruct`] back into an extension object.
    pub fn lower(&self, value: &DynamicStruct) -> EncodingResult<ExtensionObject> {
        let factory = self
            .factories
            .get(&value.type_id)
            .ok_or(StatusCode::BAD_ENCODING_ERROR)?;
        let mut buf = BytesMut::new();
        factory.encode(value, &mut buf)?;
        Ok(ExtensionObject {
            type_id: value.type_id.clone(),
            body: ExtensionObjectBody::ByteString(ByteString::from_bytes(buf.to_vec())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_round_trips_bit_exact() {
        let raw: &[u8] = &[
            0x01, 0x00, 0x9A, 0x02, // NodeId: four-byte, ns 0, i=666
            0x01, // body: byte string
            0x03, 0x00, 0x00, 0x00, 0xDE, 0xAD, 0xBF, // 3 opaque bytes
        ];
        let mut cursor = raw;
        let object = ExtensionObject::decode(&mut cursor, &DecodingLimits::default()).unwrap();
        let mut buf = BytesMut::new();
        object.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], raw);
    }

    #[test]
    fn null_extension_object() {
        let mut buf = BytesMut::new();
        ExtensionObject::null().encode(&mut buf).unwrap();
        // Two-byte null NodeId + body tag.
        assert_eq!(&buf[..], &[0x00, 0x00, 0x00]);
    }

    #[test]
    fn structure_factory_round_trip() {
        let encoding_id = NodeId::new_numeric(3, 5001);
        let factory = StructureFactory::new(
            encoding_id.clone(),
            vec![
                ("Speed".to_string(), VariantType::Double),
                ("Name".to_string(), VariantType::String),
                ("Enabled".to_string(), VariantType::Boolean),
            ],
        );
        let mut registry = TypeRegistry::new();
        registry.register(encoding_id.clone(), Arc::new(factory));

        let value = DynamicStruct {
            type_id: encoding_id.clone(),
            fields: vec![
                ("Speed".to_string(), Variant::Double(1480.0)),
                ("Name".to_string(), Variant::from("M1")),
                ("Enabled".to_string(), Variant::Boolean(true)),
            ],
        };
        let object = registry.lower(&value).unwrap();
        assert_eq!(object.type_id, encoding_id);
        let lifted = registry
            .resolve(&object, &DecodingLimits::default())
            .unwrap()
            .unwrap();
        assert_eq!(lifted, value);
        assert_eq!(lifted.field("Speed"), Some(&Variant::Double(1480.0)));
    }

    #[test]
    fn unregistered_type_resolves_to_none() {
        let registry = TypeRegistry::new();
        let object = ExtensionObject {
            type_id: NodeId::new_numeric(3, 9999),
            body: ExtensionObjectBody::ByteString(ByteString::from_bytes(vec![1, 2])),
        };
        assert!(registry
            .resolve(&object, &DecodingLimits::default())
            .is_none());
    }
}
