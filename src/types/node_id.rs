//! Node identifiers.
//!
//! A [`NodeId`] pairs a namespace index with one of four identifier kinds.
//! On the wire there are six encodings, selected by a one-byte tag:
//!
//! ```text
//! 0x00 TwoByte    numeric <= 255, namespace 0        (2 bytes total)
//! 0x01 FourByte   numeric <= 65535, namespace <= 255 (4 bytes total)
//! 0x02 Numeric    u16 namespace + u32 identifier
//! 0x03 String     u16 namespace + string
//! 0x04 Guid       u16 namespace + 16-byte guid
//! 0x05 ByteString u16 namespace + byte string
//! ```
//!
//! [`ExpandedNodeId`] reuses the same tag with the high bits 0x80 (namespace
//! URI follows) and 0x40 (server index follows).

use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

use super::encoding::{BinaryDecode, BinaryEncode, ByteString, DecodingLimits, EncodingResult, UaString};
use super::guid::Guid;
use super::status::StatusCode;

/// The identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u32),
    String(String),
    Guid(Guid),
    Opaque(ByteString),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(v) => write!(f, "i={v}"),
            Identifier::String(v) => write!(f, "s={v}"),
            Identifier::Guid(v) => write!(f, "g={v}"),
            Identifier::Opaque(v) => write!(f, "b={v}"),
        }
    }
}

/// A node identifier, unique within a server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: Identifier,
}

impl NodeId {
    pub fn new_numeric(namespace: u16, value: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(value),
        }
    }

    pub fn new_string(namespace: u16, value: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(value.into()),
        }
    }

    pub fn new_guid(namespace: u16, value: Guid) -> Self {
        Self {
            namespace,
            identifier: Identifier::Guid(value),
        }
    }

    pub fn new_opaque(namespace: u16, value: ByteString) -> Self {
        Self {
            namespace,
            identifier: Identifier::Opaque(value),
        }
    }

    /// The null node, `(0, i=0)`.
    pub fn null() -> Self {
        Self::new_numeric(0, 0)
    }

    pub fn is_null(&self) -> bool {
        self.namespace == 0 && self.identifier == Identifier::Numeric(0)
    }

    /// Numeric identifier value if this id is numeric in namespace 0.
    pub fn as_ns0_numeric(&self) -> Option<u32> {
        match (self.namespace, &self.identifier) {
            (0, Identifier::Numeric(v)) => Some(*v),
            _ => None,
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl From<u32> for NodeId {
    /// Namespace-0 numeric id, the common case for well-known nodes.
    fn from(value: u32) -> Self {
        NodeId::new_numeric(0, value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};{}", self.namespace, self.identifier)
        } else {
            write!(f, "{}", self.identifier)
        }
    }
}

const TAG_TWO_BYTE: u8 = 0x00;
const TAG_FOUR_BYTE: u8 = 0x01;
const TAG_NUMERIC: u8 = 0x02;
const TAG_STRING: u8 = 0x03;
const TAG_GUID: u8 = 0x04;
const TAG_BYTE_STRING: u8 = 0x05;
const FLAG_NAMESPACE_URI: u8 = 0x80;
const FLAG_SERVER_INDEX: u8 = 0x40;

fn encode_node_id_body(
    namespace: u16,
    identifier: &Identifier,
    extra_flags: u8,
    buf: &mut BytesMut,
) -> EncodingResult<()> {
    match identifier {
        Identifier::Numeric(v) if extra_flags == 0 && namespace == 0 && *v <= 0xFF => {
            buf.put_u8(TAG_TWO_BYTE);
            buf.put_u8(*v as u8);
        }
        Identifier::Numeric(v) if extra_flags == 0 && namespace <= 0xFF && *v <= 0xFFFF => {
            buf.put_u8(TAG_FOUR_BYTE);
            buf.put_u8(namespace as u8);
            buf.put_u16_le(*v as u16);
        }
        Identifier::Numeric(v) => {
            buf.put_u8(TAG_NUMERIC | extra_flags);
            buf.put_u16_le(namespace);
            buf.put_u32_le(*v);
        }
        Identifier::String(s) => {
            buf.put_u8(TAG_STRING | extra_flags);
            buf.put_u16_le(namespace);
            s.encode(buf)?;
        }
        Identifier::Guid(g) => {
            buf.put_u8(TAG_GUID | extra_flags);
            buf.put_u16_le(namespace);
            g.encode(buf)?;
        }
        Identifier::Opaque(b) => {
            buf.put_u8(TAG_BYTE_STRING | extra_flags);
            buf.put_u16_le(namespace);
            b.encode(buf)?;
        }
    }
    Ok(())
}

/// Decodes the tag byte and body, returning the id plus the flag bits.
fn decode_node_id_body<B: Buf>(
    buf: &mut B,
    limits: &DecodingLimits,
) -> EncodingResult<(NodeId, u8)> {
    if buf.remaining() < 1 {
        return Err(StatusCode::BAD_DECODING_ERROR);
    }
    let tag = buf.get_u8();
    let flags = tag & (FLAG_NAMESPACE_URI | FLAG_SERVER_INDEX);
    let node_id = match tag & 0x3F {
        TAG_TWO_BYTE => {
            if buf.remaining() < 1 {
                return Err(StatusCode::BAD_DECODING_ERROR);
            }
            NodeId::new_numeric(0, u32::from(buf.get_u8()))
        }
        TAG_FOUR_BYTE => {
            if buf.remaining() < 3 {
                return Err(StatusCode::BAD_DECODING_ERROR);
            }
            let namespace = u16::from(buf.get_u8());
            NodeId::new_numeric(namespace, u32::from(buf.get_u16_le()))
        }
        TAG_NUMERIC => {
            if buf.remaining() < 6 {
                return Err(StatusCode::BAD_DECODING_ERROR);
            }
            let namespace = buf.get_u16_le();
            NodeId::new_numeric(namespace, buf.get_u32_le())
        }
        TAG_STRING => {
            if buf.remaining() < 2 {
                return Err(StatusCode::BAD_DECODING_ERROR);
            }
            let namespace = buf.get_u16_le();
            let value = UaString::decode(buf, limits)?.unwrap_or_default();
            NodeId::new_string(namespace, value)
        }
        TAG_GUID => {
            if buf.remaining() < 2 {
                return Err(StatusCode::BAD_DECODING_ERROR);
            }
            let namespace = buf.get_u16_le();
            NodeId::new_guid(namespace, Guid::decode(buf, limits)?)
        }
        TAG_BYTE_STRING => {
            if buf.remaining() < 2 {
                return Err(StatusCode::BAD_DECODING_ERROR);
            }
            let namespace = buf.get_u16_le();
            NodeId::new_opaque(namespace, ByteString::decode(buf, limits)?)
        }
        _ => return Err(StatusCode::BAD_DECODING_ERROR),
    };
    Ok((node_id, flags))
}

impl BinaryEncode for NodeId {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        encode_node_id_body(self.namespace, &self.identifier, 0, buf)
    }
}

impl BinaryDecode for NodeId {
    fn decode<B: Buf>(buf: &mut B, limits: &DecodingLimits) -> EncodingResult<Self> {
        let (node_id, flags) = decode_node_id_body(buf, limits)?;
        if flags != 0 {
            // Expansion bits are not valid in a plain NodeId position.
            return Err(StatusCode::BAD_DECODING_ERROR);
        }
        Ok(node_id)
    }
}

/// A [`NodeId`] extended with an optional namespace URI and server index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ExpandedNodeId {
    pub node_id: NodeId,
    pub namespace_uri: UaString,
    pub server_index: u32,
}

impl ExpandedNodeId {
    pub fn local(node_id: NodeId) -> Self {
        Self {
            node_id,
            namespace_uri: None,
            server_index: 0,
        }
    }

    pub fn is_local(&self) -> bool {
        self.server_index == 0
    }
}

impl From<NodeId> for ExpandedNodeId {
    fn from(node_id: NodeId) -> Self {
        Self::local(node_id)
    }
}

impl fmt::Display for ExpandedNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.server_index != 0 {
            write!(f, "svr={};", self.server_index)?;
        }
        if let Some(uri) = &self.namespace_uri {
            write!(f, "nsu={uri};")?;
        }
        write!(f, "{}", self.node_id)
    }
}

impl BinaryEncode for ExpandedNodeId {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        let mut flags = 0u8;
        if self.namespace_uri.is_some() {
            flags |= FLAG_NAMESPACE_URI;
        }
        if self.server_index != 0 {
            flags |= FLAG_SERVER_INDEX;
        }
        encode_node_id_body(self.node_id.namespace, &self.node_id.identifier, flags, buf)?;
        if self.namespace_uri.is_some() {
            self.namespace_uri.encode(buf)?;
        }
        if self.server_index != 0 {
            buf.put_u32_le(self.server_index);
        }
        Ok(())
    }
}

impl BinaryDecode for ExpandedNodeId {
    fn decode<B: Buf>(buf: &mut B, limits: &DecodingLimits) -> EncodingResult<Self> {
        let (node_id, flags) = decode_node_id_body(buf, limits)?;
        let namespace_uri = if flags & FLAG_NAMESPACE_URI != 0 {
            UaString::decode(buf, limits)?
        } else {
            None
        };
        let server_index = if flags & FLAG_SERVER_INDEX != 0 {
            if buf.remaining() < 4 {
                return Err(StatusCode::BAD_DECODING_ERROR);
            }
            buf.get_u32_le()
        } else {
            0
        };
        Ok(Self {
            node_id,
            namespace_uri,
            server_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(id: NodeId, expected_len: usize) {
        let mut buf = BytesMut::new();
        id.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), expected_len, "wire length for {id}");
        let decoded = NodeId::decode(&mut buf.freeze(), &DecodingLimits::default()).unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn numeric_encodings_pick_shortest_form() {
        round_trip(NodeId::new_numeric(0, 255), 2);
        round_trip(NodeId::new_numeric(0, 256), 4);
        round_trip(NodeId::new_numeric(255, 65_535), 4);
        round_trip(NodeId::new_numeric(256, 1), 7);
        round_trip(NodeId::new_numeric(0, 70_000), 7);
    }

    #[test]
    fn other_identifier_kinds() {
        round_trip(NodeId::new_string(2, "Motor.Speed"), 1 + 2 + 4 + 11);
        round_trip(NodeId::new_guid(1, Guid::random()), 1 + 2 + 16);
        round_trip(
            NodeId::new_opaque(3, ByteString::from_bytes(vec![1, 2, 3])),
            1 + 2 + 4 + 3,
        );
    }

    #[test]
    fn null_node_id() {
        assert!(NodeId::null().is_null());
        assert!(!NodeId::new_numeric(1, 0).is_null());
        round_trip(NodeId::null(), 2);
    }

    #[test]
    fn expanded_with_uri_and_server_index() {
        let id = ExpandedNodeId {
            node_id: NodeId::new_numeric(0, 85),
            namespace_uri: Some("urn:example".to_string()),
            server_index: 3,
        };
        let mut buf = BytesMut::new();
        id.encode(&mut buf).unwrap();
        let decoded =
            ExpandedNodeId::decode(&mut buf.freeze(), &DecodingLimits::default()).unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn expansion_bits_rejected_in_plain_node_id() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x82);
        buf.put_u16_le(0);
        buf.put_u32_le(1);
        Some("urn:x".to_string()).encode(&mut buf).unwrap();
        let err = NodeId::decode(&mut buf.freeze(), &DecodingLimits::default()).unwrap_err();
        assert_eq!(err, StatusCode::BAD_DECODING_ERROR);
    }
}
