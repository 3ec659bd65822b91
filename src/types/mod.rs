//! OPC UA built-in types and their binary encodings.

pub mod data_value;
pub mod date_time;
pub mod encoding;
pub mod extension_object;
pub mod guid;
pub mod ids;
pub mod node_id;
pub mod qualified_name;
pub mod status;
pub mod variant;

pub use self::data_value::{DataValue, DiagnosticInfo};
pub use self::date_time::DateTime;
pub use self::encoding::{
    read_array, write_array, BinaryDecode, BinaryEncode, ByteString, DecodingLimits,
    EncodingResult, UaString,
};
pub use self::extension_object::{
    DynamicStruct, ExtensionObject, ExtensionObjectBody, StructureFactory, TypeFactory,
    TypeRegistry,
};
pub use self::guid::Guid;
pub use self::ids::AttributeId;
pub use self::node_id::{ExpandedNodeId, Identifier, NodeId};
pub use self::qualified_name::{LocalizedText, QualifiedName};
pub use self::status::StatusCode;
pub use self::variant::{Variant, VariantArray, VariantType};
