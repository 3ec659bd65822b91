//! Browse, path translation and node registration messages.

use super::{binary_enum, binary_struct, RequestHeader, ResponseHeader};
use crate::types::{
    ByteString, DateTime, DiagnosticInfo, ExpandedNodeId, LocalizedText, NodeId, QualifiedName,
    StatusCode,
};

binary_enum! {
    pub enum BrowseDirection {
        #[default]
        Forward = 0,
        Inverse = 1,
        Both = 2,
        Invalid = 3,
    }
}

binary_enum! {
    pub enum NodeClass {
        #[default]
        Unspecified = 0,
        Object = 1,
        Variable = 2,
        Method = 4,
        ObjectType = 8,
        VariableType = 16,
        ReferenceType = 32,
        DataType = 64,
        View = 128,
    }
}

/// Bits of `BrowseDescription::result_mask`.
pub mod browse_result_mask {
    pub const REFERENCE_TYPE: u32 = 0x01;
    pub const IS_FORWARD: u32 = 0x02;
    pub const NODE_CLASS: u32 = 0x04;
    pub const BROWSE_NAME: u32 = 0x08;
    pub const DISPLAY_NAME: u32 = 0x10;
    pub const TYPE_DEFINITION: u32 = 0x20;
    pub const ALL: u32 = 0x3F;
}

binary_struct! {
    pub struct ViewDescription {
        pub view_id: NodeId,
        pub timestamp: DateTime,
        pub view_version: u32,
    }
}

binary_struct! {
    pub struct BrowseDescription {
        pub node_id: NodeId,
        pub browse_direction: BrowseDirection,
        pub reference_type_id: NodeId,
        pub include_subtypes: bool,
        pub node_class_mask: u32,
        pub result_mask: u32,
    }
}

binary_struct! {
    pub struct ReferenceDescription {
        pub reference_type_id: NodeId,
        pub is_forward: bool,
        pub node_id: ExpandedNodeId,
        pub browse_name: QualifiedName,
        pub display_name: LocalizedText,
        pub node_class: NodeClass,
        pub type_definition: ExpandedNodeId,
    }
}

binary_struct! {
    pub struct BrowseResult {
        pub status_code: StatusCode,
        pub continuation_point: ByteString,
        pub references: Option<Vec<ReferenceDescription>>,
    }
}

binary_struct! {
    pub struct BrowseRequest {
        pub request_header: RequestHeader,
        pub view: ViewDescription,
        pub requested_max_references_per_node: u32,
        pub nodes_to_browse: Option<Vec<BrowseDescription>>,
    }
}

binary_struct! {
    pub struct BrowseResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<BrowseResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

binary_struct! {
    pub struct BrowseNextRequest {
        pub request_header: RequestHeader,
        pub release_continuation_points: bool,
        pub continuation_points: Option<Vec<ByteString>>,
    }
}

binary_struct! {
    pub struct BrowseNextResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<BrowseResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

binary_struct! {
    /// One hop of a relative path.
    pub struct RelativePathElement {
        pub reference_type_id: NodeId,
        pub is_inverse: bool,
        pub include_subtypes: bool,
        pub target_name: QualifiedName,
    }
}

binary_struct! {
    pub struct RelativePath {
        pub elements: Option<Vec<RelativePathElement>>,
    }
}

binary_struct! {
    pub struct BrowsePath {
        pub starting_node: NodeId,
        pub relative_path: RelativePath,
    }
}

binary_struct! {
    pub struct BrowsePathTarget {
        pub target_id: ExpandedNodeId,
        pub remaining_path_index: u32,
    }
}

binary_struct! {
    pub struct BrowsePathResult {
        pub status_code: StatusCode,
        pub targets: Option<Vec<BrowsePathTarget>>,
    }
}

binary_struct! {
    pub struct TranslateBrowsePathsRequest {
        pub request_header: RequestHeader,
        pub browse_paths: Option<Vec<BrowsePath>>,
    }
}

binary_struct! {
    pub struct TranslateBrowsePathsResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<BrowsePathResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

binary_struct! {
    pub struct RegisterNodesRequest {
        pub request_header: RequestHeader,
        pub nodes_to_register: Option<Vec<NodeId>>,
    }
}

binary_struct! {
    pub struct RegisterNodesResponse {
        pub response_header: ResponseHeader,
        pub registered_node_ids: Option<Vec<NodeId>>,
    }
}

binary_struct! {
    pub struct UnregisterNodesRequest {
        pub request_header: RequestHeader,
        pub nodes_to_unregister: Option<Vec<NodeId>>,
    }
}

binary_struct! {
    pub struct UnregisterNodesResponse {
        pub response_header: ResponseHeader,
    }
}
