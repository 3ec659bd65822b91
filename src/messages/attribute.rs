//! Read, Write and history service messages.

use super::{binary_enum, binary_struct, RequestHeader, ResponseHeader};
use crate::types::{
    ByteString, DataValue, DiagnosticInfo, ExtensionObject, NodeId, QualifiedName, StatusCode,
    UaString,
};

binary_enum! {
    pub enum TimestampsToReturn {
        #[default]
        Source = 0,
        Server = 1,
        Both = 2,
        Neither = 3,
        Invalid = 4,
    }
}

binary_struct! {
    /// One attribute to read.
    pub struct ReadValueId {
        pub node_id: NodeId,
        pub attribute_id: u32,
        pub index_range: UaString,
        pub data_encoding: QualifiedName,
    }
}

binary_struct! {
    pub struct ReadRequest {
        pub request_header: RequestHeader,
        pub max_age: f64,
        pub timestamps_to_return: TimestampsToReturn,
        pub nodes_to_read: Option<Vec<ReadValueId>>,
    }
}

binary_struct! {
    pub struct ReadResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<DataValue>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

binary_struct! {
    pub struct WriteValue {
        pub node_id: NodeId,
        pub attribute_id: u32,
        pub index_range: UaString,
        pub value: DataValue,
    }
}

binary_struct! {
    pub struct WriteRequest {
        pub request_header: RequestHeader,
        pub nodes_to_write: Option<Vec<WriteValue>>,
    }
}

binary_struct! {
    pub struct WriteResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

binary_struct! {
    pub struct HistoryReadValueId {
        pub node_id: NodeId,
        pub index_range: UaString,
        pub data_encoding: QualifiedName,
        pub continuation_point: ByteString,
    }
}

binary_struct! {
    pub struct HistoryReadRequest {
        pub request_header: RequestHeader,
        pub history_read_details: ExtensionObject,
        pub timestamps_to_return: TimestampsToReturn,
        pub release_continuation_points: bool,
        pub nodes_to_read: Option<Vec<HistoryReadValueId>>,
    }
}

binary_struct! {
    pub struct HistoryReadResult {
        pub status_code: StatusCode,
        pub continuation_point: ByteString,
        pub history_data: ExtensionObject,
    }
}

binary_struct! {
    pub struct HistoryReadResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<HistoryReadResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

binary_struct! {
    pub struct HistoryUpdateRequest {
        pub request_header: RequestHeader,
        pub history_update_details: Option<Vec<ExtensionObject>>,
    }
}

binary_struct! {
    pub struct HistoryUpdateResult {
        pub status_code: StatusCode,
        pub operation_results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

binary_struct! {
    pub struct HistoryUpdateResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<HistoryUpdateResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}
