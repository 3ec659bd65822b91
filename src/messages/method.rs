//! Method call messages.

use super::{binary_struct, RequestHeader, ResponseHeader};
use crate::types::{DiagnosticInfo, LocalizedText, NodeId, StatusCode, UaString, Variant};

binary_struct! {
    /// Method argument description, carried by the InputArguments and
    /// OutputArguments properties of a method node.
    pub struct Argument {
        pub name: UaString,
        pub data_type: NodeId,
        pub value_rank: i32,
        pub array_dimensions: Option<Vec<u32>>,
        pub description: LocalizedText,
    }
}

binary_struct! {
    pub struct CallMethodRequest {
        pub object_id: NodeId,
        pub method_id: NodeId,
        pub input_arguments: Option<Vec<Variant>>,
    }
}

binary_struct! {
    pub struct CallMethodResult {
        pub status_code: StatusCode,
        pub input_argument_results: Option<Vec<StatusCode>>,
        pub input_argument_diagnostic_infos: Option<Vec<DiagnosticInfo>>,
        pub output_arguments: Option<Vec<Variant>>,
    }
}

impl CallMethodResult {
    pub fn good(output_arguments: Vec<Variant>) -> Self {
        Self {
            status_code: StatusCode::GOOD,
            output_arguments: Some(output_arguments),
            ..Default::default()
        }
    }

    pub fn bad(status_code: StatusCode) -> Self {
        Self {
            status_code,
            ..Default::default()
        }
    }
}

binary_struct! {
    pub struct CallRequest {
        pub request_header: RequestHeader,
        pub methods_to_call: Option<Vec<CallMethodRequest>>,
    }
}

binary_struct! {
    pub struct CallResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<CallMethodResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}
