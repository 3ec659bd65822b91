//! Monitored-item service messages and filters.

use super::attribute::{ReadValueId, TimestampsToReturn};
use super::{binary_enum, binary_struct, RequestHeader, ResponseHeader};
use crate::types::{
    DiagnosticInfo, ExtensionObject, NodeId, QualifiedName, StatusCode, UaString,
};

binary_enum! {
    pub enum MonitoringMode {
        Disabled = 0,
        Sampling = 1,
        #[default]
        Reporting = 2,
    }
}

binary_enum! {
    pub enum DataChangeTrigger {
        Status = 0,
        #[default]
        StatusValue = 1,
        StatusValueTimestamp = 2,
    }
}

/// Deadband kinds, used as the `deadband_type` discriminant.
pub mod deadband_type {
    pub const NONE: u32 = 0;
    pub const ABSOLUTE: u32 = 1;
    pub const PERCENT: u32 = 2;
}

binary_struct! {
    pub struct DataChangeFilter {
        pub trigger: DataChangeTrigger,
        pub deadband_type: u32,
        pub deadband_value: f64,
    }
}

binary_enum! {
    pub enum FilterOperator {
        #[default]
        Equals = 0,
        IsNull = 1,
        GreaterThan = 2,
        LessThan = 3,
        GreaterThanOrEqual = 4,
        LessThanOrEqual = 5,
        Like = 6,
        Not = 7,
        Between = 8,
        InList = 9,
        And = 10,
        Or = 11,
        Cast = 12,
        InView = 13,
        OfType = 14,
        RelatedTo = 15,
        BitwiseAnd = 16,
        BitwiseOr = 17,
    }
}

binary_struct! {
    /// Selects one event field by browse path from the event type.
    pub struct SimpleAttributeOperand {
        pub type_definition_id: NodeId,
        pub browse_path: Option<Vec<QualifiedName>>,
        pub attribute_id: u32,
        pub index_range: UaString,
    }
}

binary_struct! {
    /// A constant operand in a where clause.
    pub struct LiteralOperand {
        pub value: crate::types::Variant,
    }
}

binary_struct! {
    pub struct ContentFilterElement {
        pub filter_operator: FilterOperator,
        pub filter_operands: Option<Vec<ExtensionObject>>,
    }
}

binary_struct! {
    pub struct ContentFilter {
        pub elements: Option<Vec<ContentFilterElement>>,
    }
}

binary_struct! {
    pub struct EventFilter {
        pub select_clauses: Option<Vec<SimpleAttributeOperand>>,
        pub where_clause: ContentFilter,
    }
}

binary_struct! {
    pub struct MonitoringParameters {
        pub client_handle: u32,
        pub sampling_interval: f64,
        pub filter: ExtensionObject,
        pub queue_size: u32,
        pub discard_oldest: bool,
    }
}

binary_struct! {
    pub struct MonitoredItemCreateRequest {
        pub item_to_monitor: ReadValueId,
        pub monitoring_mode: MonitoringMode,
        pub requested_parameters: MonitoringParameters,
    }
}

binary_struct! {
    pub struct MonitoredItemCreateResult {
        pub status_code: StatusCode,
        pub monitored_item_id: u32,
        pub revised_sampling_interval: f64,
        pub revised_queue_size: u32,
        pub filter_result: ExtensionObject,
    }
}

impl MonitoredItemCreateResult {
    pub fn bad(status_code: StatusCode) -> Self {
        Self {
            status_code,
            ..Default::default()
        }
    }
}

binary_struct! {
    pub struct CreateMonitoredItemsRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub timestamps_to_return: TimestampsToReturn,
        pub items_to_create: Option<Vec<MonitoredItemCreateRequest>>,
    }
}

binary_struct! {
    pub struct CreateMonitoredItemsResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<MonitoredItemCreateResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

binary_struct! {
    pub struct MonitoredItemModifyRequest {
        pub monitored_item_id: u32,
        pub requested_parameters: MonitoringParameters,
    }
}

binary_struct! {
    pub struct MonitoredItemModifyResult {
        pub status_code: StatusCode,
        pub revised_sampling_interval: f64,
        pub revised_queue_size: u32,
        pub filter_result: ExtensionObject,
    }
}

binary_struct! {
    pub struct ModifyMonitoredItemsRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub timestamps_to_return: TimestampsToReturn,
        pub items_to_modify: Option<Vec<MonitoredItemModifyRequest>>,
    }
}

binary_struct! {
    pub struct ModifyMonitoredItemsResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<MonitoredItemModifyResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

binary_struct! {
    pub struct DeleteMonitoredItemsRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub monitored_item_ids: Option<Vec<u32>>,
    }
}

binary_struct! {
    pub struct DeleteMonitoredItemsResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

binary_struct! {
    pub struct SetMonitoringModeRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub monitoring_mode: MonitoringMode,
        pub monitored_item_ids: Option<Vec<u32>>,
    }
}

binary_struct! {
    pub struct SetMonitoringModeResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

binary_struct! {
    pub struct SetTriggeringRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub triggering_item_id: u32,
        pub links_to_add: Option<Vec<u32>>,
        pub links_to_remove: Option<Vec<u32>>,
    }
}

binary_struct! {
    pub struct SetTriggeringResponse {
        pub response_header: ResponseHeader,
        pub add_results: Option<Vec<StatusCode>>,
        pub add_diagnostic_infos: Option<Vec<DiagnosticInfo>>,
        pub remove_results: Option<Vec<StatusCode>>,
        pub remove_diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

/// The filter a monitored item was created with, decoded from the
/// extension object in [`MonitoringParameters`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MonitoringFilter {
    #[default]
    None,
    DataChange(DataChangeFilter),
    Event(EventFilter),
}

impl MonitoringFilter {
    /// Interpret the raw filter extension object. An unknown filter type is
    /// `Bad_MonitoredItemFilterUnsupported`.
    pub fn from_extension_object(
        object: &ExtensionObject,
        limits: &crate::types::DecodingLimits,
    ) -> Result<Self, StatusCode> {
        use crate::types::ids::encoding_ids;
        if object.is_null() {
            return Ok(MonitoringFilter::None);
        }
        match object.type_id.as_ns0_numeric() {
            Some(id) if id == encoding_ids::DATA_CHANGE_FILTER => {
                Ok(MonitoringFilter::DataChange(object.decode_body(limits)?))
            }
            Some(id) if id == encoding_ids::EVENT_FILTER => {
                Ok(MonitoringFilter::Event(object.decode_body(limits)?))
            }
            _ => Err(StatusCode::BAD_MONITORED_ITEM_FILTER_UNSUPPORTED),
        }
    }
}
