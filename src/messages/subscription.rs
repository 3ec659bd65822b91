//! Subscription and publish service messages.

use super::{binary_struct, RequestHeader, ResponseHeader};
use crate::types::ids::encoding_ids;
use crate::types::{
    DataValue, DateTime, DiagnosticInfo, EncodingResult, ExtensionObject, NodeId, StatusCode,
    Variant,
};

binary_struct! {
    pub struct CreateSubscriptionRequest {
        pub request_header: RequestHeader,
        pub requested_publishing_interval: f64,
        pub requested_lifetime_count: u32,
        pub requested_max_keep_alive_count: u32,
        pub max_notifications_per_publish: u32,
        pub publishing_enabled: bool,
        pub priority: u8,
    }
}

binary_struct! {
    pub struct CreateSubscriptionResponse {
        pub response_header: ResponseHeader,
        pub subscription_id: u32,
        pub revised_publishing_interval: f64,
        pub revised_lifetime_count: u32,
        pub revised_max_keep_alive_count: u32,
    }
}

binary_struct! {
    pub struct ModifySubscriptionRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub requested_publishing_interval: f64,
        pub requested_lifetime_count: u32,
        pub requested_max_keep_alive_count: u32,
        pub max_notifications_per_publish: u32,
        pub priority: u8,
    }
}

binary_struct! {
    pub struct ModifySubscriptionResponse {
        pub response_header: ResponseHeader,
        pub revised_publishing_interval: f64,
        pub revised_lifetime_count: u32,
        pub revised_max_keep_alive_count: u32,
    }
}

binary_struct! {
    pub struct SetPublishingModeRequest {
        pub request_header: RequestHeader,
        pub publishing_enabled: bool,
        pub subscription_ids: Option<Vec<u32>>,
    }
}

binary_struct! {
    pub struct SetPublishingModeResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

binary_struct! {
    /// Client acknowledgement of a delivered notification message.
    pub struct SubscriptionAcknowledgement {
        pub subscription_id: u32,
        pub sequence_number: u32,
    }
}

binary_struct! {
    pub struct PublishRequest {
        pub request_header: RequestHeader,
        pub subscription_acknowledgements: Option<Vec<SubscriptionAcknowledgement>>,
    }
}

binary_struct! {
    /// One batch of notifications for a subscription. Sequence numbers are
    /// per subscription, start at 1 and skip 0 on wrap.
    pub struct NotificationMessage {
        pub sequence_number: u32,
        pub publish_time: DateTime,
        pub notification_data: Option<Vec<ExtensionObject>>,
    }
}

impl NotificationMessage {
    /// An empty keep-alive message.
    pub fn keep_alive(sequence_number: u32, publish_time: DateTime) -> Self {
        Self {
            sequence_number,
            publish_time,
            notification_data: None,
        }
    }

    pub fn is_keep_alive(&self) -> bool {
        self.notification_data
            .as_ref()
            .map_or(true, |n| n.is_empty())
    }

    /// Wrap data-change notifications.
    pub fn data_change(
        sequence_number: u32,
        publish_time: DateTime,
        monitored_items: Vec<MonitoredItemNotification>,
        events: Vec<EventFieldList>,
    ) -> EncodingResult<Self> {
        let mut notification_data = Vec::new();
        if !monitored_items.is_empty() {
            let body = DataChangeNotification {
                monitored_items: Some(monitored_items),
                diagnostic_infos: None,
            };
            notification_data.push(ExtensionObject::from_encodable(
                NodeId::from(encoding_ids::DATA_CHANGE_NOTIFICATION),
                &body,
            )?);
        }
        if !events.is_empty() {
            let body = EventNotificationList {
                events: Some(events),
            };
            notification_data.push(ExtensionObject::from_encodable(
                NodeId::from(encoding_ids::EVENT_NOTIFICATION_LIST),
                &body,
            )?);
        }
        Ok(Self {
            sequence_number,
            publish_time,
            notification_data: Some(notification_data),
        })
    }

    /// Wrap a status change, emitted when a subscription dies.
    pub fn status_change(
        sequence_number: u32,
        publish_time: DateTime,
        status: StatusCode,
    ) -> EncodingResult<Self> {
        let body = StatusChangeNotification {
            status,
            diagnostic_info: DiagnosticInfo::default(),
        };
        Ok(Self {
            sequence_number,
            publish_time,
            notification_data: Some(vec![ExtensionObject::from_encodable(
                NodeId::from(encoding_ids::STATUS_CHANGE_NOTIFICATION),
                &body,
            )?]),
        })
    }
}

binary_struct! {
    pub struct PublishResponse {
        pub response_header: ResponseHeader,
        pub subscription_id: u32,
        pub available_sequence_numbers: Option<Vec<u32>>,
        pub more_notifications: bool,
        pub notification_message: NotificationMessage,
        pub results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

binary_struct! {
    pub struct RepublishRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub retransmit_sequence_number: u32,
    }
}

binary_struct! {
    pub struct RepublishResponse {
        pub response_header: ResponseHeader,
        pub notification_message: NotificationMessage,
    }
}

binary_struct! {
    pub struct TransferResult {
        pub status_code: StatusCode,
        pub available_sequence_numbers: Option<Vec<u32>>,
    }
}

binary_struct! {
    pub struct TransferSubscriptionsRequest {
        pub request_header: RequestHeader,
        pub subscription_ids: Option<Vec<u32>>,
        pub send_initial_values: bool,
    }
}

binary_struct! {
    pub struct TransferSubscriptionsResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<TransferResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

binary_struct! {
    pub struct DeleteSubscriptionsRequest {
        pub request_header: RequestHeader,
        pub subscription_ids: Option<Vec<u32>>,
    }
}

binary_struct! {
    pub struct DeleteSubscriptionsResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

// ============================================================================
// NOTIFICATION PAYLOADS
// ============================================================================

binary_struct! {
    /// One sampled value, tagged with the client-side handle.
    pub struct MonitoredItemNotification {
        pub client_handle: u32,
        pub value: DataValue,
    }
}

binary_struct! {
    pub struct DataChangeNotification {
        pub monitored_items: Option<Vec<MonitoredItemNotification>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

binary_struct! {
    /// Event fields projected by the select clauses, in clause order.
    pub struct EventFieldList {
        pub client_handle: u32,
        pub event_fields: Option<Vec<Variant>>,
    }
}

binary_struct! {
    pub struct EventNotificationList {
        pub events: Option<Vec<EventFieldList>>,
    }
}

binary_struct! {
    pub struct StatusChangeNotification {
        pub status: StatusCode,
        pub diagnostic_info: DiagnosticInfo,
    }
}
