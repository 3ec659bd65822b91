//! Service request and response messages.
//!
//! Every service body is a flat struct of built-in types encoded field by
//! field in declaration order. The [`binary_struct!`] and [`binary_enum!`]
//! macros generate the codec impls so the struct definitions stay readable
//! and the field order stays authoritative.
//!
//! On the wire a service message is the ExtensionObject node id of its
//! binary encoding followed by the body; [`RequestMessage`] and
//! [`ResponseMessage`] own that dispatch table.

use bytes::{Buf, BytesMut};

use crate::types::ids::encoding_ids;
use crate::types::{
    BinaryDecode, BinaryEncode, DecodingLimits, DiagnosticInfo, EncodingResult, ExtensionObject,
    NodeId, StatusCode, UaString,
};

macro_rules! binary_struct {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Default)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )+
        }

        impl $crate::types::BinaryEncode for $name {
            fn encode(
                &self,
                buf: &mut bytes::BytesMut,
            ) -> $crate::types::EncodingResult<()> {
                $( $crate::types::BinaryEncode::encode(&self.$field, buf)?; )+
                Ok(())
            }
        }

        impl $crate::types::BinaryDecode for $name {
            fn decode<B: bytes::Buf>(
                buf: &mut B,
                limits: &$crate::types::DecodingLimits,
            ) -> $crate::types::EncodingResult<Self> {
                Ok(Self {
                    $( $field: $crate::types::BinaryDecode::decode(buf, limits)?, )+
                })
            }
        }
    };
}

/// Enumerations encode as `Int32`; unknown discriminants are decoding errors.
macro_rules! binary_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:expr, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        #[repr(i32)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value, )+
        }

        impl $name {
            pub fn from_i32(value: i32) -> Option<Self> {
                match value {
                    $( v if v == $value => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }

        impl $crate::types::BinaryEncode for $name {
            fn encode(
                &self,
                buf: &mut bytes::BytesMut,
            ) -> $crate::types::EncodingResult<()> {
                use bytes::BufMut;
                buf.put_i32_le(*self as i32);
                Ok(())
            }
        }

        impl $crate::types::BinaryDecode for $name {
            fn decode<B: bytes::Buf>(
                buf: &mut B,
                limits: &$crate::types::DecodingLimits,
            ) -> $crate::types::EncodingResult<Self> {
                let raw = <i32 as $crate::types::BinaryDecode>::decode(buf, limits)?;
                Self::from_i32(raw).ok_or($crate::types::StatusCode::BAD_DECODING_ERROR)
            }
        }
    };
}

pub(crate) use {binary_enum, binary_struct};

pub mod attribute;
pub mod channel;
pub mod method;
pub mod monitored_item;
pub mod session;
pub mod subscription;
pub mod view;

pub use self::attribute::*;
pub use self::channel::*;
pub use self::method::*;
pub use self::monitored_item::*;
pub use self::session::*;
pub use self::subscription::*;
pub use self::view::*;

// ============================================================================
// REQUEST / RESPONSE HEADERS
// ============================================================================

binary_struct! {
    /// Common header carried by every service request.
    pub struct RequestHeader {
        pub authentication_token: NodeId,
        pub timestamp: crate::types::DateTime,
        pub request_handle: u32,
        pub return_diagnostics: u32,
        pub audit_entry_id: UaString,
        pub timeout_hint: u32,
        pub additional_header: ExtensionObject,
    }
}

binary_struct! {
    /// Common header carried by every service response.
    pub struct ResponseHeader {
        pub timestamp: crate::types::DateTime,
        pub request_handle: u32,
        pub service_result: StatusCode,
        pub service_diagnostics: DiagnosticInfo,
        pub string_table: Option<Vec<String>>,
        pub additional_header: ExtensionObject,
    }
}

impl ResponseHeader {
    /// Header answering `request` with the given service result.
    pub fn new(request: &RequestHeader, service_result: StatusCode) -> Self {
        Self {
            timestamp: crate::types::DateTime::now(),
            request_handle: request.request_handle,
            service_result,
            ..Default::default()
        }
    }
}

binary_struct! {
    /// Carrier for a service-level failure.
    pub struct ServiceFault {
        pub response_header: ResponseHeader,
    }
}

// ============================================================================
// MESSAGE ENUMS
// ============================================================================

macro_rules! message_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident [$header_fn:ident -> $header_ty:ty, $header_field:ident] {
            $( $variant:ident($ty:ty) = $id:expr, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub enum $name {
            $( $variant($ty), )+
        }

        impl $name {
            /// Encoding node id (namespace 0, numeric) of the active variant.
            pub fn type_id(&self) -> u32 {
                match self {
                    $( Self::$variant(_) => $id, )+
                }
            }

            pub fn $header_fn(&self) -> &$header_ty {
                match self {
                    $( Self::$variant(m) => &m.$header_field, )+
                }
            }
        }

        impl BinaryEncode for $name {
            fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
                NodeId::from(self.type_id()).encode(buf)?;
                match self {
                    $( Self::$variant(m) => m.encode(buf), )+
                }
            }
        }

        impl BinaryDecode for $name {
            fn decode<B: Buf>(buf: &mut B, limits: &DecodingLimits) -> EncodingResult<Self> {
                let type_id = NodeId::decode(buf, limits)?;
                let Some(numeric) = type_id.as_ns0_numeric() else {
                    return Err(StatusCode::BAD_SERVICE_UNSUPPORTED);
                };
                match numeric {
                    $( id if id == $id => Ok(Self::$variant(<$ty>::decode(buf, limits)?)), )+
                    _ => Err(StatusCode::BAD_SERVICE_UNSUPPORTED),
                }
            }
        }

        $(
            impl From<$ty> for $name {
                fn from(m: $ty) -> Self {
                    Self::$variant(m)
                }
            }
        )+
    };
}

message_enum! {
    /// Every service request this stack dispatches.
    pub enum RequestMessage [request_header -> RequestHeader, request_header] {
        OpenSecureChannel(OpenSecureChannelRequest) = encoding_ids::OPEN_SECURE_CHANNEL_REQUEST,
        CloseSecureChannel(CloseSecureChannelRequest) = encoding_ids::CLOSE_SECURE_CHANNEL_REQUEST,
        CreateSession(CreateSessionRequest) = encoding_ids::CREATE_SESSION_REQUEST,
        ActivateSession(ActivateSessionRequest) = encoding_ids::ACTIVATE_SESSION_REQUEST,
        CloseSession(CloseSessionRequest) = encoding_ids::CLOSE_SESSION_REQUEST,
        Cancel(CancelRequest) = encoding_ids::CANCEL_REQUEST,
        Read(ReadRequest) = encoding_ids::READ_REQUEST,
        Write(WriteRequest) = encoding_ids::WRITE_REQUEST,
        Browse(BrowseRequest) = encoding_ids::BROWSE_REQUEST,
        BrowseNext(BrowseNextRequest) = encoding_ids::BROWSE_NEXT_REQUEST,
        TranslateBrowsePaths(TranslateBrowsePathsRequest) = encoding_ids::TRANSLATE_BROWSE_PATHS_REQUEST,
        RegisterNodes(RegisterNodesRequest) = encoding_ids::REGISTER_NODES_REQUEST,
        UnregisterNodes(UnregisterNodesRequest) = encoding_ids::UNREGISTER_NODES_REQUEST,
        Call(CallRequest) = encoding_ids::CALL_REQUEST,
        HistoryRead(HistoryReadRequest) = encoding_ids::HISTORY_READ_REQUEST,
        HistoryUpdate(HistoryUpdateRequest) = encoding_ids::HISTORY_UPDATE_REQUEST,
        CreateSubscription(CreateSubscriptionRequest) = encoding_ids::CREATE_SUBSCRIPTION_REQUEST,
        ModifySubscription(ModifySubscriptionRequest) = encoding_ids::MODIFY_SUBSCRIPTION_REQUEST,
        SetPublishingMode(SetPublishingModeRequest) = encoding_ids::SET_PUBLISHING_MODE_REQUEST,
        Publish(PublishRequest) = encoding_ids::PUBLISH_REQUEST,
        Republish(RepublishRequest) = encoding_ids::REPUBLISH_REQUEST,
        TransferSubscriptions(TransferSubscriptionsRequest) = encoding_ids::TRANSFER_SUBSCRIPTIONS_REQUEST,
        DeleteSubscriptions(DeleteSubscriptionsRequest) = encoding_ids::DELETE_SUBSCRIPTIONS_REQUEST,
        CreateMonitoredItems(CreateMonitoredItemsRequest) = encoding_ids::CREATE_MONITORED_ITEMS_REQUEST,
        ModifyMonitoredItems(ModifyMonitoredItemsRequest) = encoding_ids::MODIFY_MONITORED_ITEMS_REQUEST,
        DeleteMonitoredItems(DeleteMonitoredItemsRequest) = encoding_ids::DELETE_MONITORED_ITEMS_REQUEST,
        SetMonitoringMode(SetMonitoringModeRequest) = encoding_ids::SET_MONITORING_MODE_REQUEST,
        SetTriggering(SetTriggeringRequest) = encoding_ids::SET_TRIGGERING_REQUEST,
    }
}

message_enum! {
    /// Every service response this stack emits.
    pub enum ResponseMessage [response_header -> ResponseHeader, response_header] {
        ServiceFault(ServiceFault) = encoding_ids::SERVICE_FAULT,
        OpenSecureChannel(OpenSecureChannelResponse) = encoding_ids::OPEN_SECURE_CHANNEL_RESPONSE,
        CloseSecureChannel(CloseSecureChannelResponse) = encoding_ids::CLOSE_SECURE_CHANNEL_RESPONSE,
        CreateSession(CreateSessionResponse) = encoding_ids::CREATE_SESSION_RESPONSE,
        ActivateSession(ActivateSessionResponse) = encoding_ids::ACTIVATE_SESSION_RESPONSE,
        CloseSession(CloseSessionResponse) = encoding_ids::CLOSE_SESSION_RESPONSE,
        Cancel(CancelResponse) = encoding_ids::CANCEL_RESPONSE,
        Read(ReadResponse) = encoding_ids::READ_RESPONSE,
        Write(WriteResponse) = encoding_ids::WRITE_RESPONSE,
        Browse(BrowseResponse) = encoding_ids::BROWSE_RESPONSE,
        BrowseNext(BrowseNextResponse) = encoding_ids::BROWSE_NEXT_RESPONSE,
        TranslateBrowsePaths(TranslateBrowsePathsResponse) = encoding_ids::TRANSLATE_BROWSE_PATHS_RESPONSE,
        RegisterNodes(RegisterNodesResponse) = encoding_ids::REGISTER_NODES_RESPONSE,
        UnregisterNodes(UnregisterNodesResponse) = encoding_ids::UNREGISTER_NODES_RESPONSE,
        Call(CallResponse) = encoding_ids::CALL_RESPONSE,
        HistoryRead(HistoryReadResponse) = encoding_ids::HISTORY_READ_RESPONSE,
        HistoryUpdate(HistoryUpdateResponse) = encoding_ids::HISTORY_UPDATE_RESPONSE,
        CreateSubscription(CreateSubscriptionResponse) = encoding_ids::CREATE_SUBSCRIPTION_RESPONSE,
        ModifySubscription(ModifySubscriptionResponse) = encoding_ids::MODIFY_SUBSCRIPTION_RESPONSE,
        SetPublishingMode(SetPublishingModeResponse) = encoding_ids::SET_PUBLISHING_MODE_RESPONSE,
        Publish(PublishResponse) = encoding_ids::PUBLISH_RESPONSE,
        Republish(RepublishResponse) = encoding_ids::REPUBLISH_RESPONSE,
        TransferSubscriptions(TransferSubscriptionsResponse) = encoding_ids::TRANSFER_SUBSCRIPTIONS_RESPONSE,
        DeleteSubscriptions(DeleteSubscriptionsResponse) = encoding_ids::DELETE_SUBSCRIPTIONS_RESPONSE,
        CreateMonitoredItems(CreateMonitoredItemsResponse) = encoding_ids::CREATE_MONITORED_ITEMS_RESPONSE,
        ModifyMonitoredItems(ModifyMonitoredItemsResponse) = encoding_ids::MODIFY_MONITORED_ITEMS_RESPONSE,
        DeleteMonitoredItems(DeleteMonitoredItemsResponse) = encoding_ids::DELETE_MONITORED_ITEMS_RESPONSE,
        SetMonitoringMode(SetMonitoringModeResponse) = encoding_ids::SET_MONITORING_MODE_RESPONSE,
        SetTriggering(SetTriggeringResponse) = encoding_ids::SET_TRIGGERING_RESPONSE,
    }
}

impl ResponseMessage {
    /// A `ServiceFault` answering `request` with `status`.
    pub fn fault(request: &RequestHeader, status: StatusCode) -> Self {
        ResponseMessage::ServiceFault(ServiceFault {
            response_header: ResponseHeader::new(request, status),
        })
    }
}
