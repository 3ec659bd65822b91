//! Well-known namespace-0 numeric identifiers.
//!
//! Only the identifiers this stack actually touches are listed; the full
//! nodeset lives with the (out of scope) schema loader.

/// Attribute ids, OPC UA Part 4 §5.9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AttributeId {
    NodeId = 1,
    NodeClass = 2,
    BrowseName = 3,
    DisplayName = 4,
    Description = 5,
    WriteMask = 6,
    UserWriteMask = 7,
    IsAbstract = 8,
    Symmetric = 9,
    InverseName = 10,
    ContainsNoLoops = 11,
    EventNotifier = 12,
    Value = 13,
    DataType = 14,
    ValueRank = 15,
    ArrayDimensions = 16,
    AccessLevel = 17,
    UserAccessLevel = 18,
    MinimumSamplingInterval = 19,
    Historizing = 20,
    Executable = 21,
    UserExecutable = 22,
}

impl AttributeId {
    pub fn from_u32(id: u32) -> Option<Self> {
        if (1..=22).contains(&id) {
            // Safety of the transmute-free path: the enum is contiguous.
            Some(match id {
                1 => Self::NodeId,
                2 => Self::NodeClass,
                3 => Self::BrowseName,
                4 => Self::DisplayName,
                5 => Self::Description,
                6 => Self::WriteMask,
                7 => Self::UserWriteMask,
                8 => Self::IsAbstract,
                9 => Self::Symmetric,
                10 => Self::InverseName,
                11 => Self::ContainsNoLoops,
                12 => Self::EventNotifier,
                13 => Self::Value,
                14 => Self::DataType,
                15 => Self::ValueRank,
                16 => Self::ArrayDimensions,
                17 => Self::AccessLevel,
                18 => Self::UserAccessLevel,
                19 => Self::MinimumSamplingInterval,
                20 => Self::Historizing,
                21 => Self::Executable,
                _ => Self::UserExecutable,
            })
        } else {
            None
        }
    }
}

/// Reference type ids.
pub mod reference_type_ids {
    pub const REFERENCES: u32 = 31;
    pub const NON_HIERARCHICAL_REFERENCES: u32 = 32;
    pub const HIERARCHICAL_REFERENCES: u32 = 33;
    pub const HAS_CHILD: u32 = 34;
    pub const ORGANIZES: u32 = 35;
    pub const HAS_EVENT_SOURCE: u32 = 36;
    pub const HAS_MODELLING_RULE: u32 = 37;
    pub const HAS_TYPE_DEFINITION: u32 = 40;
    pub const GENERATES_EVENT: u32 = 41;
    pub const AGGREGATES: u32 = 44;
    pub const HAS_SUBTYPE: u32 = 45;
    pub const HAS_PROPERTY: u32 = 46;
    pub const HAS_COMPONENT: u32 = 47;
    pub const HAS_NOTIFIER: u32 = 48;
    pub const HAS_ORDERED_COMPONENT: u32 = 49;
}

/// Object and folder ids.
pub mod object_ids {
    pub const ROOT_FOLDER: u32 = 84;
    pub const OBJECTS_FOLDER: u32 = 85;
    pub const TYPES_FOLDER: u32 = 86;
    pub const VIEWS_FOLDER: u32 = 87;
    pub const SERVER: u32 = 2253;
}

/// Variable ids under the Server object.
pub mod variable_ids {
    pub const SERVER_SERVER_ARRAY: u32 = 2254;
    pub const SERVER_NAMESPACE_ARRAY: u32 = 2255;
    pub const SERVER_SERVER_STATUS: u32 = 2256;
    pub const SERVER_SERVER_STATUS_START_TIME: u32 = 2257;
    pub const SERVER_SERVER_STATUS_CURRENT_TIME: u32 = 2258;
    pub const SERVER_SERVER_STATUS_STATE: u32 = 2259;
    pub const SERVER_SERVER_STATUS_BUILD_INFO: u32 = 2260;
    pub const SERVER_SERVER_CAPABILITIES: u32 = 2268;
    pub const SERVER_SERVER_DIAGNOSTICS: u32 = 2274;
    pub const SERVER_SERVER_DIAGNOSTICS_SERVER_DIAGNOSTICS_SUMMARY: u32 = 2275;
}

/// Method ids on the Server object.
pub mod method_ids {
    pub const SERVER_GET_MONITORED_ITEMS: u32 = 11492;
    pub const SERVER_RESEND_DATA: u32 = 12873;
    pub const SERVER_SET_SUBSCRIPTION_DURABLE: u32 = 12749;
    pub const SERVER_REQUEST_SERVER_STATE_CHANGE: u32 = 12886;
}

/// Type definition ids used when building the default address space.
pub mod type_ids {
    pub const FOLDER_TYPE: u32 = 61;
    pub const BASE_OBJECT_TYPE: u32 = 58;
    pub const BASE_DATA_VARIABLE_TYPE: u32 = 63;
    pub const PROPERTY_TYPE: u32 = 68;
    pub const SERVER_TYPE: u32 = 2004;
    pub const BASE_EVENT_TYPE: u32 = 2041;
}

/// Binary encoding ids for the service messages and filter structures that
/// ride inside extension objects.
pub mod encoding_ids {
    pub const ARGUMENT: u32 = 298;
    pub const SERVICE_FAULT: u32 = 397;
    pub const OPEN_SECURE_CHANNEL_REQUEST: u32 = 446;
    pub const OPEN_SECURE_CHANNEL_RESPONSE: u32 = 449;
    pub const CLOSE_SECURE_CHANNEL_REQUEST: u32 = 452;
    pub const CLOSE_SECURE_CHANNEL_RESPONSE: u32 = 455;
    pub const ANONYMOUS_IDENTITY_TOKEN: u32 = 321;
    pub const USER_NAME_IDENTITY_TOKEN: u32 = 324;
    pub const CREATE_SESSION_REQUEST: u32 = 461;
    pub const CREATE_SESSION_RESPONSE: u32 = 464;
    pub const ACTIVATE_SESSION_REQUEST: u32 = 467;
    pub const ACTIVATE_SESSION_RESPONSE: u32 = 470;
    pub const CLOSE_SESSION_REQUEST: u32 = 473;
    pub const CLOSE_SESSION_RESPONSE: u32 = 476;
    pub const CANCEL_REQUEST: u32 = 479;
    pub const CANCEL_RESPONSE: u32 = 482;
    pub const BROWSE_REQUEST: u32 = 527;
    pub const BROWSE_RESPONSE: u32 = 530;
    pub const BROWSE_NEXT_REQUEST: u32 = 533;
    pub const BROWSE_NEXT_RESPONSE: u32 = 536;
    pub const TRANSLATE_BROWSE_PATHS_REQUEST: u32 = 554;
    pub const TRANSLATE_BROWSE_PATHS_RESPONSE: u32 = 557;
    pub const REGISTER_NODES_REQUEST: u32 = 560;
    pub const REGISTER_NODES_RESPONSE: u32 = 563;
    pub const UNREGISTER_NODES_REQUEST: u32 = 566;
    pub const UNREGISTER_NODES_RESPONSE: u32 = 569;
    pub const LITERAL_OPERAND: u32 = 597;
    pub const SIMPLE_ATTRIBUTE_OPERAND: u32 = 603;
    pub const READ_REQUEST: u32 = 631;
    pub const READ_RESPONSE: u32 = 634;
    pub const HISTORY_READ_REQUEST: u32 = 664;
    pub const HISTORY_READ_RESPONSE: u32 = 667;
    pub const WRITE_REQUEST: u32 = 673;
    pub const WRITE_RESPONSE: u32 = 676;
    pub const HISTORY_UPDATE_REQUEST: u32 = 700;
    pub const HISTORY_UPDATE_RESPONSE: u32 = 703;
    pub const CALL_REQUEST: u32 = 712;
    pub const CALL_RESPONSE: u32 = 715;
    pub const DATA_CHANGE_FILTER: u32 = 724;
    pub const EVENT_FILTER: u32 = 727;
    pub const CREATE_MONITORED_ITEMS_REQUEST: u32 = 751;
    pub const CREATE_MONITORED_ITEMS_RESPONSE: u32 = 754;
    pub const MODIFY_MONITORED_ITEMS_REQUEST: u32 = 763;
    pub const MODIFY_MONITORED_ITEMS_RESPONSE: u32 = 766;
    pub const SET_MONITORING_MODE_REQUEST: u32 = 769;
    pub const SET_MONITORING_MODE_RESPONSE: u32 = 772;
    pub const SET_TRIGGERING_REQUEST: u32 = 775;
    pub const SET_TRIGGERING_RESPONSE: u32 = 778;
    pub const DELETE_MONITORED_ITEMS_REQUEST: u32 = 781;
    pub const DELETE_MONITORED_ITEMS_RESPONSE: u32 = 784;
    pub const CREATE_SUBSCRIPTION_REQUEST: u32 = 787;
    pub const CREATE_SUBSCRIPTION_RESPONSE: u32 = 790;
    pub const MODIFY_SUBSCRIPTION_REQUEST: u32 = 793;
    pub const MODIFY_SUBSCRIPTION_RESPONSE: u32 = 796;
    pub const SET_PUBLISHING_MODE_REQUEST: u32 = 799;
    pub const SET_PUBLISHING_MODE_RESPONSE: u32 = 802;
    pub const DATA_CHANGE_NOTIFICATION: u32 = 811;
    pub const STATUS_CHANGE_NOTIFICATION: u32 = 820;
    pub const PUBLISH_REQUEST: u32 = 826;
    pub const SERVER_DIAGNOSTICS_SUMMARY: u32 = 861;
    pub const PUBLISH_RESPONSE: u32 = 829;
    pub const REPUBLISH_REQUEST: u32 = 832;
    pub const REPUBLISH_RESPONSE: u32 = 835;
    pub const TRANSFER_SUBSCRIPTIONS_REQUEST: u32 = 841;
    pub const TRANSFER_SUBSCRIPTIONS_RESPONSE: u32 = 844;
    pub const DELETE_SUBSCRIPTIONS_REQUEST: u32 = 847;
    pub const DELETE_SUBSCRIPTIONS_RESPONSE: u32 = 850;
    pub const EVENT_NOTIFICATION_LIST: u32 = 916;
}
