//! OPC UA status codes.
//!
//! A [`StatusCode`] is a 32-bit value: the top two bits carry the severity
//! (good / uncertain / bad), bits 16..28 the sub-code, and the low 16 bits
//! optional info flags such as the data-value overflow bit.

use std::fmt;

/// 32-bit OPC UA status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const GOOD: StatusCode = StatusCode(0x0000_0000);

    pub const GOOD_SUBSCRIPTION_TRANSFERRED: StatusCode = StatusCode(0x002D_0000);
    pub const GOOD_COMPLETES_ASYNCHRONOUSLY: StatusCode = StatusCode(0x002E_0000);
    pub const GOOD_OVERLOAD: StatusCode = StatusCode(0x002F_0000);
    pub const GOOD_CLAMPED: StatusCode = StatusCode(0x0030_0000);

    pub const UNCERTAIN: StatusCode = StatusCode(0x4000_0000);

    pub const BAD_UNEXPECTED_ERROR: StatusCode = StatusCode(0x8001_0000);
    pub const BAD_INTERNAL_ERROR: StatusCode = StatusCode(0x8002_0000);
    pub const BAD_OUT_OF_MEMORY: StatusCode = StatusCode(0x8003_0000);
    pub const BAD_RESOURCE_UNAVAILABLE: StatusCode = StatusCode(0x8004_0000);
    pub const BAD_COMMUNICATION_ERROR: StatusCode = StatusCode(0x8005_0000);
    pub const BAD_ENCODING_ERROR: StatusCode = StatusCode(0x8006_0000);
    pub const BAD_DECODING_ERROR: StatusCode = StatusCode(0x8007_0000);
    pub const BAD_ENCODING_LIMITS_EXCEEDED: StatusCode = StatusCode(0x8008_0000);
    pub const BAD_UNKNOWN_RESPONSE: StatusCode = StatusCode(0x8009_0000);
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800A_0000);
    pub const BAD_SERVICE_UNSUPPORTED: StatusCode = StatusCode(0x800B_0000);
    pub const BAD_SHUTDOWN: StatusCode = StatusCode(0x800C_0000);
    pub const BAD_SERVER_HALTED: StatusCode = StatusCode(0x800E_0000);
    pub const BAD_NOTHING_TO_DO: StatusCode = StatusCode(0x800F_0000);
    pub const BAD_TOO_MANY_OPERATIONS: StatusCode = StatusCode(0x8010_0000);
    pub const BAD_SECURITY_CHECKS_FAILED: StatusCode = StatusCode(0x8013_0000);
    pub const BAD_USER_ACCESS_DENIED: StatusCode = StatusCode(0x801F_0000);
    pub const BAD_IDENTITY_TOKEN_INVALID: StatusCode = StatusCode(0x8020_0000);
    pub const BAD_IDENTITY_TOKEN_REJECTED: StatusCode = StatusCode(0x8021_0000);
    pub const BAD_SECURE_CHANNEL_ID_INVALID: StatusCode = StatusCode(0x8022_0000);
    pub const BAD_NONCE_INVALID: StatusCode = StatusCode(0x8024_0000);
    pub const BAD_SESSION_ID_INVALID: StatusCode = StatusCode(0x8025_0000);
    pub const BAD_SESSION_CLOSED: StatusCode = StatusCode(0x8026_0000);
    pub const BAD_SESSION_NOT_ACTIVATED: StatusCode = StatusCode(0x8027_0000);
    pub const BAD_SUBSCRIPTION_ID_INVALID: StatusCode = StatusCode(0x8028_0000);
    pub const BAD_REQUEST_HEADER_INVALID: StatusCode = StatusCode(0x802A_0000);
    pub const BAD_TIMESTAMPS_TO_RETURN_INVALID: StatusCode = StatusCode(0x802B_0000);
    pub const BAD_REQUEST_CANCELLED_BY_CLIENT: StatusCode = StatusCode(0x802C_0000);
    pub const BAD_NODE_ID_INVALID: StatusCode = StatusCode(0x8033_0000);
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8034_0000);
    pub const BAD_ATTRIBUTE_ID_INVALID: StatusCode = StatusCode(0x8035_0000);
    pub const BAD_INDEX_RANGE_INVALID: StatusCode = StatusCode(0x8036_0000);
    pub const BAD_NOT_READABLE: StatusCode = StatusCode(0x803A_0000);
    pub const BAD_NOT_WRITABLE: StatusCode = StatusCode(0x803B_0000);
    pub const BAD_OUT_OF_RANGE: StatusCode = StatusCode(0x803C_0000);
    pub const BAD_NOT_SUPPORTED: StatusCode = StatusCode(0x803D_0000);
    pub const BAD_NOT_FOUND: StatusCode = StatusCode(0x803E_0000);
    pub const BAD_NOT_IMPLEMENTED: StatusCode = StatusCode(0x8040_0000);
    pub const BAD_MONITORING_MODE_INVALID: StatusCode = StatusCode(0x8041_0000);
    pub const BAD_MONITORED_ITEM_ID_INVALID: StatusCode = StatusCode(0x8042_0000);
    pub const BAD_MONITORED_ITEM_FILTER_INVALID: StatusCode = StatusCode(0x8043_0000);
    pub const BAD_MONITORED_ITEM_FILTER_UNSUPPORTED: StatusCode = StatusCode(0x8044_0000);
    pub const BAD_FILTER_NOT_ALLOWED: StatusCode = StatusCode(0x8045_0000);
    pub const BAD_STRUCTURE_MISSING: StatusCode = StatusCode(0x8046_0000);
    pub const BAD_EVENT_FILTER_INVALID: StatusCode = StatusCode(0x8047_0000);
    pub const BAD_CONTENT_FILTER_INVALID: StatusCode = StatusCode(0x8048_0000);
    pub const BAD_CONTINUATION_POINT_INVALID: StatusCode = StatusCode(0x804A_0000);
    pub const BAD_NO_CONTINUATION_POINTS: StatusCode = StatusCode(0x804B_0000);
    pub const BAD_REFERENCE_TYPE_ID_INVALID: StatusCode = StatusCode(0x804C_0000);
    pub const BAD_BROWSE_DIRECTION_INVALID: StatusCode = StatusCode(0x804D_0000);
    pub const BAD_NODE_NOT_IN_VIEW: StatusCode = StatusCode(0x804E_0000);
    pub const BAD_TOO_MANY_SESSIONS: StatusCode = StatusCode(0x8056_0000);
    pub const BAD_APPLICATION_SIGNATURE_INVALID: StatusCode = StatusCode(0x8058_0000);
    pub const BAD_REQUEST_CANCELLED_BY_REQUEST: StatusCode = StatusCode(0x805A_0000);
    pub const BAD_BROWSE_NAME_INVALID: StatusCode = StatusCode(0x8060_0000);
    pub const BAD_SERVER_INDEX_INVALID: StatusCode = StatusCode(0x806A_0000);
    pub const BAD_NO_MATCH: StatusCode = StatusCode(0x806F_0000);
    pub const BAD_MAX_AGE_INVALID: StatusCode = StatusCode(0x8070_0000);
    pub const BAD_HISTORY_OPERATION_INVALID: StatusCode = StatusCode(0x8071_0000);
    pub const BAD_HISTORY_OPERATION_UNSUPPORTED: StatusCode = StatusCode(0x8072_0000);
    pub const BAD_WRITE_NOT_SUPPORTED: StatusCode = StatusCode(0x8073_0000);
    pub const BAD_TYPE_MISMATCH: StatusCode = StatusCode(0x8074_0000);
    pub const BAD_METHOD_INVALID: StatusCode = StatusCode(0x8075_0000);
    pub const BAD_ARGUMENTS_MISSING: StatusCode = StatusCode(0x8076_0000);
    pub const BAD_TOO_MANY_SUBSCRIPTIONS: StatusCode = StatusCode(0x8077_0000);
    pub const BAD_TOO_MANY_PUBLISH_REQUESTS: StatusCode = StatusCode(0x8078_0000);
    pub const BAD_NO_SUBSCRIPTION: StatusCode = StatusCode(0x8079_0000);
    pub const BAD_SEQUENCE_NUMBER_UNKNOWN: StatusCode = StatusCode(0x807A_0000);
    pub const BAD_MESSAGE_NOT_AVAILABLE: StatusCode = StatusCode(0x807B_0000);
    pub const BAD_TCP_SERVER_TOO_BUSY: StatusCode = StatusCode(0x807D_0000);
    pub const BAD_TCP_MESSAGE_TYPE_INVALID: StatusCode = StatusCode(0x807E_0000);
    pub const BAD_TCP_SECURE_CHANNEL_UNKNOWN: StatusCode = StatusCode(0x807F_0000);
    pub const BAD_TCP_MESSAGE_TOO_LARGE: StatusCode = StatusCode(0x8080_0000);
    pub const BAD_TCP_INTERNAL_ERROR: StatusCode = StatusCode(0x8082_0000);
    pub const BAD_TCP_ENDPOINT_URL_INVALID: StatusCode = StatusCode(0x8083_0000);
    pub const BAD_REQUEST_TIMEOUT: StatusCode = StatusCode(0x8085_0000);
    pub const BAD_SECURE_CHANNEL_CLOSED: StatusCode = StatusCode(0x8086_0000);
    pub const BAD_SECURE_CHANNEL_TOKEN_UNKNOWN: StatusCode = StatusCode(0x8087_0000);
    pub const BAD_SEQUENCE_NUMBER_INVALID: StatusCode = StatusCode(0x8088_0000);
    pub const BAD_CONFIGURATION_ERROR: StatusCode = StatusCode(0x8089_0000);
    pub const BAD_NOT_CONNECTED: StatusCode = StatusCode(0x808A_0000);
    pub const BAD_DEADBAND_FILTER_INVALID: StatusCode = StatusCode(0x808E_0000);
    pub const BAD_INVALID_ARGUMENT: StatusCode = StatusCode(0x80AB_0000);
    pub const BAD_CONNECTION_CLOSED: StatusCode = StatusCode(0x80AE_0000);
    pub const BAD_INVALID_STATE: StatusCode = StatusCode(0x80AF_0000);
    pub const BAD_END_OF_STREAM: StatusCode = StatusCode(0x80B0_0000);
    pub const BAD_MAX_CONNECTIONS_REACHED: StatusCode = StatusCode(0x80B7_0000);
    pub const BAD_REQUEST_TOO_LARGE: StatusCode = StatusCode(0x80B8_0000);
    pub const BAD_RESPONSE_TOO_LARGE: StatusCode = StatusCode(0x80B9_0000);
    pub const BAD_PROTOCOL_VERSION_UNSUPPORTED: StatusCode = StatusCode(0x80BE_0000);
    pub const BAD_TOO_MANY_MONITORED_ITEMS: StatusCode = StatusCode(0x80DB_0000);
    pub const BAD_TOO_MANY_ARGUMENTS: StatusCode = StatusCode(0x80E5_0000);

    const SEVERITY_MASK: u32 = 0xC000_0000;
    const SEVERITY_GOOD: u32 = 0x0000_0000;
    const SEVERITY_UNCERTAIN: u32 = 0x4000_0000;
    const SEVERITY_BAD: u32 = 0x8000_0000;

    /// Info-type bits marking the low 10 bits as data-value info flags.
    const INFO_TYPE_DATA_VALUE: u32 = 0x0000_0400;
    /// Overflow info bit (only meaningful with the data-value info type).
    const OVERFLOW_BIT: u32 = 0x0000_0080;

    pub fn is_good(self) -> bool {
        self.0 & Self::SEVERITY_MASK == Self::SEVERITY_GOOD
    }

    pub fn is_uncertain(self) -> bool {
        self.0 & Self::SEVERITY_MASK == Self::SEVERITY_UNCERTAIN
    }

    pub fn is_bad(self) -> bool {
        self.0 & Self::SEVERITY_MASK == Self::SEVERITY_BAD
    }

    /// The code with severity and sub-code only, info bits stripped.
    pub fn sub_code(self) -> StatusCode {
        StatusCode(self.0 & 0xFFFF_0000)
    }

    /// Returns this code with the data-value overflow info bit set.
    pub fn with_overflow(self) -> StatusCode {
        StatusCode(self.0 | Self::INFO_TYPE_DATA_VALUE | Self::OVERFLOW_BIT)
    }

    pub fn overflow(self) -> bool {
        self.0 & Self::INFO_TYPE_DATA_VALUE != 0 && self.0 & Self::OVERFLOW_BIT != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl From<u32> for StatusCode {
    fn from(bits: u32) -> Self {
        StatusCode(bits)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}
