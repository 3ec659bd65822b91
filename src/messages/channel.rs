//! Transport handshake and secure-channel service messages.

use super::{binary_enum, binary_struct, RequestHeader, ResponseHeader};
use crate::types::{ByteString, DateTime, UaString};

binary_struct! {
    /// HEL payload: the client's proposed transport limits.
    pub struct HelloMessage {
        pub protocol_version: u32,
        pub receive_buffer_size: u32,
        pub send_buffer_size: u32,
        pub max_message_size: u32,
        pub max_chunk_count: u32,
        pub endpoint_url: UaString,
    }
}

binary_struct! {
    /// ACK payload: the server's revised transport limits.
    pub struct AcknowledgeMessage {
        pub protocol_version: u32,
        pub receive_buffer_size: u32,
        pub send_buffer_size: u32,
        pub max_message_size: u32,
        pub max_chunk_count: u32,
    }
}

binary_struct! {
    /// ERR payload sent before a fatal transport close.
    pub struct ErrorMessage {
        pub error: crate::types::StatusCode,
        pub reason: UaString,
    }
}

binary_struct! {
    /// Security header of an OPN chunk.
    pub struct AsymmetricSecurityHeader {
        pub security_policy_uri: UaString,
        pub sender_certificate: ByteString,
        pub receiver_certificate_thumbprint: ByteString,
    }
}

binary_struct! {
    /// Security header of a MSG/CLO chunk: the active token.
    pub struct SymmetricSecurityHeader {
        pub token_id: u32,
    }
}

binary_struct! {
    /// Sequence header correlating chunks to requests.
    pub struct SequenceHeader {
        pub sequence_number: u32,
        pub request_id: u32,
    }
}

binary_enum! {
    pub enum SecurityTokenRequestType {
        #[default]
        Issue = 0,
        Renew = 1,
    }
}

binary_enum! {
    pub enum MessageSecurityMode {
        #[default]
        Invalid = 0,
        None = 1,
        Sign = 2,
        SignAndEncrypt = 3,
    }
}

binary_struct! {
    pub struct OpenSecureChannelRequest {
        pub request_header: RequestHeader,
        pub client_protocol_version: u32,
        pub request_type: SecurityTokenRequestType,
        pub security_mode: MessageSecurityMode,
        pub client_nonce: ByteString,
        pub requested_lifetime: u32,
    }
}

binary_struct! {
    /// The token issued by an OPN response. Lifetime is in milliseconds.
    pub struct ChannelSecurityToken {
        pub channel_id: u32,
        pub token_id: u32,
        pub created_at: DateTime,
        pub revised_lifetime: u32,
    }
}

binary_struct! {
    pub struct OpenSecureChannelResponse {
        pub response_header: ResponseHeader,
        pub server_protocol_version: u32,
        pub security_token: ChannelSecurityToken,
        pub server_nonce: ByteString,
    }
}

binary_struct! {
    pub struct CloseSecureChannelRequest {
        pub request_header: RequestHeader,
    }
}

binary_struct! {
    pub struct CloseSecureChannelResponse {
        pub response_header: ResponseHeader,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BinaryDecode, BinaryEncode, DecodingLimits};
    use bytes::{Buf, BytesMut};

    #[test]
    fn hello_round_trip() {
        let hello = HelloMessage {
            protocol_version: 0,
            receive_buffer_size: 65_535,
            send_buffer_size: 65_535,
            max_message_size: 16 * 1024 * 1024,
            max_chunk_count: 0,
            endpoint_url: Some("opc.tcp://plant:4840/ua".to_string()),
        };
        let mut buf = BytesMut::new();
        hello.encode(&mut buf).unwrap();
        let mut bytes = buf.freeze();
        let decoded = HelloMessage::decode(&mut bytes, &DecodingLimits::default()).unwrap();
        assert_eq!(hello, decoded);
        assert_eq!(bytes.remaining(), 0);
    }

    #[test]
    fn sequence_header_is_eight_bytes() {
        let header = SequenceHeader {
            sequence_number: 1,
            request_id: 2,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), 8);
    }
}
