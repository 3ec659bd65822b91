//! Session service messages and the identity structures they carry.

use super::channel::MessageSecurityMode;
use super::{binary_enum, binary_struct, RequestHeader, ResponseHeader};
use crate::types::{
    ByteString, DiagnosticInfo, ExtensionObject, LocalizedText, NodeId, StatusCode, UaString,
};

binary_enum! {
    pub enum ApplicationType {
        #[default]
        Server = 0,
        Client = 1,
        ClientAndServer = 2,
        DiscoveryServer = 3,
    }
}

binary_struct! {
    pub struct ApplicationDescription {
        pub application_uri: UaString,
        pub product_uri: UaString,
        pub application_name: LocalizedText,
        pub application_type: ApplicationType,
        pub gateway_server_uri: UaString,
        pub discovery_profile_uri: UaString,
        pub discovery_urls: Option<Vec<String>>,
    }
}

binary_enum! {
    pub enum UserTokenType {
        #[default]
        Anonymous = 0,
        UserName = 1,
        Certificate = 2,
        IssuedToken = 3,
    }
}

binary_struct! {
    pub struct UserTokenPolicy {
        pub policy_id: UaString,
        pub token_type: UserTokenType,
        pub issued_token_type: UaString,
        pub issuer_endpoint_url: UaString,
        pub security_policy_uri: UaString,
    }
}

binary_struct! {
    pub struct EndpointDescription {
        pub endpoint_url: UaString,
        pub server: ApplicationDescription,
        pub server_certificate: ByteString,
        pub security_mode: MessageSecurityMode,
        pub security_policy_uri: UaString,
        pub user_identity_tokens: Option<Vec<UserTokenPolicy>>,
        pub transport_profile_uri: UaString,
        pub security_level: u8,
    }
}

binary_struct! {
    pub struct SignatureData {
        pub algorithm: UaString,
        pub signature: ByteString,
    }
}

binary_struct! {
    pub struct SignedSoftwareCertificate {
        pub certificate_data: ByteString,
        pub signature: ByteString,
    }
}

binary_struct! {
    /// Anonymous identity; rides inside the ActivateSession extension object.
    pub struct AnonymousIdentityToken {
        pub policy_id: UaString,
    }
}

binary_struct! {
    /// User-name identity. Password decryption is the security policy's
    /// concern, not this struct's.
    pub struct UserNameIdentityToken {
        pub policy_id: UaString,
        pub user_name: UaString,
        pub password: ByteString,
        pub encryption_algorithm: UaString,
    }
}

binary_struct! {
    pub struct CreateSessionRequest {
        pub request_header: RequestHeader,
        pub client_description: ApplicationDescription,
        pub server_uri: UaString,
        pub endpoint_url: UaString,
        pub session_name: UaString,
        pub client_nonce: ByteString,
        pub client_certificate: ByteString,
        pub requested_session_timeout: f64,
        pub max_response_message_size: u32,
    }
}

binary_struct! {
    pub struct CreateSessionResponse {
        pub response_header: ResponseHeader,
        pub session_id: NodeId,
        pub authentication_token: NodeId,
        pub revised_session_timeout: f64,
        pub server_nonce: ByteString,
        pub server_certificate: ByteString,
        pub server_endpoints: Option<Vec<EndpointDescription>>,
        pub server_software_certificates: Option<Vec<SignedSoftwareCertificate>>,
        pub server_signature: SignatureData,
        pub max_request_message_size: u32,
    }
}

binary_struct! {
    pub struct ActivateSessionRequest {
        pub request_header: RequestHeader,
        pub client_signature: SignatureData,
        pub client_software_certificates: Option<Vec<SignedSoftwareCertificate>>,
        pub locale_ids: Option<Vec<String>>,
        pub user_identity_token: ExtensionObject,
        pub user_token_signature: SignatureData,
    }
}

binary_struct! {
    pub struct ActivateSessionResponse {
        pub response_header: ResponseHeader,
        pub server_nonce: ByteString,
        pub results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

binary_struct! {
    pub struct CloseSessionRequest {
        pub request_header: RequestHeader,
        pub delete_subscriptions: bool,
    }
}

binary_struct! {
    pub struct CloseSessionResponse {
        pub response_header: ResponseHeader,
    }
}

binary_struct! {
    /// ServerDiagnosticsSummary structure served at i=2275.
    pub struct ServerDiagnosticsSummary {
        pub server_view_count: u32,
        pub current_session_count: u32,
        pub cumulated_session_count: u32,
        pub security_rejected_session_count: u32,
        pub rejected_session_count: u32,
        pub session_timeout_count: u32,
        pub session_abort_count: u32,
        pub publishing_interval_count: u32,
        pub current_subscription_count: u32,
        pub cumulated_subscription_count: u32,
        pub security_rejected_requests_count: u32,
        pub rejected_requests_count: u32,
    }
}

binary_struct! {
    pub struct CancelRequest {
        pub request_header: RequestHeader,
        pub request_handle: u32,
    }
}

binary_struct! {
    pub struct CancelResponse {
        pub response_header: ResponseHeader,
        pub cancel_count: u32,
    }
}
