//! Secure channel state machine.
//!
//! ```text
//!   Idle --HEL/ACK--> Negotiated --OPN--> Open --OPN(renew)--> Open (dual token)
//!    |                                      |--CLO or fatal error--> Closed
//! ```
//!
//! One [`SecureChannel`] exists per transport connection. It owns the
//! negotiated [`TransportLimits`], the token lifecycle, sequence-number
//! validation and chunk reassembly. Cryptography is delegated to a
//! [`SecurityPolicy`]; the built-in [`NoSecurity`] policy passes bytes
//! through untouched.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::chunk::{
    split_message, AssemblyStep, ChunkAssembler, ChunkHeader, ChunkMessageType, IsFinal,
    TransportLimits, CHUNK_HEADER_SIZE,
};
use crate::messages::{
    AcknowledgeMessage, AsymmetricSecurityHeader, ChannelSecurityToken, HelloMessage,
    OpenSecureChannelRequest, OpenSecureChannelResponse, RequestHeader, ResponseHeader,
    SecurityTokenRequestType, SequenceHeader,
};
use crate::types::{
    BinaryDecode, BinaryEncode, ByteString, DateTime, DecodingLimits, EncodingResult, StatusCode,
};

/// The protocol version this stack speaks.
pub const PROTOCOL_VERSION: u32 = 0;

/// Sequence numbers may wrap once they pass this value, restarting below
/// 1024.
const SEQUENCE_WRAP_THRESHOLD: u32 = 4_294_966_271;

// ============================================================================
// SECURITY POLICY SEAM
// ============================================================================

/// Message security provider for a channel.
///
/// Real implementations wrap X.509 certificates and the OPC UA crypto
/// suites; they are out of scope here and plug in through this trait.
pub trait SecurityPolicy: Send + Sync {
    /// Policy URI advertised in the asymmetric security header.
    fn uri(&self) -> &str;

    /// Fresh nonce of the policy's symmetric key length.
    fn create_nonce(&self) -> ByteString;

    /// Verify and strip protection from a received chunk body.
    fn unprotect(&self, body: Bytes) -> Result<Bytes, StatusCode>;

    /// Apply protection to an outgoing chunk body.
    fn protect(&self, body: Bytes) -> Result<Bytes, StatusCode>;
}

/// `SecurityPolicy#None`: no signing, no encryption, empty nonces.
pub struct NoSecurity;

impl SecurityPolicy for NoSecurity {
    fn uri(&self) -> &str {
        "http://opcfoundation.org/UA/SecurityPolicy#None"
    }

    fn create_nonce(&self) -> ByteString {
        ByteString::null()
    }

    fn unprotect(&self, body: Bytes) -> Result<Bytes, StatusCode> {
        Ok(body)
    }

    fn protect(&self, body: Bytes) -> Result<Bytes, StatusCode> {
        Ok(body)
    }
}

// ============================================================================
// CHANNEL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Waiting for HEL.
    Idle,
    /// HEL/ACK done, waiting for OPN.
    Negotiated,
    /// Channel open, MSG traffic allowed.
    Open,
    /// Closed by CLO, error or token expiry. Terminal.
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct SecurityToken {
    token_id: u32,
    issued_at: Instant,
    lifetime: Duration,
}

impl SecurityToken {
    fn expires_at(&self) -> Instant {
        self.issued_at + self.lifetime
    }
}

/// A decoded inbound service message, correlated by request id.
#[derive(Debug)]
pub struct InboundMessage {
    pub request_id: u32,
    pub message_type: ChunkMessageType,
    pub body: Bytes,
}

/// Per-connection secure channel.
pub struct SecureChannel {
    state: ChannelState,
    channel_id: u32,
    policy: Arc<dyn SecurityPolicy>,
    limits: TransportLimits,
    decoding_limits: DecodingLimits,
    max_token_lifetime: Duration,
    current_token: Option<SecurityToken>,
    /// Still accepted for `lifetime / 4` after a renewal.
    previous_token: Option<SecurityToken>,
    client_nonce: ByteString,
    server_nonce: ByteString,
    send_sequence_number: u32,
    last_received_sequence_number: Option<u32>,
    assembler: ChunkAssembler,
}

impl SecureChannel {
    pub fn new(
        policy: Arc<dyn SecurityPolicy>,
        limits: TransportLimits,
        decoding_limits: DecodingLimits,
        max_token_lifetime: Duration,
    ) -> Self {
        Self {
            state: ChannelState::Idle,
            channel_id: 0,
            policy,
            assembler: ChunkAssembler::new(limits),
            limits,
            decoding_limits,
            max_token_lifetime,
            current_token: None,
            previous_token: None,
            client_nonce: ByteString::null(),
            server_nonce: ByteString::null(),
            send_sequence_number: 0,
            last_received_sequence_number: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    pub fn limits(&self) -> TransportLimits {
        self.limits
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub fn close(&mut self) {
        self.state = ChannelState::Closed;
    }

    /// Instant at which the active token (and its grace window) lapses, for
    /// the engine's timer wheel.
    pub fn token_deadline(&self) -> Option<Instant> {
        let current = self.current_token.as_ref()?;
        Some(current.expires_at())
    }

    // ------------------------------------------------------------------
    // HEL / ACK
    // ------------------------------------------------------------------

    /// Process a HEL payload, transitioning `Idle -> Negotiated`.
    pub fn on_hello(&mut self, hello: &HelloMessage) -> Result<AcknowledgeMessage, StatusCode> {
        if self.state != ChannelState::Idle {
            return Err(StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID);
        }
        if hello.protocol_version != PROTOCOL_VERSION {
            return Err(StatusCode::BAD_PROTOCOL_VERSION_UNSUPPORTED);
        }
        if hello.endpoint_url.as_ref().is_some_and(|url| url.len() > 4096) {
            return Err(StatusCode::BAD_TCP_ENDPOINT_URL_INVALID);
        }
        self.limits = self.limits.revise(hello);
        self.assembler = ChunkAssembler::new(self.limits);
        self.state = ChannelState::Negotiated;
        debug!(
            receive = self.limits.receive_buffer_size,
            send = self.limits.send_buffer_size,
            max_message = self.limits.max_message_size,
            max_chunks = self.limits.max_chunk_count,
            "transport limits negotiated"
        );
        Ok(AcknowledgeMessage {
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size: self.limits.receive_buffer_size,
            send_buffer_size: self.limits.send_buffer_size,
            max_message_size: self.limits.max_message_size,
            max_chunk_count: self.limits.max_chunk_count,
        })
    }

    // ------------------------------------------------------------------
    // OPN
    // ------------------------------------------------------------------

    /// Process an OpenSecureChannel request. `channel_id` is assigned by
    /// the engine on first open and must be process-unique.
    pub fn on_open(
        &mut self,
        request: &OpenSecureChannelRequest,
        channel_id: u32,
        token_id: u32,
        now: Instant,
    ) -> Result<OpenSecureChannelResponse, StatusCode> {
        match (self.state, request.request_type) {
            (ChannelState::Negotiated, SecurityTokenRequestType::Issue) => {
                self.channel_id = channel_id;
            }
            (ChannelState::Open, SecurityTokenRequestType::Renew) => {
                // Renewal keeps the channel id; the old token stays valid
                // for a quarter lifetime.
            }
            (ChannelState::Open, SecurityTokenRequestType::Issue) => {
                return Err(StatusCode::BAD_INVALID_STATE);
            }
            _ => return Err(StatusCode::BAD_INVALID_STATE),
        }

        let requested = Duration::from_millis(u64::from(request.requested_lifetime.max(1)));
        let lifetime = requested.min(self.max_token_lifetime);
        let token = SecurityToken {
            token_id,
            issued_at: now,
            lifetime,
        };
        if let Some(previous) = self.current_token.take() {
            self.previous_token = Some(SecurityToken {
                // The grace window for the replaced token.
                lifetime: previous.lifetime / 4,
                issued_at: now,
                ..previous
            });
        }
        self.current_token = Some(token);
        self.client_nonce = request.client_nonce.clone();
        self.server_nonce = self.policy.create_nonce();
        self.state = ChannelState::Open;
        debug!(
            channel_id = self.channel_id,
            token_id,
            lifetime_ms = lifetime.as_millis() as u64,
            renew = (request.request_type == SecurityTokenRequestType::Renew),
            "secure channel token issued"
        );

        Ok(OpenSecureChannelResponse {
            response_header: ResponseHeader::new(&request.request_header, StatusCode::GOOD),
            server_protocol_version: PROTOCOL_VERSION,
            security_token: ChannelSecurityToken {
                channel_id: self.channel_id,
                token_id,
                created_at: DateTime::now(),
                revised_lifetime: lifetime.as_millis() as u32,
            },
            server_nonce: self.server_nonce.clone(),
        })
    }

    // ------------------------------------------------------------------
    // INBOUND CHUNKS
    // ------------------------------------------------------------------

    /// Process one raw secure chunk (`MSG` or `CLO`). Returns a complete
    /// message once all its chunks arrived.
    ///
    /// Errors are fatal to the channel; the caller sends ERR and closes.
    pub fn receive_chunk(&mut self, raw: Bytes, now: Instant) -> Result<Option<InboundMessage>, StatusCode> {
        let mut cursor = raw.clone();
        let header = ChunkHeader::parse(&mut cursor)?;
        if !header.message_type.is_secure() || header.message_type == ChunkMessageType::OpenChannel
        {
            return Err(StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID);
        }
        if self.state != ChannelState::Open {
            return Err(StatusCode::BAD_SECURE_CHANNEL_CLOSED);
        }
        if raw.len() > self.limits.receive_buffer_size as usize {
            return Err(StatusCode::BAD_TCP_MESSAGE_TOO_LARGE);
        }
        if cursor.remaining() < 4 {
            return Err(StatusCode::BAD_DECODING_ERROR);
        }
        let channel_id = cursor.get_u32_le();
        if channel_id != self.channel_id {
            return Err(StatusCode::BAD_TCP_SECURE_CHANNEL_UNKNOWN);
        }
        if cursor.remaining() < 4 {
            return Err(StatusCode::BAD_DECODING_ERROR);
        }
        let token_id = cursor.get_u32_le();
        self.check_token(token_id, now)?;

        let protected = raw.slice(raw.len() - cursor.remaining()..);
        let mut plain = self.policy.unprotect(protected)?;
        let sequence_header = SequenceHeader::decode(&mut plain, &self.decoding_limits)?;
        self.check_sequence_number(sequence_header.sequence_number)?;

        trace!(
            channel_id,
            request_id = sequence_header.request_id,
            seq = sequence_header.sequence_number,
            len = plain.len(),
            "chunk received"
        );

        match self
            .assembler
            .push(sequence_header.request_id, header.is_final, &plain)?
        {
            AssemblyStep::Complete(body) => Ok(Some(InboundMessage {
                request_id: sequence_header.request_id,
                message_type: header.message_type,
                body,
            })),
            AssemblyStep::More | AssemblyStep::Aborted => Ok(None),
        }
    }

    fn check_token(&mut self, token_id: u32, now: Instant) -> Result<(), StatusCode> {
        if let Some(current) = &self.current_token {
            if current.token_id == token_id {
                return if now < current.expires_at() {
                    Ok(())
                } else {
                    warn!(channel_id = self.channel_id, token_id, "token expired");
                    Err(StatusCode::BAD_SECURE_CHANNEL_TOKEN_UNKNOWN)
                };
            }
        }
        if let Some(previous) = &self.previous_token {
            if previous.token_id == token_id && now < previous.expires_at() {
                return Ok(());
            }
        }
        warn!(channel_id = self.channel_id, token_id, "unknown token");
        Err(StatusCode::BAD_SECURE_CHANNEL_TOKEN_UNKNOWN)
    }

    fn check_sequence_number(&mut self, sequence_number: u32) -> Result<(), StatusCode> {
        let valid = match self.last_received_sequence_number {
            None => true,
            Some(last) if sequence_number == last.wrapping_add(1) => true,
            // Explicit wrap permitted near the top of the range.
            Some(last) if last >= SEQUENCE_WRAP_THRESHOLD && sequence_number < 1024 => true,
            Some(_) => false,
        };
        if valid {
            self.last_received_sequence_number = Some(sequence_number);
            Ok(())
        } else {
            warn!(
                channel_id = self.channel_id,
                got = sequence_number,
                last = ?self.last_received_sequence_number,
                "out-of-order chunk sequence"
            );
            Err(StatusCode::BAD_SECURE_CHANNEL_ID_INVALID)
        }
    }

    // ------------------------------------------------------------------
    // OUTBOUND
    // ------------------------------------------------------------------

    /// Frame an encoded response body into MSG chunks under the negotiated
    /// limits.
    pub fn frame_message(&mut self, request_id: u32, body: &[u8]) -> Result<Vec<Bytes>, StatusCode> {
        if self.state != ChannelState::Open {
            return Err(StatusCode::BAD_SECURE_CHANNEL_CLOSED);
        }
        let token_id = self
            .current_token
            .as_ref()
            .map(|t| t.token_id)
            .ok_or(StatusCode::BAD_SECURE_CHANNEL_CLOSED)?;
        let channel_id = self.channel_id;
        let mut sequence = self.send_sequence_number;
        let chunks = split_message(
            ChunkMessageType::Message,
            channel_id,
            token_id,
            request_id,
            &mut || {
                sequence = next_sequence(sequence);
                sequence
            },
            body,
            &self.limits,
        )?;
        self.send_sequence_number = sequence;
        Ok(chunks)
    }

    /// Frame an OPN response. OPN chunks carry the asymmetric security
    /// header instead of a token id and must fit one chunk.
    pub fn frame_open_response(
        &mut self,
        request_id: u32,
        response: &OpenSecureChannelResponse,
    ) -> EncodingResult<Bytes> {
        let mut body = BytesMut::new();
        let security_header = AsymmetricSecurityHeader {
            security_policy_uri: Some(self.policy.uri().to_string()),
            sender_certificate: ByteString::null(),
            receiver_certificate_thumbprint: ByteString::null(),
        };
        security_header.encode(&mut body)?;
        self.send_sequence_number = next_sequence(self.send_sequence_number);
        SequenceHeader {
            sequence_number: self.send_sequence_number,
            request_id,
        }
        .encode(&mut body)?;
        crate::messages::ResponseMessage::from(response.clone()).encode(&mut body)?;

        let mut chunk = BytesMut::with_capacity(CHUNK_HEADER_SIZE + 4 + body.len());
        ChunkHeader {
            message_type: ChunkMessageType::OpenChannel,
            is_final: IsFinal::Final,
            size: (CHUNK_HEADER_SIZE + 4 + body.len()) as u32,
        }
        .serialize(&mut chunk);
        chunk.put_u32_le(self.channel_id);
        chunk.put_slice(&body);
        Ok(chunk.freeze())
    }

    /// Parse the body of an inbound OPN chunk: asymmetric header, sequence
    /// header, then the request message.
    pub fn parse_open_request(
        &mut self,
        raw: Bytes,
    ) -> Result<(u32, OpenSecureChannelRequest), StatusCode> {
        let mut cursor = raw;
        let header = ChunkHeader::parse(&mut cursor)?;
        if header.message_type != ChunkMessageType::OpenChannel {
            return Err(StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID);
        }
        if cursor.remaining() < 4 {
            return Err(StatusCode::BAD_DECODING_ERROR);
        }
        let _channel_id = cursor.get_u32_le();
        let _security_header =
            AsymmetricSecurityHeader::decode(&mut cursor, &self.decoding_limits)?;
        let sequence_header = SequenceHeader::decode(&mut cursor, &self.decoding_limits)?;
        self.check_sequence_number(sequence_header.sequence_number)?;
        let message =
            crate::messages::RequestMessage::decode(&mut cursor, &self.decoding_limits)?;
        match message {
            crate::messages::RequestMessage::OpenSecureChannel(request) => {
                Ok((sequence_header.request_id, request))
            }
            _ => Err(StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID),
        }
    }
}

fn next_sequence(current: u32) -> u32 {
    if current >= SEQUENCE_WRAP_THRESHOLD {
        1
    } else {
        current + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::RequestHeader;

    fn hello() -> HelloMessage {
        HelloMessage {
            protocol_version: 0,
            receive_buffer_size: 65_535,
            send_buffer_size: 65_535,
            max_message_size: 0,
            max_chunk_count: 0,
            endpoint_url: Some("opc.tcp://localhost:4840/".to_string()),
        }
    }

    fn open_request(request_type: SecurityTokenRequestType, lifetime: u32) -> OpenSecureChannelRequest {
        OpenSecureChannelRequest {
            request_header: RequestHeader::default(),
            client_protocol_version: 0,
            request_type,
            security_mode: crate::messages::MessageSecurityMode::None,
            client_nonce: ByteString::null(),
            requested_lifetime: lifetime,
        }
    }

    fn channel() -> SecureChannel {
        SecureChannel::new(
            Arc::new(NoSecurity),
            TransportLimits::default(),
            DecodingLimits::default(),
            Duration::from_secs(3600),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn hello_then_open_issue() {
        let mut ch = channel();
        assert_eq!(ch.state(), ChannelState::Idle);
        let ack = ch.on_hello(&hello()).unwrap();
        assert_eq!(ack.protocol_version, 0);
        assert_eq!(ch.state(), ChannelState::Negotiated);

        let response = ch
            .on_open(&open_request(SecurityTokenRequestType::Issue, 60_000), 101, 1, Instant::now())
            .unwrap();
        assert_eq!(ch.state(), ChannelState::Open);
        assert_eq!(response.security_token.channel_id, 101);
        assert_eq!(response.security_token.revised_lifetime, 60_000);
    }

    #[tokio::test(start_paused = true)]
    async fn lifetime_clamped_to_server_maximum() {
        let mut ch = channel();
        ch.on_hello(&hello()).unwrap();
        let response = ch
            .on_open(
                &open_request(SecurityTokenRequestType::Issue, 100_000_000),
                1,
                1,
                Instant::now(),
            )
            .unwrap();
        assert_eq!(response.security_token.revised_lifetime, 3_600_000);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_protocol_version_rejected() {
        let mut ch = channel();
        let mut bad = hello();
        bad.protocol_version = 7;
        assert_eq!(
            ch.on_hello(&bad).unwrap_err(),
            StatusCode::BAD_PROTOCOL_VERSION_UNSUPPORTED
        );
    }

    #[tokio::test(start_paused = true)]
    async fn msg_before_open_is_fatal() {
        let mut ch = channel();
        ch.on_hello(&hello()).unwrap();
        let mut chunk = BytesMut::new();
        ChunkHeader {
            message_type: ChunkMessageType::Message,
            is_final: IsFinal::Final,
            size: 24,
        }
        .serialize(&mut chunk);
        chunk.put_u32_le(1);
        chunk.put_u32_le(1);
        chunk.put_u32_le(1);
        chunk.put_u32_le(1);
        assert_eq!(
            ch.receive_chunk(chunk.freeze(), Instant::now()).unwrap_err(),
            StatusCode::BAD_SECURE_CHANNEL_CLOSED
        );
    }

    fn msg_chunk(channel_id: u32, token_id: u32, seq: u32, request_id: u32, body: &[u8]) -> Bytes {
        let mut chunk = BytesMut::new();
        ChunkHeader {
            message_type: ChunkMessageType::Message,
            is_final: IsFinal::Final,
            size: (24 + body.len()) as u32,
        }
        .serialize(&mut chunk);
        chunk.put_u32_le(channel_id);
        chunk.put_u32_le(token_id);
        chunk.put_u32_le(seq);
        chunk.put_u32_le(request_id);
        chunk.put_slice(body);
        chunk.freeze()
    }

    fn opened_channel() -> SecureChannel {
        let mut ch = channel();
        ch.on_hello(&hello()).unwrap();
        ch.on_open(&open_request(SecurityTokenRequestType::Issue, 60_000), 7, 1, Instant::now())
            .unwrap();
        ch
    }

    #[tokio::test(start_paused = true)]
    async fn message_reception_and_request_id() {
        let mut ch = opened_channel();
        let inbound = ch
            .receive_chunk(msg_chunk(7, 1, 1, 55, &[1, 2, 3]), Instant::now())
            .unwrap()
            .unwrap();
        assert_eq!(inbound.request_id, 55);
        assert_eq!(&inbound.body[..], &[1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_order_sequence_is_fatal() {
        let mut ch = opened_channel();
        ch.receive_chunk(msg_chunk(7, 1, 1, 55, &[1]), Instant::now())
            .unwrap();
        assert_eq!(
            ch.receive_chunk(msg_chunk(7, 1, 5, 56, &[1]), Instant::now())
                .unwrap_err(),
            StatusCode::BAD_SECURE_CHANNEL_ID_INVALID
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_channel_id_is_fatal() {
        let mut ch = opened_channel();
        assert_eq!(
            ch.receive_chunk(msg_chunk(9, 1, 1, 55, &[1]), Instant::now())
                .unwrap_err(),
            StatusCode::BAD_TCP_SECURE_CHANNEL_UNKNOWN
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expired_token_rejected() {
        let mut ch = opened_channel();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(
            ch.receive_chunk(msg_chunk(7, 1, 1, 55, &[1]), Instant::now())
                .unwrap_err(),
            StatusCode::BAD_SECURE_CHANNEL_TOKEN_UNKNOWN
        );
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_keeps_previous_token_for_grace_window() {
        let mut ch = opened_channel();
        ch.receive_chunk(msg_chunk(7, 1, 1, 1, &[1]), Instant::now())
            .unwrap();

        ch.on_open(&open_request(SecurityTokenRequestType::Renew, 60_000), 7, 2, Instant::now())
            .unwrap();
        // Old token still valid inside lifetime/4.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(ch
            .receive_chunk(msg_chunk(7, 1, 2, 2, &[1]), Instant::now())
            .is_ok());
        // And dead after the grace window.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(
            ch.receive_chunk(msg_chunk(7, 1, 3, 3, &[1]), Instant::now())
                .unwrap_err(),
            StatusCode::BAD_SECURE_CHANNEL_TOKEN_UNKNOWN
        );
        // The new token works throughout.
        assert!(ch
            .receive_chunk(msg_chunk(7, 2, 4, 4, &[1]), Instant::now())
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn frame_message_round_trip() {
        let mut server = opened_channel();
        let chunks = server.frame_message(42, &[9u8; 10]).unwrap();
        assert_eq!(chunks.len(), 1);

        // A second channel acting as the peer decodes what we framed.
        let mut peer = SecureChannel::new(
            Arc::new(NoSecurity),
            TransportLimits::default(),
            DecodingLimits::default(),
            Duration::from_secs(3600),
        );
        peer.state = ChannelState::Open;
        peer.channel_id = 7;
        peer.current_token = Some(SecurityToken {
            token_id: 1,
            issued_at: Instant::now(),
            lifetime: Duration::from_secs(60),
        });
        let inbound = peer
            .receive_chunk(chunks[0].clone(), Instant::now())
            .unwrap()
            .unwrap();
        assert_eq!(inbound.request_id, 42);
        assert_eq!(&inbound.body[..], &[9u8; 10]);
    }
}
