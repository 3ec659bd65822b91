//! Message chunking.
//!
//! Every transport frame starts with a common header: three ASCII bytes of
//! message type, one `is_final` byte (`C` continuation, `F` final, `A`
//! abort) and the total chunk length as `u32` little-endian. Secure-channel
//! chunks (`OPN`, `CLO`, `MSG`) carry the four-byte channel id next.
//!
//! Outgoing service messages are split so no chunk exceeds the negotiated
//! send buffer; incoming chunks are reassembled per request id under the
//! negotiated count and size limits.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::messages::HelloMessage;
use crate::types::StatusCode;

/// Common header length: type (3) + is_final (1) + size (4).
pub const CHUNK_HEADER_SIZE: usize = 8;
/// Secure-channel chunks carry the channel id right after the header.
pub const SECURE_CHANNEL_ID_SIZE: usize = 4;
/// Symmetric security header (token id) + sequence header (sequence number,
/// request id) carried by every MSG and CLO chunk.
pub const SYMMETRIC_OVERHEAD: usize = 4 + 8;

/// The smallest buffer size a peer may negotiate down to.
pub const MIN_BUFFER_SIZE: u32 = 8192;

/// Frame kinds of the OPC UA TCP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMessageType {
    Hello,
    Acknowledge,
    Error,
    OpenChannel,
    CloseChannel,
    Message,
}

impl ChunkMessageType {
    pub fn as_bytes(self) -> [u8; 3] {
        match self {
            Self::Hello => *b"HEL",
            Self::Acknowledge => *b"ACK",
            Self::Error => *b"ERR",
            Self::OpenChannel => *b"OPN",
            Self::CloseChannel => *b"CLO",
            Self::Message => *b"MSG",
        }
    }

    pub fn from_bytes(bytes: [u8; 3]) -> Option<Self> {
        match &bytes {
            b"HEL" => Some(Self::Hello),
            b"ACK" => Some(Self::Acknowledge),
            b"ERR" => Some(Self::Error),
            b"OPN" => Some(Self::OpenChannel),
            b"CLO" => Some(Self::CloseChannel),
            b"MSG" => Some(Self::Message),
            _ => None,
        }
    }

    /// Whether chunks of this type carry a secure channel id.
    pub fn is_secure(self) -> bool {
        matches!(self, Self::OpenChannel | Self::CloseChannel | Self::Message)
    }
}

/// The `is_final` byte of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsFinal {
    /// `C`: more chunks of this message follow.
    Intermediate,
    /// `F`: last chunk of the message.
    Final,
    /// `A`: the sender aborts the in-flight message.
    Aborted,
}

impl IsFinal {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Intermediate => b'C',
            Self::Final => b'F',
            Self::Aborted => b'A',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'C' => Some(Self::Intermediate),
            b'F' => Some(Self::Final),
            b'A' => Some(Self::Aborted),
            _ => None,
        }
    }
}

/// Parsed common chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub message_type: ChunkMessageType,
    pub is_final: IsFinal,
    /// Total chunk length on the wire, header included.
    pub size: u32,
}

impl ChunkHeader {
    pub fn parse<B: Buf>(buf: &mut B) -> Result<Self, StatusCode> {
        if buf.remaining() < CHUNK_HEADER_SIZE {
            return Err(StatusCode::BAD_DECODING_ERROR);
        }
        let mut kind = [0u8; 3];
        buf.copy_to_slice(&mut kind);
        let message_type =
            ChunkMessageType::from_bytes(kind).ok_or(StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID)?;
        let is_final = IsFinal::from_byte(buf.get_u8())
            .ok_or(StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID)?;
        let size = buf.get_u32_le();
        if (size as usize) < CHUNK_HEADER_SIZE {
            return Err(StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID);
        }
        Ok(Self {
            message_type,
            is_final,
            size,
        })
    }

    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.message_type.as_bytes());
        buf.put_u8(self.is_final.as_byte());
        buf.put_u32_le(self.size);
    }
}

// ============================================================================
// TRANSPORT LIMITS
// ============================================================================

/// The four limits negotiated by HEL/ACK. Zero means unlimited for
/// `max_message_size` and `max_chunk_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLimits {
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            receive_buffer_size: 65_535,
            send_buffer_size: 65_535,
            max_message_size: 16 * 1024 * 1024,
            max_chunk_count: 0,
        }
    }
}

impl TransportLimits {
    /// Pick the effective limits for a connection: `min(client, server)`
    /// per field, where zero counts as unlimited for message size and chunk
    /// count. Note the buffer sizes cross over: what the client can
    /// receive bounds what we may send.
    pub fn revise(&self, hello: &HelloMessage) -> TransportLimits {
        fn min_nonzero(a: u32, b: u32) -> u32 {
            match (a, b) {
                (0, b) => b,
                (a, 0) => a,
                (a, b) => a.min(b),
            }
        }
        TransportLimits {
            receive_buffer_size: self
                .receive_buffer_size
                .min(hello.send_buffer_size.max(MIN_BUFFER_SIZE)),
            send_buffer_size: self
                .send_buffer_size
                .min(hello.receive_buffer_size.max(MIN_BUFFER_SIZE)),
            max_message_size: min_nonzero(self.max_message_size, hello.max_message_size),
            max_chunk_count: min_nonzero(self.max_chunk_count, hello.max_chunk_count),
        }
    }
}

// ============================================================================
// SPLITTING
// ============================================================================

/// Split an encoded service message into framed MSG (or CLO) chunks.
///
/// Each chunk is `header | channel id | token id | sequence header | body
/// part`; the sequence counter advances once per chunk.
pub fn split_message(
    message_type: ChunkMessageType,
    channel_id: u32,
    token_id: u32,
    request_id: u32,
    next_sequence_number: &mut impl FnMut() -> u32,
    body: &[u8],
    limits: &TransportLimits,
) -> Result<Vec<Bytes>, StatusCode> {
    debug_assert!(message_type.is_secure());
    let overhead = CHUNK_HEADER_SIZE + SECURE_CHANNEL_ID_SIZE + SYMMETRIC_OVERHEAD;
    let max_body = (limits.send_buffer_size as usize)
        .saturating_sub(overhead)
        .max(1);
    let chunk_count = body.len().div_ceil(max_body).max(1);

    if limits.max_chunk_count != 0 && chunk_count > limits.max_chunk_count as usize {
        return Err(StatusCode::BAD_TCP_MESSAGE_TOO_LARGE);
    }
    if limits.max_message_size != 0 && body.len() > limits.max_message_size as usize {
        return Err(StatusCode::BAD_TCP_MESSAGE_TOO_LARGE);
    }

    let mut chunks = Vec::with_capacity(chunk_count);
    for (index, part) in split_parts(body, max_body, chunk_count).enumerate() {
        let is_final = if index + 1 == chunk_count {
            IsFinal::Final
        } else {
            IsFinal::Intermediate
        };
        let mut chunk = BytesMut::with_capacity(overhead + part.len());
        ChunkHeader {
            message_type,
            is_final,
            size: (overhead + part.len()) as u32,
        }
        .serialize(&mut chunk);
        chunk.put_u32_le(channel_id);
        chunk.put_u32_le(token_id);
        chunk.put_u32_le(next_sequence_number());
        chunk.put_u32_le(request_id);
        chunk.put_slice(part);
        chunks.push(chunk.freeze());
    }
    Ok(chunks)
}

fn split_parts(body: &[u8], max_body: usize, chunk_count: usize) -> impl Iterator<Item = &[u8]> {
    // An empty body still produces one empty chunk.
    (0..chunk_count).map(move |i| {
        let start = i * max_body;
        let end = (start + max_body).min(body.len());
        &body[start..end]
    })
}

// ============================================================================
// REASSEMBLY
// ============================================================================

struct PartialMessage {
    body: BytesMut,
    chunk_count: u32,
}

/// Reassembles chunked request bodies, one accumulator per request id.
///
/// Interleaved chunk sequences from different requests are accepted; the
/// chunks of a single request must arrive contiguously and in order, which
/// the caller guarantees by validating sequence numbers first.
pub struct ChunkAssembler {
    limits: TransportLimits,
    in_progress: HashMap<u32, PartialMessage>,
}

/// One step of reassembly.
#[derive(Debug, PartialEq)]
pub enum AssemblyStep {
    /// Message incomplete, more chunks expected.
    More,
    /// A full message body is ready.
    Complete(Bytes),
    /// The peer aborted the message; the buffered chunks were discarded.
    Aborted,
}

impl ChunkAssembler {
    pub fn new(limits: TransportLimits) -> Self {
        Self {
            limits,
            in_progress: HashMap::new(),
        }
    }

    /// Feed one decrypted chunk body (the bytes after the sequence header).
    pub fn push(
        &mut self,
        request_id: u32,
        is_final: IsFinal,
        body: &[u8],
    ) -> Result<AssemblyStep, StatusCode> {
        if is_final == IsFinal::Aborted {
            self.in_progress.remove(&request_id);
            return Ok(AssemblyStep::Aborted);
        }

        let partial = self
            .in_progress
            .entry(request_id)
            .or_insert_with(|| PartialMessage {
                body: BytesMut::new(),
                chunk_count: 0,
            });
        partial.chunk_count += 1;
        if self.limits.max_chunk_count != 0 && partial.chunk_count > self.limits.max_chunk_count {
            self.in_progress.remove(&request_id);
            return Err(StatusCode::BAD_TCP_MESSAGE_TOO_LARGE);
        }
        if self.limits.max_message_size != 0
            && partial.body.len() + body.len() > self.limits.max_message_size as usize
        {
            self.in_progress.remove(&request_id);
            return Err(StatusCode::BAD_TCP_MESSAGE_TOO_LARGE);
        }
        partial.body.put_slice(body);

        match is_final {
            IsFinal::Final => {
                let partial = self
                    .in_progress
                    .remove(&request_id)
                    .unwrap_or(PartialMessage {
                        body: BytesMut::new(),
                        chunk_count: 0,
                    });
                Ok(AssemblyStep::Complete(partial.body.freeze()))
            }
            IsFinal::Intermediate => Ok(AssemblyStep::More),
            IsFinal::Aborted => unreachable!("handled above"),
        }
    }

    /// Number of requests with buffered partial chunks.
    pub fn pending(&self) -> usize {
        self.in_progress.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(send: u32, chunks: u32, msg: u32) -> TransportLimits {
        TransportLimits {
            receive_buffer_size: send,
            send_buffer_size: send,
            max_message_size: msg,
            max_chunk_count: chunks,
        }
    }

    fn collect_bodies(chunks: &[Bytes]) -> Vec<Vec<u8>> {
        let overhead = CHUNK_HEADER_SIZE + SECURE_CHANNEL_ID_SIZE + SYMMETRIC_OVERHEAD;
        chunks.iter().map(|c| c[overhead..].to_vec()).collect()
    }

    #[test]
    fn header_round_trip() {
        let header = ChunkHeader {
            message_type: ChunkMessageType::Message,
            is_final: IsFinal::Intermediate,
            size: 128,
        };
        let mut buf = BytesMut::new();
        header.serialize(&mut buf);
        assert_eq!(&buf[0..4], b"MSGC");
        let parsed = ChunkHeader::parse(&mut buf.freeze()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut buf = BytesMut::new();
        buf.put_slice(b"XXXF");
        buf.put_u32_le(8);
        assert_eq!(
            ChunkHeader::parse(&mut buf.freeze()).unwrap_err(),
            StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID
        );
    }

    #[test]
    fn split_single_chunk() {
        let mut seq = 0u32;
        let chunks = split_message(
            ChunkMessageType::Message,
            5,
            7,
            42,
            &mut || {
                seq += 1;
                seq
            },
            &[1, 2, 3],
            &limits(65_535, 0, 0),
        )
        .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(&chunks[0][0..4], b"MSGF");
        assert_eq!(chunks[0].len() as u32, u32::from_le_bytes(chunks[0][4..8].try_into().unwrap()));
    }

    #[test]
    fn split_and_reassemble_multi_chunk() {
        let body: Vec<u8> = (0..100_000u32).map(|v| v as u8).collect();
        let lim = limits(8192, 0, 0);
        let mut seq = 0u32;
        let chunks = split_message(
            ChunkMessageType::Message,
            1,
            1,
            9,
            &mut || {
                seq += 1;
                seq
            },
            &body,
            &lim,
        )
        .unwrap();
        assert!(chunks.len() > 1);
        // All but the last marked continuation.
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk[3], b'C');
            assert_eq!(chunk.len(), 8192);
        }
        assert_eq!(chunks.last().unwrap()[3], b'F');

        let mut assembler = ChunkAssembler::new(lim);
        let mut result = None;
        for (i, part) in collect_bodies(&chunks).iter().enumerate() {
            let is_final = if i + 1 == chunks.len() {
                IsFinal::Final
            } else {
                IsFinal::Intermediate
            };
            match assembler.push(9, is_final, part).unwrap() {
                AssemblyStep::Complete(bytes) => result = Some(bytes),
                AssemblyStep::More => assert!(i + 1 < chunks.len()),
                AssemblyStep::Aborted => panic!("unexpected abort"),
            }
        }
        assert_eq!(&result.unwrap()[..], &body[..]);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn chunk_count_limit_enforced_on_split() {
        let body = vec![0u8; 100_000];
        let mut seq = 0u32;
        let err = split_message(
            ChunkMessageType::Message,
            1,
            1,
            9,
            &mut || {
                seq += 1;
                seq
            },
            &body,
            &limits(8192, 2, 0),
        )
        .unwrap_err();
        assert_eq!(err, StatusCode::BAD_TCP_MESSAGE_TOO_LARGE);
    }

    #[test]
    fn message_size_limit_enforced_on_assembly() {
        let mut assembler = ChunkAssembler::new(limits(8192, 0, 10));
        assert_eq!(
            assembler.push(1, IsFinal::Intermediate, &[0u8; 8]).unwrap(),
            AssemblyStep::More
        );
        let err = assembler
            .push(1, IsFinal::Final, &[0u8; 8])
            .unwrap_err();
        assert_eq!(err, StatusCode::BAD_TCP_MESSAGE_TOO_LARGE);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn abort_discards_buffered_chunks() {
        let mut assembler = ChunkAssembler::new(limits(8192, 0, 0));
        assembler.push(1, IsFinal::Intermediate, &[1, 2]).unwrap();
        assert_eq!(assembler.pending(), 1);
        assert_eq!(
            assembler.push(1, IsFinal::Aborted, &[]).unwrap(),
            AssemblyStep::Aborted
        );
        assert_eq!(assembler.pending(), 0);
        // A fresh message for the same request id starts clean.
        match assembler.push(1, IsFinal::Final, &[9]).unwrap() {
            AssemblyStep::Complete(bytes) => assert_eq!(&bytes[..], &[9]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn interleaved_requests_assemble_independently() {
        let mut assembler = ChunkAssembler::new(limits(8192, 0, 0));
        assembler.push(1, IsFinal::Intermediate, &[1]).unwrap();
        assembler.push(2, IsFinal::Intermediate, &[9]).unwrap();
        let a = assembler.push(1, IsFinal::Final, &[2]).unwrap();
        let b = assembler.push(2, IsFinal::Final, &[8]).unwrap();
        assert_eq!(a, AssemblyStep::Complete(Bytes::from_static(&[1, 2])));
        assert_eq!(b, AssemblyStep::Complete(Bytes::from_static(&[9, 8])));
    }

    #[test]
    fn limits_revision_picks_minimum() {
        let server = TransportLimits {
            receive_buffer_size: 65_535,
            send_buffer_size: 65_535,
            max_message_size: 1 << 20,
            max_chunk_count: 64,
        };
        let hello = HelloMessage {
            protocol_version: 0,
            receive_buffer_size: 16_384,
            send_buffer_size: 32_768,
            max_message_size: 0,
            max_chunk_count: 16,
            endpoint_url: None,
        };
        let revised = server.revise(&hello);
        // Our send side is bounded by what the client can receive.
        assert_eq!(revised.send_buffer_size, 16_384);
        assert_eq!(revised.receive_buffer_size, 32_768);
        assert_eq!(revised.max_message_size, 1 << 20);
        assert_eq!(revised.max_chunk_count, 16);
    }
}
