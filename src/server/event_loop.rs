//! # Engine Event Loop
//!
//! One task per server instance. Timers, inbound frames and handle
//! commands interleave at the `select!`; [`EngineState`] is owned
//! exclusively by this task, so service handling never takes a lock. The
//! one exception to "everything on the loop" is user method invocation,
//! which is hoisted onto the blocking pool and re-enters through
//! `pending_calls`.

use std::collections::HashMap;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::channel::SecureChannel;
use crate::chunk::{ChunkHeader, ChunkMessageType, IsFinal, CHUNK_HEADER_SIZE};
use crate::messages::{ErrorMessage, HelloMessage, RequestMessage, ResponseMessage};
use crate::server::services::{self, ConnectionMeta, DispatchResult, Outbound};
use crate::server::session::CloseReason;
use crate::server::state::EngineState;
use crate::types::{BinaryDecode, BinaryEncode, NodeId, StatusCode};

/// Commands from the [`Server`](crate::Server) handle.
pub(crate) enum Command {
    Shutdown { done: oneshot::Sender<()> },
    PostEvent(crate::server::events::ServerEvent),
}

/// Connection lifecycle notifications from the acceptor and reader tasks.
pub(crate) enum ConnectionEvent {
    Opened {
        connection_id: u64,
        writer: mpsc::Sender<Bytes>,
    },
    Frame {
        connection_id: u64,
        frame: Bytes,
    },
    Closed {
        connection_id: u64,
    },
}

struct Connection {
    meta: ConnectionMeta,
    channel: SecureChannel,
    writer: mpsc::Sender<Bytes>,
    next_token_id: u32,
}

type PendingCall = Pin<Box<dyn std::future::Future<Output = (u64, u32, ResponseMessage)> + Send>>;

/// What one frame produced.
struct FrameOutcome {
    keep: bool,
    outbounds: Vec<Outbound>,
}

impl FrameOutcome {
    fn keep() -> Self {
        Self {
            keep: true,
            outbounds: Vec::new(),
        }
    }

    fn close() -> Self {
        Self {
            keep: false,
            outbounds: Vec::new(),
        }
    }
}

/// The engine task.
pub(crate) async fn engine_task(
    mut state: EngineState,
    mut connection_rx: mpsc::Receiver<ConnectionEvent>,
    mut command_rx: mpsc::Receiver<Command>,
) {
    let mut connections: HashMap<u64, Connection> = HashMap::new();
    let mut pending_calls: FuturesUnordered<PendingCall> = FuturesUnordered::new();

    loop {
        let now = Instant::now();
        let deadline = state
            .next_deadline(now)
            .unwrap_or(now + tokio::time::Duration::from_secs(60));

        tokio::select! {
            event = connection_rx.recv() => {
                match event {
                    Some(ConnectionEvent::Opened { connection_id, writer }) => {
                        trace!(connection_id, "connection opened");
                        connections.insert(connection_id, Connection {
                            meta: ConnectionMeta { connection_id, application_uri: None },
                            channel: SecureChannel::new(
                                std::sync::Arc::new(crate::channel::NoSecurity),
                                state.config.transport,
                                state.config.decoding.clone(),
                                state.config.max_token_lifetime,
                            ),
                            writer,
                            next_token_id: 0,
                        });
                    }
                    Some(ConnectionEvent::Frame { connection_id, frame }) => {
                        let outcome = match connections.get_mut(&connection_id) {
                            Some(connection) => {
                                handle_frame(&mut state, connection, frame, &mut pending_calls).await
                            }
                            None => continue,
                        };
                        for outbound in outcome.outbounds {
                            send_outbound(&mut connections, outbound).await;
                        }
                        if !outcome.keep {
                            drop_connection(&mut state, &mut connections, connection_id);
                        }
                    }
                    Some(ConnectionEvent::Closed { connection_id }) => {
                        drop_connection(&mut state, &mut connections, connection_id);
                    }
                    None => {
                        debug!("acceptor gone, engine stopping");
                        break;
                    }
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(Command::PostEvent(event)) => {
                        services::post_event(&mut state, &event);
                    }
                    Some(Command::Shutdown { done }) => {
                        shutdown(&mut state, &mut connections).await;
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        shutdown(&mut state, &mut connections).await;
                        break;
                    }
                }
            }

            Some((connection_id, request_id, response)) = pending_calls.next(), if !pending_calls.is_empty() => {
                let outbound = Outbound { connection_id, request_id, response };
                send_outbound(&mut connections, outbound).await;
            }

            () = tokio::time::sleep_until(deadline) => {
                let outbounds = services::run_timers(&mut state, Instant::now());
                for outbound in outbounds {
                    send_outbound(&mut connections, outbound).await;
                }
            }
        }
    }
}

/// Process one raw frame.
async fn handle_frame(
    state: &mut EngineState,
    connection: &mut Connection,
    frame: Bytes,
    pending_calls: &mut FuturesUnordered<PendingCall>,
) -> FrameOutcome {
    let mut header_cursor = frame.clone();
    let header = match ChunkHeader::parse(&mut header_cursor) {
        Ok(header) => header,
        Err(status) => {
            send_error(connection, status, "malformed chunk header").await;
            return FrameOutcome::close();
        }
    };

    match header.message_type {
        ChunkMessageType::Hello => {
            let mut payload = frame.slice(CHUNK_HEADER_SIZE..);
            let hello = match HelloMessage::decode(&mut payload, &state.config.decoding) {
                Ok(hello) => hello,
                Err(status) => {
                    send_error(connection, status, "malformed HEL").await;
                    return FrameOutcome::close();
                }
            };
            match connection.channel.on_hello(&hello) {
                Ok(ack) => {
                    let Ok(frame) = frame_payload(ChunkMessageType::Acknowledge, &ack) else {
                        return FrameOutcome::close();
                    };
                    let _ = connection.writer.send(frame).await;
                    FrameOutcome::keep()
                }
                Err(status) => {
                    send_error(connection, status, "HEL rejected").await;
                    FrameOutcome::close()
                }
            }
        }

        ChunkMessageType::OpenChannel => {
            let (request_id, request) = match connection.channel.parse_open_request(frame) {
                Ok(parsed) => parsed,
                Err(status) => {
                    send_error(connection, status, "malformed OPN").await;
                    return FrameOutcome::close();
                }
            };
            let channel_id = if connection.channel.channel_id() == 0 {
                state.channel_ids.next()
            } else {
                connection.channel.channel_id()
            };
            connection.next_token_id += 1;
            let token_id = connection.next_token_id;
            match connection
                .channel
                .on_open(&request, channel_id, token_id, Instant::now())
            {
                Ok(response) => match connection.channel.frame_open_response(request_id, &response)
                {
                    Ok(frame) => {
                        let _ = connection.writer.send(frame).await;
                        FrameOutcome::keep()
                    }
                    Err(_) => FrameOutcome::close(),
                },
                Err(status) => {
                    send_error(connection, status, "OPN rejected").await;
                    FrameOutcome::close()
                }
            }
        }

        ChunkMessageType::CloseChannel => {
            trace!(connection = connection.meta.connection_id, "CLO received");
            // No response to CLO; the transport just goes away.
            FrameOutcome::close()
        }

        ChunkMessageType::Message => {
            let inbound = match connection.channel.receive_chunk(frame, Instant::now()) {
                Ok(Some(inbound)) => inbound,
                Ok(None) => return FrameOutcome::keep(),
                Err(status) => {
                    crate::server::state::Diagnostics::bump(
                        &state.diagnostics.security_rejected_requests_count,
                    );
                    send_error(connection, status, "chunk rejected").await;
                    return FrameOutcome::close();
                }
            };
            let mut body = inbound.body.clone();
            let request = match RequestMessage::decode(&mut body, &state.config.decoding) {
                Ok(request) => request,
                Err(status) => {
                    // Unknown service or malformed body: answer with a
                    // fault but keep the channel.
                    return FrameOutcome {
                        keep: true,
                        outbounds: vec![Outbound {
                            connection_id: connection.meta.connection_id,
                            request_id: inbound.request_id,
                            response: ResponseMessage::fault(&Default::default(), status),
                        }],
                    };
                }
            };

            match services::dispatch(
                state,
                &mut connection.meta,
                inbound.request_id,
                request,
                Instant::now(),
            ) {
                DispatchResult::Done(outbounds) => FrameOutcome {
                    keep: true,
                    outbounds,
                },
                DispatchResult::CallPending {
                    session_id,
                    request,
                } => {
                    let space = state.address_space.clone();
                    let connection_id = connection.meta.connection_id;
                    let request_id = inbound.request_id;
                    let handle = tokio::task::spawn_blocking(move || {
                        services::call_user_methods(&space, &session_id, &request)
                    });
                    pending_calls.push(Box::pin(async move {
                        let response = handle.await.unwrap_or_else(|_| {
                            ResponseMessage::fault(
                                &Default::default(),
                                StatusCode::BAD_INTERNAL_ERROR,
                            )
                        });
                        (connection_id, request_id, response)
                    }));
                    FrameOutcome::keep()
                }
            }
        }

        ChunkMessageType::Acknowledge | ChunkMessageType::Error => {
            // Clients send neither.
            send_error(
                connection,
                StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID,
                "unexpected frame",
            )
            .await;
            FrameOutcome::close()
        }
    }
}

/// Encode and frame a response onto a specific connection.
async fn send_on_connection(connection: &mut Connection, outbound: Outbound) {
    let mut body = BytesMut::new();
    if outbound.response.encode(&mut body).is_err() {
        warn!("response encoding failed, dropping");
        return;
    }
    match connection.channel.frame_message(outbound.request_id, &body) {
        Ok(chunks) => {
            for chunk in chunks {
                if connection.writer.send(chunk).await.is_err() {
                    return;
                }
            }
        }
        Err(status) if status == StatusCode::BAD_TCP_MESSAGE_TOO_LARGE => {
            // Replace with a fault that fits.
            let fault =
                ResponseMessage::fault(&Default::default(), StatusCode::BAD_RESPONSE_TOO_LARGE);
            let mut body = BytesMut::new();
            if fault.encode(&mut body).is_ok() {
                if let Ok(chunks) = connection.channel.frame_message(outbound.request_id, &body) {
                    for chunk in chunks {
                        let _ = connection.writer.send(chunk).await;
                    }
                }
            }
        }
        Err(status) => {
            trace!(%status, "cannot frame response, channel unusable");
        }
    }
}

/// Route an outbound frame by connection id.
async fn send_outbound(connections: &mut HashMap<u64, Connection>, outbound: Outbound) {
    let Some(connection) = connections.get_mut(&outbound.connection_id) else {
        trace!(
            connection = outbound.connection_id,
            "response for dead connection dropped"
        );
        return;
    };
    send_on_connection(connection, outbound).await;
}

/// Send an ERR frame. Failures are irrelevant; the connection is closing.
async fn send_error(connection: &mut Connection, status: StatusCode, reason: &str) {
    warn!(connection = connection.meta.connection_id, %status, reason, "fatal transport error");
    let error = ErrorMessage {
        error: status,
        reason: Some(reason.to_string()),
    };
    if let Ok(frame) = frame_payload(ChunkMessageType::Error, &error) {
        let _ = connection.writer.send(frame).await;
    }
}

/// Frame a HEL/ACK/ERR payload (no security, single chunk).
fn frame_payload(
    message_type: ChunkMessageType,
    payload: &impl BinaryEncode,
) -> crate::types::EncodingResult<Bytes> {
    let mut body = BytesMut::new();
    payload.encode(&mut body)?;
    let mut frame = BytesMut::with_capacity(CHUNK_HEADER_SIZE + body.len());
    ChunkHeader {
        message_type,
        is_final: IsFinal::Final,
        size: (CHUNK_HEADER_SIZE + body.len()) as u32,
    }
    .serialize(&mut frame);
    frame.extend_from_slice(&body);
    Ok(frame.freeze())
}

/// Tear down a connection: screw its sessions, drop undeliverable parked
/// Publish credits.
fn drop_connection(
    state: &mut EngineState,
    connections: &mut HashMap<u64, Connection>,
    connection_id: u64,
) {
    if connections.remove(&connection_id).is_none() {
        return;
    }
    debug!(connection_id, "connection closed");
    for session in state.sessions.values_mut() {
        if session.connection_id == Some(connection_id) {
            session.on_channel_lost();
            let dropped = session.publish_queue.remove_by_connection(connection_id);
            if dropped > 0 {
                trace!(
                    session = %session.session_id,
                    dropped,
                    "publish credits cancelled with the transport"
                );
            }
        }
    }
}

/// Orderly shutdown: close every session, tell connected peers, stop.
async fn shutdown(state: &mut EngineState, connections: &mut HashMap<u64, Connection>) {
    debug!(sessions = state.sessions.len(), "engine shutting down");
    let tokens: Vec<NodeId> = state.sessions.keys().cloned().collect();
    let mut outbounds = Vec::new();
    for token in tokens {
        outbounds.extend(services::close_session(
            state,
            &token,
            true,
            CloseReason::Terminated,
        ));
    }
    for outbound in outbounds {
        send_outbound(connections, outbound).await;
    }
    for connection in connections.values() {
        // A best-effort ERR tells well-behaved clients we are gone.
        let error = ErrorMessage {
            error: StatusCode::BAD_SERVER_HALTED,
            reason: Some("server shutting down".to_string()),
        };
        if let Ok(frame) = frame_payload(ChunkMessageType::Error, &error) {
            let _ = connection.writer.send(frame).await;
        }
    }
    connections.clear();
}
