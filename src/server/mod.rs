//! # Server Engine
//!
//! The [`Server`] handle owns a background engine task (one
//! single-logical-thread event loop, see [`event_loop`]) plus one reader
//! and one writer task per connection. Handles communicate with the
//! engine over channels; the address space is shared behind a `RwLock`
//! so applications can push values from any task.
//!
//! ```no_run
//! use uastack::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> uastack::Result<()> {
//!     let server = Server::new(ServerConfig::builder().port(4840).build());
//!     server.bind().await?;
//!     // ... build the address space, push values, raise events ...
//!     server.shutdown().await
//! }
//! ```

pub mod event_loop;
pub mod events;
pub mod methods;
pub mod monitored_item;
pub mod publish;
pub mod services;
pub mod session;
pub mod state;
pub mod subscription;

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::address_space::AddressSpace;
use crate::chunk::CHUNK_HEADER_SIZE;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::net::{Transport, TransportListener};
use crate::types::{NodeId, StatusCode, Variant};

use self::event_loop::{engine_task, Command, ConnectionEvent};
pub use self::events::ServerEvent;
pub use self::state::{Diagnostics, DiagnosticsSnapshot, EngineState, SessionInfo};

/// Handle to a running server engine.
pub struct Server {
    config: ServerConfig,
    address_space: Arc<RwLock<AddressSpace>>,
    command_tx: mpsc::Sender<Command>,
    connection_tx: mpsc::Sender<ConnectionEvent>,
    diagnostics: Arc<Diagnostics>,
    session_infos: Arc<DashMap<NodeId, SessionInfo>>,
    next_connection_id: Arc<AtomicU64>,
    engine: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Server {
    /// Spawn an engine with the default namespace-0 address space. Must
    /// run inside a tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let address_space = Arc::new(RwLock::new(AddressSpace::new_with_defaults(
            &config.application_uri,
        )));
        let state = EngineState::new(config.clone(), address_space.clone());
        let diagnostics = state.diagnostics.clone();
        let session_infos = state.session_infos.clone();

        let (command_tx, command_rx) = mpsc::channel(64);
        let (connection_tx, connection_rx) = mpsc::channel(256);
        let engine = tokio::spawn(engine_task(state, connection_rx, command_rx));

        Self {
            config,
            address_space,
            command_tx,
            connection_tx,
            diagnostics,
            session_infos,
            next_connection_id: Arc::new(AtomicU64::new(1)),
            engine: std::sync::Mutex::new(Some(engine)),
        }
    }

    /// The shared address space. Writes take the exclusive lock; the
    /// engine reads concurrently.
    pub fn address_space(&self) -> Arc<RwLock<AddressSpace>> {
        self.address_space.clone()
    }

    /// Shorthand for updating a variable's value.
    pub fn set_value(&self, node_id: &NodeId, value: impl Into<Variant>) -> StatusCode {
        self.address_space.write().set_value(node_id, value)
    }

    /// Raise an event against the address space.
    pub async fn post_event(&self, event: ServerEvent) -> Result<()> {
        self.command_tx
            .send(Command::PostEvent(event))
            .await
            .map_err(|_| Error::EngineShutdown)
    }

    /// Counter snapshot for monitoring.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Live sessions as seen by the engine.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.session_infos
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Bind a TCP listener on the configured port and accept connections
    /// until the engine stops.
    pub async fn bind(&self) -> Result<()> {
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.config.port));
        let listener = <tokio::net::TcpListener as TransportListener>::bind(addr).await?;
        debug!(%addr, "listening");
        self.serve(listener)
    }

    /// Accept connections from an arbitrary listener implementation.
    pub fn serve<L: TransportListener>(&self, listener: L) -> Result<()> {
        let connection_tx = self.connection_tx.clone();
        let next_connection_id = self.next_connection_id.clone();
        let receive_limit = self.config.transport.receive_buffer_size;
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        trace!(%peer, "accepted");
                        attach_transport(
                            stream,
                            &connection_tx,
                            &next_connection_id,
                            receive_limit,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!("accept failed: {e}");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    /// Attach one established transport (a TCP stream, a duplex pipe in
    /// tests) to the engine.
    pub async fn attach<T: Transport>(&self, transport: T) {
        attach_transport(
            transport,
            &self.connection_tx,
            &self.next_connection_id,
            self.config.transport.receive_buffer_size,
        )
        .await;
    }

    /// Stop the engine: sessions close, peers get an ERR frame, the task
    /// joins.
    pub async fn shutdown(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Shutdown { done: done_tx })
            .await
            .map_err(|_| Error::EngineShutdown)?;
        let _ = done_rx.await;
        let handle = self.engine.lock().expect("engine handle lock").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }
}

/// Split a transport into reader and writer tasks wired to the engine.
async fn attach_transport<T: Transport>(
    transport: T,
    connection_tx: &mpsc::Sender<ConnectionEvent>,
    next_connection_id: &AtomicU64,
    receive_limit: u32,
) {
    let connection_id = next_connection_id.fetch_add(1, Ordering::Relaxed);
    let (writer_tx, writer_rx) = mpsc::channel::<Bytes>(64);
    if connection_tx
        .send(ConnectionEvent::Opened {
            connection_id,
            writer: writer_tx,
        })
        .await
        .is_err()
    {
        return;
    }
    let (read_half, write_half) = tokio::io::split(transport);
    tokio::spawn(writer_task(write_half, writer_rx));
    tokio::spawn(reader_task(
        read_half,
        connection_id,
        connection_tx.clone(),
        receive_limit,
    ));
}

/// Drain encoded chunks onto the transport.
async fn writer_task<W: tokio::io::AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::Receiver<Bytes>,
) {
    while let Some(chunk) = rx.recv().await {
        if writer.write_all(&chunk).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Read framed chunks and forward them to the engine. The chunk header
/// carries the total length, so framing is a length-prefixed read.
async fn reader_task<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
    connection_id: u64,
    connection_tx: mpsc::Sender<ConnectionEvent>,
    receive_limit: u32,
) {
    loop {
        let mut header = [0u8; CHUNK_HEADER_SIZE];
        if reader.read_exact(&mut header).await.is_err() {
            break;
        }
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if size < CHUNK_HEADER_SIZE || size > receive_limit as usize {
            // Oversize or nonsense length: the engine cannot resync a
            // byte stream with a broken length prefix.
            warn!(connection_id, size, "invalid chunk length");
            break;
        }
        let mut frame = BytesMut::with_capacity(size);
        frame.extend_from_slice(&header);
        frame.resize(size, 0);
        if reader.read_exact(&mut frame[CHUNK_HEADER_SIZE..]).await.is_err() {
            break;
        }
        if connection_tx
            .send(ConnectionEvent::Frame {
                connection_id,
                frame: frame.freeze(),
            })
            .await
            .is_err()
        {
            return;
        }
    }
    let _ = connection_tx
        .send(ConnectionEvent::Closed { connection_id })
        .await;
}
