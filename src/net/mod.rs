//! Byte-transport abstraction.
//!
//! The engine never touches sockets directly. It speaks to a [`Transport`]
//! (any async byte stream) and accepts connections from a
//! [`TransportListener`]. Production uses tokio TCP
//! ([`tokio_impl`]); tests hand the server one half of a
//! `tokio::io::duplex` pair and speak raw protocol bytes over the other.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};

pub mod tokio_impl;

/// An established byte-oriented connection.
///
/// Blanket-implemented for every async stream, so `tokio::net::TcpStream`,
/// `tokio::io::DuplexStream` and TLS wrappers all qualify.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Transport for T {}

/// Accepts inbound [`Transport`] connections.
pub trait TransportListener: Send + Sized + 'static {
    type Stream: Transport;

    /// Bind to the given address.
    fn bind(addr: SocketAddr) -> impl Future<Output = io::Result<Self>> + Send;

    /// Accept one connection.
    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;

    /// The bound address.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}
