//! Transport layer for client I/O
//!
//! - [`Connection`]: capability trait every client endpoint implements
//! - [`Transport`]: a listening socket that feeds new connections to the server
//!
//! Two variants exist: [`TcpConnection`] for long-lived stream clients and
//! [`UdpConnection`] for one-shot datagram clients. Transports hand them to the
//! server tagged as [`Accepted`], and the server branches on that tag.

use crate::error::Result;
use crate::server::Server;
use std::net::SocketAddr;
use std::sync::Arc;

#[cfg(test)]
pub mod mock;
mod tcp;
mod udp;

pub use tcp::{StreamTransport, TcpConnection};
pub use udp::{DatagramTransport, UdpConnection};

/// Client endpoint capabilities
///
/// All methods take `&self` so a session's reader and writer threads can share
/// one connection.
pub trait Connection: Send + Sync {
    /// Block until data arrives, returning at most `max_bytes`
    ///
    /// An empty result means the peer closed the connection (stream) or that
    /// no further data exists (datagram).
    fn receive(&self, max_bytes: usize) -> Result<Vec<u8>>;

    /// Write `text` followed by the line terminator
    fn send_line(&self, text: &str) -> Result<()>;

    /// Release the endpoint; safe to call more than once
    fn close(&self);

    fn peer_addr(&self) -> SocketAddr;
}

/// New client endpoint produced by a transport
pub enum Accepted {
    Stream(TcpConnection),
    Datagram(UdpConnection),
}

/// Listening transport
pub trait Transport: Send {
    /// Short name used for the serving thread and in logs
    fn name(&self) -> &'static str;

    fn local_addr(&self) -> Result<SocketAddr>;

    /// Feed incoming clients to `server` until it stops running
    fn serve(&mut self, server: &Arc<Server>) -> Result<()>;
}
