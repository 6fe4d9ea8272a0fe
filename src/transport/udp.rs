//! Datagram transport (UDP)
//!
//! Each inbound datagram is one command. The receive loop wraps it as a
//! [`UdpConnection`] and the server handles it inline before the next
//! `recv_from`, so datagram commands are serialized by construction.
//!
//! The bound socket is also registered with the server, which uses it to send
//! best-effort notifications to every datagram peer seen so far.

use super::{Accepted, Connection, Transport};
use crate::error::{Error, Result};
use crate::protocol::LINE_TERMINATOR;
use crate::server::Server;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

/// Largest datagram accepted; longer payloads are truncated by the OS
const MAX_DATAGRAM_SIZE: usize = 1024;

/// Read timeout so the loop can observe shutdown
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// One received datagram plus the socket to answer on
pub struct UdpConnection {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    /// Taken by the first receive()
    pending: Mutex<Option<Vec<u8>>>,
}

impl UdpConnection {
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr, datagram: Vec<u8>) -> Self {
        Self {
            socket,
            peer,
            pending: Mutex::new(Some(datagram)),
        }
    }
}

impl Connection for UdpConnection {
    fn receive(&self, max_bytes: usize) -> Result<Vec<u8>> {
        let mut data = self.pending.lock().take().unwrap_or_default();
        data.truncate(max_bytes);
        Ok(data)
    }

    fn send_line(&self, text: &str) -> Result<()> {
        let mut frame = String::with_capacity(text.len() + LINE_TERMINATOR.len());
        frame.push_str(text);
        frame.push_str(LINE_TERMINATOR);
        self.socket.send_to(frame.as_bytes(), self.peer)?;
        Ok(())
    }

    fn close(&self) {
        // Socket is shared with the receive loop
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

/// UDP receive loop
pub struct DatagramTransport {
    socket: Arc<UdpSocket>,
}

impl DatagramTransport {
    /// Bind on `addr`
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).map_err(|source| Error::Bind { addr, source })?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        log::info!("UDP server listening on {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
        })
    }
}

impl Transport for DatagramTransport {
    fn name(&self) -> &'static str {
        "udp-receive"
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn serve(&mut self, server: &Arc<Server>) -> Result<()> {
        server.attach_datagram_socket(Arc::clone(&self.socket));

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        while server.is_running() {
            match self.socket.recv_from(&mut buf) {
                Ok((n, peer)) => {
                    log::trace!("Datagram of {} bytes from {}", n, peer);
                    let conn = UdpConnection::new(Arc::clone(&self.socket), peer, buf[..n].to_vec());
                    server.on_new_connection(Accepted::Datagram(conn));
                }
                Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                // ICMP port-unreachable from an earlier send surfaces here on some platforms
                Err(ref e) if e.kind() == ErrorKind::ConnectionReset => {
                    log::debug!("UDP receive reset: {}", e);
                }
                Err(e) => {
                    log::error!("UDP receive error: {}", e);
                }
            }
        }

        log::info!("UDP receive loop stopped");
        Ok(())
    }
}
