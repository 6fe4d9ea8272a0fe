//! Stream transport (TCP)
//!
//! # Connection Lifecycle
//!
//! ```text
//! 1. Client connects to the TCP port
//! 2. Accept loop wraps the socket as a TcpConnection
//! 3. Server creates a Session (reader + writer threads)
//! 4. Session runs until disconnect, I/O error, quit or shutdown
//! 5. Session is removed from the registry
//! ```
//!
//! The listener is non-blocking and polled so the accept loop can observe the
//! server's running flag; accepted sockets are switched back to blocking mode.

use super::{Accepted, Connection, Transport};
use crate::error::{Error, Result};
use crate::protocol::LINE_TERMINATOR;
use crate::server::Server;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

/// Sleep between accept polls when no client is pending
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// One accepted TCP client
pub struct TcpConnection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpConnection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }
}

impl Connection for TcpConnection {
    fn receive(&self, max_bytes: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max_bytes];
        let n = (&self.stream).read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn send_line(&self, text: &str) -> Result<()> {
        let mut stream = &self.stream;
        let mut frame = String::with_capacity(text.len() + LINE_TERMINATOR.len());
        frame.push_str(text);
        frame.push_str(LINE_TERMINATOR);
        stream.write_all(frame.as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    fn close(&self) {
        // Also unblocks a reader parked in receive()
        if let Err(e) = self.stream.shutdown(Shutdown::Both)
            && e.kind() != ErrorKind::NotConnected
        {
            log::debug!("Shutdown of {} failed: {}", self.peer, e);
        }
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

/// TCP accept loop
pub struct StreamTransport {
    listener: TcpListener,
}

impl StreamTransport {
    /// Bind and listen on `addr`
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|source| Error::Bind { addr, source })?;
        listener.set_nonblocking(true)?;
        log::info!("TCP server listening on {}", listener.local_addr()?);
        Ok(Self { listener })
    }
}

impl Transport for StreamTransport {
    fn name(&self) -> &'static str {
        "tcp-accept"
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    fn serve(&mut self, server: &Arc<Server>) -> Result<()> {
        while server.is_running() {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(false) {
                        log::error!("Failed to set blocking mode for {}: {}", addr, e);
                        continue;
                    }
                    log::info!("TCP client connected: {}", addr);
                    server.on_new_connection(Accepted::Stream(TcpConnection::new(stream, addr)));
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    log::error!("Accept error: {}", e);
                }
            }
        }

        log::info!("TCP accept loop stopped");
        Ok(())
    }
}
