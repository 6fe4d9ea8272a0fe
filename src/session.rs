//! Stream client sessions
//!
//! Each accepted TCP connection gets a [`Session`] running two threads:
//!
//! ```text
//!            ┌──────────────┐  on_line()   ┌────────────────┐
//!  socket ──▶│ reader       │─────────────▶│ SessionHandler │
//!            └──────────────┘              └───────┬────────┘
//!                                                  │ enqueue() (also broadcasts
//!            ┌──────────────┐   mailbox            ▼  from other threads)
//!  socket ◀──│ writer       │◀──────────── [ FIFO of outbound lines ]
//!            └──────────────┘
//! ```
//!
//! # Lifecycle
//!
//! `Created → Active → Closing → Closed`, never backwards. Teardown can be
//! started by either worker or by server shutdown; only the first caller
//! closes the connection and notifies the handler.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::protocol::LineBuffer;
use crate::transport::Connection;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// What the reader should do after a line was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Flush pending output, then close the session
    Close,
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
    Closing,
    Closed,
}

/// Receives a session's inbound lines and its close notification
pub trait SessionHandler: Send + Sync {
    /// Handle one trimmed, non-empty line on the reader thread
    fn on_line(&self, session: &Arc<Session>, line: &str) -> Flow;

    /// Called exactly once, after the connection has been closed
    fn on_closed(&self, session: &Session);
}

/// Mailbox item
enum Outbound {
    Line(String),
    /// Sentinel that stops the writer
    Close,
}

/// One stream client
pub struct Session {
    id: u64,
    connection: Arc<dyn Connection>,
    peer: SocketAddr,
    outbound_tx: Sender<Outbound>,
    outbound_rx: Receiver<Outbound>,
    alive: AtomicBool,
    torn_down: AtomicBool,
    state: Mutex<SessionState>,
    recv_buffer_size: usize,
    writer_poll: Duration,
}

impl Session {
    pub fn new(id: u64, connection: Arc<dyn Connection>, config: &SessionConfig) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = unbounded();
        let peer = connection.peer_addr();
        Arc::new(Self {
            id,
            connection,
            peer,
            outbound_tx,
            outbound_rx,
            alive: AtomicBool::new(true),
            torn_down: AtomicBool::new(false),
            state: Mutex::new(SessionState::Created),
            recv_buffer_size: config.recv_buffer_size,
            writer_poll: config.writer_poll(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Spawn the reader and writer threads
    pub fn start(self: &Arc<Self>, handler: Arc<dyn SessionHandler>) -> Result<()> {
        let writer = {
            let session = Arc::clone(self);
            let handler = Arc::clone(&handler);
            thread::Builder::new()
                .name(format!("session-{}-writer", self.id))
                .spawn(move || session.write_loop(handler.as_ref()))
        };
        if let Err(e) = writer {
            self.teardown(handler.as_ref());
            return Err(Error::Other(format!("Failed to spawn session writer: {}", e)));
        }

        let reader = {
            let session = Arc::clone(self);
            let handler = Arc::clone(&handler);
            thread::Builder::new()
                .name(format!("session-{}-reader", self.id))
                .spawn(move || session.read_loop(handler.as_ref()))
        };
        if let Err(e) = reader {
            self.teardown(handler.as_ref());
            return Err(Error::Other(format!("Failed to spawn session reader: {}", e)));
        }

        let mut state = self.state.lock();
        if *state == SessionState::Created {
            *state = SessionState::Active;
        }
        Ok(())
    }

    /// Queue a line for the writer
    ///
    /// Returns `false` without blocking when the session is no longer alive.
    pub fn enqueue(&self, text: impl Into<String>) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.outbound_tx.send(Outbound::Line(text.into())).is_ok()
    }

    /// Stop accepting output and close once everything queued so far is written
    pub fn close_gracefully(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            {
                let mut state = self.state.lock();
                if matches!(*state, SessionState::Created | SessionState::Active) {
                    *state = SessionState::Closing;
                }
            }
            let _ = self.outbound_tx.send(Outbound::Close);
        }
    }

    /// Close the connection and notify `handler`; only the first call has effect
    pub fn teardown(&self, handler: &dyn SessionHandler) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.alive.store(false, Ordering::SeqCst);
        *self.state.lock() = SessionState::Closing;

        let _ = self.outbound_tx.send(Outbound::Close);
        self.connection.close();
        handler.on_closed(self);

        *self.state.lock() = SessionState::Closed;
        log::info!("Session {} ({}) closed", self.id, self.peer);
    }

    fn read_loop(self: Arc<Self>, handler: &dyn SessionHandler) {
        log::debug!("Session {} reader started", self.id);

        let mut buffer = LineBuffer::new();
        'outer: while self.is_alive() {
            match self.connection.receive(self.recv_buffer_size) {
                Ok(chunk) if chunk.is_empty() => {
                    log::info!("Client {} disconnected", self.peer);
                    break;
                }
                Ok(chunk) => {
                    // A full read may have cut a line; a short one ends the write
                    let flush = chunk.len() < self.recv_buffer_size;
                    for line in buffer.push(&chunk, flush) {
                        if handler.on_line(&self, &line) == Flow::Close {
                            // Writer tears down after flushing the goodbye
                            self.close_gracefully();
                            break 'outer;
                        }
                    }
                }
                Err(e) => {
                    if self.is_alive() {
                        log::warn!("Read from {} failed: {}", self.peer, e);
                    }
                    break;
                }
            }
        }

        if self.is_alive() {
            self.teardown(handler);
        }
        log::debug!("Session {} reader stopped", self.id);
    }

    fn write_loop(self: Arc<Self>, handler: &dyn SessionHandler) {
        log::debug!("Session {} writer started", self.id);

        loop {
            match self.outbound_rx.recv_timeout(self.writer_poll) {
                Ok(Outbound::Line(text)) => {
                    if let Err(e) = self.connection.send_line(&text) {
                        log::warn!("Write to {} failed: {}", self.peer, e);
                        break;
                    }
                }
                Ok(Outbound::Close) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if !self.is_alive() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.teardown(handler);
        log::debug!("Session {} writer stopped", self.id);
    }
}
