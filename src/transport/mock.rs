//! Mock connection for unit testing

use super::Connection;
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

const RECEIVE_POLL: Duration = Duration::from_millis(5);

/// In-memory connection
///
/// Tests push inbound chunks with [`MockConnection::inject`] and read what the
/// server wrote with [`MockConnection::next_sent`]. A chunk larger than the
/// receive size is handed out over several receive() calls, like a socket.
pub struct MockConnection {
    peer: SocketAddr,
    inbound_tx: Sender<Vec<u8>>,
    inbound_rx: Receiver<Vec<u8>>,
    /// Unread remainder of the last injected chunk
    leftover: Mutex<Vec<u8>>,
    sent_tx: Sender<String>,
    sent_rx: Receiver<String>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MockConnection {
    pub fn new(peer: &str) -> Self {
        let (inbound_tx, inbound_rx) = unbounded();
        let (sent_tx, sent_rx) = unbounded();
        Self {
            peer: peer.parse().unwrap(),
            inbound_tx,
            inbound_rx,
            leftover: Mutex::new(Vec::new()),
            sent_tx,
            sent_rx,
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Queue bytes for the next receive()
    pub fn inject(&self, data: &[u8]) {
        self.inbound_tx.send(data.to_vec()).unwrap();
    }

    /// Make every subsequent send_line() fail
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Wait for the next line written to this connection
    pub fn next_sent(&self, timeout: Duration) -> Option<String> {
        self.sent_rx.recv_timeout(timeout).ok()
    }

    /// Lines written so far that have not been consumed
    pub fn drain_sent(&self) -> Vec<String> {
        self.sent_rx.try_iter().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn take_leftover(&self, max_bytes: usize) -> Option<Vec<u8>> {
        let mut leftover = self.leftover.lock();
        if leftover.is_empty() {
            return None;
        }
        let at = max_bytes.min(leftover.len());
        let rest = leftover.split_off(at);
        Some(std::mem::replace(&mut *leftover, rest))
    }
}

impl Connection for MockConnection {
    fn receive(&self, max_bytes: usize) -> Result<Vec<u8>> {
        loop {
            if self.is_closed() {
                return Ok(Vec::new());
            }
            if let Some(data) = self.take_leftover(max_bytes) {
                return Ok(data);
            }
            match self.inbound_rx.recv_timeout(RECEIVE_POLL) {
                Ok(data) => {
                    *self.leftover.lock() = data;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(Vec::new()),
            }
        }
    }

    fn send_line(&self, text: &str) -> Result<()> {
        if self.is_closed() || self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock connection closed",
            )));
        }
        self.sent_tx
            .send(text.to_string())
            .map_err(|e| Error::Other(e.to_string()))
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
