//! Server orchestration
//!
//! The [`Server`] owns the TV, the command router, the registry of live
//! sessions and the set of datagram peers seen so far. Transports feed it new
//! connections; it routes each command line and writes the reply back to the
//! client that sent it.
//!
//! # Broadcast
//!
//! A successful `channel set/up/down` pushes
//! `[Notification] Channel changed to N` to every other client:
//!
//! - stream sessions receive it through their mailbox, behind anything
//!   already queued for them
//! - datagram peers receive one best-effort datagram each; failures are logged
//!   and ignored

use crate::config::{Config, SessionConfig};
use crate::device::SmartTv;
use crate::error::{Error, Result};
use crate::protocol::{LINE_TERMINATOR, channel_notification};
use crate::router::{INVALID, Router};
use crate::session::{Flow, Session, SessionHandler};
use crate::transport::{Accepted, Connection, Transport};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

/// Client that issued a command
#[derive(Clone, Copy)]
pub enum Origin<'a> {
    Session(&'a Session),
    Datagram(&'a dyn Connection),
}

impl Origin<'_> {
    fn peer_addr(&self) -> SocketAddr {
        match self {
            Origin::Session(session) => session.peer_addr(),
            Origin::Datagram(conn) => conn.peer_addr(),
        }
    }
}

/// Remote-control server shared by all transport and session threads
pub struct Server {
    tv: SmartTv,
    router: Router,
    session_config: SessionConfig,
    sessions: Mutex<HashMap<u64, Arc<Session>>>,
    datagram_peers: Mutex<HashSet<SocketAddr>>,
    /// Socket used for datagram replies and notifications, set by the UDP transport
    datagram_socket: OnceLock<Arc<UdpSocket>>,
    next_session_id: AtomicU64,
    running: Arc<AtomicBool>,
}

impl Server {
    pub fn new(config: &Config) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            tv: SmartTv::new(config.device.total_channels)?,
            router: Router::new(),
            session_config: config.session.clone(),
            sessions: Mutex::new(HashMap::new()),
            datagram_peers: Mutex::new(HashSet::new()),
            datagram_socket: OnceLock::new(),
            next_session_id: AtomicU64::new(1),
            running: Arc::new(AtomicBool::new(true)),
        }))
    }

    pub fn tv(&self) -> &SmartTv {
        &self.tv
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Shared running flag, cleared on shutdown
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn datagram_peer_count(&self) -> usize {
        self.datagram_peers.lock().len()
    }

    /// Register the socket used to reach datagram peers
    pub fn attach_datagram_socket(&self, socket: Arc<UdpSocket>) {
        if self.datagram_socket.set(socket).is_err() {
            log::warn!("Datagram socket already attached, ignoring");
        }
    }

    /// Run `transport` on its own thread until shutdown
    pub fn serve<T: Transport + 'static>(
        self: &Arc<Self>,
        mut transport: T,
    ) -> Result<JoinHandle<()>> {
        let server = Arc::clone(self);
        thread::Builder::new()
            .name(transport.name().to_string())
            .spawn(move || {
                if let Err(e) = transport.serve(&server) {
                    log::error!("{} transport error: {}", transport.name(), e);
                }
            })
            .map_err(|e| Error::Other(format!("Failed to spawn transport thread: {}", e)))
    }

    /// Take ownership of a connection produced by a transport
    pub fn on_new_connection(self: &Arc<Self>, accepted: Accepted) {
        match accepted {
            Accepted::Stream(conn) => {
                if let Err(e) = self.register_session(Arc::new(conn)) {
                    log::error!("Failed to start session: {}", e);
                }
            }
            Accepted::Datagram(conn) => self.handle_datagram(&conn),
        }
    }

    /// Create, register and start a session for a stream connection
    pub fn register_session(self: &Arc<Self>, conn: Arc<dyn Connection>) -> Result<Arc<Session>> {
        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let session = Session::new(id, conn, &self.session_config);
        {
            // Checked under the registry lock so shutdown's snapshot sees every session
            let mut sessions = self.sessions.lock();
            if !self.is_running() {
                drop(sessions);
                session.teardown(&**self);
                return Err(Error::Other(format!(
                    "Server is shutting down, refused {}",
                    session.peer_addr()
                )));
            }
            sessions.insert(id, Arc::clone(&session));
        }
        log::info!("Session {} opened for {}", id, session.peer_addr());

        session.start(Arc::clone(self) as Arc<dyn SessionHandler>)?;
        Ok(session)
    }

    /// Process one datagram inline on the receive thread
    fn handle_datagram(&self, conn: &dyn Connection) {
        let peer = conn.peer_addr();
        if self.datagram_peers.lock().insert(peer) {
            log::info!("New datagram peer: {}", peer);
        }

        let payload = match conn.receive(self.session_config.recv_buffer_size) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("Failed to read datagram from {}: {}", peer, e);
                return;
            }
        };

        let line = String::from_utf8_lossy(&payload);
        let line = line.trim();
        if line.is_empty() {
            self.respond(Origin::Datagram(conn), INVALID);
        } else {
            // quit has nothing to close for a datagram peer beyond the reply
            self.dispatch(Origin::Datagram(conn), line);
        }
        conn.close();
    }

    /// Route one command line and deliver the reply and any notification
    pub fn dispatch(&self, origin: Origin<'_>, line: &str) -> Flow {
        let outcome = self.router.dispatch(&self.tv, line);
        if outcome.success {
            log::debug!("{} '{}' -> {}", origin.peer_addr(), line, outcome.reply);
        } else {
            log::warn!("{} '{}' failed: {}", origin.peer_addr(), line, outcome.reply);
        }

        self.respond(origin, &outcome.reply);

        if let Some(channel) = outcome.notify {
            self.broadcast(&channel_notification(channel), Some(origin));
        }

        if outcome.close {
            Flow::Close
        } else {
            Flow::Continue
        }
    }

    /// Send `text` to a single client
    pub fn respond(&self, origin: Origin<'_>, text: &str) {
        match origin {
            Origin::Session(session) => {
                if !session.enqueue(text) {
                    log::debug!("Dropping reply for closed session {}", session.id());
                }
            }
            Origin::Datagram(conn) => {
                if let Err(e) = conn.send_line(text) {
                    log::warn!("Failed to reply to {}: {}", conn.peer_addr(), e);
                }
            }
        }
    }

    /// Push `text` to every known client except `excluding`
    pub fn broadcast(&self, text: &str, excluding: Option<Origin<'_>>) {
        let excluded_session = match excluding {
            Some(Origin::Session(session)) => Some(session.id()),
            _ => None,
        };
        let excluded_peer = match excluding {
            Some(Origin::Datagram(conn)) => Some(conn.peer_addr()),
            _ => None,
        };

        // Snapshot so enqueue never runs under the registry lock
        let sessions: Vec<Arc<Session>> = self.sessions.lock().values().cloned().collect();
        let mut delivered = 0usize;
        for session in sessions {
            if Some(session.id()) != excluded_session && session.enqueue(text) {
                delivered += 1;
            }
        }

        let peers: Vec<SocketAddr> = self.datagram_peers.lock().iter().copied().collect();
        if let Some(socket) = self.datagram_socket.get() {
            let frame = format!("{}{}", text, LINE_TERMINATOR);
            for peer in peers.into_iter().filter(|p| Some(*p) != excluded_peer) {
                match socket.send_to(frame.as_bytes(), peer) {
                    Ok(_) => delivered += 1,
                    Err(e) => log::warn!("Failed to notify datagram peer {}: {}", peer, e),
                }
            }
        }

        log::debug!("Broadcast '{}' to {} clients", text, delivered);
    }

    /// Stop transports and close every session
    pub fn shutdown(&self) {
        // Cleared before the snapshot; register_session checks it under the same lock
        if !self.running.swap(false, Ordering::SeqCst) {
            log::debug!("Shutdown already in progress");
        }
        let sessions: Vec<Arc<Session>> = self.sessions.lock().values().cloned().collect();
        log::info!("Closing {} sessions", sessions.len());
        for session in sessions {
            session.teardown(self);
        }
    }
}

impl SessionHandler for Server {
    fn on_line(&self, session: &Arc<Session>, line: &str) -> Flow {
        self.dispatch(Origin::Session(session), line)
    }

    fn on_closed(&self, session: &Session) {
        if self.sessions.lock().remove(&session.id()).is_some() {
            log::debug!("Session {} removed from registry", session.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::transport::mock::MockConnection;
    use std::time::{Duration, Instant};

    const WAIT: Duration = Duration::from_secs(2);
    const QUIET: Duration = Duration::from_millis(100);

    fn server() -> Arc<Server> {
        let mut config = Config::default();
        config.session.writer_poll_ms = 10;
        Server::new(&config).unwrap()
    }

    fn connect(server: &Arc<Server>, port: u16) -> (Arc<MockConnection>, Arc<Session>) {
        let conn = Arc::new(MockConnection::new(&format!("127.0.0.1:{}", port)));
        let session = server
            .register_session(Arc::clone(&conn) as Arc<dyn Connection>)
            .unwrap();
        (conn, session)
    }

    fn send(conn: &MockConnection, line: &str) -> Option<String> {
        conn.inject(format!("{}\n", line).as_bytes());
        conn.next_sent(WAIT)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_remote_control_scenario() {
        let server = server();
        let (a, _) = connect(&server, 5001);
        let (b, _) = connect(&server, 5002);
        assert_eq!(server.session_count(), 2);

        assert_eq!(send(&a, "status").as_deref(), Some("Smart TV is off"));
        assert!(send(&a, "turn on").unwrap().contains("turned on"));
        assert_eq!(send(&a, "channel active").as_deref(), Some("Active channel: 1"));

        let rejected = send(&a, "channel set 150").unwrap();
        assert!(rejected.contains("1-120"));
        assert_eq!(server.tv().active_channel(), 1);

        assert_eq!(
            send(&a, "channel set 50").as_deref(),
            Some("Active channel set to: 50")
        );
        assert_eq!(
            b.next_sent(WAIT).as_deref(),
            Some("[Notification] Channel changed to 50")
        );
        assert_eq!(a.next_sent(QUIET), None);
        assert_eq!(b.next_sent(QUIET), None);
    }

    #[test]
    fn test_broadcast_fifo_across_sessions() {
        let server = server();
        let (a, session_a) = connect(&server, 5011);
        let (b, session_b) = connect(&server, 5012);
        let (c, session_c) = connect(&server, 5013);

        // Messages already pending for B and C must stay ahead of the notification
        assert!(session_b.enqueue("pending b1"));
        assert!(session_b.enqueue("pending b2"));
        assert!(session_c.enqueue("pending c1"));

        server.dispatch(Origin::Session(&session_a), "channel up");

        assert_eq!(a.next_sent(WAIT).as_deref(), Some("Channel went up to 2"));
        assert_eq!(b.next_sent(WAIT).as_deref(), Some("pending b1"));
        assert_eq!(b.next_sent(WAIT).as_deref(), Some("pending b2"));
        assert_eq!(
            b.next_sent(WAIT).as_deref(),
            Some("[Notification] Channel changed to 2")
        );
        assert_eq!(c.next_sent(WAIT).as_deref(), Some("pending c1"));
        assert_eq!(
            c.next_sent(WAIT).as_deref(),
            Some("[Notification] Channel changed to 2")
        );

        thread::sleep(QUIET);
        assert!(a.drain_sent().is_empty());
        assert!(b.drain_sent().is_empty());
        assert!(c.drain_sent().is_empty());

        for session in [session_a, session_b, session_c] {
            session.teardown(server.as_ref());
        }
    }

    #[test]
    fn test_failed_channel_change_is_not_broadcast() {
        let server = server();
        let (a, _) = connect(&server, 5021);
        let (b, _) = connect(&server, 5022);

        assert!(send(&a, "channel down").unwrap().contains("cannot go any lower"));
        assert!(send(&a, "foo bar").unwrap().contains("Unsupported"));
        assert_eq!(b.next_sent(QUIET), None);
    }

    #[test]
    fn test_quit_removes_session() {
        let server = server();
        let (a, session) = connect(&server, 5031);

        assert_eq!(
            send(&a, "quit").as_deref(),
            Some("Connection closed by client request")
        );
        assert!(wait_until(|| server.session_count() == 0));
        assert!(wait_until(|| session.state() == SessionState::Closed));
        assert!(a.is_closed());
    }

    #[test]
    fn test_disconnect_removes_session_and_skips_broadcast() {
        let server = server();
        let (a, _) = connect(&server, 5041);
        let (b, _) = connect(&server, 5042);

        b.close();
        assert!(wait_until(|| server.session_count() == 1));

        assert_eq!(send(&a, "channel up").as_deref(), Some("Channel went up to 2"));
        assert!(b.drain_sent().is_empty());
    }

    #[test]
    fn test_datagram_command_is_answered_inline() {
        let server = server();
        let conn = MockConnection::new("127.0.0.1:6001");
        conn.inject(b"turn on");

        server.handle_datagram(&conn);
        assert_eq!(conn.drain_sent(), vec!["Smart TV is turned on"]);
        assert_eq!(server.datagram_peer_count(), 1);
        assert!(server.tv().is_on());
    }

    #[test]
    fn test_empty_datagram_is_invalid() {
        let server = server();
        let conn = MockConnection::new("127.0.0.1:6002");
        conn.inject(b"  \n");

        server.handle_datagram(&conn);
        assert_eq!(conn.drain_sent(), vec![INVALID]);
    }

    #[test]
    fn test_datagram_peers_are_registered_once() {
        let server = server();
        for _ in 0..3 {
            let conn = MockConnection::new("127.0.0.1:6003");
            conn.inject(b"status");
            server.handle_datagram(&conn);
        }
        assert_eq!(server.datagram_peer_count(), 1);
    }

    #[test]
    fn test_datagram_change_notifies_sessions() {
        let server = server();
        let (a, _) = connect(&server, 5051);
        let conn = MockConnection::new("127.0.0.1:6004");
        conn.inject(b"channel up");

        server.handle_datagram(&conn);
        assert_eq!(conn.drain_sent(), vec!["Channel went up to 2"]);
        assert_eq!(
            a.next_sent(WAIT).as_deref(),
            Some("[Notification] Channel changed to 2")
        );
    }

    #[test]
    fn test_shutdown_closes_all_sessions() {
        let server = server();
        let conns: Vec<_> = (0..3).map(|i| connect(&server, 5061 + i).0).collect();
        assert_eq!(server.session_count(), 3);

        server.shutdown();
        assert!(!server.is_running());
        assert_eq!(server.session_count(), 0);
        for conn in conns {
            assert!(conn.is_closed());
            assert_eq!(conn.close_calls(), 1);
        }
    }

    #[test]
    fn test_connection_after_shutdown_is_refused() {
        let server = server();
        server.shutdown();

        let conn = Arc::new(MockConnection::new("127.0.0.1:5070"));
        let result = server.register_session(Arc::clone(&conn) as Arc<dyn Connection>);
        assert!(result.is_err());
        assert!(conn.is_closed());
        assert_eq!(server.session_count(), 0);
    }
}
