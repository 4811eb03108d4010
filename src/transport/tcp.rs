//! TCP transport (§4.6), grounded in
//! `original_source/src/modules/comm/tcp.py`'s `TCPHandler`: one accept
//! loop, one worker thread per connection, a 3-byte head
//! (`type`, big-endian u16 length).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use crate::error::HubError;

use super::{MessageHandler, PeerId, Transport};

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

pub struct TcpConfig {
    pub bind_host: String,
    pub port: u16,
    pub backlog: i32,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig { bind_host: "0.0.0.0".to_string(), port: 49001, backlog: 5 }
    }
}

struct Connection {
    stream: Mutex<TcpStream>,
    session_id: Mutex<Option<String>>,
    enabled: AtomicBool,
}

pub struct TcpTransport {
    config: TcpConfig,
    handler: OnceLock<MessageHandler>,
    listener: Mutex<Option<TcpListener>>,
    enabled: AtomicBool,
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
    next_id: AtomicU64,
}

impl TcpTransport {
    pub fn new(config: TcpConfig) -> Self {
        TcpTransport {
            config,
            handler: OnceLock::new(),
            listener: Mutex::new(None),
            enabled: AtomicBool::new(false),
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn set_handler(&self, handler: MessageHandler) {
        let _ = self.handler.set(handler);
    }

    /// Polls a non-blocking clone of the listener rather than blocking in
    /// `accept()` directly, so `stop()` (which only takes the original
    /// handle out of the mutex) never has to wait on this thread.
    fn accept_loop(self: &Arc<Self>) {
        let working = {
            let guard = self.listener.lock().unwrap();
            let Some(listener) = guard.as_ref() else { return };
            listener.try_clone().expect("failed to clone tcp listener")
        };
        working.set_nonblocking(true).expect("failed to set tcp listener non-blocking");

        while self.enabled.load(Ordering::SeqCst) {
            match working.accept() {
                Ok((stream, addr)) => {
                    let _ = stream.set_read_timeout(Some(DEFAULT_READ_TIMEOUT));
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    let conn = Arc::new(Connection { stream: Mutex::new(stream), session_id: Mutex::new(None), enabled: AtomicBool::new(true) });
                    self.connections.lock().unwrap().insert(id, Arc::clone(&conn));
                    log::info!("tcp connection accepted from {}", addr);
                    let this = Arc::clone(self);
                    thread::Builder::new()
                        .name(format!("tcp-conn-{}", addr))
                        .spawn(move || this.connection_loop(id, conn, addr))
                        .expect("failed to spawn tcp connection thread");
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(DEFAULT_READ_TIMEOUT);
                }
                Err(e) => {
                    log::error!("tcp accept error: {}", e);
                    break;
                }
            }
        }
    }

    fn connection_loop(&self, id: u64, conn: Arc<Connection>, addr: SocketAddr) {
        while self.enabled.load(Ordering::SeqCst) && conn.enabled.load(Ordering::SeqCst) {
            match read_message(&conn.stream) {
                Ok(Some((msg_type, payload))) => {
                    if let Some(handler) = self.handler.get() {
                        handler(self, PeerId::Tcp(id), msg_type, &payload);
                    }
                }
                Ok(None) => {
                    log::info!("tcp socket closed: {}", addr);
                    break;
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    log::error!("tcp receive error [{}]: {}", addr, e);
                    break;
                }
            }
        }
        self.connections.lock().unwrap().remove(&id);
    }

    fn send_to_connection(&self, msg_type: u8, payload: &[u8], conn: &Connection) {
        let len = payload.len().min(u16::MAX as usize) as u16;
        let mut frame = Vec::with_capacity(3 + payload.len());
        frame.push(msg_type);
        frame.push((len >> 8) as u8);
        frame.push((len & 0xFF) as u8);
        frame.extend_from_slice(&payload[..len as usize]);
        if let Err(e) = conn.stream.lock().unwrap().write_all(&frame) {
            log::error!("tcp send error: {}", e);
        }
    }
}

fn read_message(stream: &Mutex<TcpStream>) -> std::io::Result<Option<(u8, Vec<u8>)>> {
    let mut stream = stream.lock().unwrap();
    let mut head = [0u8; 1];
    match stream.read(&mut head)? {
        0 => return Ok(None),
        _ => {}
    }
    let msg_type = head[0];

    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf)?;
    let length = u16::from_be_bytes(len_buf) as usize;

    let mut payload = vec![0u8; length];
    if length > 0 {
        stream.read_exact(&mut payload)?;
    }
    Ok(Some((msg_type, payload)))
}

impl Transport for TcpTransport {
    fn send(&self, msg_type: u8, payload: &[u8], peer: PeerId) {
        if let PeerId::Tcp(id) = peer {
            if let Some(conn) = self.connections.lock().unwrap().get(&id) {
                self.send_to_connection(msg_type, payload, conn);
            }
        }
    }

    fn broadcast(&self, msg_type: u8, payload: &[u8]) {
        let conns: Vec<Arc<Connection>> = self.connections.lock().unwrap().values().cloned().collect();
        for conn in conns {
            self.send_to_connection(msg_type, payload, &conn);
        }
    }

    fn authentication_succeeded(&self, session_id: &str, peer: PeerId) {
        if let PeerId::Tcp(id) = peer {
            if let Some(conn) = self.connections.lock().unwrap().get(&id) {
                *conn.session_id.lock().unwrap() = Some(session_id.to_string());
            }
        }
    }

    fn authentication_failed(&self, peer: PeerId) {
        if let PeerId::Tcp(id) = peer {
            if let Some(conn) = self.connections.lock().unwrap().get(&id) {
                conn.enabled.store(false, Ordering::SeqCst);
                let _ = conn.stream.lock().unwrap().shutdown(std::net::Shutdown::Both);
            }
        }
    }

    /// A TCP connection that failed login is already closed, so by the time
    /// the dispatcher asks, "has a session" and "is valid" coincide.
    fn is_valid_session(&self, _payload: &[u8], peer: PeerId) -> bool {
        let PeerId::Tcp(id) = peer else { return false };
        self.connections.lock().unwrap().get(&id).is_some_and(|c| c.session_id.lock().unwrap().is_some())
    }

    fn strip_session_prefix<'a>(&self, payload: &'a [u8]) -> &'a [u8] {
        payload
    }

    fn start(&self) -> Result<(), HubError> {
        let listener = TcpListener::bind((self.config.bind_host.as_str(), self.config.port))?;
        listener.set_nonblocking(false)?;
        log::info!("tcp socket bound on {}:{}", self.config.bind_host, listener.local_addr()?.port());
        *self.listener.lock().unwrap() = Some(listener);
        self.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.listener.lock().unwrap().take();
        for conn in self.connections.lock().unwrap().values() {
            let _ = conn.stream.lock().unwrap().shutdown(std::net::Shutdown::Both);
        }
    }
}

pub fn spawn_acceptor(transport: Arc<TcpTransport>) -> thread::JoinHandle<()> {
    thread::Builder::new().name("tcp-acceptor".into()).spawn(move || transport.accept_loop()).expect("failed to spawn tcp acceptor thread")
}
