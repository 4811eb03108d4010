//! UDP transport (§4.5), grounded in
//! `original_source/src/modules/comm/udp.py`'s `UDPHandler`: fixed 2-byte
//! head (`type`, `flags`), `MORE_FOLLOWS` fragmentation, and a session table
//! keyed by peer address. The bind socket is always opened with
//! `SO_REUSEADDR`, matching `udp.py`'s unconditional `setsockopt` before
//! `bind` -- needed so `mcast`/`bcast`/`udp` endpoints can share a port.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock, RwLock};
use std::thread;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::HubError;

use super::{MessageHandler, PeerId, Transport, MSG_EXIT, SESSION_ID_LEN};

const MORE_FOLLOWS: u8 = 0x01;
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

pub struct UdpConfig {
    pub bind_host: String,
    pub port: u16,
    pub multicast_group: Option<String>,
    pub broadcast: bool,
    pub ttl: u32,
    pub loopback: bool,
    pub buffer_size: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        UdpConfig {
            bind_host: "0.0.0.0".to_string(),
            port: 49001,
            multicast_group: None,
            broadcast: false,
            ttl: 8,
            loopback: false,
            buffer_size: 1500,
        }
    }
}

pub struct UdpTransport {
    config: UdpConfig,
    handler: OnceLock<MessageHandler>,
    socket: RwLock<Option<UdpSocket>>,
    enabled: AtomicBool,
    sessions: Mutex<HashMap<SocketAddr, String>>,
    incomplete: Mutex<HashMap<(SocketAddr, u8), Vec<u8>>>,
}

impl UdpTransport {
    pub fn new(config: UdpConfig) -> Self {
        UdpTransport {
            config,
            handler: OnceLock::new(),
            socket: RwLock::new(None),
            enabled: AtomicBool::new(false),
            sessions: Mutex::new(HashMap::new()),
            incomplete: Mutex::new(HashMap::new()),
        }
    }

    /// Wired during the dispatcher's `configure` step, once it exists to be
    /// referenced — mirrors `UDPHandler(..., handler=self.handle_received_message)`
    /// being constructed after `ClientModule` itself.
    pub fn set_handler(&self, handler: MessageHandler) {
        let _ = self.handler.set(handler);
    }

    fn merge_incomplete(&self, key: (SocketAddr, u8), chunk: &[u8], finish: bool) -> Vec<u8> {
        let mut incomplete = self.incomplete.lock().unwrap();
        let merged = match incomplete.remove(&key) {
            Some(mut buf) => {
                buf.extend_from_slice(chunk);
                buf
            }
            None => chunk.to_vec(),
        };
        if !finish {
            incomplete.insert(key, merged.clone());
        }
        merged
    }

    fn receive_loop(&self) {
        let mut buf = vec![0u8; self.config.buffer_size];
        while self.enabled.load(Ordering::SeqCst) {
            let socket = self.socket.read().unwrap();
            let Some(socket) = socket.as_ref() else { break };
            match socket.recv_from(&mut buf) {
                Ok((n, peer)) if n >= 2 => {
                    let msg_type = buf[0];
                    let flags = buf[1];
                    let finish = flags & MORE_FOLLOWS == 0;
                    let merged = self.merge_incomplete((peer, msg_type), &buf[2..n], finish);
                    if !finish {
                        continue;
                    }
                    if msg_type == MSG_EXIT {
                        self.sessions.lock().unwrap().remove(&peer);
                    } else if let Some(handler) = self.handler.get() {
                        handler(self, PeerId::Udp(peer), msg_type, &merged);
                    }
                }
                Ok(_) => {}
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => log::error!("udp receive error: {}", e),
            }
        }
    }

    fn send_to(&self, msg_type: u8, payload: &[u8], dest: SocketAddr) {
        let socket = self.socket.read().unwrap();
        let Some(socket) = socket.as_ref() else { return };
        let max_size = self.config.buffer_size - 2;
        let mut remaining = payload;
        loop {
            let (chunk, rest) = if remaining.len() > max_size { remaining.split_at(max_size) } else { (remaining, &remaining[remaining.len()..]) };
            let more = !rest.is_empty();
            let mut frame = Vec::with_capacity(chunk.len() + 2);
            frame.push(msg_type);
            frame.push(if more { MORE_FOLLOWS } else { 0 });
            frame.extend_from_slice(chunk);
            if let Err(e) = socket.send_to(&frame, dest) {
                log::error!("udp send error to {}: {}", dest, e);
                return;
            }
            if !more {
                break;
            }
            remaining = rest;
        }
    }
}

impl Transport for UdpTransport {
    fn send(&self, msg_type: u8, payload: &[u8], peer: PeerId) {
        if let PeerId::Udp(addr) = peer {
            self.send_to(msg_type, payload, addr);
        }
    }

    fn broadcast(&self, msg_type: u8, payload: &[u8]) {
        let peers: Vec<SocketAddr> = self.sessions.lock().unwrap().keys().copied().collect();
        for peer in peers {
            self.send_to(msg_type, payload, peer);
        }
    }

    fn authentication_succeeded(&self, session_id: &str, peer: PeerId) {
        if let PeerId::Udp(addr) = peer {
            self.sessions.lock().unwrap().insert(addr, session_id.to_string());
        }
    }

    fn authentication_failed(&self, peer: PeerId) {
        self.send(super::MSG_ERROR_INVALID_SESSION, &[], peer);
    }

    fn is_valid_session(&self, payload: &[u8], peer: PeerId) -> bool {
        let PeerId::Udp(addr) = peer else { return false };
        if payload.len() < SESSION_ID_LEN {
            return false;
        }
        self.sessions.lock().unwrap().get(&addr).is_some_and(|s| s.as_bytes() == &payload[..SESSION_ID_LEN])
    }

    fn strip_session_prefix<'a>(&self, payload: &'a [u8]) -> &'a [u8] {
        &payload[SESSION_ID_LEN.min(payload.len())..]
    }

    fn start(&self) -> Result<(), HubError> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_host, self.config.port)
            .parse()
            .map_err(|_| HubError::Protocol(format!("invalid bind address: {}:{}", self.config.bind_host, self.config.port)))?;

        // `SO_REUSEADDR` always, so `mcast`/`bcast`/`udp` endpoints sharing the
        // default port can all bind; std::net::UdpSocket has no hook for it.
        let raw = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        raw.set_reuse_address(true)?;
        raw.bind(&addr.into())?;
        let socket: UdpSocket = raw.into();

        socket.set_read_timeout(Some(DEFAULT_READ_TIMEOUT))?;
        socket.set_broadcast(self.config.broadcast)?;
        socket.set_multicast_ttl_v4(self.config.ttl)?;
        socket.set_multicast_loop_v4(self.config.loopback)?;
        if let Some(group) = &self.config.multicast_group {
            let group: std::net::Ipv4Addr = group.parse().map_err(|_| HubError::Protocol(format!("invalid multicast group: {}", group)))?;
            socket.join_multicast_v4(&group, &std::net::Ipv4Addr::UNSPECIFIED)?;
        }
        log::info!("udp socket bound on {}:{}", self.config.bind_host, socket.local_addr()?.port());
        *self.socket.write().unwrap() = Some(socket);
        self.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.socket.write().unwrap().take();
    }
}

/// Spawns the receiver thread; kept separate from `start` so that `self`
/// can be shared (`Arc<UdpTransport>`) with the thread.
pub fn spawn_receiver(transport: std::sync::Arc<UdpTransport>) -> thread::JoinHandle<()> {
    thread::Builder::new().name("udp-receiver".into()).spawn(move || transport.receive_loop()).expect("failed to spawn udp receiver thread")
}
