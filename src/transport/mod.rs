//! Client-facing transports (§4.5, §4.6): UDP and TCP framings over the same
//! message-type space, both driving the same [`crate::dispatcher::Dispatcher`]
//! through a type-erased callback — the Rust equivalent of
//! `modules/comm/__init__.py`'s `CommunicationHandler.handler` callback and
//! `Header` constants.

pub mod tcp;
pub mod udp;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::HubError;

pub const MSG_LOGIN: u8 = 0xA1;
pub const MSG_LIST_DEVICE_TYPES: u8 = 0xA2;
pub const MSG_LIST_DEVICES: u8 = 0xA3;
pub const MSG_SEND_COMMAND: u8 = 0xA4;
pub const MSG_STATE_CHANGED: u8 = 0xA5;
pub const MSG_LOAD_TYPE_IMAGE: u8 = 0xA6;
pub const MSG_RENAME_DEVICE: u8 = 0xA7;
pub const MSG_COUNT_HISTORY: u8 = 0xB1;
pub const MSG_LIST_HISTORY: u8 = 0xB2;
pub const MSG_LIST_USERS: u8 = 0xC1;
pub const MSG_USER_CREATE: u8 = 0xC2;
pub const MSG_USER_EDIT: u8 = 0xC3;
pub const MSG_USER_DELETE: u8 = 0xC4;
pub const MSG_USERS_CHANGED: u8 = 0xC5;
pub const MSG_KEEPALIVE: u8 = 0xE0;
pub const MSG_ERROR: u8 = 0xF0;
pub const MSG_ERROR_INVALID_SESSION: u8 = 0xF1;
pub const MSG_EXIT: u8 = 0xFE;

pub const SESSION_ID_LEN: usize = 32;

/// Identifies a client across transports: a UDP `(peer, type)` reassembly
/// key collapses to one address, a TCP client is a live connection handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerId {
    Udp(SocketAddr),
    Tcp(u64),
}

/// Mirrors `CommunicationHandler`: what the dispatcher needs to reply,
/// broadcast, and manage sessions without knowing which transport it's
/// talking to.
pub trait Transport: Send + Sync {
    fn send(&self, msg_type: u8, payload: &[u8], peer: PeerId);
    fn broadcast(&self, msg_type: u8, payload: &[u8]);
    fn authentication_succeeded(&self, session_id: &str, peer: PeerId);
    fn authentication_failed(&self, peer: PeerId);
    /// UDP: does the stored session for `peer` match the message's 32-byte
    /// prefix? TCP: always `true` once the connection has logged in — a
    /// failed TCP login already closed the socket.
    fn is_valid_session(&self, payload: &[u8], peer: PeerId) -> bool;
    fn strip_session_prefix<'a>(&self, payload: &'a [u8]) -> &'a [u8];

    fn start(&self) -> Result<(), HubError>;
    fn stop(&self);
}

/// Type-erased callback a transport invokes for every reassembled message,
/// standing in for the original's bound `self.handle_received_message`
/// method reference.
pub type MessageHandler = Arc<dyn Fn(&dyn Transport, PeerId, u8, &[u8]) + Send + Sync>;
