//! Radio Link Manager: the single owner of the transceiver.
//!
//! Frame layout, flag bits, the two-step registration protocol and the
//! software ACK/retry loop are reproduced exactly from
//! `original_source/src/modules/radio.py`'s `NRF24L01P` class (methods
//! `__dispatch_received_message`, `__send_with_acknowledge`, `__main_loop`).
//! The dedicated worker thread talking to the rest of the system through a
//! bounded channel is the teacher's single-owner-thread pattern, generalized
//! from a pattern that recurs in `other_examples` radio/netdev drivers that
//! pair a poll loop with an outbound queue (e.g. the ax5043 lband binary's
//! `mio` loop feeding a single owner thread).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::registers::DEFAULT_PAYLOAD_LEN;
use super::transceiver::{Frame, Transceiver};

pub const MSG_STATE: u8 = 0x10;
pub const MSG_COMMAND: u8 = 0x20;
pub const MSG_ASSIGN: u8 = 0x40;
pub const MSG_ACK: u8 = 0x80;
pub const MSG_RESET: u8 = MSG_ASSIGN | 0x01;
pub const MSG_DESCRIBE: u8 = MSG_ASSIGN | 0x02;

pub const BROADCAST_ADDRESS: u8 = 0xFF;
pub const UNASSIGNED_ADDRESS: u8 = 0x00;

/// A decoded 8-byte radio frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RadioFrame {
    pub address: u8,
    pub message_id: u8,
    pub flags: u8,
    pub payload: [u8; 5],
}

impl RadioFrame {
    pub fn to_bytes(&self) -> Frame {
        let mut buf = [0u8; DEFAULT_PAYLOAD_LEN];
        buf[0] = self.address;
        buf[1] = self.message_id;
        buf[2] = self.flags;
        buf[3..8].copy_from_slice(&self.payload);
        buf
    }

    pub fn from_bytes(buf: Frame) -> Self {
        let mut payload = [0u8; 5];
        payload.copy_from_slice(&buf[3..8]);
        RadioFrame {
            address: buf[0],
            message_id: buf[1],
            flags: buf[2],
            payload,
        }
    }
}

/// Receives registration and state/command callbacks on the radio thread.
/// Implementations must not block: the radio is half-duplex and this is
/// the only thread allowed to touch it.
pub trait DeviceHandler: Send {
    fn describe(&self, address: u8, serial: &str, payload: &[u8]);
    fn receive(&self, address: u8, serial: &str, flags: u8, payload: &[u8]);
}

struct OutboundMessage {
    target_serial: String,
    payload: Vec<u8>,
}

#[derive(Default)]
struct Bindings {
    serial_to_addr: HashMap<String, u8>,
    addr_to_serial: HashMap<u8, String>,
}

impl Bindings {
    fn lowest_unused(&self) -> Option<u8> {
        (1u8..=254).find(|a| !self.addr_to_serial.contains_key(a))
    }

    fn bind(&mut self, serial: &str, addr: u8) {
        self.serial_to_addr.insert(serial.to_string(), addr);
        self.addr_to_serial.insert(addr, serial.to_string());
    }
}

fn decode_serial(payload: &[u8]) -> String {
    payload.iter().filter(|&&b| b > 0).map(|&b| b as char).collect()
}

/// Handle held by the rest of the system: lets callers enqueue outbound
/// messages and register device handlers without touching the transceiver
/// directly.
pub struct LinkManager {
    outbound_tx: SyncSender<OutboundMessage>,
    outbound_rx: Option<Receiver<OutboundMessage>>,
    transceiver: Option<Box<dyn Transceiver>>,
    handlers: Arc<Mutex<Vec<Box<dyn DeviceHandler>>>>,
    bindings: Arc<Mutex<Bindings>>,
    enabled: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

// `transceiver` and `outbound_rx` are only ever touched by `start` (which
// requires exclusive ownership, see the struct's callers) and by the worker
// thread it moves them into; no other method reaches them. Both are gone
// (replaced with `None`) before the `LinkManager` is wrapped in `Arc` and
// shared, so no two threads ever access either field, even though their
// types (`Receiver`, `Box<dyn Transceiver>`) aren't `Sync` on their own.
unsafe impl Sync for LinkManager {}

impl LinkManager {
    pub fn new(transceiver: Box<dyn Transceiver>) -> Self {
        let (outbound_tx, outbound_rx) = sync_channel(64);
        LinkManager {
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            transceiver: Some(transceiver),
            handlers: Arc::new(Mutex::new(Vec::new())),
            bindings: Arc::new(Mutex::new(Bindings::default())),
            enabled: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    pub fn register_handler(&self, handler: Box<dyn DeviceHandler>) {
        self.handlers.lock().unwrap().push(handler);
    }

    /// Enqueues a message addressed by RF serial number. Silently dropped
    /// (with a warning) if the serial has no known short address, same as
    /// the original's `send_message`.
    pub fn send_message(&self, serial: &str, payload: &[u8]) {
        let known = self.bindings.lock().unwrap().serial_to_addr.contains_key(serial);
        if !known {
            log::warn!("there is no known address for {}", serial);
            return;
        }
        if self
            .outbound_tx
            .try_send(OutboundMessage {
                target_serial: serial.to_string(),
                payload: payload.to_vec(),
            })
            .is_err()
        {
            log::warn!("outbound radio queue full, dropping message to {}", serial);
        }
    }

    pub fn start(&mut self) {
        self.enabled.store(true, Ordering::SeqCst);
        let transceiver = self.transceiver.take().expect("link manager already started");
        let outbound_rx = self.outbound_rx.take().expect("link manager already started");
        let handlers = Arc::clone(&self.handlers);
        let bindings = Arc::clone(&self.bindings);
        let enabled = Arc::clone(&self.enabled);

        *self.thread.lock().unwrap() = Some(
            thread::Builder::new()
                .name("radio".into())
                .spawn(move || {
                    let mut worker = Worker {
                        transceiver,
                        handlers,
                        bindings,
                        enabled,
                        outbound_rx,
                        next_message_id: 0,
                    };
                    worker.run();
                })
                .expect("failed to spawn radio thread"),
        );
    }

    /// Takes only `&self`: the worker thread captures its own clones of
    /// every field it needs (see `start`), so shutting it down from a
    /// shared handle only requires flipping the atomic and joining the
    /// handle, both of which tolerate concurrent sharers.
    pub fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

struct Worker {
    transceiver: Box<dyn Transceiver>,
    handlers: Arc<Mutex<Vec<Box<dyn DeviceHandler>>>>,
    bindings: Arc<Mutex<Bindings>>,
    enabled: Arc<AtomicBool>,
    outbound_rx: Receiver<OutboundMessage>,
    next_message_id: u8,
}

impl Worker {
    fn run(&mut self) {
        self.send_reset();

        while self.enabled.load(Ordering::SeqCst) {
            match self.transceiver.try_receive(Duration::from_millis(300)) {
                Ok(Some(raw)) => {
                    let frame = RadioFrame::from_bytes(raw);
                    if frame.address != UNASSIGNED_ADDRESS && frame.address != BROADCAST_ADDRESS {
                        self.send_ack(frame.address, frame.message_id);
                    }
                    self.dispatch(frame);
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    log::error!("radio I/O failure, stopping link manager: {:#}", err);
                    self.enabled.store(false, Ordering::SeqCst);
                    break;
                }
            }

            match self.outbound_rx.try_recv() {
                Ok(msg) => {
                    let addr = self.bindings.lock().unwrap().serial_to_addr.get(&msg.target_serial).copied();
                    if let Some(addr) = addr {
                        if self.send_with_ack(addr, &msg.payload, MSG_COMMAND) {
                            log::debug!("message successfully sent to {}", msg.target_serial);
                        } else {
                            log::debug!("message was not sent to {}", msg.target_serial);
                        }
                    }
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => break,
            }
        }

        if let Err(err) = self.transceiver.cleanup() {
            log::error!("failed to power down transceiver: {:#}", err);
        }
    }

    fn next_message_id(&mut self) -> u8 {
        self.next_message_id = self.next_message_id.wrapping_add(1);
        if self.next_message_id >= 0xFF {
            self.next_message_id = 1;
        }
        self.next_message_id
    }

    fn padded_payload(payload: &[u8]) -> [u8; 5] {
        let mut buf = [0u8; 5];
        let n = payload.len().min(5);
        buf[..n].copy_from_slice(&payload[..n]);
        buf
    }

    /// Sends `payload` to `address` with up to 3 logical retries, each
    /// trying the hardware send up to 3 times, and waits for a matching
    /// software ACK frame.
    fn send_with_ack(&mut self, address: u8, payload: &[u8], flags: u8) -> bool {
        let padded = Self::padded_payload(payload);
        let mut retries = 3;
        let mut acked = false;

        while retries > 0 && !acked {
            retries -= 1;
            let msgid = self.next_message_id();
            let frame = RadioFrame {
                address,
                message_id: msgid,
                flags,
                payload: padded,
            };

            let mut sent = false;
            for _ in 0..3 {
                match self.transceiver.send_frame(frame.to_bytes()) {
                    Ok(true) => {
                        sent = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        log::error!("radio I/O failure while sending: {:#}", err);
                        self.enabled.store(false, Ordering::SeqCst);
                        return false;
                    }
                }
            }

            if !sent {
                continue;
            }

            if let Ok(Some(raw)) = self.transceiver.try_receive(Duration::from_millis(300)) {
                let resp = RadioFrame::from_bytes(raw);
                if resp.address == address && resp.message_id == msgid && resp.flags == MSG_ACK {
                    acked = true;
                }
            }
        }

        acked
    }

    fn send_ack(&mut self, address: u8, message_id: u8) {
        let frame = RadioFrame {
            address,
            message_id,
            flags: MSG_ACK,
            payload: [0u8; 5],
        };
        if let Err(err) = self.transceiver.send_frame(frame.to_bytes()) {
            log::error!("radio I/O failure while acking: {:#}", err);
            self.enabled.store(false, Ordering::SeqCst);
        }
    }

    fn send_reset(&mut self) {
        let msgid = self.next_message_id();
        let frame = RadioFrame {
            address: BROADCAST_ADDRESS,
            message_id: msgid,
            flags: MSG_RESET,
            payload: [0u8; 5],
        };
        if let Err(err) = self.transceiver.send_frame(frame.to_bytes()) {
            log::error!("radio I/O failure while resetting: {:#}", err);
            self.enabled.store(false, Ordering::SeqCst);
        }
    }

    fn dispatch(&mut self, frame: RadioFrame) {
        if frame.address == BROADCAST_ADDRESS && frame.flags & MSG_ASSIGN != 0 {
            self.handle_assign(&frame.payload);
        } else if frame.flags & MSG_DESCRIBE != 0 {
            self.handle_describe(frame.address, &frame.payload);
        } else {
            self.handle_receive(frame.address, frame.flags, &frame.payload);
        }
    }

    fn handle_assign(&mut self, payload: &[u8]) {
        let serial = decode_serial(payload);
        let addr = {
            let bindings = self.bindings.lock().unwrap();
            bindings.serial_to_addr.get(&serial).copied().or_else(|| bindings.lowest_unused())
        };

        match addr {
            Some(addr) => {
                self.bindings.lock().unwrap().bind(&serial, addr);
                log::info!("registering {} with address {}", serial, addr);
                self.send_with_ack(addr, serial.as_bytes(), MSG_ASSIGN);
            }
            None => log::warn!("cannot register {}: address space exhausted", serial),
        }
    }

    fn handle_describe(&mut self, address: u8, payload: &[u8]) {
        let serial = self.bindings.lock().unwrap().addr_to_serial.get(&address).cloned();
        if let Some(serial) = serial {
            for handler in self.handlers.lock().unwrap().iter() {
                handler.describe(address, &serial, payload);
            }
        }
    }

    fn handle_receive(&mut self, address: u8, flags: u8, payload: &[u8]) {
        let serial = self.bindings.lock().unwrap().addr_to_serial.get(&address).cloned();
        if let Some(serial) = serial {
            for handler in self.handlers.lock().unwrap().iter() {
                handler.receive(address, &serial, flags, payload);
            }
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::radio::transceiver::MockTransceiver;

    #[test]
    fn frame_round_trips_through_bytes() {
        let frame = RadioFrame {
            address: 7,
            message_id: 42,
            flags: MSG_STATE,
            payload: [1, 2, 3, 4, 5],
        };
        assert_eq!(RadioFrame::from_bytes(frame.to_bytes()), frame);
    }

    #[test]
    fn decode_serial_drops_zero_bytes() {
        assert_eq!(decode_serial(&[b'A', 0, b'B', b'C', 0]), "ABC");
    }

    #[test]
    fn bindings_allocate_lowest_unused_address() {
        let mut bindings = Bindings::default();
        bindings.bind("one", 1);
        bindings.bind("two", 2);
        assert_eq!(bindings.lowest_unused(), Some(3));
    }

    #[test]
    fn link_manager_registers_device_on_assign_broadcast() {
        let mut transceiver = MockTransceiver::new();
        transceiver.inject(
            RadioFrame {
                address: BROADCAST_ADDRESS,
                message_id: 1,
                flags: MSG_ASSIGN,
                payload: [b'S', b'N', b'1', 0, 0],
            }
            .to_bytes(),
        );

        let mut manager = LinkManager::new(Box::new(transceiver));
        manager.start();
        thread::sleep(Duration::from_millis(50));
        manager.stop();

        assert!(manager.bindings.lock().unwrap().serial_to_addr.contains_key("SN1"));
    }
}
