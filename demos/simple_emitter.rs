//! Minimal standalone bring-up: sends a broadcast state frame once a second
//! and reports whether the hardware auto-ack was observed.
//!
//! Adapted from the teacher's own `simple_emitter.rs`: same open-loop-send
//! shape, against homehub's fixed single-pipe `Transceiver` trait instead of
//! the teacher's `NRF24L01`/`TXConfig` API.

use std::thread::sleep;
use std::time::Duration;

use homehub::radio::link::BROADCAST_ADDRESS;
use homehub::radio::registers::{DEFAULT_CHANNEL, DEFAULT_RX_ADDR, DEFAULT_TX_ADDR};
use homehub::radio::{LinuxTransceiver, RadioFrame, Transceiver, MSG_STATE};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let mut device = LinuxTransceiver::new("/dev/spidev0.0", 22, 23, DEFAULT_CHANNEL, DEFAULT_RX_ADDR, DEFAULT_TX_ADDR)?;

    let mut message_id: u8 = 0;
    loop {
        message_id = message_id.wrapping_add(1).max(1);
        let frame = RadioFrame { address: BROADCAST_ADDRESS, message_id, flags: MSG_STATE, payload: [0x01, 0, 0, 0, 0] };
        match device.send_frame(frame.to_bytes()) {
            Ok(true) => println!("frame {} sent, ack received", message_id),
            Ok(false) => println!("frame {} sent, no ack", message_id),
            Err(err) => println!("send failed: {:#}", err),
        }
        sleep(Duration::from_secs(1));
    }
}
