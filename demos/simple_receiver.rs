//! Minimal standalone bring-up: prints every frame the transceiver receives.
//!
//! Adapted from the teacher's `simple_receiver_ack.rs`: same open-loop-print
//! shape, against homehub's fixed single-pipe `Transceiver` trait.

use std::time::Duration;

use homehub::radio::registers::{DEFAULT_CHANNEL, DEFAULT_RX_ADDR, DEFAULT_TX_ADDR};
use homehub::radio::{LinuxTransceiver, RadioFrame, Transceiver};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let mut device = LinuxTransceiver::new("/dev/spidev0.0", 22, 23, DEFAULT_CHANNEL, DEFAULT_RX_ADDR, DEFAULT_TX_ADDR)?;

    loop {
        match device.try_receive(Duration::from_millis(300)) {
            Ok(Some(raw)) => {
                let frame = RadioFrame::from_bytes(raw);
                println!("id {:02X} <- addr {} flags {:02X} payload {:?}", frame.message_id, frame.address, frame.flags, frame.payload);
            }
            Ok(None) => {}
            Err(err) => {
                println!("receive failed: {:#}", err);
                break;
            }
        }
    }
    Ok(())
}
