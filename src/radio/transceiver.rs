//! Transceiver Driver: register programming and fixed 8-byte frame I/O.
//!
//! The `linux` backend is grounded in the teacher's `sysfs_ce.rs` CE-pin
//! wrapper and `lib.rs`'s `spidev::Spidev::open`/`configure` sequence; the
//! init/poll timing (init register sequence, ~5ms IRQ poll in 1ms ticks, 1ms
//! TX CE pulse, 10ms ACK wait) matches
//! `original_source/src/modules/radio.py`'s `NRF24L01P.__init_radio`/
//! `__read_message`/`__send_message` exactly, since that is the behavior
//! this hub must reproduce, not the teacher's own dynamic-payload protocol.
//! The `mock` backend is new: a feature the teacher never needed, added so
//! the Link Manager (`radio/link.rs`) can be exercised by the test suite
//! without real hardware, mirroring the teacher's own split of the chip
//! access behind a swappable backend (`sysfs_ce`/`rpi_ce`/`embassy_rp_ce`).

use std::time::{Duration, Instant};

use super::registers::*;

pub type Frame = [u8; DEFAULT_PAYLOAD_LEN];

/// Hardware access surface the Radio Link Manager drives. A failure here is
/// always fatal to the radio thread: there is nothing a caller can usefully
/// retry on a bus error, only restart.
pub trait Transceiver: Send {
    /// Waits up to `timeout` for an inbound frame. `Ok(None)` on timeout.
    fn try_receive(&mut self, timeout: Duration) -> anyhow::Result<Option<Frame>>;
    /// Sends `frame`, returning whether the hardware auto-ack was observed.
    fn send_frame(&mut self, frame: Frame) -> anyhow::Result<bool>;
    /// Powers the chip down and releases GPIO resources.
    fn cleanup(&mut self) -> anyhow::Result<()>;
}

#[cfg(feature = "linux")]
pub use linux::LinuxTransceiver;

#[cfg(feature = "linux")]
mod linux {
    use super::*;
    use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
    use std::io;
    use std::io::Write;
    use std::thread::sleep;
    use sysfs_gpio::{Direction, Edge, Pin};

    pub struct LinuxTransceiver {
        spi: Spidev,
        ce: Pin,
        irq: Pin,
        rx_addr: [u8; DEFAULT_ADDRESS_LEN],
        tx_addr: [u8; DEFAULT_ADDRESS_LEN],
        payload_len: usize,
    }

    impl LinuxTransceiver {
        pub fn new(
            spi_path: &str,
            ce_pin: u64,
            irq_pin: u64,
            channel: u8,
            rx_addr: [u8; DEFAULT_ADDRESS_LEN],
            tx_addr: [u8; DEFAULT_ADDRESS_LEN],
        ) -> anyhow::Result<Self> {
            let mut spi = Spidev::open(spi_path)?;
            let options = SpidevOptions::new()
                .bits_per_word(8)
                .max_speed_hz(8_000_000)
                .mode(SpiModeFlags::SPI_MODE_0)
                .build();
            spi.configure(&options)?;

            let ce = Pin::new(ce_pin);
            ce.export()
                .map_err(|_| io::Error::new(io::ErrorKind::PermissionDenied, "unable to export CE pin"))?;
            ce.set_direction(Direction::Low)
                .map_err(|_| io::Error::new(io::ErrorKind::PermissionDenied, "unable to set CE direction"))?;

            let irq = Pin::new(irq_pin);
            irq.export()
                .map_err(|_| io::Error::new(io::ErrorKind::PermissionDenied, "unable to export IRQ pin"))?;
            irq.set_direction(Direction::In)
                .map_err(|_| io::Error::new(io::ErrorKind::PermissionDenied, "unable to set IRQ direction"))?;
            irq.set_edge(Edge::FallingEdge)
                .map_err(|_| io::Error::new(io::ErrorKind::PermissionDenied, "unable to set IRQ edge"))?;

            let mut dev = LinuxTransceiver {
                spi,
                ce,
                irq,
                rx_addr,
                tx_addr,
                payload_len: DEFAULT_PAYLOAD_LEN,
            };
            dev.init_radio(channel)?;
            Ok(dev)
        }

        fn write_command(&mut self, cmd: &[u8]) -> anyhow::Result<()> {
            self.spi.write(cmd)?;
            Ok(())
        }

        fn read_register(&mut self, addr: Register, len: usize) -> anyhow::Result<Vec<u8>> {
            let mut tx = vec![R_REGISTER | addr];
            tx.extend(std::iter::repeat(NOP).take(len));
            let mut rx = vec![0u8; tx.len()];
            {
                let mut transfer = SpidevTransfer::read_write(&tx, &mut rx);
                self.spi.transfer(&mut transfer)?;
            }
            Ok(rx[1..].to_vec())
        }

        fn read_status(&mut self) -> anyhow::Result<u8> {
            let tx = [NOP];
            let mut rx = [0u8; 1];
            {
                let mut transfer = SpidevTransfer::read_write(&tx, &mut rx);
                self.spi.transfer(&mut transfer)?;
            }
            Ok(rx[0])
        }

        fn reset_status(&mut self) -> anyhow::Result<()> {
            self.write_command(&[W_REGISTER | STATUS, bits::STATUS_CLEAR_ALL])
        }

        fn set_rx_addr_p0(&mut self, addr: [u8; DEFAULT_ADDRESS_LEN]) -> anyhow::Result<()> {
            let mut cmd = vec![W_REGISTER | RX_ADDR_P0];
            cmd.extend_from_slice(&addr);
            self.write_command(&cmd)
        }

        fn init_radio(&mut self, channel: u8) -> anyhow::Result<()> {
            self.write_command(&[W_REGISTER | EN_AA, 0x01])?;
            self.write_command(&[W_REGISTER | SETUP_RETR, bits::SETUP_RETR_1000US_15RT])?;
            self.write_command(&[W_REGISTER | EN_RXADDR, 0x01])?;
            self.write_command(&[W_REGISTER | SETUP_AW, bits::SETUP_AW_5_BYTES])?;
            self.write_command(&[W_REGISTER | RF_CH, channel])?;
            self.write_command(&[W_REGISTER | RF_SETUP, bits::RF_DR_1MBPS | bits::RF_PWR_0DBM])?;
            self.write_command(&[W_REGISTER | RX_PW_P0, self.payload_len as u8])?;
            self.set_rx_addr_p0(self.rx_addr)?;
            let mut cmd = vec![W_REGISTER | TX_ADDR];
            cmd.extend_from_slice(&self.tx_addr);
            self.write_command(&cmd)?;
            self.write_command(&[W_REGISTER | CONFIG, bits::CONFIG_IDLE])
        }

        fn read_payload(&mut self) -> anyhow::Result<Frame> {
            let mut tx = vec![R_RX_PAYLOAD];
            tx.extend(std::iter::repeat(NOP).take(self.payload_len));
            let mut rx = vec![0u8; tx.len()];
            {
                let mut transfer = SpidevTransfer::read_write(&tx, &mut rx);
                self.spi.transfer(&mut transfer)?;
            }
            let mut frame = [0u8; DEFAULT_PAYLOAD_LEN];
            frame.copy_from_slice(&rx[1..1 + DEFAULT_PAYLOAD_LEN]);
            Ok(frame)
        }
    }

    impl Transceiver for LinuxTransceiver {
        fn try_receive(&mut self, timeout: Duration) -> anyhow::Result<Option<Frame>> {
            self.write_command(&[W_REGISTER | CONFIG, bits::CONFIG_RX])?;
            let start = Instant::now();

            loop {
                let status = self.read_status()?;
                if status & bits::STAT_RX_FIFO_EMPTY != bits::STAT_RX_FIFO_EMPTY {
                    let fifo_status = self.read_register(FIFO_STATUS, 1)?[0];
                    if fifo_status & bits::FIFOSTAT_RX_FULL > 0 {
                        log::warn!("RX FIFO was full");
                    }
                    return Ok(Some(self.read_payload()?));
                }

                self.reset_status()?;
                self.ce
                    .set_value(1)
                    .map_err(|e| anyhow::anyhow!("failed to assert CE: {:?}", e))?;

                let mut waited = Duration::ZERO;
                while waited < Duration::from_millis(5) {
                    if matches!(self.irq.get_value(), Ok(0)) {
                        break;
                    }
                    sleep(Duration::from_millis(1));
                    waited += Duration::from_millis(1);
                }

                self.ce
                    .set_value(0)
                    .map_err(|e| anyhow::anyhow!("failed to deassert CE: {:?}", e))?;

                if start.elapsed() >= timeout {
                    return Ok(None);
                }
            }
        }

        fn send_frame(&mut self, frame: Frame) -> anyhow::Result<bool> {
            self.write_command(&[W_REGISTER | CONFIG, bits::CONFIG_TX])?;
            self.reset_status()?;

            self.set_rx_addr_p0(self.tx_addr)?;

            let mut cmd = vec![W_TX_PAYLOAD];
            cmd.extend_from_slice(&frame);
            self.write_command(&cmd)?;

            self.ce
                .set_value(1)
                .map_err(|e| anyhow::anyhow!("failed to assert CE: {:?}", e))?;
            sleep(Duration::from_millis(1));
            self.ce
                .set_value(0)
                .map_err(|e| anyhow::anyhow!("failed to deassert CE: {:?}", e))?;

            let mut ack_received = false;
            for _ in 0..10 {
                if matches!(self.irq.get_value(), Ok(0)) {
                    ack_received = true;
                    break;
                }
                sleep(Duration::from_millis(1));
            }

            let status = self.read_status()?;
            if status & bits::STAT_TX_DS == bits::STAT_TX_DS {
                ack_received = true;
            }

            self.reset_status()?;
            self.set_rx_addr_p0(self.rx_addr)?;
            self.write_command(&[FLUSH_TX])?;

            Ok(ack_received)
        }

        fn cleanup(&mut self) -> anyhow::Result<()> {
            self.write_command(&[W_REGISTER | CONFIG, 0x00])?;
            let _ = self.ce.unexport();
            let _ = self.irq.unexport();
            Ok(())
        }
    }
}

#[cfg(feature = "mock")]
pub use mock::MockTransceiver;

#[cfg(feature = "mock")]
mod mock {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory stand-in used by the integration tests. Frames queued via
    /// `inject` are returned from `try_receive`; frames passed to
    /// `send_frame` are captured in `sent` and acked according to
    /// `ack_policy`.
    pub struct MockTransceiver {
        pub inbound: VecDeque<Frame>,
        pub sent: Vec<Frame>,
        pub ack_policy: Box<dyn FnMut(&Frame) -> bool + Send>,
        pub cleaned_up: bool,
    }

    impl MockTransceiver {
        pub fn new() -> Self {
            MockTransceiver {
                inbound: VecDeque::new(),
                sent: Vec::new(),
                ack_policy: Box::new(|_| true),
                cleaned_up: false,
            }
        }

        pub fn inject(&mut self, frame: Frame) {
            self.inbound.push_back(frame);
        }
    }

    impl Transceiver for MockTransceiver {
        fn try_receive(&mut self, _timeout: Duration) -> anyhow::Result<Option<Frame>> {
            Ok(self.inbound.pop_front())
        }

        fn send_frame(&mut self, frame: Frame) -> anyhow::Result<bool> {
            let acked = (self.ack_policy)(&frame);
            self.sent.push(frame);
            Ok(acked)
        }

        fn cleanup(&mut self) -> anyhow::Result<()> {
            self.cleaned_up = true;
            Ok(())
        }
    }
}
