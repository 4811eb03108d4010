//! RF link stack: register map, transceiver driver, link manager.

pub mod link;
pub mod registers;
pub mod transceiver;

pub use link::{DeviceHandler, LinkManager, RadioFrame, MSG_ACK, MSG_ASSIGN, MSG_COMMAND, MSG_DESCRIBE, MSG_RESET, MSG_STATE};
pub use transceiver::Transceiver;

#[cfg(feature = "linux")]
pub use transceiver::LinuxTransceiver;

#[cfg(feature = "mock")]
pub use transceiver::MockTransceiver;
