//! Crate-wide error types.
//!
//! The hardware edge (SPI/GPIO transfers) keeps the teacher driver's loose
//! `anyhow::Result` style: a failure there is always fatal to the radio
//! thread and there is nothing useful to pattern-match on. Everything above
//! that boundary -- persistence, dispatch, auth -- uses this closed enum so
//! callers can decide exactly which wire-level response to send.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("malformed client request: {0}")]
    Protocol(String),

    #[error("authentication failed")]
    Auth,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("radio link error: {0}")]
    Radio(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("no such device: {0}")]
    NoSuchDevice(String),

    #[error("no such command: {0}")]
    NoSuchCommand(String),
}

pub type Result<T> = std::result::Result<T, HubError>;
