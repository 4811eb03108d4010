//! CLI flags and communication-mode parsing (§6 CLI).
//!
//! Grounded in `original_source/src/util/sysargs.py`'s `__initialize`: the
//! same flags, the same `mode[@host][:port]` communication-entry grammar,
//! and the same "unknown mode logged and skipped" behavior, expressed
//! through `clap`'s derive API (ambient choice, see SPEC_FULL.md §6 and
//! DESIGN.md) rather than a hand-rolled `argv` scan.

use clap::Parser;

use crate::transport::tcp::TcpConfig;
use crate::transport::udp::UdpConfig;

pub const DEFAULT_PORT: u16 = 49001;
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_BCAST_ADDRESS: &str = "255.255.255.255";
pub const DEFAULT_MCAST_GROUP: &str = "227.1.1.10";

#[derive(Parser, Debug)]
#[command(name = "homehub", about = "Home automation hub bridging nRF24L01 devices and IP clients")]
pub struct Args {
    /// Run in non-interactive mode: wait for a shutdown signal instead of a console prompt.
    #[arg(long)]
    pub server: bool,

    /// Semicolon-separated communication entries, e.g. `mcast;tcp:49001`.
    #[arg(long, value_delimiter = ';', default_value = "mcast")]
    pub communication: Vec<String>,

    /// Semicolon-separated entity-definition search paths.
    #[arg(long = "entities", value_delimiter = ';')]
    pub entities: Vec<String>,

    /// Semicolon-separated image search paths.
    #[arg(long = "images", value_delimiter = ';')]
    pub images: Vec<String>,

    /// Semicolon-separated localization resource directories.
    #[arg(long = "loc", value_delimiter = ';')]
    pub localizations: Vec<String>,

    /// Default language code for localized error replies.
    #[arg(long = "lang", default_value = "en")]
    pub lang: String,

    /// Path to the persistence file (ambient; spec.md treats the store as external).
    #[arg(long, default_value = "homehub.db")]
    pub database: String,

    /// SPI device path for the radio transceiver (linux feature only).
    #[arg(long, default_value = "/dev/spidev0.0")]
    pub spi: String,

    /// GPIO line driving the radio's CE pin.
    #[arg(long, default_value_t = 22)]
    pub ce_pin: u64,

    /// GPIO line wired to the radio's IRQ pin.
    #[arg(long, default_value_t = 23)]
    pub irq_pin: u64,
}

/// One parsed `--communication=` entry: `mode[@host][:port]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommunicationEntry {
    pub mode: String,
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Parses a single communication entry exactly as `sysargs.py`'s inline
/// `if '@' in c / elif ':' in c / else` chain does: `@` separates host,
/// `:` separates port, either may be absent.
pub fn parse_communication_entry(raw: &str) -> CommunicationEntry {
    if let Some((mode, rest)) = raw.split_once('@') {
        if let Some((host, port)) = rest.split_once(':') {
            CommunicationEntry { mode: mode.to_string(), host: Some(host.to_string()), port: port.parse().ok() }
        } else {
            CommunicationEntry { mode: mode.to_string(), host: Some(rest.to_string()), port: None }
        }
    } else if let Some((mode, port)) = raw.split_once(':') {
        CommunicationEntry { mode: mode.to_string(), host: None, port: port.parse().ok() }
    } else {
        CommunicationEntry { mode: raw.to_string(), host: None, port: None }
    }
}

pub enum TransportConfig {
    Udp(UdpConfig),
    Tcp(TcpConfig),
}

/// Resolves one communication entry into a concrete transport configuration,
/// applying the per-mode defaults from `ClientModule` (`DEFAULT_PORT`,
/// `DEFAULT_BIND_ADDRESS`, `DEFAULT_BCAST_ADDRESS`, `DEFAULT_MCAST_GROUP`).
/// Returns `None` for an unrecognized mode, logging it like the original.
pub fn resolve_transport(entry: &CommunicationEntry) -> Option<TransportConfig> {
    let port = entry.port.unwrap_or(DEFAULT_PORT);
    match entry.mode.to_lowercase().as_str() {
        "mcast" => Some(TransportConfig::Udp(UdpConfig {
            bind_host: DEFAULT_BIND_ADDRESS.to_string(),
            port,
            multicast_group: Some(entry.host.clone().unwrap_or_else(|| DEFAULT_MCAST_GROUP.to_string())),
            broadcast: false,
            ..UdpConfig::default()
        })),
        "bcast" => Some(TransportConfig::Udp(UdpConfig {
            bind_host: DEFAULT_BIND_ADDRESS.to_string(),
            port,
            multicast_group: None,
            broadcast: true,
            ..UdpConfig::default()
        })),
        "udp" => Some(TransportConfig::Udp(UdpConfig {
            bind_host: entry.host.clone().unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            port,
            multicast_group: None,
            broadcast: false,
            ..UdpConfig::default()
        })),
        "tcp" => Some(TransportConfig::Tcp(TcpConfig { bind_host: entry.host.clone().unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()), port, ..TcpConfig::default() })),
        other => {
            log::warn!("unsupported communication mode: {}", other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mode_only() {
        let e = parse_communication_entry("mcast");
        assert_eq!(e, CommunicationEntry { mode: "mcast".into(), host: None, port: None });
    }

    #[test]
    fn parses_mode_and_port() {
        let e = parse_communication_entry("tcp:49002");
        assert_eq!(e, CommunicationEntry { mode: "tcp".into(), host: None, port: Some(49002) });
    }

    #[test]
    fn parses_mode_host_and_port() {
        let e = parse_communication_entry("mcast@227.1.1.20:49003");
        assert_eq!(e, CommunicationEntry { mode: "mcast".into(), host: Some("227.1.1.20".into()), port: Some(49003) });
    }

    #[test]
    fn parses_mode_and_host_without_port() {
        let e = parse_communication_entry("udp@10.0.0.5");
        assert_eq!(e, CommunicationEntry { mode: "udp".into(), host: Some("10.0.0.5".into()), port: None });
    }

    #[test]
    fn unknown_mode_resolves_to_none() {
        assert!(resolve_transport(&CommunicationEntry { mode: "xyz".into(), host: None, port: None }).is_none());
    }

    #[test]
    fn mcast_defaults_to_standard_group_and_port() {
        match resolve_transport(&CommunicationEntry { mode: "mcast".into(), host: None, port: None }).unwrap() {
            TransportConfig::Udp(cfg) => {
                assert_eq!(cfg.port, DEFAULT_PORT);
                assert_eq!(cfg.multicast_group.as_deref(), Some(DEFAULT_MCAST_GROUP));
            }
            _ => panic!("expected udp config"),
        }
    }
}
