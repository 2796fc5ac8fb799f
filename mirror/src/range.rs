//! IP and port range parsing.
//!
//! Pool entries are written `ip[/prefix]:port[-port]`; far listen ports are
//! written `port[-port]`. Both ends of every range are inclusive.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Malformed address, port, or range text. Fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid IPv4 address {0:?}")]
    InvalidAddress(String),

    #[error("invalid CIDR prefix {0:?} (expected 0-32)")]
    InvalidPrefix(String),

    #[error("invalid port {0:?} (expected 0-65535)")]
    InvalidPort(String),

    #[error("reversed port range {start}-{end}")]
    ReversedPortRange { start: u16, end: u16 },

    #[error("missing ':' between address and port in {0:?}")]
    MissingPortSeparator(String),

    #[error("endpoint pool has no entries")]
    EmptyPool,
}

/// Inclusive IPv4 address range, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRange {
    start: Ipv4Addr,
    end: Ipv4Addr,
}

impl AddressRange {
    pub fn start(&self) -> Ipv4Addr {
        self.start
    }

    pub fn end(&self) -> Ipv4Addr {
        self.end
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(self.start) <= u32::from(ip) && u32::from(ip) <= u32::from(self.end)
    }
}

/// Inclusive port range, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }
}

/// Parse a bare IPv4 literal (range of one) or a CIDR block `addr/prefix`.
///
/// The block's bounds come from the host mask: `10.0.0.0/30` spans
/// 10.0.0.0 - 10.0.0.3. Prefixes 0 and 32 are both valid.
pub fn parse_cidr(text: &str) -> Result<AddressRange, ParseError> {
    let (addr_text, prefix_text) = match text.split_once('/') {
        Some(parts) => parts,
        None => {
            let addr: Ipv4Addr = text
                .parse()
                .map_err(|_| ParseError::InvalidAddress(text.to_string()))?;
            return Ok(AddressRange { start: addr, end: addr });
        }
    };

    let addr: Ipv4Addr = addr_text
        .parse()
        .map_err(|_| ParseError::InvalidAddress(addr_text.to_string()))?;
    let prefix: u32 = prefix_text
        .parse()
        .map_err(|_| ParseError::InvalidPrefix(prefix_text.to_string()))?;
    if prefix > 32 {
        return Err(ParseError::InvalidPrefix(prefix_text.to_string()));
    }

    // Host mask in u64 so /0 does not overflow the shift.
    let mask = ((1u64 << (32 - prefix)) - 1) as u32;
    let base = u32::from(addr);
    Ok(AddressRange {
        start: Ipv4Addr::from(base & !mask),
        end: Ipv4Addr::from(base | mask),
    })
}

/// Parse `"N"` or `"N-M"` into an inclusive port range.
pub fn parse_port_range(text: &str) -> Result<PortRange, ParseError> {
    let parse_port = |p: &str| -> Result<u16, ParseError> {
        p.parse().map_err(|_| ParseError::InvalidPort(p.to_string()))
    };

    match text.split_once('-') {
        None => {
            let port = parse_port(text)?;
            Ok(PortRange { start: port, end: port })
        }
        Some((lo, hi)) => {
            let start = parse_port(lo)?;
            let end = parse_port(hi)?;
            if end < start {
                return Err(ParseError::ReversedPortRange { start, end });
            }
            Ok(PortRange { start, end })
        }
    }
}

/// Expand listen-port tokens into individual ports.
///
/// Each token is expanded independently: `"9000-9002"` contributes three
/// ports, each of which gets its own listener socket.
pub fn parse_port_list<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<u16>, ParseError> {
    let mut ports = Vec::new();
    for token in tokens {
        let range = parse_port_range(token.as_ref())?;
        ports.extend(range.start()..=range.end());
    }
    Ok(ports)
}

/// Parse one pool entry `ip[/prefix]:port[-port]`.
pub fn parse_endpoint_spec(text: &str) -> Result<(AddressRange, PortRange), ParseError> {
    let (addr_text, port_text) = text
        .split_once(':')
        .ok_or_else(|| ParseError::MissingPortSeparator(text.to_string()))?;
    Ok((parse_cidr(addr_text)?, parse_port_range(port_text)?))
}

// =============================================================================
// Tests
// =============================================================================
