//! Spoofed UDP traffic mirror.
//!
//! Sits between one "near" UDP client and a set of "far" listeners.
//! Near-to-far datagrams are rebuilt as raw IPv4+UDP packets whose source
//! endpoints are drawn from a configurable spoof pool and sent
//! `replication_factor` times each; far-to-near replies are relayed
//! verbatim over plain UDP.

pub mod config;
pub mod packet;
pub mod range;
pub mod raw;
pub mod relay;
pub mod sample;

pub use config::{ConfigError, RelayConfig};
pub use range::{AddressRange, ParseError, PortRange};
pub use raw::{RawSender, Transmit, TransmitError};
pub use relay::{BindError, Relay, RelayStats, StatsSnapshot};
pub use sample::{EndpointPool, EndpointSampler};
