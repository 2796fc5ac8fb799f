//! Validated relay configuration.

use std::net::SocketAddrV4;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sample::EndpointPool;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("replication factor must be at least 1")]
    ZeroReplication,

    #[error("no far listen ports configured")]
    NoFarListenPorts,
}

/// Built once at startup, then immutable and shared read-only by every task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Port the near-side application sends to.
    pub near_listen_port: u16,
    /// Where far-side replies are delivered.
    pub near_endpoint: SocketAddrV4,
    /// One listener socket per port.
    pub far_listen_ports: Vec<u16>,
    /// Targets for spoofed retransmission.
    pub far_endpoints: EndpointPool,
    /// Forged source endpoints.
    pub spoofed_endpoints: EndpointPool,
    /// Spoofed transmissions per inbound near-side datagram.
    pub replication_factor: u32,
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replication_factor < 1 {
            return Err(ConfigError::ZeroReplication);
        }
        if self.far_listen_ports.is_empty() {
            return Err(ConfigError::NoFarListenPorts);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn config() -> RelayConfig {
        RelayConfig {
            near_listen_port: 5000,
            near_endpoint: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6000),
            far_listen_ports: vec![9000],
            far_endpoints: EndpointPool::from_specs(&["192.0.2.1:9000"]).unwrap(),
            spoofed_endpoints: EndpointPool::from_specs(&["10.0.0.0/24:4000-4999"]).unwrap(),
            replication_factor: 1,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert_eq!(config().validate(), Ok(()));
    }

    #[test]
    fn zero_replication_is_rejected() {
        let mut cfg = config();
        cfg.replication_factor = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroReplication));
    }

    #[test]
    fn missing_far_ports_are_rejected() {
        let mut cfg = config();
        cfg.far_listen_ports.clear();
        assert_eq!(cfg.validate(), Err(ConfigError::NoFarListenPorts));
    }
}
