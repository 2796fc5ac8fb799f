//! Command-line surface, parsed into a validated [`RelayConfig`].

use std::net::SocketAddrV4;

use anyhow::{Context, Result};
use clap::Parser;
use mirror::range::parse_port_list;
use mirror::{EndpointPool, RelayConfig};

#[derive(Parser, Debug)]
#[command(name = "mirrord")]
#[command(about = "Spoofed UDP traffic mirror")]
pub struct Args {
    /// Port the near-side application sends packets to
    #[arg(short = 'l', long)]
    pub near_listen: u16,

    /// Near-side application endpoint replies are delivered to (<ip>:<port>)
    #[arg(short = 'n', long)]
    pub near_endpoint: SocketAddrV4,

    /// Ports to listen on for far-side replies (<port>[-<port>], repeatable)
    #[arg(short = 'f', long = "far-listen", required = true)]
    pub far_listen: Vec<String>,

    /// Far-side target pool (<ip>[/<prefix>]:<port>[-<port>], repeatable)
    #[arg(short = 'e', long = "far-endpoint", required = true)]
    pub far_endpoint: Vec<String>,

    /// Spoofed source pool (<ip>[/<prefix>]:<port>[-<port>], repeatable)
    #[arg(short = 's', long = "spoof", required = true)]
    pub spoof: Vec<String>,

    /// Spoofed transmissions per inbound near-side datagram
    #[arg(short = 'r', long, default_value = "1")]
    pub replicate: u32,

    /// Stats report interval in seconds (0 disables)
    #[arg(long, default_value = "10")]
    pub stats_interval: u64,
}

pub fn build_config(args: &Args) -> Result<RelayConfig> {
    let far_listen_ports = parse_port_list(&args.far_listen).context("--far-listen")?;
    let far_endpoints = EndpointPool::from_specs(&args.far_endpoint).context("--far-endpoint")?;
    let spoofed_endpoints = EndpointPool::from_specs(&args.spoof).context("--spoof")?;

    let cfg = RelayConfig {
        near_listen_port: args.near_listen,
        near_endpoint: args.near_endpoint,
        far_listen_ports,
        far_endpoints,
        spoofed_endpoints,
        replication_factor: args.replicate,
    };
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("mirrord").chain(argv.iter().copied()))
    }

    #[test]
    fn full_surface_builds_a_config() {
        let args = parse(&[
            "--near-listen", "5000",
            "--near-endpoint", "127.0.0.1:6000",
            "--far-listen", "9000-9002",
            "--far-listen", "9010",
            "--far-endpoint", "192.0.2.0/30:9000",
            "--spoof", "10.0.0.0/24:4000-4999",
            "--replicate", "3",
        ]);
        let cfg = build_config(&args).unwrap();
        assert_eq!(cfg.near_listen_port, 5000);
        assert_eq!(cfg.far_listen_ports, vec![9000, 9001, 9002, 9010]);
        assert_eq!(cfg.replication_factor, 3);
        assert_eq!(cfg.far_endpoints.entries().len(), 1);
    }

    #[test]
    fn replication_defaults_to_one() {
        let args = parse(&[
            "--near-listen", "5000",
            "--near-endpoint", "127.0.0.1:6000",
            "--far-listen", "9000",
            "--far-endpoint", "192.0.2.1:9000",
            "--spoof", "10.0.0.1:4000",
        ]);
        assert_eq!(build_config(&args).unwrap().replication_factor, 1);
    }

    #[test]
    fn bad_pool_spec_is_rejected() {
        let args = parse(&[
            "--near-listen", "5000",
            "--near-endpoint", "127.0.0.1:6000",
            "--far-listen", "9000",
            "--far-endpoint", "192.0.2.1:9000",
            "--spoof", "10.0.0.0/40:4000",
        ]);
        let err = build_config(&args).unwrap_err();
        assert!(err.to_string().contains("--spoof"), "{err:#}");
    }

    #[test]
    fn zero_replication_is_rejected() {
        let args = parse(&[
            "--near-listen", "5000",
            "--near-endpoint", "127.0.0.1:6000",
            "--far-listen", "9000",
            "--far-endpoint", "192.0.2.1:9000",
            "--spoof", "10.0.0.1:4000",
            "--replicate", "0",
        ]);
        assert!(build_config(&args).is_err());
    }
}
