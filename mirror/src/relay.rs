//! Relay orchestration: near listener, far listener pool, lifecycle.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::packet::{self, BuildError};
use crate::raw::Transmit;
use crate::sample::EndpointSampler;

/// Receive buffer size; a UDP payload can never exceed this.
const MAX_DATAGRAM: usize = 65535;

/// A listen port was unavailable. Fatal for startup: the relay never runs
/// with a partial listener pool.
#[derive(Debug, Error)]
#[error("failed to bind UDP port {port}: {source}")]
pub struct BindError {
    pub port: u16,
    #[source]
    pub source: std::io::Error,
}

/// Steady-state counters, shared by all listener and replica tasks.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub datagrams_in: AtomicU64,
    pub replicas_sent: AtomicU64,
    pub transmit_errors: AtomicU64,
    pub oversize_drops: AtomicU64,
    pub replies_forwarded: AtomicU64,
    pub forward_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub datagrams_in: u64,
    pub replicas_sent: u64,
    pub transmit_errors: u64,
    pub oversize_drops: u64,
    pub replies_forwarded: u64,
    pub forward_errors: u64,
}

impl RelayStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            datagrams_in: self.datagrams_in.load(Ordering::Relaxed),
            replicas_sent: self.replicas_sent.load(Ordering::Relaxed),
            transmit_errors: self.transmit_errors.load(Ordering::Relaxed),
            oversize_drops: self.oversize_drops.load(Ordering::Relaxed),
            replies_forwarded: self.replies_forwarded.load(Ordering::Relaxed),
            forward_errors: self.forward_errors.load(Ordering::Relaxed),
        }
    }
}

/// Owns every socket and task of one relay instance.
pub struct Relay {
    cfg: Arc<RelayConfig>,
    near: Arc<UdpSocket>,
    near_addr: SocketAddr,
    far_sockets: Vec<UdpSocket>,
    far_addrs: Vec<SocketAddr>,
    transmitter: Arc<dyn Transmit>,
    sampler: Arc<EndpointSampler>,
    stats: Arc<RelayStats>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("cfg", &self.cfg)
            .field("near_addr", &self.near_addr)
            .field("far_addrs", &self.far_addrs)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Acquire the near socket and one socket per far listen port.
    ///
    /// All-or-nothing: the first port that fails to bind aborts the whole
    /// startup, and the sockets bound so far are released by drop.
    pub async fn bind(
        cfg: RelayConfig,
        transmitter: Arc<dyn Transmit>,
        sampler: EndpointSampler,
    ) -> Result<Self, BindError> {
        let near = bind_udp(cfg.near_listen_port).await?;
        let near_addr = local_addr(&near, cfg.near_listen_port)?;

        let mut far_sockets = Vec::with_capacity(cfg.far_listen_ports.len());
        let mut far_addrs = Vec::with_capacity(cfg.far_listen_ports.len());
        for &port in &cfg.far_listen_ports {
            let socket = bind_udp(port).await?;
            far_addrs.push(local_addr(&socket, port)?);
            far_sockets.push(socket);
        }

        Ok(Self {
            cfg: Arc::new(cfg),
            near: Arc::new(near),
            near_addr,
            far_sockets,
            far_addrs,
            transmitter,
            sampler: Arc::new(sampler),
            stats: Arc::new(RelayStats::default()),
        })
    }

    /// Actual near-side address, with the OS-chosen port when configured as 0.
    pub fn near_addr(&self) -> SocketAddr {
        self.near_addr
    }

    /// Actual far-side listener addresses, in configuration order.
    pub fn far_addrs(&self) -> &[SocketAddr] {
        &self.far_addrs
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Run every listener until `shutdown` fires, then abort all outstanding
    /// work so pending receives unblock and the process can exit promptly.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut tasks = JoinSet::new();

        tasks.spawn(near_listen(
            Arc::clone(&self.near),
            Arc::clone(&self.cfg),
            Arc::clone(&self.transmitter),
            Arc::clone(&self.sampler),
            Arc::clone(&self.stats),
            shutdown.clone(),
        ));

        for socket in self.far_sockets {
            tasks.spawn(far_listen(
                socket,
                Arc::clone(&self.near),
                self.cfg.near_endpoint,
                Arc::clone(&self.stats),
                shutdown.clone(),
            ));
        }

        info!(
            near = %self.near_addr,
            far_listeners = self.far_addrs.len(),
            replication = self.cfg.replication_factor,
            "relay running"
        );

        shutdown.cancelled().await;
        tasks.shutdown().await;
        info!("relay stopped");
    }
}

async fn bind_udp(port: u16) -> Result<UdpSocket, BindError> {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
        .await
        .map_err(|source| BindError { port, source })
}

fn local_addr(socket: &UdpSocket, port: u16) -> Result<SocketAddr, BindError> {
    socket
        .local_addr()
        .map_err(|source| BindError { port, source })
}

/// Near-side receive loop. Each inbound datagram fans out into
/// `replication_factor` independent replica tasks; the loop itself never
/// waits on a transmission.
async fn near_listen(
    near: Arc<UdpSocket>,
    cfg: Arc<RelayConfig>,
    transmitter: Arc<dyn Transmit>,
    sampler: Arc<EndpointSampler>,
    stats: Arc<RelayStats>,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut inflight: JoinSet<()> = JoinSet::new();

    loop {
        let (len, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = near.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    warn!("near receive error: {e}");
                    continue;
                }
            },
        };

        stats.datagrams_in.fetch_add(1, Ordering::Relaxed);
        debug!(len, %peer, "near datagram");

        if len > packet::MAX_PAYLOAD {
            stats.oversize_drops.fetch_add(1, Ordering::Relaxed);
            warn!(len, "dropping oversized near datagram");
            continue;
        }

        // Reap finished replicas without waiting on the rest.
        while inflight.try_join_next().is_some() {}

        let payload: Arc<[u8]> = Arc::from(&buf[..len]);
        for _ in 0..cfg.replication_factor {
            inflight.spawn(send_replica(
                Arc::clone(&payload),
                Arc::clone(&cfg),
                Arc::clone(&transmitter),
                Arc::clone(&sampler),
                Arc::clone(&stats),
            ));
        }
    }

    // Aborts replicas still in flight; no durability guarantee for them.
    inflight.shutdown().await;
}

/// One replicated transmission: fresh spoofed source, fresh far target,
/// build, send. Failures drop only this replica.
async fn send_replica(
    payload: Arc<[u8]>,
    cfg: Arc<RelayConfig>,
    transmitter: Arc<dyn Transmit>,
    sampler: Arc<EndpointSampler>,
    stats: Arc<RelayStats>,
) {
    let from = sampler.sample(&cfg.spoofed_endpoints);
    let to = sampler.sample(&cfg.far_endpoints);

    let datagram = match packet::build_spoofed_udp(&payload, from, to) {
        Ok(datagram) => datagram,
        Err(BuildError::PayloadTooLarge { len }) => {
            stats.oversize_drops.fetch_add(1, Ordering::Relaxed);
            warn!(len, "dropping oversized replica");
            return;
        }
    };

    match transmitter.transmit(&datagram, *to.ip()) {
        Ok(()) => {
            stats.replicas_sent.fetch_add(1, Ordering::Relaxed);
            debug!(%from, %to, len = datagram.len(), "replica sent");
        }
        Err(e) => {
            stats.transmit_errors.fetch_add(1, Ordering::Relaxed);
            warn!(%to, "replica transmit failed: {e}");
        }
    }
}

/// Far-side receive loop for one listen port: forward every reply verbatim
/// to the near endpoint over the shared near socket.
async fn far_listen(
    socket: UdpSocket,
    near: Arc<UdpSocket>,
    near_endpoint: SocketAddrV4,
    stats: Arc<RelayStats>,
    shutdown: CancellationToken,
) {
    let port = socket.local_addr().map(|a| a.port()).unwrap_or(0);
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let (len, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    warn!(port, "far receive error: {e}");
                    continue;
                }
            },
        };

        debug!(len, %peer, port, "far reply");
        match near.send_to(&buf[..len], SocketAddr::V4(near_endpoint)).await {
            Ok(_) => {
                stats.replies_forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.forward_errors.fetch_add(1, Ordering::Relaxed);
                warn!(port, "forward to near endpoint failed: {e}");
            }
        }
    }
}
