//! Spoofed UDP mirror daemon.
//!
//! Binds the near socket, one socket per far listen port, and the shared raw
//! socket, then relays until SIGINT/SIGTERM.

mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mirror::relay::{RelayStats, StatsSnapshot};
use mirror::{EndpointSampler, RawSender, Relay};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = cli::Args::parse();
    let cfg = cli::build_config(&args)?;

    info!("Near listen port: {}", cfg.near_listen_port);
    info!("Near endpoint: {}", cfg.near_endpoint);
    info!("Far listen ports: {:?}", cfg.far_listen_ports);
    info!("Far endpoint pool: {} entries", cfg.far_endpoints.entries().len());
    info!("Spoof pool: {} entries", cfg.spoofed_endpoints.entries().len());
    info!("Replication factor: {}", cfg.replication_factor);

    let transmitter = Arc::new(
        RawSender::open().context("opening raw socket (requires root or CAP_NET_RAW)")?,
    );
    let sampler = EndpointSampler::from_entropy();

    let relay = Relay::bind(cfg, transmitter, sampler)
        .await
        .context("binding relay sockets")?;
    let stats = relay.stats();

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));
    if args.stats_interval > 0 {
        tokio::spawn(report_stats(
            Arc::clone(&stats),
            Duration::from_secs(args.stats_interval),
            shutdown.clone(),
        ));
    }

    relay.run(shutdown).await;

    let snapshot = stats.snapshot();
    info!("=== Final stats ===");
    info!("  near datagrams in: {}", snapshot.datagrams_in);
    info!("  replicas sent: {}", snapshot.replicas_sent);
    info!("  replies forwarded: {}", snapshot.replies_forwarded);
    info!(
        "  errors: {} transmit, {} forward, {} oversize",
        snapshot.transmit_errors, snapshot.forward_errors, snapshot.oversize_drops
    );
    Ok(())
}

async fn watch_signals(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!("SIGTERM handler unavailable: {e}");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received, stopping"),
        _ = term.recv() => info!("SIGTERM received, stopping"),
    }
    shutdown.cancel();
}

async fn report_stats(stats: Arc<RelayStats>, every: Duration, shutdown: CancellationToken) {
    let mut tick = tokio::time::interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick.tick().await; // the first tick fires immediately

    let mut last = StatsSnapshot::default();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {}
        }
        let snapshot = stats.snapshot();
        if snapshot == last {
            continue;
        }
        info!(
            "stats: {} in, {} replicas out, {} replies back, {} transmit errors",
            snapshot.datagrams_in,
            snapshot.replicas_sent,
            snapshot.replies_forwarded,
            snapshot.transmit_errors
        );
        last = snapshot;
    }
}
