//! Thin driver: parses configuration, wires up logging, metrics, and
//! health-check servers, and runs the collector until a termination
//! signal arrives.
//!
//! The concrete registry, ledger, sender-transport, and reflector
//! implementations are explicitly out of scope for this crate — they are
//! deployment-specific collaborators plugged in through the `ports`
//! traits. This binary wires in [`unconfigured`] stand-ins so the process
//! can start and fail loudly rather than linking against a concrete
//! vendor client that does not belong in this repository.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use telemetry_collector::clock::SystemClock;
use telemetry_collector::collector::Collector;
use telemetry_collector::config::CollectorConfig;
use telemetry_collector::health;
use telemetry_collector::metrics::Metrics;
use telemetry_collector::types::DevicePk;

mod unconfigured;

/// Agent-side coordinator for device-to-device tunnel latency telemetry.
#[derive(Debug, Parser)]
#[command(name = "telemetry-collector", version, about)]
struct Cli {
    /// Local device public key, hex-encoded (32 bytes).
    #[arg(long, env = "TELEMETRY_LOCAL_DEVICE_PK")]
    local_device_pk: String,

    #[arg(long, env = "TELEMETRY_PROBE_INTERVAL", value_parser = humantime::parse_duration, default_value = "1s")]
    probe_interval: Duration,

    #[arg(long, env = "TELEMETRY_SUBMISSION_INTERVAL", value_parser = humantime::parse_duration, default_value = "10s")]
    submission_interval: Duration,

    #[arg(long, env = "TELEMETRY_PROBE_TIMEOUT", value_parser = humantime::parse_duration, default_value = "500ms")]
    probe_timeout: Duration,

    /// Sender TTL; `0s` disables TTL-based sender rotation.
    #[arg(long, env = "TELEMETRY_SENDER_TTL", value_parser = humantime::parse_duration, default_value = "1h")]
    sender_ttl: Duration,

    #[arg(long, env = "TELEMETRY_SUBMITTER_MAX_CONCURRENCY", default_value_t = 8)]
    submitter_max_concurrency: usize,

    #[arg(long, env = "TELEMETRY_MAX_CONSECUTIVE_SENDER_LOSSES", default_value_t = 5)]
    max_consecutive_sender_losses: u32,

    #[arg(long, env = "TELEMETRY_TWAMP_PORT", default_value_t = 862)]
    twamp_port: u16,

    #[arg(long, env = "TELEMETRY_METRICS_ADDR", default_value = "0.0.0.0")]
    metrics_addr: Ipv4Addr,

    #[arg(long, env = "TELEMETRY_METRICS_PORT", default_value_t = 9090)]
    metrics_port: u16,

    #[arg(long, env = "TELEMETRY_HEALTH_ADDR", default_value = "0.0.0.0:8080")]
    health_addr: std::net::SocketAddr,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(try_main(cli))
}

async fn try_main(cli: Cli) -> anyhow::Result<()> {
    let local_device_pk = parse_device_pk(&cli.local_device_pk)?;

    let config = CollectorConfig::new(
        local_device_pk,
        cli.probe_interval,
        cli.submission_interval,
        cli.probe_timeout,
        cli.sender_ttl,
        cli.submitter_max_concurrency,
        cli.max_consecutive_sender_losses,
        cli.twamp_port,
    )
    .context("invalid configuration")?;

    let metrics = Metrics::new();

    let collector = Collector::new(
        &config,
        Arc::new(unconfigured::registry()),
        Arc::new(unconfigured::local_net()),
        Arc::new(unconfigured::sender_factory()),
        Arc::new(unconfigured::ledger()),
        Arc::new(unconfigured::epoch_source()),
        Arc::new(SystemClock),
        Box::new(unconfigured::reflector()),
        metrics.clone(),
    );

    let shutdown = collector.cancellation();

    let metrics_server = tokio::spawn({
        let metrics = metrics.clone();
        let addr = std::net::IpAddr::V4(cli.metrics_addr);
        let port = cli.metrics_port;
        async move {
            if let Err(e) = telemetry_collector::metrics::serve(addr, port, metrics).await {
                tracing::error!(error = %e, "Metrics server exited");
            }
        }
    });

    let health_server = tokio::spawn({
        let shutdown = shutdown.clone();
        let addr = cli.health_addr;
        async move {
            if let Err(e) = health::serve(addr, move || !shutdown.is_cancelled()).await {
                tracing::error!(error = %e, "Health-check server exited");
            }
        }
    });

    let collector_task = tokio::spawn(collector.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();
    let _ = collector_task.await;
    metrics_server.abort();
    health_server.abort();

    Ok(())
}

fn parse_device_pk(s: &str) -> anyhow::Result<DevicePk> {
    let bytes = hex_decode(s).context("local device public key must be 64 hex characters")?;
    Ok(DevicePk::new(bytes))
}

fn hex_decode(s: &str) -> anyhow::Result<[u8; 32]> {
    anyhow::ensure!(s.len() == 64, "expected 64 hex characters, got {}", s.len());

    let mut out = [0u8; 32];
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        let byte_str = std::str::from_utf8(chunk)?;
        out[i] = u8::from_str_radix(byte_str, 16)?;
    }
    Ok(out)
}
