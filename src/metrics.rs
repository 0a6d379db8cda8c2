//! Internal metrics facade.
//!
//! Mirrors the teacher's `metrics.rs`: a `prometheus-client` [`Registry`]
//! exposed over HTTP, served alongside a liveness/readiness check
//! (`health.rs`). Recording a metric is glue at the call site but the
//! facade itself is ambient infrastructure, carried regardless of the
//! spec's "metrics registration is glue, not core" framing (§1).

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

const CONTENT_TYPE: &str = "application/openmetrics-text;charset=utf-8;version=1.0.0";

/// Counters recorded by the collector's components.
///
/// Each field corresponds to a row in `spec.md` §7's error taxonomy table.
pub struct Metrics {
    pub registry_read_errors: Counter,
    pub interface_enumeration_errors: Counter,
    pub tunnels_not_found: Counter,
    pub sender_construction_failures: Counter,
    pub sender_ttl_evictions: Counter,
    pub sender_idle_evictions: Counter,
    pub sender_loss_evictions: Counter,
    pub probe_losses: Counter,
    pub probe_successes: Counter,
    pub epoch_fetch_failures: Counter,
    pub submit_retries: Counter,
    pub samples_submitted: Counter,
    pub samples_dropped: Counter,
    pub partitions_garbage_collected: Counter,

    registry: Registry,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        let mut registry = <Registry>::default();

        macro_rules! register {
            ($name:literal, $help:literal) => {{
                let counter = Counter::default();
                registry.register($name, $help, counter.clone());
                counter
            }};
        }

        let registry_read_errors = register!(
            "registry_read_errors",
            "Authoritative registry reads that failed"
        );
        let interface_enumeration_errors = register!(
            "interface_enumeration_errors",
            "Local network interface enumeration failures"
        );
        let tunnels_not_found = register!(
            "tunnels_not_found",
            "Links for which no local tunnel interface was found"
        );
        let sender_construction_failures = register!(
            "sender_construction_failures",
            "Probe sender constructions that failed"
        );
        let sender_ttl_evictions = register!(
            "sender_ttl_evictions",
            "Probe senders evicted for exceeding their TTL"
        );
        let sender_idle_evictions = register!(
            "sender_idle_evictions",
            "Probe senders evicted for being idle"
        );
        let sender_loss_evictions = register!(
            "sender_loss_evictions",
            "Probe senders evicted after too many consecutive losses"
        );
        let probe_losses = register!("probe_losses", "Probes that resulted in a loss sample");
        let probe_successes =
            register!("probe_successes", "Probes that resulted in a success sample");
        let epoch_fetch_failures =
            register!("epoch_fetch_failures", "Epoch fetches that exhausted retries");
        let submit_retries = register!("submit_retries", "Ledger submit attempts that were retried");
        let samples_submitted = register!("samples_submitted", "Samples successfully written to the ledger");
        let samples_dropped = register!(
            "samples_dropped",
            "Samples dropped due to full ledger accounts or buffer capacity"
        );
        let partitions_garbage_collected = register!(
            "partitions_garbage_collected",
            "Empty, past-epoch partitions removed from the buffer"
        );

        Arc::new(Self {
            registry_read_errors,
            interface_enumeration_errors,
            tunnels_not_found,
            sender_construction_failures,
            sender_ttl_evictions,
            sender_idle_evictions,
            sender_loss_evictions,
            probe_losses,
            probe_successes,
            epoch_fetch_failures,
            submit_retries,
            samples_submitted,
            samples_dropped,
            partitions_garbage_collected,
            registry,
        })
    }

    #[cfg(test)]
    pub fn new_for_test() -> Self {
        Arc::into_inner(Self::new()).expect("single owner in tests")
    }
}

/// Serves `/metrics` in OpenMetrics text format.
pub async fn serve(addr: impl Into<IpAddr>, port: u16, metrics: Arc<Metrics>) -> Result<()> {
    let addr = std::net::SocketAddr::new(addr.into(), port);

    let service = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
        .into_make_service();

    tracing::info!(%addr, "Serving metrics");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, service).await?;

    Ok(())
}

async fn metrics_handler(
    State(metrics): State<Arc<Metrics>>,
) -> Result<impl IntoResponse, StatusCode> {
    let mut buf = String::new();
    encode(&mut buf, &metrics.registry).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE)], buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let metrics = Metrics::new_for_test();
        assert_eq!(metrics.tunnels_not_found.get(), 0);
    }

    #[test]
    fn counters_increment() {
        let metrics = Metrics::new_for_test();
        metrics.tunnels_not_found.inc();
        metrics.tunnels_not_found.inc();
        assert_eq!(metrics.tunnels_not_found.get(), 2);
    }
}
