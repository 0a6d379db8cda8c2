//! Top-level orchestration: wires the five components and the reflector
//! together, runs them as concurrent tasks, and implements the collector's
//! shutdown sequence.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::PartitionedBuffer;
use crate::clock::{Clock, EpochSource};
use crate::config::{CollectorConfig, SENDER_IDLE_EVICTION_INTERVAL, SENDER_IDLE_TIMEOUT};
use crate::metrics::Metrics;
use crate::peer_discovery::PeerDiscovery;
use crate::pinger::Pinger;
use crate::ports::{LocalNetworkInspector, PeerRegistry, ProbeReflector, ProbeSenderFactory, TelemetryLedger};
use crate::sender_pool::SenderPool;
use crate::submitter::Submitter;

/// Owns every component and the external reflector, and runs them
/// concurrently for the lifetime of the process.
pub struct Collector {
    senders: Arc<SenderPool>,
    discovery: Arc<PeerDiscovery>,
    pinger: Arc<Pinger>,
    submitter: Arc<Submitter>,
    reflector: Box<dyn ProbeReflector>,
    cancellation: CancellationToken,
}

impl Collector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &CollectorConfig,
        registry: Arc<dyn PeerRegistry>,
        local_net: Arc<dyn LocalNetworkInspector>,
        sender_factory: Arc<dyn ProbeSenderFactory>,
        ledger: Arc<dyn TelemetryLedger>,
        epoch_source: Arc<dyn EpochSource>,
        clock: Arc<dyn Clock>,
        reflector: Box<dyn ProbeReflector>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let discovery = Arc::new(PeerDiscovery::new(
            config.local_device_pk,
            registry,
            local_net,
            config.twamp_port,
            config.probe_interval,
            metrics.clone(),
        ));

        let senders = Arc::new(SenderPool::new(
            sender_factory,
            clock.clone(),
            config.sender_ttl,
            config.max_consecutive_sender_losses,
            metrics.clone(),
        ));

        let buffer = Arc::new(PartitionedBuffer::new(config.partition_capacity));

        let pinger = Arc::new(Pinger::new(
            config.local_device_pk,
            discovery.clone(),
            senders.clone(),
            buffer.clone(),
            epoch_source.clone(),
            clock,
            config.probe_interval,
            config.probe_timeout,
            metrics.clone(),
        ));

        let submitter = Arc::new(Submitter::new(
            config.local_device_pk,
            buffer,
            ledger,
            epoch_source,
            config.submission_interval,
            config.probe_interval,
            config.submitter_max_concurrency,
            metrics,
        ));

        Self {
            senders,
            discovery,
            pinger,
            submitter,
            reflector,
            cancellation: CancellationToken::new(),
        }
    }

    /// Returns a handle other call sites (e.g. the health-check readiness
    /// probe) can use to observe or trigger shutdown.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Runs every component concurrently until `cancellation` fires, then
    /// performs the close sequence: close the reflector, close all pooled
    /// senders. Remaining unsubmitted samples are intentionally not
    /// force-submitted (see `spec.md` §4.F, §9).
    pub async fn run(self) {
        let discovery_task: JoinHandle<()> = tokio::spawn({
            let discovery = self.discovery.clone();
            let cancellation = self.cancellation.clone();
            async move { discovery.run(cancellation).await }
        });

        let sweeper_task: JoinHandle<()> = tokio::spawn({
            let senders = self.senders.clone();
            let cancellation = self.cancellation.clone();
            async move {
                senders
                    .run_idle_sweep(SENDER_IDLE_EVICTION_INTERVAL, SENDER_IDLE_TIMEOUT, cancellation)
                    .await
            }
        });

        let pinger_task: JoinHandle<()> = tokio::spawn({
            let pinger = self.pinger.clone();
            let cancellation = self.cancellation.clone();
            async move { pinger.run(cancellation).await }
        });

        let submitter_task: JoinHandle<()> = tokio::spawn({
            let submitter = self.submitter.clone();
            let cancellation = self.cancellation.clone();
            async move { submitter.run(cancellation).await }
        });

        let reflector_cancellation = self.cancellation.clone();
        let mut reflector = self.reflector;
        let reflector_task: JoinHandle<Box<dyn ProbeReflector>> = tokio::spawn(async move {
            if let Err(e) = reflector.run(reflector_cancellation).await {
                tracing::warn!(error = %e, "Reflector exited with an error");
            }
            reflector
        });

        self.cancellation.cancelled().await;

        let _ = tokio::join!(discovery_task, sweeper_task, pinger_task, submitter_task);

        match reflector_task.await {
            Ok(mut reflector) => {
                if let Err(e) = reflector.close().await {
                    tracing::warn!(error = %e, "Failed to close reflector");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Reflector task panicked"),
        }

        self.senders.close_all().await;
    }

    /// Signals every running task to stop.
    pub fn shutdown(&self) {
        self.cancellation.cancel();
    }
}
