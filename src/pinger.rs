//! Component D: on each tick, fans out one probe per current peer and
//! records a Sample into the buffer.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::buffer::PartitionedBuffer;
use crate::clock::{fetch_epoch_with_retry, Clock, EpochSource};
use crate::config::DEFAULT_EPOCH_FETCH_ATTEMPTS;
use crate::metrics::Metrics;
use crate::peer_discovery::PeerDiscovery;
use crate::sender_pool::SenderPool;
use crate::types::{DevicePk, Epoch, PartitionKey, Sample};

/// Fans probes out to the current peer set on a fixed cadence.
pub struct Pinger {
    local_device: DevicePk,
    discovery: Arc<PeerDiscovery>,
    senders: Arc<SenderPool>,
    buffer: Arc<PartitionedBuffer>,
    epoch_source: Arc<dyn EpochSource>,
    clock: Arc<dyn Clock>,
    probe_interval: Duration,
    probe_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl Pinger {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_device: DevicePk,
        discovery: Arc<PeerDiscovery>,
        senders: Arc<SenderPool>,
        buffer: Arc<PartitionedBuffer>,
        epoch_source: Arc<dyn EpochSource>,
        clock: Arc<dyn Clock>,
        probe_interval: Duration,
        probe_timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            local_device,
            discovery,
            senders,
            buffer,
            epoch_source,
            clock,
            probe_interval,
            probe_timeout,
            metrics,
        }
    }

    /// Runs forever, invoking one tick every `probe_interval`, until
    /// `cancellation` fires.
    pub async fn run(&self, cancellation: CancellationToken) {
        let mut next = tokio::time::Instant::now();

        loop {
            tokio::select! {
                () = tokio::time::sleep_until(next) => {}
                () = cancellation.cancelled() => return,
            }
            next += self.probe_interval;

            self.tick().await;
        }
    }

    pub async fn tick(&self) {
        let Some(epoch) =
            fetch_epoch_with_retry(self.epoch_source.as_ref(), DEFAULT_EPOCH_FETCH_ATTEMPTS)
                .await
                .map(Epoch)
        else {
            tracing::warn!("Aborting tick: epoch fetch exhausted retries");
            self.metrics.epoch_fetch_failures.inc();
            return;
        };

        let peers = self.discovery.get_peers().await;

        let mut probes = FuturesUnordered::new();
        for peer in peers {
            probes.push(self.probe_one(peer, epoch));
        }

        while probes.next().await.is_some() {}
    }

    /// Probes a single peer and writes the resulting sample, reporting the
    /// outcome back to the `SenderPool` for loss-eviction accounting.
    async fn probe_one(&self, peer: crate::types::Peer, epoch: Epoch) {
        let key = PartitionKey {
            origin: self.local_device,
            target: peer.device,
            link: peer.link,
            epoch,
        };

        let ts = self.clock.now();

        let handle = self.senders.get(&peer).await;

        let sample = match handle {
            None => Sample::loss(ts),
            Some((sender_key, sender)) => {
                let outcome = tokio::time::timeout(self.probe_timeout, sender.probe()).await;

                let (sample, success) = match outcome {
                    Ok(Ok(rtt)) => (Sample::success(ts, rtt), true),
                    Ok(Err(e)) => {
                        tracing::debug!(error = %e, peer = %sender_key, "Probe failed");
                        (Sample::loss(ts), false)
                    }
                    Err(_) => {
                        tracing::debug!(peer = %sender_key, "Probe timed out");
                        (Sample::loss(ts), false)
                    }
                };

                self.senders.report_outcome(&sender_key, success).await;
                sample
            }
        };

        if sample.loss {
            self.metrics.probe_losses.inc();
        } else {
            self.metrics.probe_successes.inc();
        }

        self.buffer.add(key, sample).await;
    }
}
