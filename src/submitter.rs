//! Component F: drains partitions, batches and chunks samples, and writes
//! them to the ledger with retries, auto-init, and drop-on-full semantics.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::buffer::{PartitionedBuffer, PooledSamples};
use crate::clock::{fetch_epoch_with_retry, EpochSource};
use crate::config::{
    BACKOFF_BASE, BACKOFF_CAP, DEFAULT_EPOCH_FETCH_ATTEMPTS, DEFAULT_MAX_SUBMIT_ATTEMPTS,
};
use crate::metrics::Metrics;
use crate::ports::{PartitionRef, TelemetryLedger, MAX_SAMPLES_PER_BATCH};
use crate::types::{DevicePk, Epoch, PartitionKey, Sample};

/// Drains the buffer on a fixed cadence and writes batches to the ledger.
pub struct Submitter {
    local_device: DevicePk,
    buffer: Arc<PartitionedBuffer>,
    ledger: Arc<dyn TelemetryLedger>,
    epoch_source: Arc<dyn EpochSource>,
    submission_interval: Duration,
    probe_interval: Duration,
    max_concurrency: usize,
    metrics: Arc<Metrics>,
}

impl Submitter {
    pub fn new(
        local_device: DevicePk,
        buffer: Arc<PartitionedBuffer>,
        ledger: Arc<dyn TelemetryLedger>,
        epoch_source: Arc<dyn EpochSource>,
        submission_interval: Duration,
        probe_interval: Duration,
        max_concurrency: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            local_device,
            buffer,
            ledger,
            epoch_source,
            submission_interval,
            probe_interval,
            max_concurrency,
            metrics,
        }
    }

    /// Runs forever, invoking one tick every `submission_interval`, until
    /// `cancellation` fires.
    pub async fn run(&self, cancellation: CancellationToken) {
        let mut next = tokio::time::Instant::now();

        loop {
            tokio::select! {
                () = tokio::time::sleep_until(next) => {}
                () = cancellation.cancelled() => return,
            }
            next += self.submission_interval;

            self.tick(&cancellation).await;
        }
    }

    pub async fn tick(&self, cancellation: &CancellationToken) {
        let keys = self.buffer.keys().await;
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        // Each task acquires its permit only once polled, so the acquire
        // races concurrently across partitions instead of serializing on
        // this loop (which never yields control to let permits free up).
        let mut tasks = Vec::with_capacity(keys.len());
        for key in keys {
            let semaphore = semaphore.clone();
            let cancellation = cancellation.clone();

            tasks.push(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                self.drain_one(key, &cancellation).await;
            });
        }

        futures::future::join_all(tasks).await;
    }

    async fn drain_one(&self, key: PartitionKey, cancellation: &CancellationToken) {
        let Some(batch) = self.buffer.copy_and_reset(key).await else {
            return;
        };

        if batch.is_empty() {
            self.maybe_garbage_collect(key, batch).await;
            return;
        }

        self.submit_with_retry(key, batch, cancellation).await;
    }

    async fn maybe_garbage_collect(&self, key: PartitionKey, batch: PooledSamples) {
        match fetch_epoch_with_retry(self.epoch_source.as_ref(), DEFAULT_EPOCH_FETCH_ATTEMPTS).await {
            Some(current) => {
                if key.epoch < Epoch(current) {
                    self.buffer.remove(key).await;
                    self.metrics.partitions_garbage_collected.inc();
                    tracing::debug!(?key, "Garbage-collected empty past-epoch partition");
                }
            }
            None => {
                tracing::warn!(?key, "Failed to fetch current epoch for garbage collection: retries exhausted");
                self.metrics.epoch_fetch_failures.inc();
            }
        }

        drop(batch);
    }

    async fn submit_with_retry(
        &self,
        key: PartitionKey,
        batch: PooledSamples,
        cancellation: &CancellationToken,
    ) {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(BACKOFF_BASE)
            .with_max_interval(BACKOFF_CAP)
            .with_multiplier(2.0)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match self.submit_samples(key, &batch).await {
                Ok(()) => return,
                Err(e) => {
                    if attempt >= DEFAULT_MAX_SUBMIT_ATTEMPTS {
                        tracing::warn!(?key, error = %e, attempts = attempt, "Submit attempts exhausted");
                        self.requeue_or_drop(key, batch).await;
                        return;
                    }

                    self.metrics.submit_retries.inc();
                    tracing::warn!(?key, error = %e, attempt, "Submit failed, retrying");

                    let delay = backoff.next_backoff().unwrap_or(BACKOFF_CAP);
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancellation.cancelled() => {
                            self.requeue_or_drop(key, batch).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn requeue_or_drop(&self, key: PartitionKey, batch: PooledSamples) {
        let pending = self.buffer.len(key).await;
        let capacity = self.buffer.capacity(key);

        if pending + batch.len() < capacity {
            let records: Vec<Sample> = batch.to_vec();
            self.buffer.priority_prepend(key, records).await;
        } else {
            self.metrics.samples_dropped.inc_by(batch.len() as u64);
            tracing::warn!(?key, dropped = batch.len(), "Dropping samples: buffer capacity exceeded");
        }
    }

    /// Writes `batch` to the ledger, chunked to at most
    /// [`MAX_SAMPLES_PER_BATCH`] samples per call, auto-initializing the
    /// partition account on first use.
    async fn submit_samples(&self, key: PartitionKey, batch: &[Sample]) -> anyhow::Result<()> {
        for chunk in batch.chunks(MAX_SAMPLES_PER_BATCH) {
            self.submit_chunk(key, chunk).await?;
        }

        self.metrics.samples_submitted.inc_by(batch.len() as u64);
        Ok(())
    }

    async fn submit_chunk(&self, key: PartitionKey, chunk: &[Sample]) -> anyhow::Result<()> {
        let partition = PartitionRef {
            agent: self.local_device,
            origin: key.origin,
            target: key.target,
            link: key.link,
            epoch: key.epoch.0,
        };

        let rtts = to_wire_rtts(chunk);
        let start_timestamp_micros = min_timestamp_micros(chunk);

        match self
            .ledger
            .write_device_latency_samples(partition, start_timestamp_micros, &rtts)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_account_not_found() => {
                self.ledger
                    .initialize_device_latency_samples(
                        partition,
                        micros(self.probe_interval),
                    )
                    .await?;

                match self
                    .ledger
                    .write_device_latency_samples(partition, start_timestamp_micros, &rtts)
                    .await
                {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_account_full() => {
                        self.buffer.remove(key).await;
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) if e.is_account_full() => {
                self.buffer.remove(key).await;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Converts each sample's RTT to on-wire microseconds: `0` for a loss, else
/// `max(1, micros(rtt))` so a real zero-rtt sample never aliases a loss.
fn to_wire_rtts(samples: &[Sample]) -> Vec<u32> {
    samples
        .iter()
        .map(|s| {
            if s.loss {
                0
            } else {
                micros(s.rtt).max(1)
            }
        })
        .collect()
}

fn micros(d: Duration) -> u32 {
    u32::try_from(d.as_micros()).unwrap_or(u32::MAX)
}

fn min_timestamp_micros(samples: &[Sample]) -> u64 {
    samples
        .iter()
        .map(|s| s.timestamp.timestamp_micros().max(0) as u64)
        .min()
        .unwrap_or_else(|| Utc::now().timestamp_micros().max(0) as u64)
}
