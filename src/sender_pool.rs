//! Component C: memoizes probe-senders keyed by a peer's canonical string
//! identity, enforcing TTL, idle, and consecutive-loss eviction.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::metrics::Metrics;
use crate::ports::{ProbeSender, ProbeSenderFactory};
use crate::types::Peer;

struct Entry {
    sender: Arc<dyn ProbeSender>,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
    consecutive_losses: u32,
}

/// Pools reusable probe-senders, deduplicated by [`Peer::canonical`].
///
/// Two `Peer` values with the same canonical string always resolve to the
/// same entry (`spec.md` §3, §4.C, §8 property 3). Senders are stored
/// behind an `Arc` (not a bare lock guard) so that probing a sender never
/// holds the pool's map mutex for the duration of the network call.
pub struct SenderPool {
    factory: Arc<dyn ProbeSenderFactory>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_consecutive_losses: u32,
    entries: Mutex<HashMap<String, Entry>>,
    metrics: Arc<Metrics>,
}

impl SenderPool {
    pub fn new(
        factory: Arc<dyn ProbeSenderFactory>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        max_consecutive_losses: u32,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            factory,
            clock,
            ttl,
            max_consecutive_losses,
            entries: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Returns the sender for `peer`, creating one if necessary and
    /// evicting an existing one whose TTL has expired.
    ///
    /// Returns `None` if the peer has no tunnel, or if sender construction
    /// fails (the caller then records a loss sample, per `spec.md` §4.D
    /// step 3c).
    pub async fn get(&self, peer: &Peer) -> Option<(String, Arc<dyn ProbeSender>)> {
        let tunnel = peer.tunnel.as_ref()?;
        let key = peer.canonical();
        let now = self.clock.now();

        {
            let mut entries = self.entries.lock().await;

            if let Some(entry) = entries.get_mut(&key) {
                let expired = !self.ttl.is_zero()
                    && now
                        .signed_duration_since(entry.created_at)
                        .to_std()
                        .map(|age| age >= self.ttl)
                        .unwrap_or(false);

                if !expired {
                    entry.last_used = now;
                    return Some((key, entry.sender.clone()));
                }

                if let Some(expired_entry) = entries.remove(&key) {
                    drop(entries);
                    let _ = expired_entry.sender.close().await;
                    self.metrics.sender_ttl_evictions.inc();
                }
            }
        }

        // Constructing a sender may block on a real socket bind/connect, so
        // the map mutex is released for the duration of this call — other
        // peers' concurrent `get()`s (the Pinger fans out one per peer per
        // tick) must not serialize behind it.
        let source = SocketAddr::new(tunnel.source_ip.into(), 0);
        let target = SocketAddr::new(tunnel.target_ip.into(), peer.twamp_port);

        let sender = match self
            .factory
            .new_sender(&tunnel.interface, source, target)
            .await
        {
            Ok(sender) => {
                let sender: Arc<dyn ProbeSender> = Arc::from(sender);
                sender
            }
            Err(e) => {
                tracing::warn!(error = %e, peer = %key, "Failed to construct probe sender");
                self.metrics.sender_construction_failures.inc();
                return None;
            }
        };

        let mut entries = self.entries.lock().await;

        // Another concurrent `get()` for the same peer may have won the
        // race and already inserted a fresher entry; prefer that one and
        // close the sender just built instead of discarding it silently.
        if let Some(existing) = entries.get_mut(&key) {
            existing.last_used = now;
            let winner = existing.sender.clone();
            drop(entries);
            let _ = sender.close().await;
            return Some((key, winner));
        }

        entries.insert(
            key.clone(),
            Entry {
                sender: sender.clone(),
                created_at: now,
                last_used: now,
                consecutive_losses: 0,
            },
        );
        Some((key, sender))
    }

    /// Records the outcome of a probe for loss-eviction accounting.
    /// Success resets the consecutive-loss counter; loss increments it and
    /// evicts once the threshold is reached.
    ///
    /// Critical for correctness: an evicted entry's *next* probe builds a
    /// brand new sender, which is how an address change elsewhere (e.g. a
    /// re-numbered tunnel endpoint) gets picked up without waiting out the
    /// full `SenderTTL`.
    pub async fn report_outcome(&self, key: &str, success: bool) {
        let evicted = {
            let mut entries = self.entries.lock().await;

            let Some(entry) = entries.get_mut(key) else {
                return;
            };

            if success {
                entry.consecutive_losses = 0;
                return;
            }

            entry.consecutive_losses += 1;

            if entry.consecutive_losses >= self.max_consecutive_losses {
                entries.remove(key)
            } else {
                None
            }
        };

        if let Some(entry) = evicted {
            let _ = entry.sender.close().await;
            self.metrics.sender_loss_evictions.inc();
            tracing::info!(
                peer = key,
                "Evicting probe sender after consecutive losses; next probe rebuilds it"
            );
        }
    }

    /// Background sweep: evicts entries idle for longer than `idle_timeout`.
    /// Runs forever until `cancellation` fires.
    pub async fn run_idle_sweep(
        &self,
        sweep_interval: Duration,
        idle_timeout: Duration,
        cancellation: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = tokio::time::sleep(sweep_interval) => {}
                () = cancellation.cancelled() => return,
            }

            self.sweep_idle(idle_timeout).await;
        }
    }

    /// Closes and drops every pooled sender. Called once at collector
    /// shutdown, after every task that could call [`SenderPool::get`] has
    /// stopped.
    pub async fn close_all(&self) {
        let drained: Vec<Entry> = self.entries.lock().await.drain().map(|(_, e)| e).collect();

        for entry in drained {
            let _ = entry.sender.close().await;
        }
    }

    async fn sweep_idle(&self, idle_timeout: Duration) {
        let now = self.clock.now();

        let stale = {
            let mut entries = self.entries.lock().await;
            let stale_keys: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| {
                    now.signed_duration_since(entry.last_used)
                        .to_std()
                        .map(|idle_for| idle_for > idle_timeout)
                        .unwrap_or(false)
                })
                .map(|(k, _)| k.clone())
                .collect();

            stale_keys
                .into_iter()
                .filter_map(|k| entries.remove(&k))
                .collect::<Vec<_>>()
        };

        for entry in stale {
            let _ = entry.sender.close().await;
            self.metrics.sender_idle_evictions.inc();
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    #[cfg(test)]
    pub async fn consecutive_losses(&self, key: &str) -> Option<u32> {
        self.entries
            .lock()
            .await
            .get(key)
            .map(|e| e.consecutive_losses)
    }
}
