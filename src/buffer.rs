//! Component E: a bounded, per-partition ring of samples with backpressure
//! and a priority-prepend path used by the submitter's retry logic.

use std::collections::HashMap;
use std::sync::Arc;

use lockfree_object_pool::{SpinLockObjectPool, SpinLockOwnedReusable};
use tokio::sync::{Mutex, Notify, RwLock};

use crate::types::{PartitionKey, Sample};

/// A pooled, reusable `Vec<Sample>`. Reset to empty before being returned
/// to the pool (the invariant from `spec.md` §4.E: "Recycle MUST reset
/// length to zero before returning the slice to the pool").
pub type PooledSamples = SpinLockOwnedReusable<Vec<Sample>>;

struct PartitionState {
    samples: Vec<Sample>,
}

/// One partition's bounded ring buffer, guarded by a mutex and a
/// [`Notify`] used as the async equivalent of a condition variable.
///
/// A condition variable (rather than a semaphore permit count) is needed
/// because [`Partition::priority_prepend`] can push the length above
/// capacity; waiters only care that a drain happened, not how much room
/// it freed.
struct Partition {
    state: Mutex<PartitionState>,
    notify: Notify,
    capacity: usize,
}

impl Partition {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PartitionState {
                samples: Vec::new(),
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Blocks while the partition is full, then appends `sample`.
    async fn add(&self, sample: Sample) {
        loop {
            // Register for notification before checking, so a wakeup that
            // fires between the check and `notified().await` isn't missed.
            let notified = self.notify.notified();

            {
                let mut state = self.state.lock().await;
                if state.samples.len() < self.capacity {
                    state.samples.push(sample);
                    return;
                }
            }

            notified.await;
        }
    }

    /// Non-blocking variant of [`Partition::add`].
    async fn try_add(&self, sample: Sample) -> bool {
        let mut state = self.state.lock().await;
        if state.samples.len() >= self.capacity {
            return false;
        }
        state.samples.push(sample);
        true
    }

    /// Takes a pooled snapshot of the partition's contents and clears it,
    /// waking any `Add` callers blocked on capacity.
    async fn copy_and_reset(&self, pool: &SpinLockObjectPool<Vec<Sample>>) -> PooledSamples {
        let mut state = self.state.lock().await;
        let mut out = pool.clone().pull_owned();
        out.clear();
        out.extend_from_slice(&state.samples);
        state.samples.clear();
        drop(state);

        self.notify.notify_waiters();
        out
    }

    /// Returns a fresh copy without clearing the partition.
    async fn flush_without_reset(&self) -> Vec<Sample> {
        self.state.lock().await.samples.clone()
    }

    /// Prepends `records` in front of existing entries. May push the
    /// partition's length above `capacity`; used only by the submitter's
    /// retry path.
    async fn priority_prepend(&self, records: Vec<Sample>) {
        let mut state = self.state.lock().await;
        let mut combined = records;
        combined.append(&mut state.samples);
        state.samples = combined;
        drop(state);

        self.notify.notify_waiters();
    }

    async fn len(&self) -> usize {
        self.state.lock().await.samples.len()
    }
}

/// A mapping from [`PartitionKey`] to a per-partition bounded ring of
/// samples, with a pooled backing array for drained snapshots.
pub struct PartitionedBuffer {
    partitions: RwLock<HashMap<PartitionKey, Arc<Partition>>>,
    capacity: usize,
    pool: Arc<SpinLockObjectPool<Vec<Sample>>>,
}

impl PartitionedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            capacity,
            pool: Arc::new(SpinLockObjectPool::new(
                || Vec::with_capacity(capacity),
                |v| v.clear(),
            )),
        }
    }

    /// Appends `sample` under `key`, creating the partition lazily and
    /// blocking while it is at capacity.
    pub async fn add(&self, key: PartitionKey, sample: Sample) {
        self.partition_or_insert(key).await.add(sample).await;
    }

    /// Non-blocking variant of [`PartitionedBuffer::add`].
    pub async fn try_add(&self, key: PartitionKey, sample: Sample) -> bool {
        self.partition_or_insert(key).await.try_add(sample).await
    }

    /// Drains `key`'s partition into a pooled snapshot and clears it.
    /// Returns `None` if the partition does not exist.
    pub async fn copy_and_reset(&self, key: PartitionKey) -> Option<PooledSamples> {
        let partition = self.partitions.read().await.get(&key)?.clone();
        Some(partition.copy_and_reset(&self.pool).await)
    }

    /// Returns a copy of `key`'s contents without clearing it.
    pub async fn read(&self, key: PartitionKey) -> Option<Vec<Sample>> {
        let partition = self.partitions.read().await.get(&key)?.clone();
        Some(partition.flush_without_reset().await)
    }

    /// Drains every partition without clearing it, keyed by partition.
    /// Distinct from [`PartitionedBuffer::read`] at the map level even
    /// though the per-partition semantics are identical (`spec.md` §4.E
    /// lists `Read` and `FlushWithoutReset` as separate operations).
    pub async fn flush_without_reset(&self) -> HashMap<PartitionKey, Vec<Sample>> {
        let snapshot: Vec<(PartitionKey, Arc<Partition>)> = self
            .partitions
            .read()
            .await
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();

        let mut out = HashMap::with_capacity(snapshot.len());
        for (key, partition) in snapshot {
            out.insert(key, partition.flush_without_reset().await);
        }
        out
    }

    /// Returns every partition key currently present, for the submitter's
    /// per-tick drain loop.
    pub async fn keys(&self) -> Vec<PartitionKey> {
        self.partitions.read().await.keys().copied().collect()
    }

    /// Prepends `records` in front of `key`'s partition, creating it
    /// lazily if necessary. May temporarily exceed capacity.
    pub async fn priority_prepend(&self, key: PartitionKey, records: Vec<Sample>) {
        self.partition_or_insert(key)
            .await
            .priority_prepend(records)
            .await;
    }

    /// Discards any pending samples and drops the partition entirely.
    pub async fn remove(&self, key: PartitionKey) {
        self.partitions.write().await.remove(&key);
    }

    pub async fn has(&self, key: PartitionKey) -> bool {
        self.partitions.read().await.contains_key(&key)
    }

    pub async fn len(&self, key: PartitionKey) -> usize {
        match self.partitions.read().await.get(&key) {
            Some(partition) => partition.len().await,
            None => 0,
        }
    }

    pub fn capacity(&self, _key: PartitionKey) -> usize {
        self.capacity
    }

    /// Returns a pooled, already-cleared sample vec for recycling after a
    /// successful submit.
    pub fn recycle(&self) -> PooledSamples {
        let mut v = self.pool.clone().pull_owned();
        v.clear();
        v
    }

    async fn partition_or_insert(&self, key: PartitionKey) -> Arc<Partition> {
        if let Some(partition) = self.partitions.read().await.get(&key) {
            return partition.clone();
        }

        self.partitions
            .write()
            .await
            .entry(key)
            .or_insert_with(|| Arc::new(Partition::new(self.capacity)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn key(epoch: u64) -> PartitionKey {
        use crate::types::{DevicePk, Epoch, LinkPk};
        PartitionKey {
            origin: DevicePk::new([1u8; 32]),
            target: DevicePk::new([2u8; 32]),
            link: LinkPk::new([3u8; 32]),
            epoch: Epoch(epoch),
        }
    }

    #[tokio::test]
    async fn add_then_copy_and_reset_drains_and_clears() {
        let buffer = PartitionedBuffer::new(8);
        let k = key(1);

        buffer.add(k, Sample::success(Utc::now(), Duration::from_millis(5))).await;
        buffer.add(k, Sample::loss(Utc::now())).await;

        let drained = buffer.copy_and_reset(k).await.unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(buffer.len(k).await, 0);
    }

    #[tokio::test]
    async fn copy_and_reset_on_missing_partition_returns_none() {
        let buffer = PartitionedBuffer::new(8);
        assert!(buffer.copy_and_reset(key(1)).await.is_none());
    }

    #[tokio::test]
    async fn try_add_fails_when_full() {
        let buffer = PartitionedBuffer::new(1);
        let k = key(1);

        assert!(buffer.try_add(k, Sample::loss(Utc::now())).await);
        assert!(!buffer.try_add(k, Sample::loss(Utc::now())).await);
        assert_eq!(buffer.len(k).await, 1);
    }

    #[tokio::test]
    async fn add_blocks_until_capacity_freed() {
        let buffer = Arc::new(PartitionedBuffer::new(1));
        let k = key(1);

        buffer.add(k, Sample::loss(Utc::now())).await;

        let waiter = {
            let buffer = buffer.clone();
            tokio::spawn(async move {
                buffer.add(k, Sample::loss(Utc::now())).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        buffer.copy_and_reset(k).await.unwrap();
        waiter.await.unwrap();
        assert_eq!(buffer.len(k).await, 1);
    }

    #[tokio::test]
    async fn priority_prepend_can_exceed_capacity() {
        let buffer = PartitionedBuffer::new(1);
        let k = key(1);

        buffer.add(k, Sample::loss(Utc::now())).await;
        buffer
            .priority_prepend(k, vec![Sample::loss(Utc::now()), Sample::loss(Utc::now())])
            .await;

        assert_eq!(buffer.len(k).await, 3);
    }

    #[tokio::test]
    async fn remove_discards_pending_samples() {
        let buffer = PartitionedBuffer::new(8);
        let k = key(1);

        buffer.add(k, Sample::loss(Utc::now())).await;
        assert!(buffer.has(k).await);

        buffer.remove(k).await;
        assert!(!buffer.has(k).await);
        assert_eq!(buffer.len(k).await, 0);
    }

    #[tokio::test]
    async fn flush_without_reset_does_not_clear() {
        let buffer = PartitionedBuffer::new(8);
        let k = key(1);
        buffer.add(k, Sample::loss(Utc::now())).await;

        let all = buffer.flush_without_reset().await;
        assert_eq!(all.get(&k).unwrap().len(), 1);
        assert_eq!(buffer.len(k).await, 1);
    }

    #[tokio::test]
    async fn recycled_vec_is_empty() {
        let buffer = PartitionedBuffer::new(8);
        let v = buffer.recycle();
        assert!(v.is_empty());
    }
}
