//! Time injection seams: `NowFunc` and `GetCurrentEpochFunc` from
//! `spec.md` §6, expressed as traits so `SenderTTL` rotation and
//! past-epoch garbage collection are deterministically testable.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};

use crate::config::{BACKOFF_BASE, BACKOFF_CAP};

/// Wall-clock time source. The default implementation reads the real
/// system clock; tests inject a fake that can be advanced manually.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock, used outside of tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Supplies the current epoch (`GetCurrentEpochFunc` in `spec.md` §6).
///
/// The collector treats the epoch as opaque except for ordering: the
/// `Submitter` compares `partition.epoch < current_epoch` to decide that an
/// empty partition may be garbage-collected.
#[async_trait]
pub trait EpochSource: Send + Sync {
    async fn current_epoch(&self) -> anyhow::Result<u64>;
}

/// Fetches the current epoch, retrying with jittered exponential backoff
/// on failure. Shared by `Pinger::tick` and `Submitter`'s garbage
/// collection path, per `spec.md` §7: "GetCurrentEpoch failure | Pinger,
/// Submitter | Retry up to 3-5 times with backoff; abort tick on
/// exhaustion." Returns `None` once `attempts` have all failed.
pub async fn fetch_epoch_with_retry(source: &dyn EpochSource, attempts: u32) -> Option<u64> {
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(BACKOFF_BASE)
        .with_max_interval(BACKOFF_CAP)
        .with_multiplier(2.0)
        .with_max_elapsed_time(None)
        .build();

    for attempt in 1..=attempts {
        match source.current_epoch().await {
            Ok(epoch) => return Some(epoch),
            Err(e) => {
                tracing::warn!(error = %e, attempt, "Failed to fetch current epoch");
                if attempt == attempts {
                    return None;
                }
                if let Some(delay) = backoff.next_backoff() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    None
}
