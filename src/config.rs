//! The configuration surface recognized by the collector (`spec.md` §6).

use std::time::Duration;

use crate::error::ConfigError;
use crate::types::DevicePk;

/// Validated collector configuration.
///
/// Constructed only through [`CollectorConfig::new`], which enforces the
/// invariants `spec.md` §7 calls out as the one class of fatal error:
/// invalid configuration at construction.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub local_device_pk: DevicePk,
    pub probe_interval: Duration,
    pub submission_interval: Duration,
    pub probe_timeout: Duration,
    /// `Duration::ZERO` disables TTL-based sender rotation.
    pub sender_ttl: Duration,
    pub submitter_max_concurrency: usize,
    pub max_consecutive_sender_losses: u32,
    pub twamp_port: u16,
    pub partition_capacity: usize,
}

/// Sender idle-eviction window; fixed per `spec.md` §4.C ("running every
/// minute... evict entries where `now - lastUsed > 5 minutes`").
pub const SENDER_IDLE_EVICTION_INTERVAL: Duration = Duration::from_secs(60);
pub const SENDER_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Protocol-dictated bound referenced by `spec.md` §4.F, used as the
/// global default partition capacity unless overridden.
pub const DEFAULT_PARTITION_CAPACITY: usize = 4096;

pub const DEFAULT_MAX_SUBMIT_ATTEMPTS: u32 = 5;
pub const DEFAULT_EPOCH_FETCH_ATTEMPTS: u32 = 3;

/// Backoff contract from `spec.md` §9: base 500ms, cap 5s, jitter in
/// [0.5, 1.0).
pub const BACKOFF_BASE: Duration = Duration::from_millis(500);
pub const BACKOFF_CAP: Duration = Duration::from_secs(5);

impl CollectorConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_device_pk: DevicePk,
        probe_interval: Duration,
        submission_interval: Duration,
        probe_timeout: Duration,
        sender_ttl: Duration,
        submitter_max_concurrency: usize,
        max_consecutive_sender_losses: u32,
        twamp_port: u16,
    ) -> Result<Self, ConfigError> {
        if local_device_pk.is_zero() {
            return Err(ConfigError::ZeroLocalDevicePk);
        }
        if probe_interval.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "probe_interval",
            });
        }
        if submission_interval.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "submission_interval",
            });
        }
        if submission_interval <= probe_interval {
            return Err(ConfigError::SubmissionNotLargerThanProbe {
                submission: submission_interval,
                probe: probe_interval,
            });
        }
        if probe_timeout.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "probe_timeout",
            });
        }
        if submitter_max_concurrency < 1 {
            return Err(ConfigError::NotAtLeastOne {
                field: "submitter_max_concurrency",
            });
        }
        if max_consecutive_sender_losses < 1 {
            return Err(ConfigError::NotAtLeastOne {
                field: "max_consecutive_sender_losses",
            });
        }

        Ok(Self {
            local_device_pk,
            probe_interval,
            submission_interval,
            probe_timeout,
            sender_ttl,
            submitter_max_concurrency,
            max_consecutive_sender_losses,
            twamp_port,
            partition_capacity: DEFAULT_PARTITION_CAPACITY,
        })
    }
}
