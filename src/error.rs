//! Error taxonomy for the collector, expressed as tagged variants (per
//! `spec.md` §9's Design Notes) rather than string matching.

use thiserror::Error;

/// Errors returned by a [`crate::ports::PeerRegistry`] read.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry read failed: {0}")]
    Read(#[source] anyhow::Error),
}

/// Errors constructing a probe sender for a peer.
#[derive(Debug, Error)]
pub enum SenderError {
    #[error("failed to construct sender: {0}")]
    Construction(#[source] anyhow::Error),
}

/// Errors from a [`crate::ports::TelemetryLedger`] call.
///
/// `AccountNotFound` and `AccountFull` are distinguished outcomes the
/// `Submitter` branches on; everything else is `Transient` and subject to
/// retry with backoff.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("partition account not found")]
    AccountNotFound,
    #[error("partition account is full")]
    AccountFull,
    #[error("transient ledger error: {0}")]
    Transient(#[source] anyhow::Error),
}

impl LedgerError {
    pub fn is_account_not_found(&self) -> bool {
        matches!(self, LedgerError::AccountNotFound)
    }

    pub fn is_account_full(&self) -> bool {
        matches!(self, LedgerError::AccountFull)
    }
}

/// Top-level error for invalid configuration at construction time.
///
/// Per `spec.md` §7: "Nothing is fatal except invalid configuration at
/// construction." All other errors are recovered from in place.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("`{field}` must be greater than zero")]
    NotPositive { field: &'static str },
    #[error("`submission_interval` ({submission:?}) must be greater than `probe_interval` ({probe:?})")]
    SubmissionNotLargerThanProbe {
        submission: std::time::Duration,
        probe: std::time::Duration,
    },
    #[error("`{field}` must be at least 1")]
    NotAtLeastOne { field: &'static str },
    #[error("local device public key must not be the zero key")]
    ZeroLocalDevicePk,
}
