//! Trait boundaries for the external collaborators described in
//! `spec.md` §6: the authoritative registry, the local network inspector,
//! the TWAMP-Light probe transport, and the ledger client.
//!
//! None of these traits are implemented by this crate — they are the
//! seams a deployment plugs concrete network/ledger clients into. Tests
//! use in-memory fakes (see `tests/support`).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use ip_network::Ipv4Network;

use crate::error::{LedgerError, RegistryError, SenderError};
use crate::types::{DevicePk, LinkPk, LinkStatus};

/// A device as reported by the authoritative registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RegistryDevice {
    pub pubkey: DevicePk,
    pub public_ip: Ipv4Addr,
}

/// A link as reported by the authoritative registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RegistryLink {
    pub pubkey: LinkPk,
    pub side_a: DevicePk,
    pub side_z: DevicePk,
    pub status: LinkStatus,
    /// The link's tunnel subnet; `None` encodes the "all-zero" sentinel
    /// from `spec.md` §4.B step 2 (such links are skipped).
    pub tunnel_subnet: Option<Ipv4Network>,
}

/// One full snapshot read from the authoritative registry.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ProgramData {
    pub devices: Vec<RegistryDevice>,
    pub links: Vec<RegistryLink>,
}

/// The authoritative peer-source-of-truth (`ServiceabilityProgramClient` in
/// `spec.md` §6).
#[async_trait]
pub trait PeerRegistry: Send + Sync {
    async fn get_program_data(&self) -> Result<ProgramData, RegistryError>;
}

/// A single local network interface with its assigned addresses.
#[derive(Debug, Clone)]
pub struct Interface {
    pub name: String,
    pub addrs: Vec<InterfaceAddr>,
}

/// An address assigned to an interface, with its prefix length.
#[derive(Debug, Clone, Copy)]
pub struct InterfaceAddr {
    pub addr: IpAddr,
    pub prefix_len: u8,
}

/// Local host interface enumeration (`LocalNet` in `spec.md` §6).
pub trait LocalNetworkInspector: Send + Sync {
    fn interfaces(&self) -> std::io::Result<Vec<Interface>>;
}

/// The passive side of the TWAMP-Light protocol; owned and run by the
/// collector but not implemented here.
///
/// `run` takes a [`CancellationToken`](tokio_util::sync::CancellationToken)
/// directly (rather than relying on a concurrent `close()` call to unblock
/// it) so the collector can hold the reflector by value for its task's
/// lifetime and only reach for `&mut self` again, uncontended, after that
/// task has returned.
#[async_trait]
pub trait ProbeReflector: Send + Sync {
    async fn run(&mut self, cancellation: tokio_util::sync::CancellationToken) -> anyhow::Result<()>;
    fn local_addr(&self) -> SocketAddr;
    async fn close(&mut self) -> anyhow::Result<()>;
}

/// One probe-sender bound to a local interface and a (source, target) UDP
/// pair.
#[async_trait]
pub trait ProbeSender: Send + Sync {
    /// Performs one round-trip probe, bounded by the caller's timeout.
    async fn probe(&self) -> anyhow::Result<Duration>;

    /// Tears down the underlying socket. Takes `&self` (rather than
    /// `&mut self`) because the `SenderPool` holds senders behind an `Arc`
    /// so in-flight probes are never serialized behind the pool's mutex.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Factory for [`ProbeSender`]s (`NewSender` in `spec.md` §6).
#[async_trait]
pub trait ProbeSenderFactory: Send + Sync {
    async fn new_sender(
        &self,
        interface: &str,
        source: SocketAddr,
        target: SocketAddr,
    ) -> Result<Box<dyn ProbeSender>, SenderError>;
}

/// Identifies a single partition for a ledger call.
#[derive(Debug, Clone, Copy)]
pub struct PartitionRef {
    pub agent: DevicePk,
    pub origin: DevicePk,
    pub target: DevicePk,
    pub link: LinkPk,
    pub epoch: u64,
}

/// The append-only ledger client (`TelemetryProgramClient` in
/// `spec.md` §6).
#[async_trait]
pub trait TelemetryLedger: Send + Sync {
    async fn initialize_device_latency_samples(
        &self,
        partition: PartitionRef,
        sampling_interval_micros: u64,
    ) -> Result<(), LedgerError>;

    async fn write_device_latency_samples(
        &self,
        partition: PartitionRef,
        start_timestamp_micros: u64,
        rtts: &[u32],
    ) -> Result<(), LedgerError>;
}

/// Protocol-dictated maximum number of samples per `write` call.
pub const MAX_SAMPLES_PER_BATCH: usize = 245;
