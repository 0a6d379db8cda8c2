//! Stand-in implementations of the `ports` traits, wired into the binary so
//! the process can start and fail loudly instead of linking a concrete
//! vendor registry/ledger/transport client that has no place in this crate.
//!
//! `spec.md` §1 explicitly carves the TWAMP transport, the ledger client,
//! and the peer-source-of-truth registry out of scope ("external
//! collaborators"). A real deployment replaces every type in this module
//! with its own client before calling [`telemetry_collector::collector::Collector::new`].

use std::net::SocketAddr;

use async_trait::async_trait;
use telemetry_collector::clock::EpochSource;
use telemetry_collector::error::{LedgerError, RegistryError, SenderError};
use telemetry_collector::ports::{
    Interface, LocalNetworkInspector, PartitionRef, PeerRegistry, ProbeReflector, ProbeSender,
    ProbeSenderFactory, ProgramData, TelemetryLedger,
};

pub struct UnconfiguredRegistry;

#[async_trait]
impl PeerRegistry for UnconfiguredRegistry {
    async fn get_program_data(&self) -> Result<ProgramData, RegistryError> {
        Err(RegistryError::Read(anyhow::anyhow!(
            "no authoritative registry client configured for this deployment"
        )))
    }
}

pub fn registry() -> UnconfiguredRegistry {
    UnconfiguredRegistry
}

pub struct HostLocalNet;

impl LocalNetworkInspector for HostLocalNet {
    fn interfaces(&self) -> std::io::Result<Vec<Interface>> {
        Ok(Vec::new())
    }
}

pub fn local_net() -> HostLocalNet {
    HostLocalNet
}

pub struct UnconfiguredSenderFactory;

#[async_trait]
impl ProbeSenderFactory for UnconfiguredSenderFactory {
    async fn new_sender(
        &self,
        _interface: &str,
        _source: SocketAddr,
        _target: SocketAddr,
    ) -> Result<Box<dyn ProbeSender>, SenderError> {
        Err(SenderError::Construction(anyhow::anyhow!(
            "no TWAMP-light sender transport configured for this deployment"
        )))
    }
}

pub fn sender_factory() -> UnconfiguredSenderFactory {
    UnconfiguredSenderFactory
}

pub struct UnconfiguredLedger;

#[async_trait]
impl TelemetryLedger for UnconfiguredLedger {
    async fn initialize_device_latency_samples(
        &self,
        _partition: PartitionRef,
        _sampling_interval_micros: u64,
    ) -> Result<(), LedgerError> {
        Err(LedgerError::Transient(anyhow::anyhow!(
            "no ledger client configured for this deployment"
        )))
    }

    async fn write_device_latency_samples(
        &self,
        _partition: PartitionRef,
        _start_timestamp_micros: u64,
        _rtts: &[u32],
    ) -> Result<(), LedgerError> {
        Err(LedgerError::Transient(anyhow::anyhow!(
            "no ledger client configured for this deployment"
        )))
    }
}

pub fn ledger() -> UnconfiguredLedger {
    UnconfiguredLedger
}

pub struct UnconfiguredEpochSource;

#[async_trait]
impl EpochSource for UnconfiguredEpochSource {
    async fn current_epoch(&self) -> anyhow::Result<u64> {
        anyhow::bail!("no epoch source configured for this deployment")
    }
}

pub fn epoch_source() -> UnconfiguredEpochSource {
    UnconfiguredEpochSource
}

pub struct UnconfiguredReflector {
    local_addr: SocketAddr,
}

#[async_trait]
impl ProbeReflector for UnconfiguredReflector {
    async fn run(&mut self, cancellation: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        tracing::warn!(
            "no TWAMP-light reflector configured for this deployment; incoming probes will go unanswered"
        );
        cancellation.cancelled().await;
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub fn reflector() -> UnconfiguredReflector {
    UnconfiguredReflector {
        local_addr: SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0),
    }
}
