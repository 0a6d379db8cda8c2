//! In-memory fakes for the four external traits the collector consumes,
//! shared across the end-to-end scenario tests in `tests/scenarios.rs`.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ip_network::Ipv4Network;

use telemetry_collector::clock::EpochSource;
use telemetry_collector::error::{LedgerError, RegistryError, SenderError};
use telemetry_collector::ports::{
    Interface, InterfaceAddr, LocalNetworkInspector, PartitionRef, PeerRegistry, ProbeReflector,
    ProbeSender, ProbeSenderFactory, ProgramData, RegistryDevice, RegistryLink, TelemetryLedger,
};
use telemetry_collector::types::{DevicePk, LinkPk, LinkStatus};

pub fn pk(b: u8) -> DevicePk {
    DevicePk::new([b; 32])
}

pub fn link_pk(b: u8) -> LinkPk {
    LinkPk::new([b; 32])
}

/// A registry with a single fixed link between `local` and `remote`,
/// resolved over a /31 tunnel subnet.
pub struct SingleLinkRegistry {
    data: ProgramData,
}

impl SingleLinkRegistry {
    pub fn new(local: DevicePk, remote: DevicePk, link: LinkPk, subnet: Ipv4Network) -> Self {
        Self {
            data: ProgramData {
                devices: vec![RegistryDevice {
                    pubkey: remote,
                    public_ip: Ipv4Addr::new(198, 51, 100, 1),
                }],
                links: vec![RegistryLink {
                    pubkey: link,
                    side_a: local,
                    side_z: remote,
                    status: LinkStatus::Activated,
                    tunnel_subnet: Some(subnet),
                }],
            },
        }
    }
}

#[async_trait]
impl PeerRegistry for SingleLinkRegistry {
    async fn get_program_data(&self) -> Result<ProgramData, RegistryError> {
        Ok(self.data.clone())
    }
}

/// A local network inspector exposing one fixed /31 interface address.
pub struct FixedLocalNet {
    addr: Ipv4Addr,
}

impl FixedLocalNet {
    pub fn new(addr: Ipv4Addr) -> Self {
        Self { addr }
    }
}

impl LocalNetworkInspector for FixedLocalNet {
    fn interfaces(&self) -> std::io::Result<Vec<Interface>> {
        Ok(vec![Interface {
            name: "tun0".to_string(),
            addrs: vec![InterfaceAddr {
                addr: std::net::IpAddr::V4(self.addr),
                prefix_len: 31,
            }],
        }])
    }
}

/// A probe sender whose outcome is driven by a shared, flippable flag —
/// used to simulate a peer going from reachable to unreachable and back
/// (`spec.md` §8, scenario S3) without modeling a real socket.
pub struct SwitchableSender {
    reachable: Arc<AtomicBool>,
    rtt: Duration,
}

#[async_trait]
impl ProbeSender for SwitchableSender {
    async fn probe(&self) -> anyhow::Result<Duration> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(self.rtt)
        } else {
            anyhow::bail!("simulated unreachable peer")
        }
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct SwitchableSenderFactory {
    reachable: Arc<AtomicBool>,
    rtt: Duration,
}

impl SwitchableSenderFactory {
    pub fn new(initially_reachable: bool, rtt: Duration) -> (Self, Arc<AtomicBool>) {
        let reachable = Arc::new(AtomicBool::new(initially_reachable));
        (
            Self {
                reachable: reachable.clone(),
                rtt,
            },
            reachable,
        )
    }
}

#[async_trait]
impl ProbeSenderFactory for SwitchableSenderFactory {
    async fn new_sender(
        &self,
        _interface: &str,
        _source: SocketAddr,
        _target: SocketAddr,
    ) -> Result<Box<dyn ProbeSender>, SenderError> {
        Ok(Box::new(SwitchableSender {
            reachable: self.reachable.clone(),
            rtt: self.rtt,
        }))
    }
}

/// One ledger write call, captured for assertion.
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub partition: PartitionRef,
    pub start_timestamp_micros: u64,
    pub rtts: Vec<u32>,
}

/// A ledger that always succeeds and records every write it receives.
#[derive(Default)]
pub struct RecordingLedger {
    writes: Mutex<Vec<RecordedWrite>>,
}

impl RecordingLedger {
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }

    /// Every rtt value recorded across all writes, in write order.
    pub fn all_rtts(&self) -> Vec<u32> {
        self.writes()
            .into_iter()
            .flat_map(|w| w.rtts)
            .collect()
    }
}

#[async_trait]
impl TelemetryLedger for RecordingLedger {
    async fn initialize_device_latency_samples(
        &self,
        _partition: PartitionRef,
        _sampling_interval_micros: u64,
    ) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn write_device_latency_samples(
        &self,
        partition: PartitionRef,
        start_timestamp_micros: u64,
        rtts: &[u32],
    ) -> Result<(), LedgerError> {
        self.writes.lock().unwrap().push(RecordedWrite {
            partition,
            start_timestamp_micros,
            rtts: rtts.to_vec(),
        });
        Ok(())
    }
}

pub struct FixedEpochSource(pub u64);

#[async_trait]
impl EpochSource for FixedEpochSource {
    async fn current_epoch(&self) -> anyhow::Result<u64> {
        Ok(self.0)
    }
}

/// A reflector that does nothing besides waiting for shutdown, since the
/// TWAMP-light protocol itself is out of scope (`spec.md` §1).
pub struct NoopReflector;

#[async_trait]
impl ProbeReflector for NoopReflector {
    async fn run(&mut self, cancellation: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        cancellation.cancelled().await;
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
