//! Component B: periodically snapshots the authoritative registry, resolves
//! each link to a local tunnel interface, and exposes the current peer set.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;
use crate::ports::{Interface, LocalNetworkInspector, PeerRegistry};
use crate::types::{DevicePk, LinkStatus, Peer, Tunnel};

/// Discovers and periodically refreshes the set of peers reachable from
/// this device.
pub struct PeerDiscovery {
    local_device: DevicePk,
    registry: Arc<dyn PeerRegistry>,
    local_net: Arc<dyn LocalNetworkInspector>,
    twamp_port: u16,
    refresh_interval: Duration,
    metrics: Arc<Metrics>,
    peers: RwLock<Vec<Peer>>,
}

impl PeerDiscovery {
    pub fn new(
        local_device: DevicePk,
        registry: Arc<dyn PeerRegistry>,
        local_net: Arc<dyn LocalNetworkInspector>,
        twamp_port: u16,
        refresh_interval: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            local_device,
            registry,
            local_net,
            twamp_port,
            refresh_interval,
            metrics,
            peers: RwLock::new(Vec::new()),
        }
    }

    /// Returns a snapshot copy of the most recent successful refresh.
    pub async fn get_peers(&self) -> Vec<Peer> {
        self.peers.read().await.clone()
    }

    /// Runs forever, refreshing the peer snapshot every `refresh_interval`,
    /// until `cancellation` fires.
    pub async fn run(&self, cancellation: CancellationToken) {
        let mut next = Instant::now();

        loop {
            tokio::select! {
                () = tokio::time::sleep_until(next) => {}
                () = cancellation.cancelled() => return,
            }
            next += self.refresh_interval;

            self.refresh().await;
        }
    }

    /// Exposed at `pub(crate)` visibility so `Pinger`'s tests can force a
    /// synchronous refresh without waiting on `refresh_interval`.
    pub(crate) async fn refresh(&self) {
        let program_data = match self.registry.get_program_data().await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read authoritative registry, keeping previous peer snapshot");
                self.metrics.registry_read_errors.inc();
                return;
            }
        };

        let interfaces = match self.local_net.interfaces() {
            Ok(ifaces) => ifaces,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to enumerate local network interfaces, keeping previous peer snapshot");
                self.metrics.interface_enumeration_errors.inc();
                return;
            }
        };

        let mut peers = Vec::with_capacity(program_data.links.len());

        for link in &program_data.links {
            if !link.status.is_probeable() {
                continue;
            }

            let Some(tunnel_subnet) = link.tunnel_subnet else {
                continue;
            };

            let remote_pk = if link.side_a == self.local_device {
                link.side_z
            } else if link.side_z == self.local_device {
                link.side_a
            } else {
                continue;
            };

            if !program_data
                .devices
                .iter()
                .any(|d| d.pubkey == remote_pk)
            {
                continue;
            }

            let tunnel = find_tunnel(&interfaces, tunnel_subnet);
            if tunnel.is_none() {
                tracing::debug!(link = %link.pubkey, "No local interface found inside link's tunnel subnet");
                self.metrics.tunnels_not_found.inc();
            }

            peers.push(Peer {
                device: remote_pk,
                link: link.pubkey,
                tunnel,
                twamp_port: self.twamp_port,
            });
        }

        let count = peers.len();
        *self.peers.write().await = peers;
        tracing::debug!(peer_count = count, "Refreshed peer snapshot");
    }
}

/// Scans `interfaces` for an IPv4 address whose mask is exactly /31 and
/// that falls inside `tunnel_subnet`.
fn find_tunnel(interfaces: &[Interface], tunnel_subnet: ip_network::Ipv4Network) -> Option<Tunnel> {
    for iface in interfaces {
        for addr in &iface.addrs {
            if addr.prefix_len != 31 {
                continue;
            }

            let std::net::IpAddr::V4(source_ip) = addr.addr else {
                continue;
            };

            if !tunnel_subnet.contains(source_ip) {
                continue;
            }

            let target_ip = Tunnel::peer_of(source_ip);

            return Some(Tunnel {
                interface: iface.name.clone(),
                source_ip,
                target_ip,
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::ports::{ProgramData, RegistryDevice, RegistryLink};
    use crate::types::LinkPk;
    use async_trait::async_trait;
    use ip_network::Ipv4Network;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex as StdMutex;

    struct FakeRegistry {
        data: StdMutex<Result<ProgramData, String>>,
    }

    #[async_trait]
    impl PeerRegistry for FakeRegistry {
        async fn get_program_data(&self) -> Result<ProgramData, RegistryError> {
            match &*self.data.lock().unwrap() {
                Ok(data) => Ok(data.clone()),
                Err(e) => Err(RegistryError::Read(anyhow::anyhow!(e.clone()))),
            }
        }
    }

    struct FakeLocalNet {
        interfaces: Vec<Interface>,
    }

    impl LocalNetworkInspector for FakeLocalNet {
        fn interfaces(&self) -> std::io::Result<Vec<Interface>> {
            Ok(self.interfaces.clone())
        }
    }

    fn pk(b: u8) -> DevicePk {
        DevicePk::new([b; 32])
    }

    fn link_pk(b: u8) -> LinkPk {
        LinkPk::new([b; 32])
    }

    fn iface_with(name: &str, addr: Ipv4Addr, prefix_len: u8) -> Interface {
        Interface {
            name: name.to_string(),
            addrs: vec![crate::ports::InterfaceAddr {
                addr: IpAddr::V4(addr),
                prefix_len,
            }],
        }
    }

    #[tokio::test]
    async fn refresh_populates_peer_with_tunnel_when_interface_matches() {
        let subnet = Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 0), 31).unwrap();
        let registry = Arc::new(FakeRegistry {
            data: StdMutex::new(Ok(ProgramData {
                devices: vec![RegistryDevice {
                    pubkey: pk(2),
                    public_ip: Ipv4Addr::new(1, 1, 1, 1),
                }],
                links: vec![RegistryLink {
                    pubkey: link_pk(9),
                    side_a: pk(1),
                    side_z: pk(2),
                    status: LinkStatus::Activated,
                    tunnel_subnet: Some(subnet),
                }],
            })),
        });
        let local_net = Arc::new(FakeLocalNet {
            interfaces: vec![iface_with("tun0", Ipv4Addr::new(10, 0, 0, 0), 31)],
        });

        let discovery = PeerDiscovery::new(
            pk(1),
            registry,
            local_net,
            862,
            Duration::from_secs(60),
            Arc::new(Metrics::new_for_test()),
        );

        discovery.refresh().await;
        let peers = discovery.get_peers().await;

        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].device, pk(2));
        let tunnel = peers[0].tunnel.expect("tunnel should be found");
        assert_eq!(tunnel.source_ip, Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(tunnel.target_ip, Ipv4Addr::new(10, 0, 0, 1));
    }

    #[tokio::test]
    async fn refresh_emits_peer_with_nil_tunnel_when_no_interface_matches() {
        let subnet = Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 0), 31).unwrap();
        let registry = Arc::new(FakeRegistry {
            data: StdMutex::new(Ok(ProgramData {
                devices: vec![RegistryDevice {
                    pubkey: pk(2),
                    public_ip: Ipv4Addr::new(1, 1, 1, 1),
                }],
                links: vec![RegistryLink {
                    pubkey: link_pk(9),
                    side_a: pk(1),
                    side_z: pk(2),
                    status: LinkStatus::Activated,
                    tunnel_subnet: Some(subnet),
                }],
            })),
        });
        let local_net = Arc::new(FakeLocalNet { interfaces: vec![] });
        let metrics = Arc::new(Metrics::new_for_test());

        let discovery = PeerDiscovery::new(
            pk(1),
            registry,
            local_net,
            862,
            Duration::from_secs(60),
            metrics.clone(),
        );

        discovery.refresh().await;
        let peers = discovery.get_peers().await;

        assert_eq!(peers.len(), 1);
        assert!(peers[0].tunnel.is_none());
        assert_eq!(metrics.tunnels_not_found.get(), 1);
    }

    #[tokio::test]
    async fn refresh_skips_pending_links() {
        let registry = Arc::new(FakeRegistry {
            data: StdMutex::new(Ok(ProgramData {
                devices: vec![RegistryDevice {
                    pubkey: pk(2),
                    public_ip: Ipv4Addr::new(1, 1, 1, 1),
                }],
                links: vec![RegistryLink {
                    pubkey: link_pk(9),
                    side_a: pk(1),
                    side_z: pk(2),
                    status: LinkStatus::Pending,
                    tunnel_subnet: Some(Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 0), 31).unwrap()),
                }],
            })),
        });
        let local_net = Arc::new(FakeLocalNet { interfaces: vec![] });

        let discovery = PeerDiscovery::new(
            pk(1),
            registry,
            local_net,
            862,
            Duration::from_secs(60),
            Arc::new(Metrics::new_for_test()),
        );

        discovery.refresh().await;
        assert!(discovery.get_peers().await.is_empty());
    }

    #[tokio::test]
    async fn refresh_keeps_previous_snapshot_on_registry_error() {
        let registry = Arc::new(FakeRegistry {
            data: StdMutex::new(Err("timeout".to_string())),
        });
        let local_net = Arc::new(FakeLocalNet { interfaces: vec![] });

        let discovery = PeerDiscovery::new(
            pk(1),
            registry.clone(),
            local_net,
            862,
            Duration::from_secs(60),
            Arc::new(Metrics::new_for_test()),
        );

        *discovery.peers.write().await = vec![Peer {
            device: pk(5),
            link: link_pk(5),
            tunnel: None,
            twamp_port: 862,
        }];

        discovery.refresh().await;

        let peers = discovery.get_peers().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].device, pk(5));
    }

    #[tokio::test]
    async fn refresh_skips_link_with_unresolved_remote_device() {
        let registry = Arc::new(FakeRegistry {
            data: StdMutex::new(Ok(ProgramData {
                devices: vec![],
                links: vec![RegistryLink {
                    pubkey: link_pk(9),
                    side_a: pk(1),
                    side_z: pk(2),
                    status: LinkStatus::Activated,
                    tunnel_subnet: Some(Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 0), 31).unwrap()),
                }],
            })),
        });
        let local_net = Arc::new(FakeLocalNet { interfaces: vec![] });

        let discovery = PeerDiscovery::new(
            pk(1),
            registry,
            local_net,
            862,
            Duration::from_secs(60),
            Arc::new(Metrics::new_for_test()),
        );

        discovery.refresh().await;
        assert!(discovery.get_peers().await.is_empty());
    }
}
