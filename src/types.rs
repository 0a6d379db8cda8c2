//! Core data model: device/link identities, peers, tunnels, samples and
//! the partition key that samples are grouped by.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// A 32-byte public key identifying a device in the authoritative registry.
///
/// The all-zero value is reserved and never a valid identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct DevicePk([u8; 32]);

/// A 32-byte public key identifying a tunnel link in the authoritative registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct LinkPk([u8; 32]);

macro_rules! impl_pk {
    ($ty:ident) => {
        impl $ty {
            pub const fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub const fn is_zero(&self) -> bool {
                let mut i = 0;
                while i < self.0.len() {
                    if self.0[i] != 0 {
                        return false;
                    }
                    i += 1;
                }
                true
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($ty), self)
            }
        }
    };
}

impl_pk!(DevicePk);
impl_pk!(LinkPk);

/// Status of a link as reported by the authoritative registry.
///
/// Modeled as a tagged enum rather than a raw integer so that `PeerDiscovery`
/// can match on it exhaustively instead of string- or int-comparing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LinkStatus {
    Activated,
    Pending,
    SoftDrained,
    HardDrained,
    Provisioning,
}

impl LinkStatus {
    /// Whether a link in this status should be probed at all.
    ///
    /// `Pending` links have no tunnel provisioned yet and are skipped.
    pub fn is_probeable(&self) -> bool {
        matches!(
            self,
            LinkStatus::Activated
                | LinkStatus::SoftDrained
                | LinkStatus::HardDrained
                | LinkStatus::Provisioning
        )
    }
}

/// A locally-discovered point-to-point /31 tunnel to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tunnel {
    pub interface: TunnelInterface,
    pub source_ip: Ipv4Addr,
    pub target_ip: Ipv4Addr,
}

/// Interface name, kept as a small fixed-capacity string to avoid an
/// allocation per discovered tunnel; interface names are always short.
pub type TunnelInterface = String;

impl Tunnel {
    /// Derives the peer address of a /31 point-to-point link: the last
    /// octet's low bit is flipped.
    ///
    /// This XOR-based inference is a known workaround (see `spec.md` §9,
    /// Open Questions): the registry's link record does not say which side
    /// of the /31 is local, so the peer is always "the other address in the
    /// pair".
    pub fn peer_of(source_ip: Ipv4Addr) -> Ipv4Addr {
        let mut octets = source_ip.octets();
        octets[3] ^= 0b0000_0001;
        Ipv4Addr::from(octets)
    }
}

/// A peer device reachable over a tunnel link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub device: DevicePk,
    pub link: LinkPk,
    pub tunnel: Option<Tunnel>,
    pub twamp_port: u16,
}

impl Peer {
    /// Canonical string identity used to deduplicate senders and, in turn,
    /// partitions: two `Peer` values with the same canonical string share
    /// one `SenderPool` entry.
    pub fn canonical(&self) -> String {
        let addr = self
            .tunnel
            .as_ref()
            .map(|t| t.target_ip.to_string())
            .unwrap_or_default();

        format!("device={},addr={},link={}", self.device, addr, self.link)
    }
}

/// One probe measurement.
///
/// Invariant: `loss == true` implies `rtt == Duration::ZERO`. Constructed
/// only through [`Sample::success`] and [`Sample::loss`] so the invariant
/// can't be violated by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub rtt: Duration,
    pub loss: bool,
}

impl Sample {
    pub fn success(timestamp: DateTime<Utc>, rtt: Duration) -> Self {
        Self {
            timestamp,
            rtt,
            loss: false,
        }
    }

    pub fn loss(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            rtt: Duration::ZERO,
            loss: true,
        }
    }
}

/// An opaque, monotonically increasing counter supplied by
/// [`crate::clock::EpochSource`]. The collector never interprets its value
/// beyond comparing it for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(pub u64);

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The grouping key that samples are accumulated and written under:
/// `(origin, target, link, epoch)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    pub origin: DevicePk,
    pub target: DevicePk,
    pub link: LinkPk,
    pub epoch: Epoch,
}
