use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{IpNetworkError, Ipv4Network, Ipv6Network};
use serde::{Serialize, Serializer};

pub const DEFAULT_IPV4_PREFIX: u8 = 24;
pub const DEFAULT_IPV6_PREFIX: u8 = 48;

/// A remote network with its host bits zeroed, e.g. `8.8.8.0/24`.
///
/// Ordering is by address family, then network address, then prefix length.
/// The ranking in [`crate::statistics::TrafficStats`] uses it to break ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrefixKey {
    network: IpAddr,
    prefix_len: u8,
}

impl PrefixKey {
    /// Derive the key for `addr` with the default /24 and /48 masks.
    pub fn derive(addr: IpAddr) -> Self {
        PrefixPolicy::default().derive(addr)
    }

    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }
}

impl fmt::Display for PrefixKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl Serialize for PrefixKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Masks applied when turning an endpoint address into a [`PrefixKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixPolicy {
    ipv4_len: u8,
    ipv4_mask: u32,
    ipv6_len: u8,
    ipv6_mask: u128,
}

impl PrefixPolicy {
    pub fn new(ipv4_prefix: u8, ipv6_prefix: u8) -> Result<Self, IpNetworkError> {
        let v4 = Ipv4Network::new(Ipv4Addr::UNSPECIFIED, ipv4_prefix)?;
        let v6 = Ipv6Network::new(Ipv6Addr::UNSPECIFIED, ipv6_prefix)?;

        Ok(Self {
            ipv4_len: v4.prefix(),
            ipv4_mask: u32::from(v4.mask()),
            ipv6_len: v6.prefix(),
            ipv6_mask: u128::from(v6.mask()),
        })
    }

    pub fn ipv4_prefix(&self) -> u8 {
        self.ipv4_len
    }

    pub fn ipv6_prefix(&self) -> u8 {
        self.ipv6_len
    }

    /// Zero the host bits of `addr`. IPv4-mapped IPv6 addresses are masked as IPv4.
    pub fn derive(&self, addr: IpAddr) -> PrefixKey {
        match canonical(addr) {
            IpAddr::V4(v4) => PrefixKey {
                network: IpAddr::V4(Ipv4Addr::from(u32::from(v4) & self.ipv4_mask)),
                prefix_len: self.ipv4_len,
            },
            IpAddr::V6(v6) => PrefixKey {
                network: IpAddr::V6(Ipv6Addr::from(u128::from(v6) & self.ipv6_mask)),
                prefix_len: self.ipv6_len,
            },
        }
    }
}

impl Default for PrefixPolicy {
    fn default() -> Self {
        Self {
            ipv4_len: DEFAULT_IPV4_PREFIX,
            ipv4_mask: u32::MAX << (32 - DEFAULT_IPV4_PREFIX),
            ipv6_len: DEFAULT_IPV6_PREFIX,
            ipv6_mask: u128::MAX << (128 - DEFAULT_IPV6_PREFIX),
        }
    }
}

fn canonical(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}
