use std::collections::HashMap;
use std::io;
use std::net::IpAddr;

use log::warn;

use crate::traffic::prefix::{PrefixKey, PrefixPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "tcp"),
            AddressFamily::Ipv6 => write!(f, "tcp6"),
        }
    }
}

/// Source of established TCP peers, one address family at a time.
pub trait ConnectionTable: Send + Sync {
    fn established(&self, family: AddressFamily) -> io::Result<Vec<IpAddr>>;
}

/// Established-peer counts per prefix for one report cycle.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSnapshot {
    counts: HashMap<PrefixKey, usize>,
    warnings: Vec<String>,
}

impl ConnectionSnapshot {
    /// Established peers in `key`, or `None` when there are none.
    pub fn count(&self, key: &PrefixKey) -> Option<usize> {
        self.counts.get(key).copied().filter(|count| *count > 0)
    }

    pub fn counts(&self) -> &HashMap<PrefixKey, usize> {
        &self.counts
    }

    /// Failures encountered while querying the connection table.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

pub struct ConnectionEnricher {
    table: Box<dyn ConnectionTable>,
    policy: PrefixPolicy,
}

impl ConnectionEnricher {
    pub fn new(table: Box<dyn ConnectionTable>, policy: PrefixPolicy) -> Self {
        Self { table, policy }
    }

    /// Query both address families and tally peers per prefix.
    ///
    /// A failing family is logged and left out; the other one still counts.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        let mut snapshot = ConnectionSnapshot::default();

        for family in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
            match self.table.established(family) {
                Ok(peers) => {
                    for peer in peers.into_iter().filter(|ip| !ip.is_unspecified()) {
                        *snapshot.counts.entry(self.policy.derive(peer)).or_insert(0) += 1;
                    }
                }
                Err(e) => {
                    warn!("netstat error ({}): {}", family, e);
                    snapshot.warnings.push(format!("{}: {}", family, e));
                }
            }
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticTable {
        v4: Option<Vec<&'static str>>,
        v6: Option<Vec<&'static str>>,
    }

    impl ConnectionTable for StaticTable {
        fn established(&self, family: AddressFamily) -> io::Result<Vec<IpAddr>> {
            let peers = match family {
                AddressFamily::Ipv4 => &self.v4,
                AddressFamily::Ipv6 => &self.v6,
            };
            match peers {
                Some(list) => Ok(list.iter().map(|s| s.parse().unwrap()).collect()),
                None => Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
            }
        }
    }

    fn key(s: &str) -> PrefixKey {
        PrefixKey::derive(s.parse().unwrap())
    }

    #[test]
    fn test_counts_per_prefix() {
        let enricher = ConnectionEnricher::new(
            Box::new(StaticTable {
                v4: Some(vec!["8.8.8.50", "8.8.8.51", "1.1.1.1"]),
                v6: Some(vec!["2001:db8:1::5", "::ffff:8.8.8.9"]),
            }),
            PrefixPolicy::default(),
        );

        let snapshot = enricher.snapshot();
        assert!(snapshot.is_complete());
        assert_eq!(snapshot.count(&key("8.8.8.0")), Some(3));
        assert_eq!(snapshot.count(&key("1.1.1.0")), Some(1));
        assert_eq!(snapshot.count(&key("2001:db8:1::")), Some(1));
        assert_eq!(snapshot.count(&key("9.9.9.9")), None);
    }

    #[test]
    fn test_partial_failure_keeps_other_family() {
        let enricher = ConnectionEnricher::new(
            Box::new(StaticTable {
                v4: None,
                v6: Some(vec!["2001:db8:1::5"]),
            }),
            PrefixPolicy::default(),
        );

        let snapshot = enricher.snapshot();
        assert!(!snapshot.is_complete());
        assert_eq!(snapshot.warnings().len(), 1);
        assert!(snapshot.warnings()[0].starts_with("tcp:"));
        assert_eq!(snapshot.count(&key("2001:db8:1::")), Some(1));
    }

    #[test]
    fn test_total_failure_is_empty() {
        let enricher = ConnectionEnricher::new(
            Box::new(StaticTable { v4: None, v6: None }),
            PrefixPolicy::default(),
        );

        let snapshot = enricher.snapshot();
        assert!(snapshot.counts().is_empty());
        assert_eq!(snapshot.warnings().len(), 2);
    }

    #[test]
    fn test_unspecified_peers_ignored() {
        let enricher = ConnectionEnricher::new(
            Box::new(StaticTable {
                v4: Some(vec!["0.0.0.0"]),
                v6: Some(vec!["::"]),
            }),
            PrefixPolicy::default(),
        );
        assert!(enricher.snapshot().counts().is_empty());
    }
}
