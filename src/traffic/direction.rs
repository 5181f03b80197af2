use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::capture::interface::InterfaceIdentity;
use crate::capture::pcap_engine::{LinkFlow, NetworkFlow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowDirection {
    Inbound,
    Outbound,
    Unknown,
}

impl std::fmt::Display for FlowDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowDirection::Inbound => write!(f, "inbound"),
            FlowDirection::Outbound => write!(f, "outbound"),
            FlowDirection::Unknown => write!(f, "unknown"),
        }
    }
}

/// Decide whether a packet left or reached this host.
///
/// The link-layer source is compared to our MAC when both are known. Without
/// them (loopback, tunnels, cooked captures) the network source is compared to
/// our IPs. With neither signal the direction is `Unknown`.
pub fn classify(
    identity: &InterfaceIdentity,
    link: Option<&LinkFlow>,
    network: Option<&NetworkFlow>,
) -> FlowDirection {
    if let (Some(mac), Some(link)) = (identity.mac(), link) {
        return outbound_if(link.src == mac);
    }
    match network {
        Some(flow) if !identity.ips().is_empty() => outbound_if(identity.is_local(flow.src)),
        _ => FlowDirection::Unknown,
    }
}

fn outbound_if(is_ours: bool) -> FlowDirection {
    if is_ours {
        FlowDirection::Outbound
    } else {
        FlowDirection::Inbound
    }
}

/// Which side of the traffic gets aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackedDirection {
    #[default]
    Outbound,
    Inbound,
}

impl TrackedDirection {
    pub fn matches(&self, direction: FlowDirection) -> bool {
        matches!(
            (self, direction),
            (TrackedDirection::Outbound, FlowDirection::Outbound)
                | (TrackedDirection::Inbound, FlowDirection::Inbound)
        )
    }

    /// The far end of the flow: destination when outbound, source when inbound.
    pub fn remote(&self, flow: &NetworkFlow) -> IpAddr {
        match self {
            TrackedDirection::Outbound => flow.dst,
            TrackedDirection::Inbound => flow.src,
        }
    }
}
