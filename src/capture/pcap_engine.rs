use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use log::{debug, info, trace, warn};
use pcap::{Active, Capture, Linktype};
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::vlan::VlanPacket;
use pnet::packet::Packet;
use pnet::util::MacAddr;

use thiserror::Error;

use crate::config::CaptureConfig;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Insufficient privileges to capture on '{0}'. Try: sudo setcap cap_net_raw,cap_net_admin=eip ./prefix-top")]
    InsufficientPrivileges(String),

    #[error("Packet capture failed: {0}")]
    CaptureError(String),

    #[error("Device error: {0}")]
    DeviceError(String),

    #[error("Capture on '{0}' closed")]
    Closed(String),
}

/// Link-layer endpoints of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkFlow {
    pub src: MacAddr,
    pub dst: MacAddr,
}

/// Network-layer endpoints of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkFlow {
    pub src: IpAddr,
    pub dst: IpAddr,
}

/// The IP header fields the attributor reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpHeader {
    V4 {
        src: Ipv4Addr,
        dst: Ipv4Addr,
        total_length: u16,
    },
    V6 {
        src: Ipv6Addr,
        dst: Ipv6Addr,
        payload_length: u16,
    },
}

impl IpHeader {
    pub fn flow(&self) -> NetworkFlow {
        match *self {
            IpHeader::V4 { src, dst, .. } => NetworkFlow {
                src: IpAddr::V4(src),
                dst: IpAddr::V4(dst),
            },
            IpHeader::V6 { src, dst, .. } => NetworkFlow {
                src: IpAddr::V6(src),
                dst: IpAddr::V6(dst),
            },
        }
    }

    /// IPv4 total length or IPv6 payload length, as carried in the header.
    pub fn length_field(&self) -> u16 {
        match *self {
            IpHeader::V4 { total_length, .. } => total_length,
            IpHeader::V6 { payload_length, .. } => payload_length,
        }
    }
}

/// One decoded frame. Either layer may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketRecord {
    pub link: Option<LinkFlow>,
    pub ip: Option<IpHeader>,
}

impl PacketRecord {
    pub fn network_flow(&self) -> Option<NetworkFlow> {
        self.ip.as_ref().map(IpHeader::flow)
    }
}

/// Anything that yields decoded packet records.
///
/// `Ok(None)` means nothing arrived before the read timeout. An `Err` ends the stream.
pub trait PacketSource {
    fn next_record(&mut self) -> Result<Option<PacketRecord>, CaptureError>;

    /// Called once when the capture loop stops.
    fn log_statistics(&mut self) {}
}

/// Datalink framings the decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Ethernet,
    LinuxSll,
    LinuxSll2,
    Null,
    RawIp,
    Unsupported(i32),
}

impl LinkKind {
    pub fn from_linktype(linktype: Linktype) -> Self {
        match linktype.0 {
            1 => LinkKind::Ethernet,
            113 => LinkKind::LinuxSll,
            276 => LinkKind::LinuxSll2,
            0 | 108 => LinkKind::Null,
            12 | 14 | 101 | 228 | 229 => LinkKind::RawIp,
            other => LinkKind::Unsupported(other),
        }
    }
}

const SLL_HEADER_LEN: usize = 16;
const SLL2_HEADER_LEN: usize = 20;
const NULL_HEADER_LEN: usize = 4;

/// Decode the link and IP layers of a captured frame.
pub fn decode_frame(kind: LinkKind, data: &[u8]) -> PacketRecord {
    match kind {
        LinkKind::Ethernet => decode_ethernet(data),
        LinkKind::LinuxSll if data.len() >= SLL_HEADER_LEN => PacketRecord {
            link: None,
            ip: decode_ethertype(
                EtherType::new(u16::from_be_bytes([data[14], data[15]])),
                &data[SLL_HEADER_LEN..],
            ),
        },
        LinkKind::LinuxSll2 if data.len() >= SLL2_HEADER_LEN => PacketRecord {
            link: None,
            ip: decode_ethertype(
                EtherType::new(u16::from_be_bytes([data[0], data[1]])),
                &data[SLL2_HEADER_LEN..],
            ),
        },
        LinkKind::Null if data.len() >= NULL_HEADER_LEN => PacketRecord {
            link: None,
            ip: decode_ip(&data[NULL_HEADER_LEN..]),
        },
        LinkKind::RawIp => PacketRecord {
            link: None,
            ip: decode_ip(data),
        },
        _ => PacketRecord::default(),
    }
}

fn decode_ethernet(data: &[u8]) -> PacketRecord {
    let Some(ethernet) = EthernetPacket::new(data) else {
        return PacketRecord::default();
    };
    let link = Some(LinkFlow {
        src: ethernet.get_source(),
        dst: ethernet.get_destination(),
    });

    let ip = match ethernet.get_ethertype() {
        EtherTypes::Vlan => VlanPacket::new(ethernet.payload())
            .and_then(|vlan| decode_ethertype(vlan.get_ethertype(), vlan.payload())),
        ethertype => decode_ethertype(ethertype, ethernet.payload()),
    };

    PacketRecord { link, ip }
}

fn decode_ethertype(ethertype: EtherType, payload: &[u8]) -> Option<IpHeader> {
    match ethertype {
        EtherTypes::Ipv4 => decode_ipv4(payload),
        EtherTypes::Ipv6 => decode_ipv6(payload),
        _ => None,
    }
}

/// Dispatch on the IP version nibble, for framings without an ethertype.
fn decode_ip(payload: &[u8]) -> Option<IpHeader> {
    match payload.first()? >> 4 {
        4 => decode_ipv4(payload),
        6 => decode_ipv6(payload),
        _ => None,
    }
}

fn decode_ipv4(payload: &[u8]) -> Option<IpHeader> {
    let ipv4 = Ipv4Packet::new(payload)?;
    Some(IpHeader::V4 {
        src: ipv4.get_source(),
        dst: ipv4.get_destination(),
        total_length: ipv4.get_total_length(),
    })
}

fn decode_ipv6(payload: &[u8]) -> Option<IpHeader> {
    let ipv6 = Ipv6Packet::new(payload)?;
    Some(IpHeader::V6 {
        src: ipv6.get_source(),
        dst: ipv6.get_destination(),
        payload_length: ipv6.get_payload_length(),
    })
}

#[derive(Debug, Clone, Default)]
struct CaptureStats {
    packets_captured: u64,
    packets_without_ip: u64,
}

/// Live libpcap capture on one interface.
pub struct PcapEngine {
    capture: Capture<Active>,
    interface: String,
    linktype: Linktype,
    link_kind: LinkKind,
    stats: CaptureStats,
}

impl PcapEngine {
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let interface = config.interface.clone();
        debug!(
            "Opening capture on {} (snaplen {}, timeout {} ms)",
            interface, config.snaplen, config.timeout_ms
        );

        let capture = Capture::from_device(interface.as_str())
            .map_err(|e| CaptureError::DeviceError(format!("{}: {}", interface, e)))?
            .snaplen(config.snaplen)
            .promisc(config.promiscuous)
            .timeout(config.timeout_ms)
            .open()
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("ermission") || message.contains("not permitted") {
                    CaptureError::InsufficientPrivileges(interface.clone())
                } else {
                    CaptureError::DeviceError(format!("{}: {}", interface, message))
                }
            })?;

        let linktype = capture.get_datalink();
        let link_kind = LinkKind::from_linktype(linktype);

        Ok(PcapEngine {
            capture,
            interface,
            linktype,
            link_kind,
            stats: CaptureStats::default(),
        })
    }

    /// Libpcap's name for the datalink type, e.g. `EN10MB`.
    pub fn link_name(&self) -> String {
        self.linktype
            .get_name()
            .unwrap_or_else(|_| format!("DLT_{}", self.linktype.0))
    }

    pub fn linktype_code(&self) -> i32 {
        self.linktype.0
    }

    /// Kernel-side counters: (received, dropped, dropped by interface).
    pub fn kernel_statistics(&mut self) -> Result<(u32, u32, u32), CaptureError> {
        self.capture
            .stats()
            .map(|s| (s.received, s.dropped, s.if_dropped))
            .map_err(|e| CaptureError::CaptureError(e.to_string()))
    }
}

impl PacketSource for PcapEngine {
    fn next_record(&mut self) -> Result<Option<PacketRecord>, CaptureError> {
        let record = match self.capture.next_packet() {
            Ok(packet) => decode_frame(self.link_kind, packet.data),
            Err(pcap::Error::TimeoutExpired) => return Ok(None),
            Err(pcap::Error::NoMorePackets) => {
                return Err(CaptureError::Closed(self.interface.clone()))
            }
            Err(e) => {
                return Err(CaptureError::CaptureError(format!(
                    "Packet capture error: {}",
                    e
                )))
            }
        };

        self.stats.packets_captured += 1;
        if record.ip.is_none() {
            self.stats.packets_without_ip += 1;
            trace!("frame without an IP layer on {}", self.interface);
        }
        Ok(Some(record))
    }

    fn log_statistics(&mut self) {
        info!(
            "{}: {} frames read, {} without an IP layer",
            self.interface, self.stats.packets_captured, self.stats.packets_without_ip
        );
        match self.kernel_statistics() {
            Ok((received, dropped, if_dropped)) => info!(
                "{}: kernel received {}, dropped {} ({} by interface)",
                self.interface, received, dropped, if_dropped
            ),
            Err(e) => warn!("{}: no kernel statistics: {}", self.interface, e),
        }
    }
}
