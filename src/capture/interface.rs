use std::net::IpAddr;

use pnet::datalink::{self, NetworkInterface};
use pnet::util::MacAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Network interface '{0}' not found. Available interfaces: {1:?}")]
    InterfaceNotFound(String, Vec<String>),
}

/// The monitored interface's own addresses, captured once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceIdentity {
    mac: Option<MacAddr>,
    ips: Vec<IpAddr>,
}

impl InterfaceIdentity {
    /// An all-zero MAC (loopback, tunnels) counts as no MAC.
    pub fn new(mac: Option<MacAddr>, ips: Vec<IpAddr>) -> Self {
        Self {
            mac: mac.filter(|mac| *mac != MacAddr::zero()),
            ips,
        }
    }

    pub fn lookup(name: &str) -> Result<Self, InterfaceError> {
        let interfaces = datalink::interfaces();
        match interfaces.iter().find(|iface| iface.name == name) {
            Some(iface) => Ok(Self::from_interface(iface)),
            None => Err(InterfaceError::InterfaceNotFound(
                name.to_string(),
                interfaces.into_iter().map(|iface| iface.name).collect(),
            )),
        }
    }

    pub fn from_interface(iface: &NetworkInterface) -> Self {
        Self::new(iface.mac, iface.ips.iter().map(|net| net.ip()).collect())
    }

    pub fn mac(&self) -> Option<MacAddr> {
        self.mac
    }

    pub fn ips(&self) -> &[IpAddr] {
        &self.ips
    }

    pub fn is_local(&self, ip: IpAddr) -> bool {
        self.ips.contains(&ip)
    }
}
