use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::analysis::connections::{AddressFamily, ConnectionTable};

const PROC_NET_TCP: &str = "/proc/net/tcp";
const PROC_NET_TCP6: &str = "/proc/net/tcp6";

#[derive(Debug, Clone)]
pub struct TcpConnection {
    pub remote_addr: SocketAddr,
    pub state: TcpState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpState {
    Established,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
    Unknown(u8),
}

pub struct ProcNetParser;

impl ProcNetParser {
    /// Parse /proc/net/tcp
    pub fn get_tcp_connections() -> Result<Vec<TcpConnection>, io::Error> {
        Ok(Self::parse_table(&fs::read_to_string(PROC_NET_TCP)?))
    }

    /// Parse /proc/net/tcp6
    pub fn get_tcp6_connections() -> Result<Vec<TcpConnection>, io::Error> {
        Ok(Self::parse_table(&fs::read_to_string(PROC_NET_TCP6)?))
    }

    /// Parse the full contents of a tcp or tcp6 table, skipping the header line.
    pub fn parse_table(content: &str) -> Vec<TcpConnection> {
        content
            .lines()
            .skip(1)
            .filter_map(Self::parse_tcp_line)
            .collect()
    }

    /// Parse a single line from /proc/net/tcp or /proc/net/tcp6
    fn parse_tcp_line(line: &str) -> Option<TcpConnection> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            return None;
        }

        let remote_addr = Self::parse_address(fields[2])?;
        let state_num = u8::from_str_radix(fields[3], 16).ok()?;

        Some(TcpConnection {
            remote_addr,
            state: Self::parse_tcp_state(state_num),
        })
    }

    /// Parse address from hex format (XXXXXXXX:XXXX, or 32 hex digits for IPv6).
    ///
    /// The kernel prints each 32-bit word of the address in host byte order.
    pub fn parse_address(addr_str: &str) -> Option<SocketAddr> {
        let (ip_hex, port_hex) = addr_str.split_once(':')?;
        let port = u16::from_str_radix(port_hex, 16).ok()?;

        let ip = match ip_hex.len() {
            8 => IpAddr::V4(Ipv4Addr::from(Self::parse_word(ip_hex)?)),
            32 => {
                let mut octets = [0u8; 16];
                for (i, chunk) in octets.chunks_exact_mut(4).enumerate() {
                    chunk.copy_from_slice(&Self::parse_word(&ip_hex[i * 8..i * 8 + 8])?);
                }
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            _ => return None,
        };

        Some(SocketAddr::new(ip, port))
    }

    fn parse_word(hex: &str) -> Option<[u8; 4]> {
        u32::from_str_radix(hex, 16).ok().map(u32::to_ne_bytes)
    }

    /// Convert numeric TCP state to enum
    pub fn parse_tcp_state(state: u8) -> TcpState {
        match state {
            0x01 => TcpState::Established,
            0x02 => TcpState::SynSent,
            0x03 => TcpState::SynRecv,
            0x04 => TcpState::FinWait1,
            0x05 => TcpState::FinWait2,
            0x06 => TcpState::TimeWait,
            0x07 => TcpState::Close,
            0x08 => TcpState::CloseWait,
            0x09 => TcpState::LastAck,
            0x0A => TcpState::Listen,
            0x0B => TcpState::Closing,
            _ => TcpState::Unknown(state),
        }
    }

    fn established_peers(connections: Vec<TcpConnection>) -> Vec<IpAddr> {
        connections
            .into_iter()
            .filter(|conn| conn.state == TcpState::Established)
            .map(|conn| conn.remote_addr.ip())
            .collect()
    }
}

impl ConnectionTable for ProcNetParser {
    fn established(&self, family: AddressFamily) -> io::Result<Vec<IpAddr>> {
        let connections = match family {
            AddressFamily::Ipv4 => Self::get_tcp_connections()?,
            AddressFamily::Ipv6 => Self::get_tcp6_connections()?,
        };
        Ok(Self::established_peers(connections))
    }
}
