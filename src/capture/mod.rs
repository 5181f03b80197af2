pub mod interface;
pub mod pcap_engine;
pub mod proc_parser;

pub use interface::{InterfaceError, InterfaceIdentity};
pub use pcap_engine::{
    decode_frame, CaptureError, IpHeader, LinkFlow, LinkKind, NetworkFlow, PacketRecord,
    PacketSource, PcapEngine,
};
pub use proc_parser::{ProcNetParser, TcpConnection, TcpState};
