// Library exports for prefix-top
pub mod analysis;
pub mod capture;
pub mod config;
pub mod traffic;
pub mod ui;
pub mod utils;

pub use analysis::{connections, statistics};
pub use capture::{interface, pcap_engine, proc_parser};
pub use config::settings;
pub use traffic::{attributor, direction, prefix};
pub use ui::{app, report};
pub use utils::formatting;

