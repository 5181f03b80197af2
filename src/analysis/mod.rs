pub mod connections;
pub mod statistics;

pub use connections::{AddressFamily, ConnectionEnricher, ConnectionSnapshot, ConnectionTable};
pub use statistics::{Drain, RankedPrefix, TrafficStats};
