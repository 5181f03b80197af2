pub mod formatting;

pub use formatting::{format_bytes, format_bytes_si, ByteUnits};
