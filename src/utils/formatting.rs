use serde::{Deserialize, Serialize};

const IEC_UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
const SI_UNITS: &[&str] = &["B", "kB", "MB", "GB", "TB", "PB", "EB"];

/// Unit prefixes used when rendering byte counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteUnits {
    #[default]
    Binary,
    Decimal,
}

impl ByteUnits {
    pub fn format(self, bytes: u64) -> String {
        match self {
            ByteUnits::Binary => format_bytes(bytes),
            ByteUnits::Decimal => format_bytes_si(bytes),
        }
    }
}

/// Format bytes with binary prefixes (B, KiB, MiB, ...)
pub fn format_bytes(bytes: u64) -> String {
    humanize(bytes, 1024.0, IEC_UNITS)
}

/// Format bytes with decimal prefixes (B, kB, MB, ...)
pub fn format_bytes_si(bytes: u64) -> String {
    humanize(bytes, 1000.0, SI_UNITS)
}

// One decimal below 10 units, none above, rounded half up.
fn humanize(bytes: u64, base: f64, units: &[&str]) -> String {
    if bytes < 10 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;
    while size >= base && unit_index < units.len() - 1 {
        size /= base;
        unit_index += 1;
    }

    let rounded = (size * 10.0 + 0.5).floor() / 10.0;
    if rounded < 10.0 {
        format!("{:.1} {}", rounded, units[unit_index])
    } else {
        format!("{:.0} {}", rounded, units[unit_index])
    }
}

/// Format duration in human-readable format
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else if seconds < 86400 {
        let hours = seconds / 3600;
        let minutes = (seconds % 3600) / 60;
        format!("{}h {}m", hours, minutes)
    } else {
        let days = seconds / 86400;
        let hours = (seconds % 86400) / 3600;
        format!("{}d {}h", days, hours)
    }
}
