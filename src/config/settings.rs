use std::fs;

use ipnetwork::IpNetworkError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::traffic::attributor::DEFAULT_OVERHEAD_BYTES;
use crate::traffic::direction::TrackedDirection;
use crate::traffic::prefix::{PrefixPolicy, DEFAULT_IPV4_PREFIX, DEFAULT_IPV6_PREFIX};
use crate::utils::formatting::ByteUnits;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid aggregation prefix: {0}")]
    InvalidPrefix(#[from] IpNetworkError),

    #[error("Invalid setting {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub aggregation: AggregationConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub interface: String,
    pub snaplen: i32,
    pub timeout_ms: i32,
    pub promiscuous: bool,
    pub direction: TrackedDirection,
    pub overhead_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub ipv4_prefix: u8,
    pub ipv6_prefix: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportConfig {
    pub interval_secs: u64,
    pub top_n: usize,
    pub connections: bool,
    pub format: ReportFormat,
    pub units: ByteUnits,
    pub bold: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: "eth0".to_string(),
            snaplen: 72,
            timeout_ms: 1000,
            promiscuous: false,
            direction: TrackedDirection::Outbound,
            overhead_bytes: DEFAULT_OVERHEAD_BYTES,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            ipv4_prefix: DEFAULT_IPV4_PREFIX,
            ipv6_prefix: DEFAULT_IPV6_PREFIX,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            top_n: 10,
            connections: true,
            format: ReportFormat::Text,
            units: ByteUnits::Binary,
            bold: true,
        }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub interface: Option<String>,
    pub no_netstat: bool,
    pub inbound: bool,
    pub json: bool,
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Flags only ever switch features on; an absent flag leaves the file value alone.
    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(interface) = &cli.interface {
            self.capture.interface = interface.clone();
        }
        if cli.no_netstat {
            self.report.connections = false;
        }
        if cli.inbound {
            self.capture.direction = TrackedDirection::Inbound;
        }
        if cli.json {
            self.report.format = ReportFormat::Json;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.interface.trim().is_empty() {
            return Err(invalid("capture.interface", "must not be empty"));
        }
        if self.capture.snaplen <= 0 {
            return Err(invalid("capture.snaplen", "must be positive"));
        }
        if self.capture.timeout_ms <= 0 {
            return Err(invalid("capture.timeout_ms", "must be at least 1"));
        }
        if self.report.interval_secs == 0 {
            return Err(invalid("report.interval_secs", "must be at least 1"));
        }
        if self.report.top_n == 0 {
            return Err(invalid("report.top_n", "must be at least 1"));
        }
        self.prefix_policy()?;
        Ok(())
    }

    pub fn prefix_policy(&self) -> Result<PrefixPolicy, ConfigError> {
        Ok(PrefixPolicy::new(
            self.aggregation.ipv4_prefix,
            self.aggregation.ipv6_prefix,
        )?)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}
