pub mod settings;

pub use settings::{
    AggregationConfig, CaptureConfig, CliOverrides, Config, ConfigError, ReportConfig, ReportFormat,
};
