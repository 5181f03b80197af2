use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use crossterm::style::Stylize;
use log::{debug, warn};
use serde::Serialize;
use tokio::time::{self, MissedTickBehavior};

use crate::analysis::connections::{ConnectionEnricher, ConnectionSnapshot};
use crate::analysis::statistics::{Drain, TrafficStats};
use crate::config::{ReportConfig, ReportFormat};
use crate::traffic::prefix::PrefixKey;
use crate::utils::formatting::ByteUnits;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub prefix: PrefixKey,
    pub total: u64,
    pub delta: u64,
    /// Bytes per second over the last interval.
    pub rate: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub elapsed_secs: u64,
    pub entries: Vec<ReportEntry>,
}

/// Join a drain with an optional connection snapshot.
///
/// Elapsed time is floored to whole seconds, and never below one.
pub fn build_report(drain: &Drain, connections: Option<&ConnectionSnapshot>) -> Report {
    let elapsed_secs = drain.elapsed.as_secs();
    let divisor = elapsed_secs.max(1);

    let entries = drain
        .ranked
        .iter()
        .map(|ranked| ReportEntry {
            prefix: ranked.key,
            total: ranked.total,
            delta: ranked.delta,
            rate: ranked.delta / divisor,
            active: connections.and_then(|snapshot| snapshot.count(&ranked.key)),
        })
        .collect();

    Report {
        elapsed_secs,
        entries,
    }
}

/// `<prefix>[ (active, <n>)]: <total> (<rate>/s)` per entry, then a blank line.
pub fn render_text(report: &Report, units: ByteUnits, bold: bool) -> String {
    let mut out = String::new();
    for entry in &report.entries {
        let annotation = match entry.active {
            Some(count) => {
                let text = format!(" (active, {})", count);
                if bold {
                    text.bold().to_string()
                } else {
                    text
                }
            }
            None => String::new(),
        };
        out.push_str(&format!(
            "{}{}: {} ({}/s)\n",
            entry.prefix,
            annotation,
            units.format(entry.total),
            units.format(entry.rate)
        ));
    }
    out.push('\n');
    out
}

pub fn render_json(report: &Report) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(report)?;
    line.push('\n');
    Ok(line)
}

/// Periodically drains the stats and prints the top prefixes.
pub struct Reporter {
    stats: Arc<TrafficStats>,
    enricher: Option<Arc<ConnectionEnricher>>,
    interval: Duration,
    format: ReportFormat,
    units: ByteUnits,
    bold: bool,
}

impl Reporter {
    pub fn new(
        stats: Arc<TrafficStats>,
        enricher: Option<Arc<ConnectionEnricher>>,
        config: &ReportConfig,
    ) -> Self {
        Self {
            stats,
            enricher,
            interval: Duration::from_secs(config.interval_secs),
            format: config.format,
            units: config.units,
            bold: config.bold,
        }
    }

    /// One synchronous report cycle: drain, then enrich if enabled.
    pub fn cycle(&self) -> Report {
        let drain = self.stats.drain();
        let snapshot = self.enricher.as_ref().map(|enricher| enricher.snapshot());
        build_report(&drain, snapshot.as_ref())
    }

    pub fn render(&self, report: &Report) -> io::Result<String> {
        match self.format {
            ReportFormat::Text => Ok(render_text(report, self.units, self.bold)),
            ReportFormat::Json => Ok(render_json(report)?),
        }
    }

    /// Runs until stdout can no longer be written or a report fails to encode.
    pub async fn run(self) -> io::Result<()> {
        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let drain = self.stats.drain();
            let snapshot = match &self.enricher {
                Some(enricher) => {
                    let enricher = Arc::clone(enricher);
                    match tokio::task::spawn_blocking(move || enricher.snapshot()).await {
                        Ok(snapshot) => Some(snapshot),
                        Err(e) => {
                            warn!("Connection lookup task failed: {}", e);
                            Some(ConnectionSnapshot::default())
                        }
                    }
                }
                None => None,
            };

            let report = build_report(&drain, snapshot.as_ref());
            debug!(
                "Report cycle: {} entries over {}s",
                report.entries.len(),
                report.elapsed_secs
            );

            let rendered = self.render(&report)?;
            let mut stdout = io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            stdout.flush()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::connections::{AddressFamily, ConnectionTable};
    use crate::analysis::statistics::RankedPrefix;
    use crate::traffic::prefix::PrefixPolicy;
    use std::net::IpAddr;

    struct OnePeer;

    impl ConnectionTable for OnePeer {
        fn established(&self, family: AddressFamily) -> io::Result<Vec<IpAddr>> {
            Ok(match family {
                AddressFamily::Ipv4 => vec!["8.8.8.50".parse().unwrap()],
                AddressFamily::Ipv6 => vec![],
            })
        }
    }

    fn key(s: &str) -> PrefixKey {
        PrefixKey::derive(s.parse().unwrap())
    }

    fn drain(elapsed_secs: u64) -> Drain {
        Drain {
            ranked: vec![
                RankedPrefix {
                    key: key("8.8.8.0"),
                    total: 20480,
                    delta: 10240,
                },
                RankedPrefix {
                    key: key("1.1.1.0"),
                    total: 140,
                    delta: 0,
                },
            ],
            elapsed: Duration::from_millis(elapsed_secs * 1000 + 700),
        }
    }

    #[test]
    fn test_rate_uses_whole_seconds() {
        let report = build_report(&drain(5), None);
        assert_eq!(report.elapsed_secs, 5);
        assert_eq!(report.entries[0].rate, 2048);
        assert_eq!(report.entries[1].rate, 0);
    }

    #[test]
    fn test_sub_second_interval_does_not_divide_by_zero() {
        let report = build_report(&drain(0), None);
        assert_eq!(report.entries[0].rate, 10240);
    }

    #[test]
    fn test_text_lines() {
        let report = build_report(&drain(5), None);
        let text = render_text(&report, ByteUnits::Binary, true);
        assert_eq!(
            text,
            "8.8.8.0/24: 20 KiB (2.0 KiB/s)\n1.1.1.0/24: 140 B (0 B/s)\n\n"
        );
    }

    #[test]
    fn test_empty_report_is_blank_line() {
        let report = Report {
            elapsed_secs: 5,
            entries: vec![],
        };
        assert_eq!(render_text(&report, ByteUnits::Binary, false), "\n");
    }

    #[test]
    fn test_active_annotation() {
        let enricher = ConnectionEnricher::new(Box::new(OnePeer), PrefixPolicy::default());
        let snapshot = enricher.snapshot();
        let report = build_report(&drain(5), Some(&snapshot));
        assert_eq!(report.entries[0].active, Some(1));
        assert_eq!(report.entries[1].active, None);

        let plain = render_text(&report, ByteUnits::Binary, false);
        assert!(plain.starts_with("8.8.8.0/24 (active, 1): 20 KiB"));

        let styled = render_text(&report, ByteUnits::Binary, true);
        assert!(styled.contains("(active, 1)"));
        assert!(styled.contains('\u{1b}'));
    }

    #[test]
    fn test_json_line() {
        let enricher = ConnectionEnricher::new(Box::new(OnePeer), PrefixPolicy::default());
        let report = build_report(&drain(5), Some(&enricher.snapshot()));
        let line = render_json(&report).unwrap();
        assert!(line.ends_with('\n'));

        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["elapsed_secs"], 5);
        assert_eq!(value["entries"][0]["prefix"], "8.8.8.0/24");
        assert_eq!(value["entries"][0]["active"], 1);
        assert!(value["entries"][1].get("active").is_none());
    }

    #[test]
    fn test_cycle_without_enricher() {
        let stats = Arc::new(TrafficStats::new());
        stats.record_delta(key("8.8.8.0"), 140);
        let reporter = Reporter::new(Arc::clone(&stats), None, &ReportConfig::default());

        let report = reporter.cycle();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].total, 140);
        assert_eq!(report.entries[0].active, None);
        assert!(!reporter.render(&report).unwrap().contains("active"));
    }

    #[test]
    fn test_json_reporter_renders_line() {
        let stats = Arc::new(TrafficStats::new());
        stats.record_delta(key("8.8.8.0"), 140);
        let config = ReportConfig {
            format: ReportFormat::Json,
            ..ReportConfig::default()
        };
        let reporter = Reporter::new(stats, None, &config);

        let line = reporter.render(&reporter.cycle()).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["entries"][0]["total"], 140);
    }

    #[test]
    fn test_cycle_with_enricher() {
        let stats = Arc::new(TrafficStats::new());
        stats.record_delta(key("8.8.8.0"), 140);
        let enricher = ConnectionEnricher::new(Box::new(OnePeer), PrefixPolicy::default());
        let reporter = Reporter::new(stats, Some(Arc::new(enricher)), &ReportConfig::default());

        let report = reporter.cycle();
        assert_eq!(report.entries[0].active, Some(1));
    }
}
