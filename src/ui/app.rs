use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context};
use log::{info, warn};

use crate::analysis::connections::{ConnectionEnricher, ConnectionTable};
use crate::analysis::statistics::TrafficStats;
use crate::capture::interface::InterfaceIdentity;
use crate::capture::pcap_engine::PacketSource;
use crate::capture::proc_parser::ProcNetParser;
use crate::config::{Config, ConfigError};
use crate::traffic::attributor::TrafficAttributor;
use crate::traffic::prefix::PrefixPolicy;
use crate::ui::report::Reporter;
use crate::utils::formatting::format_duration;

/// Everything the capture and reporting loops share, built once at startup.
pub struct App {
    config: Config,
    policy: PrefixPolicy,
    identity: Arc<InterfaceIdentity>,
    stats: Arc<TrafficStats>,
    running: Arc<AtomicBool>,
}

impl App {
    pub fn new(config: Config, identity: InterfaceIdentity) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = config.prefix_policy()?;
        let stats = Arc::new(TrafficStats::with_top_n(config.report.top_n));

        Ok(App {
            config,
            policy,
            identity: Arc::new(identity),
            stats,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &Arc<TrafficStats> {
        &self.stats
    }

    pub fn attributor(&self) -> TrafficAttributor {
        TrafficAttributor::new(
            Arc::clone(&self.identity),
            Arc::clone(&self.stats),
            self.config.capture.direction,
        )
        .with_policy(self.policy)
        .with_overhead(self.config.capture.overhead_bytes)
    }

    /// Reporter backed by `table`, or without annotations when connections are disabled.
    pub fn reporter_with(&self, table: Box<dyn ConnectionTable>) -> Reporter {
        let enricher = self
            .config
            .report
            .connections
            .then(|| Arc::new(ConnectionEnricher::new(table, self.policy)));
        Reporter::new(Arc::clone(&self.stats), enricher, &self.config.report)
    }

    pub fn reporter(&self) -> Reporter {
        self.reporter_with(Box::new(ProcNetParser))
    }

    /// Run both loops until the capture source ends, stdout fails, or Ctrl-C.
    pub async fn run<S>(self, mut source: S) -> anyhow::Result<()>
    where
        S: PacketSource + Send + 'static,
    {
        let started = Instant::now();
        let attributor = self.attributor();
        let running = Arc::clone(&self.running);
        let capture = tokio::task::spawn_blocking(move || attributor.run(&mut source, &running));
        let reporter = tokio::spawn(self.reporter().run());

        let outcome = tokio::select! {
            joined = capture => match joined {
                Ok(Ok(summary)) => {
                    info!(
                        "Capture ended after {}: {} packets, {} attributed",
                        format_duration(started.elapsed().as_secs()),
                        summary.records,
                        summary.attributed
                    );
                    Ok(())
                }
                Ok(Err(e)) => Err(anyhow::Error::new(e).context("capture loop failed")),
                Err(e) => Err(anyhow!("capture task panicked: {}", e)),
            },
            joined = reporter => match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(anyhow::Error::new(e).context("cannot write report")),
                Err(e) => Err(anyhow!("reporting task panicked: {}", e)),
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("cannot listen for Ctrl-C")?;
                info!("Interrupted, stopping");
                Ok(())
            }
        };

        self.running.store(false, Ordering::Relaxed);
        if outcome.is_err() {
            warn!("Stopping after failure");
        }
        outcome
    }
}
