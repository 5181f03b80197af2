use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};

use crate::analysis::statistics::TrafficStats;
use crate::capture::interface::InterfaceIdentity;
use crate::capture::pcap_engine::{CaptureError, PacketRecord, PacketSource};
use crate::traffic::direction::{classify, TrackedDirection};
use crate::traffic::prefix::{PrefixKey, PrefixPolicy};

/// Link and framing bytes not covered by the IP length field.
pub const DEFAULT_OVERHEAD_BYTES: u64 = 40;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttributionSummary {
    pub records: u64,
    pub attributed: u64,
    pub bytes: u64,
}

/// Turns packet records into per-prefix byte counts.
pub struct TrafficAttributor {
    identity: Arc<InterfaceIdentity>,
    stats: Arc<TrafficStats>,
    tracked: TrackedDirection,
    policy: PrefixPolicy,
    overhead_bytes: u64,
}

impl TrafficAttributor {
    pub fn new(
        identity: Arc<InterfaceIdentity>,
        stats: Arc<TrafficStats>,
        tracked: TrackedDirection,
    ) -> Self {
        Self {
            identity,
            stats,
            tracked,
            policy: PrefixPolicy::default(),
            overhead_bytes: DEFAULT_OVERHEAD_BYTES,
        }
    }

    pub fn with_policy(mut self, policy: PrefixPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_overhead(mut self, overhead_bytes: u64) -> Self {
        self.overhead_bytes = overhead_bytes;
        self
    }

    /// The prefix and on-wire size a record counts towards, if any.
    ///
    /// Records without an IP layer, of the untracked direction, or of unknown
    /// direction yield `None`.
    pub fn attribute(&self, record: &PacketRecord) -> Option<(PrefixKey, u64)> {
        let ip = record.ip.as_ref()?;
        let flow = ip.flow();

        let direction = classify(&self.identity, record.link.as_ref(), Some(&flow));
        if !self.tracked.matches(direction) {
            return None;
        }

        let bytes = u64::from(ip.length_field()) + self.overhead_bytes;
        if bytes == 0 {
            return None;
        }

        Some((self.policy.derive(self.tracked.remote(&flow)), bytes))
    }

    pub fn process(&self, record: &PacketRecord) -> Option<(PrefixKey, u64)> {
        let attributed = self.attribute(record)?;
        self.stats.record_delta(attributed.0, attributed.1);
        Some(attributed)
    }

    /// Pull records until the source closes or `running` is cleared.
    ///
    /// A closed source ends the loop normally; any other capture error is returned.
    /// The source logs its statistics on every exit.
    pub fn run<S: PacketSource>(
        &self,
        source: &mut S,
        running: &AtomicBool,
    ) -> Result<AttributionSummary, CaptureError> {
        let result = self.pump(source, running);
        source.log_statistics();
        result
    }

    fn pump<S: PacketSource>(
        &self,
        source: &mut S,
        running: &AtomicBool,
    ) -> Result<AttributionSummary, CaptureError> {
        let mut summary = AttributionSummary::default();

        while running.load(Ordering::Relaxed) {
            let record = match source.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(CaptureError::Closed(interface)) => {
                    info!("Capture source on {} closed", interface);
                    break;
                }
                Err(e) => return Err(e),
            };

            summary.records += 1;
            if let Some((_, bytes)) = self.process(&record) {
                summary.attributed += 1;
                summary.bytes += bytes;
            }
        }

        debug!(
            "Capture loop done: {} records, {} attributed ({} bytes)",
            summary.records, summary.attributed, summary.bytes
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::pcap_engine::{IpHeader, LinkFlow};
    use pnet::util::MacAddr;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;

    struct QueueSource {
        queue: VecDeque<Result<Option<PacketRecord>, CaptureError>>,
        finished: usize,
    }

    impl QueueSource {
        fn new(records: Vec<Result<Option<PacketRecord>, CaptureError>>) -> Self {
            Self {
                queue: records.into(),
                finished: 0,
            }
        }
    }

    impl PacketSource for QueueSource {
        fn next_record(&mut self) -> Result<Option<PacketRecord>, CaptureError> {
            self.queue
                .pop_front()
                .unwrap_or_else(|| Err(CaptureError::Closed("test0".to_string())))
        }

        fn log_statistics(&mut self) {
            self.finished += 1;
        }
    }

    fn v4(src: [u8; 4], dst: [u8; 4], total_length: u16) -> PacketRecord {
        PacketRecord {
            link: None,
            ip: Some(IpHeader::V4 {
                src: Ipv4Addr::from(src),
                dst: Ipv4Addr::from(dst),
                total_length,
            }),
        }
    }

    fn attributor(tracked: TrackedDirection) -> (TrafficAttributor, Arc<TrafficStats>) {
        let identity = InterfaceIdentity::new(None, vec!["192.168.1.10".parse().unwrap()]);
        let stats = Arc::new(TrafficStats::new());
        (
            TrafficAttributor::new(Arc::new(identity), Arc::clone(&stats), tracked),
            stats,
        )
    }

    fn key(s: &str) -> PrefixKey {
        PrefixKey::derive(s.parse().unwrap())
    }

    #[test]
    fn test_outbound_packet_adds_overhead() {
        let (attributor, stats) = attributor(TrackedDirection::Outbound);
        let result = attributor.process(&v4([192, 168, 1, 10], [8, 8, 8, 8], 100));
        assert_eq!(result, Some((key("8.8.8.0"), 140)));
        assert_eq!(stats.pending_delta(&key("8.8.8.0")), 140);
    }

    #[test]
    fn test_inbound_packet_ignored_when_tracking_outbound() {
        let (attributor, stats) = attributor(TrackedDirection::Outbound);
        assert_eq!(attributor.process(&v4([8, 8, 8, 8], [192, 168, 1, 10], 100)), None);
        assert_eq!(stats.key_count(), 0);
    }

    #[test]
    fn test_inbound_uses_source_prefix() {
        let (attributor, stats) = attributor(TrackedDirection::Inbound);
        attributor.process(&v4([8, 8, 8, 8], [192, 168, 1, 10], 60));
        assert_eq!(stats.pending_delta(&key("8.8.8.0")), 100);
        assert_eq!(stats.pending_delta(&key("192.168.1.0")), 0);
    }

    #[test]
    fn test_non_ip_record_skipped() {
        let (attributor, _) = attributor(TrackedDirection::Outbound);
        let record = PacketRecord {
            link: Some(LinkFlow {
                src: MacAddr::new(2, 0, 0, 0, 0, 1),
                dst: MacAddr::broadcast(),
            }),
            ip: None,
        };
        assert_eq!(attributor.attribute(&record), None);
    }

    #[test]
    fn test_unknown_direction_skipped() {
        let stats = Arc::new(TrafficStats::new());
        let attributor = TrafficAttributor::new(
            Arc::new(InterfaceIdentity::default()),
            Arc::clone(&stats),
            TrackedDirection::Outbound,
        );
        assert_eq!(attributor.process(&v4([192, 168, 1, 10], [8, 8, 8, 8], 100)), None);
        let inbound = TrafficAttributor::new(
            Arc::new(InterfaceIdentity::default()),
            Arc::clone(&stats),
            TrackedDirection::Inbound,
        );
        assert_eq!(inbound.process(&v4([8, 8, 8, 8], [192, 168, 1, 10], 100)), None);
    }

    #[test]
    fn test_zero_length_skipped_without_overhead() {
        let (attributor, _) = attributor(TrackedDirection::Outbound);
        let attributor = attributor.with_overhead(0);
        assert_eq!(attributor.attribute(&v4([192, 168, 1, 10], [8, 8, 8, 8], 0)), None);
        assert_eq!(
            attributor.attribute(&v4([192, 168, 1, 10], [8, 8, 8, 8], 20)),
            Some((key("8.8.8.0"), 20))
        );
    }

    #[test]
    fn test_custom_policy() {
        let (attributor, _) = attributor(TrackedDirection::Outbound);
        let attributor = attributor.with_policy(PrefixPolicy::new(16, 48).unwrap());
        let (prefix, _) = attributor
            .attribute(&v4([192, 168, 1, 10], [8, 8, 8, 8], 100))
            .unwrap();
        assert_eq!(prefix.to_string(), "8.8.0.0/16");
    }

    #[test]
    fn test_run_until_closed() {
        let (attributor, stats) = attributor(TrackedDirection::Outbound);
        let mut source = QueueSource::new(vec![
            Ok(Some(v4([192, 168, 1, 10], [8, 8, 8, 1], 100))),
            Ok(None),
            Ok(Some(v4([192, 168, 1, 10], [8, 8, 8, 254], 200))),
            Ok(Some(v4([8, 8, 8, 8], [192, 168, 1, 10], 900))),
            Ok(Some(PacketRecord::default())),
        ]);

        let running = AtomicBool::new(true);
        let summary = attributor.run(&mut source, &running).unwrap();
        assert_eq!(
            summary,
            AttributionSummary {
                records: 4,
                attributed: 2,
                bytes: 380
            }
        );
        assert_eq!(stats.pending_delta(&key("8.8.8.0")), 380);
        assert_eq!(source.finished, 1);
    }

    #[test]
    fn test_run_propagates_capture_failure() {
        let (attributor, _) = attributor(TrackedDirection::Outbound);
        let mut source = QueueSource::new(vec![Err(CaptureError::CaptureError(
            "boom".to_string(),
        ))]);
        let running = AtomicBool::new(true);
        assert!(matches!(
            attributor.run(&mut source, &running),
            Err(CaptureError::CaptureError(_))
        ));
        assert_eq!(source.finished, 1);
    }

    #[test]
    fn test_run_stops_when_cleared() {
        let (attributor, _) = attributor(TrackedDirection::Outbound);
        let mut source = QueueSource::new(vec![Ok(None)]);
        let running = AtomicBool::new(false);
        assert_eq!(
            attributor.run(&mut source, &running).unwrap(),
            AttributionSummary::default()
        );
        assert_eq!(source.finished, 1);
    }

    fn v6(src: &str, dst: &str, payload_length: u16) -> PacketRecord {
        PacketRecord {
            link: None,
            ip: Some(IpHeader::V6 {
                src: src.parse().unwrap(),
                dst: dst.parse().unwrap(),
                payload_length,
            }),
        }
    }

    fn attributor_v6(tracked: TrackedDirection) -> (TrafficAttributor, Arc<TrafficStats>) {
        let identity = InterfaceIdentity::new(None, vec!["2001:db8::10".parse().unwrap()]);
        let stats = Arc::new(TrafficStats::new());
        (
            TrafficAttributor::new(Arc::new(identity), Arc::clone(&stats), tracked),
            stats,
        )
    }

    #[test]
    fn test_ipv6_outbound_uses_payload_length_and_48() {
        let (attributor, stats) = attributor_v6(TrackedDirection::Outbound);
        let result = attributor.process(&v6("2001:db8::10", "2001:4860:4860::8888", 60));
        assert_eq!(result, Some((key("2001:4860:4860::"), 100)));
        assert_eq!(result.unwrap().0.to_string(), "2001:4860:4860::/48");
        assert_eq!(stats.pending_delta(&key("2001:4860:4860::")), 100);
        assert_eq!(attributor.process(&v6("2001:4860:4860::8888", "2001:db8::10", 60)), None);
    }

    #[test]
    fn test_ipv6_inbound_uses_source_prefix() {
        let (attributor, stats) = attributor_v6(TrackedDirection::Inbound);
        attributor.process(&v6("2001:4860:4860::8888", "2001:db8::10", 60));
        attributor.process(&v6("2001:db8::10", "2001:4860:4860::8844", 60));
        assert_eq!(stats.key_count(), 1);
        assert_eq!(stats.pending_delta(&key("2001:4860:4860::1")), 100);
        assert_eq!(stats.pending_delta(&key("2001:db8::")), 0);
    }
}
