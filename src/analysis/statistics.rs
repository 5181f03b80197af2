use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::traffic::prefix::PrefixKey;

pub const DEFAULT_TOP_N: usize = 10;

/// One ranked prefix as seen by a single drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankedPrefix {
    pub key: PrefixKey,
    /// Lifetime bytes, including this drain's delta.
    pub total: u64,
    /// Bytes recorded since the previous drain.
    pub delta: u64,
}

#[derive(Debug, Clone)]
pub struct Drain {
    pub ranked: Vec<RankedPrefix>,
    pub elapsed: Duration,
}

struct Tables {
    delta: HashMap<PrefixKey, u64>,
    lifetime: HashMap<PrefixKey, u64>,
    last_drain: Instant,
}

/// Per-prefix byte counters shared by the capture and reporting loops.
///
/// Both tables live behind one mutex, so a `record_delta` either lands
/// before a drain and is merged by it, or after and waits for the next one.
pub struct TrafficStats {
    tables: Mutex<Tables>,
    top_n: usize,
}

impl TrafficStats {
    pub fn new() -> Self {
        Self::with_top_n(DEFAULT_TOP_N)
    }

    pub fn with_top_n(top_n: usize) -> Self {
        Self {
            tables: Mutex::new(Tables {
                delta: HashMap::new(),
                lifetime: HashMap::new(),
                last_drain: Instant::now(),
            }),
            top_n,
        }
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    // Counters stay consistent even if a holder panicked.
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_delta(&self, key: PrefixKey, bytes: u64) {
        let mut tables = self.lock();
        let entry = tables.delta.entry(key).or_insert(0);
        *entry = entry.saturating_add(bytes);
    }

    pub fn drain(&self) -> Drain {
        self.drain_at(Instant::now())
    }

    /// Merge delta into lifetime, rank, snapshot the top deltas and reset delta.
    pub fn drain_at(&self, now: Instant) -> Drain {
        let mut guard = self.lock();
        let Tables {
            delta,
            lifetime,
            last_drain,
        } = &mut *guard;

        for (key, bytes) in delta.iter() {
            let total = lifetime.entry(*key).or_insert(0);
            *total = total.saturating_add(*bytes);
        }

        let mut ranked: Vec<(PrefixKey, u64)> =
            lifetime.iter().map(|(key, total)| (*key, *total)).collect();
        if self.top_n > 0 && ranked.len() > self.top_n {
            ranked.select_nth_unstable_by(self.top_n - 1, by_total_desc);
        }
        ranked.truncate(self.top_n);
        ranked.sort_unstable_by(by_total_desc);

        let ranked = ranked
            .into_iter()
            .map(|(key, total)| RankedPrefix {
                key,
                total,
                delta: delta.get(&key).copied().unwrap_or(0),
            })
            .collect();

        delta.clear();
        let elapsed = now.saturating_duration_since(*last_drain);
        *last_drain = now;

        Drain { ranked, elapsed }
    }

    /// Number of prefixes seen so far (merged or pending).
    pub fn key_count(&self) -> usize {
        let tables = self.lock();
        tables
            .delta
            .keys()
            .filter(|key| !tables.lifetime.contains_key(*key))
            .count()
            + tables.lifetime.len()
    }

    /// Lifetime bytes for `key` as of the last drain.
    pub fn lifetime_total(&self, key: &PrefixKey) -> u64 {
        self.lock().lifetime.get(key).copied().unwrap_or(0)
    }

    /// Bytes recorded for `key` since the last drain.
    pub fn pending_delta(&self, key: &PrefixKey) -> u64 {
        self.lock().delta.get(key).copied().unwrap_or(0)
    }
}

impl Default for TrafficStats {
    fn default() -> Self {
        Self::new()
    }
}

fn by_total_desc(a: &(PrefixKey, u64), b: &(PrefixKey, u64)) -> Ordering {
    b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}
