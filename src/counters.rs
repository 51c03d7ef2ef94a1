//! Lock-free per-operation query counters.
//!
//! Every SQL operation, classified as read or write by statement kind,
//! records a duration in microseconds. `Snapshot()` is called from a single
//! goroutine-equivalent (the collector) and atomically resets only the two
//! `*_max_us` fields; the cumulative counters never reset.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const SLOW_QUERY_THRESHOLD_US: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Read,
    Write,
}

/// Allocation-free counters for a single `DatabaseManager`.
#[derive(Debug, Default)]
pub struct QueryCounters {
    read_count: AtomicU64,
    read_total_us: AtomicU64,
    read_max_us: AtomicU64,
    write_count: AtomicU64,
    write_total_us: AtomicU64,
    write_max_us: AtomicU64,
    slow_query_count: AtomicU64,
    busy_timeouts: AtomicU64,
}

/// Point-in-time view produced by `QueryCounters::snapshot`.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CountersSnapshot {
    pub read_count: u64,
    pub read_total_us: u64,
    pub read_max_us: u64,
    pub write_count: u64,
    pub write_total_us: u64,
    pub write_max_us: u64,
    pub slow_query_count: u64,
    pub busy_timeouts: u64,
}

impl QueryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed SQL operation. Never fails — per the error
    /// handling policy, telemetry must not fail the host operation.
    pub fn record(&self, kind: OpKind, duration: Duration) {
        let micros = duration.as_micros().min(u64::MAX as u128) as u64;
        match kind {
            OpKind::Read => {
                self.read_count.fetch_add(1, Ordering::Relaxed);
                self.read_total_us.fetch_add(micros, Ordering::Relaxed);
                cas_max(&self.read_max_us, micros);
            }
            OpKind::Write => {
                self.write_count.fetch_add(1, Ordering::Relaxed);
                self.write_total_us.fetch_add(micros, Ordering::Relaxed);
                cas_max(&self.write_max_us, micros);
            }
        }
        if micros > SLOW_QUERY_THRESHOLD_US {
            self.slow_query_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// SQLite-only: bump when a statement hits `SQLITE_BUSY` after the
    /// driver's own busy-timeout has elapsed.
    pub fn record_busy_timeout(&self) {
        self.busy_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset-on-read view: cumulative fields are read as-is, the two
    /// `*_max_us` fields are atomically swapped back to zero so the next
    /// snapshot reports only activity since this call.
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            read_count: self.read_count.load(Ordering::Relaxed),
            read_total_us: self.read_total_us.load(Ordering::Relaxed),
            read_max_us: self.read_max_us.swap(0, Ordering::Relaxed),
            write_count: self.write_count.load(Ordering::Relaxed),
            write_total_us: self.write_total_us.load(Ordering::Relaxed),
            write_max_us: self.write_max_us.swap(0, Ordering::Relaxed),
            slow_query_count: self.slow_query_count.load(Ordering::Relaxed),
            busy_timeouts: self.busy_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Classic CAS loop: only replace the stored max if `candidate` is larger.
fn cas_max(cell: &AtomicU64, candidate: u64) {
    let mut current = cell.load(Ordering::Relaxed);
    while candidate > current {
        match cell.compare_exchange_weak(
            current,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

/// RAII helper: start a timer on construction, record on drop. Used by
/// repositories to instrument every SQL call without hand-rolling
/// `Instant::now()` bookkeeping at each call site.
pub struct OpTimer<'a> {
    counters: &'a QueryCounters,
    kind: OpKind,
    start: std::time::Instant,
}

impl<'a> OpTimer<'a> {
    pub fn start(counters: &'a QueryCounters, kind: OpKind) -> Self {
        Self {
            counters,
            kind,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for OpTimer<'_> {
    fn drop(&mut self) {
        self.counters.record(self.kind, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_reads_and_writes_independently() {
        let counters = QueryCounters::new();
        for _ in 0..100 {
            counters.record(OpKind::Read, Duration::from_micros(10));
        }
        counters.record(OpKind::Write, Duration::from_micros(5));

        let snap = counters.snapshot();
        assert_eq!(snap.read_count, 100);
        assert_eq!(snap.write_count, 1);
        assert!(snap.read_max_us > 0);
    }

    #[test]
    fn snapshot_resets_only_max_fields() {
        let counters = QueryCounters::new();
        counters.record(OpKind::Read, Duration::from_micros(50));
        let first = counters.snapshot();
        assert_eq!(first.read_max_us, 50);

        let second = counters.snapshot();
        assert_eq!(second.read_count, 1, "cumulative count must not reset");
        assert_eq!(second.read_max_us, 0, "max must reset exactly once per call");
    }

    #[test]
    fn slow_query_threshold_is_100ms() {
        let counters = QueryCounters::new();
        counters.record(OpKind::Read, Duration::from_millis(99));
        counters.record(OpKind::Write, Duration::from_millis(101));
        let snap = counters.snapshot();
        assert_eq!(snap.slow_query_count, 1);
    }

    #[test]
    fn cas_max_keeps_largest_observed() {
        let cell = AtomicU64::new(0);
        cas_max(&cell, 10);
        cas_max(&cell, 3);
        cas_max(&cell, 42);
        assert_eq!(cell.load(Ordering::Relaxed), 42);
    }
}
