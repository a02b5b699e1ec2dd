//! # Session metrics
//!
//! Lock-free counters for one replication session, mirrored into the
//! `metrics` crate facade so any installed recorder (Prometheus, StatsD, ...)
//! picks them up. Facade names are prefixed `sluice_cdc_` and labelled with
//! the source host.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crate::common::{CdcError, MutationOp};

/// Counters for one replication session.
#[derive(Debug)]
pub struct SessionMetrics {
    source: String,
    start_time: Instant,

    events_total: AtomicU64,
    bytes_total: AtomicU64,

    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    transactions: AtomicU64,
    rotations: AtomicU64,

    filtered_rows: AtomicU64,
    listener_rejections: AtomicU64,

    errors_total: AtomicU64,
    decode_errors: AtomicU64,
    connection_errors: AtomicU64,

    connected: AtomicBool,
    /// Last event timestamp written by the source (epoch seconds)
    last_event_timestamp: AtomicU64,
}

impl SessionMetrics {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            start_time: Instant::now(),
            events_total: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            transactions: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
            filtered_rows: AtomicU64::new(0),
            listener_rejections: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            last_event_timestamp: AtomicU64::new(0),
        }
    }

    /// Record a decoded binlog event of `bytes` length.
    #[inline]
    pub fn record_event(&self, bytes: u64, timestamp: u32) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_total.fetch_add(bytes, Ordering::Relaxed);
        if timestamp != 0 {
            self.last_event_timestamp
                .store(timestamp as u64, Ordering::Relaxed);
        }

        metrics::counter!("sluice_cdc_events_total", "source" => self.source.clone())
            .increment(1);
        metrics::counter!("sluice_cdc_bytes_total", "source" => self.source.clone())
            .increment(bytes);
    }

    /// Record dispatched mutations.
    #[inline]
    pub fn record_mutations(&self, op: MutationOp, count: u64) {
        let counter = match op {
            MutationOp::Insert => &self.inserts,
            MutationOp::Update => &self.updates,
            MutationOp::Delete => &self.deletes,
        };
        counter.fetch_add(count, Ordering::Relaxed);
        metrics::counter!(
            "sluice_cdc_mutations_total",
            "source" => self.source.clone(),
            "op" => op.to_string()
        )
        .increment(count);
    }

    #[inline]
    pub fn record_transaction(&self) {
        self.transactions.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sluice_cdc_transactions_total", "source" => self.source.clone())
            .increment(1);
    }

    pub fn record_rotation(&self) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_filtered(&self, rows: u64) {
        self.filtered_rows.fetch_add(rows, Ordering::Relaxed);
    }

    /// Record listeners that did not acknowledge a delivery.
    pub fn record_listener_rejections(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.listener_rejections.fetch_add(count, Ordering::Relaxed);
        metrics::counter!(
            "sluice_cdc_listener_rejections_total",
            "source" => self.source.clone()
        )
        .increment(count);
    }

    /// Record a session-terminating error.
    pub fn record_error(&self, error: &CdcError) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        if error.is_fatal_for_stream() {
            self.decode_errors.fetch_add(1, Ordering::Relaxed);
        } else if error.is_retriable() {
            self.connection_errors.fetch_add(1, Ordering::Relaxed);
        }
        metrics::counter!(
            "sluice_cdc_errors_total",
            "source" => self.source.clone(),
            "code" => error.error_code()
        )
        .increment(1);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
        metrics::gauge!("sluice_cdc_connected", "source" => self.source.clone())
            .set(if connected { 1.0 } else { 0.0 });
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime = self.start_time.elapsed();
        let events_total = self.events_total.load(Ordering::Relaxed);
        let secs = uptime.as_secs_f64();
        MetricsSnapshot {
            source: self.source.clone(),
            uptime_secs: uptime.as_secs(),
            events_total,
            bytes_total: self.bytes_total.load(Ordering::Relaxed),
            events_per_second: if secs > 0.0 {
                events_total as f64 / secs
            } else {
                0.0
            },
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            transactions: self.transactions.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            filtered_rows: self.filtered_rows.load(Ordering::Relaxed),
            listener_rejections: self.listener_rejections.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
            last_event_timestamp: self.last_event_timestamp.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`SessionMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub source: String,
    pub uptime_secs: u64,
    pub events_total: u64,
    pub bytes_total: u64,
    pub events_per_second: f64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub transactions: u64,
    pub rotations: u64,
    pub filtered_rows: u64,
    pub listener_rejections: u64,
    pub errors_total: u64,
    pub decode_errors: u64,
    pub connection_errors: u64,
    pub connected: bool,
    pub last_event_timestamp: u64,
}

impl MetricsSnapshot {
    /// Mutations of every kind.
    pub fn mutations_total(&self) -> u64 {
        self.inserts + self.updates + self.deletes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = SessionMetrics::new("db1:3306");
        metrics.record_event(100, 1_700_000_000);
        metrics.record_event(50, 0);
        metrics.record_mutations(MutationOp::Insert, 3);
        metrics.record_mutations(MutationOp::Delete, 1);
        metrics.record_transaction();
        metrics.record_listener_rejections(0);
        metrics.record_listener_rejections(2);

        let snap = metrics.snapshot();
        assert_eq!(snap.events_total, 2);
        assert_eq!(snap.bytes_total, 150);
        assert_eq!(snap.inserts, 3);
        assert_eq!(snap.deletes, 1);
        assert_eq!(snap.mutations_total(), 4);
        assert_eq!(snap.transactions, 1);
        assert_eq!(snap.listener_rejections, 2);
        assert_eq!(snap.last_event_timestamp, 1_700_000_000);
    }

    #[test]
    fn test_error_classification() {
        let metrics = SessionMetrics::new("db1:3306");
        metrics.record_error(&CdcError::MissingTableMap(5));
        metrics.record_error(&CdcError::ConnectionClosed);
        metrics.record_error(&CdcError::authentication("denied"));

        let snap = metrics.snapshot();
        assert_eq!(snap.errors_total, 3);
        assert_eq!(snap.decode_errors, 1);
        assert_eq!(snap.connection_errors, 1);
    }

    #[test]
    fn test_connected_flag() {
        let metrics = SessionMetrics::new("db1:3306");
        assert!(!metrics.is_connected());
        metrics.set_connected(true);
        assert!(metrics.snapshot().connected);
    }
}
