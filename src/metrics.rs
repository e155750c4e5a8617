// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for netcache.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding daemon is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `netcache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `table`: upstream table name (`IP_Interface`, `DHCPv6_Client`, ...)
//! - `op`: row operation (`new`, `modify`, `delete`) or backend/store call
//! - `status`: success, failure

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

fn status_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Record an upstream row event
pub fn record_event(table: &str, op: &str) {
    counter!(
        "netcache_events_total",
        "table" => table.to_string(),
        "op" => op.to_string()
    )
    .increment(1);
}

/// Record a row that failed validation
pub fn record_rejected_row(table: &str) {
    counter!(
        "netcache_rejected_rows_total",
        "table" => table.to_string()
    )
    .increment(1);
}

/// Record one signal and how many listeners it reached
pub fn record_signal(delivered: usize) {
    counter!("netcache_signals_total").increment(1);
    histogram!("netcache_signal_fanout").record(delivered as f64);
}

/// Record a backend apply call
pub fn record_backend_call(op: &str, success: bool) {
    counter!(
        "netcache_backend_calls_total",
        "op" => op.to_string(),
        "status" => status_label(success)
    )
    .increment(1);
}

/// Record a write-back to the record store
pub fn record_store_write(op: &str, success: bool) {
    counter!(
        "netcache_store_writes_total",
        "op" => op.to_string(),
        "status" => status_label(success)
    )
    .increment(1);
}

/// Set the number of cached objects of one table
pub fn set_objects(table: &str, count: usize) {
    gauge!(
        "netcache_objects",
        "table" => table.to_string()
    )
    .set(count as f64);
}

/// Record an object release
pub fn record_release(table: &str) {
    counter!(
        "netcache_releases_total",
        "table" => table.to_string()
    )
    .increment(1);
}

/// Record how long a row update took
pub fn record_update_latency(table: &str, duration: Duration) {
    histogram!(
        "netcache_update_seconds",
        "table" => table.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A timing guard that records update latency on drop
pub struct UpdateTimer {
    table: &'static str,
    start: Instant,
}

impl UpdateTimer {
    /// Start a new update timer
    #[must_use]
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            start: Instant::now(),
        }
    }
}

impl Drop for UpdateTimer {
    fn drop(&mut self) {
        record_update_latency(self.table, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These only check that recording without an installed recorder is a no-op.
    // tests/integration.rs asserts on values through metrics-util.

    #[test]
    fn test_record_counters() {
        record_event("IP_Interface", "new");
        record_rejected_row("IPv6_Address");
        record_signal(3);
        record_backend_call("commit", true);
        record_store_write("insert", false);
        record_release("DHCP_Option");
    }

    #[test]
    fn test_gauges() {
        set_objects("DHCPv6_Lease", 12);
        set_objects("DHCPv6_Lease", 0);
    }

    #[test]
    fn test_update_timer() {
        let timer = UpdateTimer::new("IPv6_RouteAdv");
        drop(timer);
        record_update_latency("IPv6_Prefix", Duration::from_micros(50));
    }

    #[test]
    fn test_status_label() {
        assert_eq!(status_label(true), "success");
        assert_eq!(status_label(false), "failure");
    }
}
