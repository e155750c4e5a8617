// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic netcache usage example.
//!
//! Demonstrates:
//! 1. Feeding row events for a LAN interface and its DHCPv6 server
//! 2. A forward reference resolved when the referenced row arrives
//! 3. A lease report written back to the record store
//! 4. Teardown draining the object graph
//! 5. Displaying cache stats and metrics
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! RUST_LOG=netcache=debug cargo run --example basic_usage
//! ```

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;
use uuid::Uuid;

use netcache::schema::{DhcpOptionRow, Dhcpv6ServerRow, IpInterfaceRow, Ipv6PrefixRow};
use netcache::{Cache, CacheConfig, MemoryRecordStore, RecordingBackend, RowEvent, ServerLease, ServerStatus, Table};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║              netcache: Basic Usage Example                    ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    let mut cache = Cache::new(CacheConfig::default(), RecordingBackend::new(), MemoryRecordStore::new());
    let lan = Uuid::new_v4();
    let server = Uuid::new_v4();
    let prefix = Uuid::new_v4();
    let dns = Uuid::new_v4();

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Interface and server rows
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Loading br-lan and its DHCPv6 server...");
    cache.ip_interface(RowEvent::New(IpInterfaceRow {
        uuid: lan,
        name: "br-lan".into(),
        enable: true,
        ..Default::default()
    }))?;
    cache.ipv6_prefix(RowEvent::New(Ipv6PrefixRow {
        uuid: prefix,
        address: "2001:db8:1::/64".into(),
        on_link: true,
        autonomous: true,
        enable: true,
    }))?;
    cache.store_mut().put(Table::Dhcpv6Server, server, json!({}));
    cache.dhcpv6_server(RowEvent::New(Dhcpv6ServerRow {
        uuid: server,
        interface: lan,
        prefixes: vec![prefix],
        options: vec![dns],
        ..Default::default()
    }))?;
    println!("   └─ DNS option is a placeholder: {}", cache.state(Table::DhcpOption, dns));

    // ─────────────────────────────────────────────────────────────────────────
    // 2. The referenced option arrives
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔗 Resolving the forward reference...");
    cache.dhcp_option(RowEvent::New(DhcpOptionRow {
        uuid: dns,
        enable: true,
        version: "v6".into(),
        kind: "tx".into(),
        tag: 23,
        value: "2001:db8:1::1".into(),
    }))?;
    println!("   └─ DNS option is now: {}", cache.state(Table::DhcpOption, dns));

    println!("\n🛠️  Backend calls so far:");
    for call in cache.backend_mut().take_calls() {
        println!("   └─ {} on {}", call.op(), call.ifname());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Lease report from the running server
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Reporting one lease...");
    let report = ServerStatus {
        leases: vec![ServerLease {
            addr: "2001:db8:1::100/128".parse()?,
            duid: "00:01:00:01:2a:3b:4c:5d".into(),
            hostname: "printer".into(),
            leased_time: 3600,
        }],
    };
    cache.dhcpv6_server_status(server, &report)?;
    for row in cache.store().rows(Table::Dhcpv6Lease) {
        println!("   └─ Written back: {row}");
    }

    let stats = cache.stats();
    println!("\n📊 Cache before teardown:");
    println!("   └─ Objects: {}", stats.total_objects());
    println!("   └─ Reflinks: {}", stats.reflinks);
    println!("   └─ Signal deliveries: {}", stats.deliveries);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Teardown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Deleting every row...");
    cache.ip_interface(RowEvent::Delete(lan))?;
    cache.dhcp_option(RowEvent::Delete(dns))?;
    cache.ipv6_prefix(RowEvent::Delete(prefix))?;
    cache.dhcpv6_server(RowEvent::Delete(server))?;

    let stats = cache.stats();
    println!("   └─ Objects: {}", stats.total_objects());
    println!("   └─ Reflinks: {}", stats.reflinks);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, sorted by name
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = Vec::new();
    let mut gauges = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let labels = if labels.is_empty() {
            String::new()
        } else {
            format!("{{{}}}", labels.join(","))
        };
        let name = key.name().to_string();

        match value {
            DebugValue::Counter(v) => counters.push((name, labels, v)),
            DebugValue::Gauge(v) => gauges.push((name, labels, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, labels, count, sum));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    histograms.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    if !counters.is_empty() {
        println!("   ┌─ Counters");
        for (name, labels, value) in &counters {
            println!("   │  └─ {name}{labels} = {value}");
        }
    }
    if !gauges.is_empty() {
        println!("   ├─ Gauges");
        for (name, labels, value) in &gauges {
            println!("   │  └─ {name}{labels} = {value:.0}");
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms");
        for (name, labels, count, sum) in &histograms {
            println!("      └─ {name}{labels} count={count} sum={sum:.6}");
        }
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
