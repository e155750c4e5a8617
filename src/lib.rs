// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # netcache
//!
//! An in-process mirror of network configuration tables, kept as a live
//! object graph that pushes changes to an interface-configuration backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Upstream row events                     │
//! │  • RowEvent::{New, Modify, Delete} per table               │
//! │  • Rows validated before anything changes                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                            Cache                            │
//! │  • One ordered index (DsTree) per table                    │
//! │  • Placeholders for rows referenced before they arrive     │
//! │  • Invalidate → copy → resync sets → revalidate            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                  (reflink signals, uuidset events)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Reference graph                         │
//! │  • RefGraph: refcounted links, synchronous signals         │
//! │  • UuidSet: foreign-key columns as NEW/MOD/DEL events      │
//! │  • SyncList: mark-and-sweep reconciliation                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │             Backend (apply)   /   RecordStore (write-back)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use netcache::{Cache, CacheConfig, MemoryRecordStore, RecordingBackend, RowEvent};
//! use netcache::schema::{IpInterfaceRow, Ipv6AddressRow};
//! use uuid::Uuid;
//!
//! let mut cache = Cache::new(CacheConfig::default(), RecordingBackend::new(), MemoryRecordStore::new());
//! let (iface, addr) = (Uuid::from_u128(1), Uuid::from_u128(2));
//!
//! // The interface references an address that has not arrived yet
//! cache.ip_interface(RowEvent::New(IpInterfaceRow {
//!     uuid: iface,
//!     name: "br-lan".into(),
//!     enable: true,
//!     ipv6_addr: vec![addr],
//!     ..Default::default()
//! })).unwrap();
//! assert!(cache.backend().calls_of("ip6_addr").is_empty());
//!
//! // Once it does, the backend is told to configure it
//! cache.ipv6_address(RowEvent::New(Ipv6AddressRow {
//!     uuid: addr,
//!     address: "2001:db8::1/64".into(),
//!     origin: "static".into(),
//!     enable: true,
//!     ..Default::default()
//! })).unwrap();
//! assert_eq!(cache.backend().calls_of("ip6_addr").len(), 1);
//! ```
//!
//! ## Modules
//!
//! - [`tree`]: Red-black tree used for every ordered index
//! - [`reflink`]: Refcounted signal graph
//! - [`synclist`]: Mark-and-sweep list reconciler
//! - [`uuidset`]: Foreign-key sets on top of the three above
//! - [`cache`]: The [`Cache`] and its eight record types
//! - [`schema`]: Upstream row types
//! - [`backend`]: Apply and write-back collaborators

pub mod addr;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod reflink;
pub mod schema;
pub mod synclist;
pub mod tree;
pub mod uuidset;

pub use addr::{AddrError, Ip6Addr};
pub use backend::{
    Backend, BackendCall, ClientConfig, ClientStatus, MemoryRecordStore, RecordStore, RecordingBackend,
    RouterAdvOptions, RouterPreference, ServerLease, ServerStatus, StoreError,
};
pub use cache::{Cache, CacheStats, ObjectState, Route, SetField, SetKey};
pub use config::CacheConfig;
pub use error::CacheError;
pub use metrics::UpdateTimer;
pub use reflink::{RefGraph, RefId, Reactor, ReflinkError};
pub use schema::{RowEvent, Table};
pub use synclist::{Change, SyncList};
pub use tree::{DsTree, TreeError};
pub use uuidset::{UuidSet, UuidsetEvent, UuidsetHost};
