// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory collaborators for tests and demos.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};
use uuid::Uuid;

use super::traits::{Backend, RecordStore, StoreError};
use super::{ClientConfig, RouterAdvOptions, ServerLease};
use crate::addr::Ip6Addr;
use crate::schema::Table;

/// One call received by [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Ip6Addr { ifname: String, add: bool, addr: Ip6Addr },
    Dhcp6Client { ifname: String, config: ClientConfig },
    Dhcp6ClientOptionRequest { ifname: String, tag: u8, request: bool },
    Dhcp6ClientOptionSend { ifname: String, tag: u8, value: Option<String> },
    Dhcp6Server { ifname: String, enable: bool },
    Dhcp6ServerPrefix { ifname: String, add: bool, prefix: Ip6Addr },
    Dhcp6ServerOptionSend { ifname: String, tag: u8, value: Option<String> },
    Dhcp6ServerLease { ifname: String, add: bool, lease: ServerLease },
    Radv { ifname: String, enable: bool, options: RouterAdvOptions },
    RadvPrefix { ifname: String, add: bool, prefix: Ip6Addr, autonomous: bool, on_link: bool },
    RadvRdnss { ifname: String, add: bool, addr: Ip6Addr },
    RadvDnssl { ifname: String, add: bool, domain: String },
    Commit { ifname: String },
}

impl BackendCall {
    /// Operation name, as used in metrics labels.
    #[must_use]
    pub fn op(&self) -> &'static str {
        match self {
            Self::Ip6Addr { .. } => "ip6_addr",
            Self::Dhcp6Client { .. } => "dhcp6_client",
            Self::Dhcp6ClientOptionRequest { .. } => "dhcp6_client_option_request",
            Self::Dhcp6ClientOptionSend { .. } => "dhcp6_client_option_send",
            Self::Dhcp6Server { .. } => "dhcp6_server",
            Self::Dhcp6ServerPrefix { .. } => "dhcp6_server_prefix",
            Self::Dhcp6ServerOptionSend { .. } => "dhcp6_server_option_send",
            Self::Dhcp6ServerLease { .. } => "dhcp6_server_lease",
            Self::Radv { .. } => "radv",
            Self::RadvPrefix { .. } => "radv_prefix",
            Self::RadvRdnss { .. } => "radv_rdnss",
            Self::RadvDnssl { .. } => "radv_dnssl",
            Self::Commit { .. } => "commit",
        }
    }

    #[must_use]
    pub fn ifname(&self) -> &str {
        match self {
            Self::Ip6Addr { ifname, .. }
            | Self::Dhcp6Client { ifname, .. }
            | Self::Dhcp6ClientOptionRequest { ifname, .. }
            | Self::Dhcp6ClientOptionSend { ifname, .. }
            | Self::Dhcp6Server { ifname, .. }
            | Self::Dhcp6ServerPrefix { ifname, .. }
            | Self::Dhcp6ServerOptionSend { ifname, .. }
            | Self::Dhcp6ServerLease { ifname, .. }
            | Self::Radv { ifname, .. }
            | Self::RadvPrefix { ifname, .. }
            | Self::RadvRdnss { ifname, .. }
            | Self::RadvDnssl { ifname, .. }
            | Self::Commit { ifname } => ifname,
        }
    }
}

/// Backend that records every call and succeeds unless told otherwise.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Vec<BackendCall>,
    /// Known interfaces; `None` means every interface exists.
    interfaces: Option<BTreeSet<String>>,
    failing: BTreeSet<&'static str>,
}

impl RecordingBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the listed interfaces exist.
    pub fn with_interfaces<I, S>(ifnames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            interfaces: Some(ifnames.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn add_interface(&mut self, ifname: impl Into<String>) {
        if let Some(known) = self.interfaces.as_mut() {
            known.insert(ifname.into());
        }
    }

    /// Make every call of operation `op` fail. The call is still recorded.
    pub fn fail_op(&mut self, op: &'static str) {
        self.failing.insert(op);
    }

    pub fn heal(&mut self) {
        self.failing.clear();
    }

    #[must_use]
    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    /// Calls of one operation, in order.
    pub fn calls_of(&self, op: &str) -> Vec<&BackendCall> {
        self.calls.iter().filter(|c| c.op() == op).collect()
    }

    pub fn take_calls(&mut self) -> Vec<BackendCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }

    fn record(&mut self, call: BackendCall) -> bool {
        let ok = !self.failing.contains(call.op());
        self.calls.push(call);
        ok
    }
}

impl Backend for RecordingBackend {
    fn interface_exists(&self, ifname: &str) -> bool {
        self.interfaces.as_ref().map_or(true, |known| known.contains(ifname))
    }

    fn ip6_addr(&mut self, ifname: &str, add: bool, addr: &Ip6Addr) -> bool {
        self.record(BackendCall::Ip6Addr {
            ifname: ifname.to_string(),
            add,
            addr: *addr,
        })
    }

    fn dhcp6_client(&mut self, ifname: &str, config: &ClientConfig) -> bool {
        self.record(BackendCall::Dhcp6Client {
            ifname: ifname.to_string(),
            config: *config,
        })
    }

    fn dhcp6_client_option_request(&mut self, ifname: &str, tag: u8, request: bool) -> bool {
        self.record(BackendCall::Dhcp6ClientOptionRequest {
            ifname: ifname.to_string(),
            tag,
            request,
        })
    }

    fn dhcp6_client_option_send(&mut self, ifname: &str, tag: u8, value: Option<&str>) -> bool {
        self.record(BackendCall::Dhcp6ClientOptionSend {
            ifname: ifname.to_string(),
            tag,
            value: value.map(str::to_string),
        })
    }

    fn dhcp6_server(&mut self, ifname: &str, enable: bool) -> bool {
        self.record(BackendCall::Dhcp6Server {
            ifname: ifname.to_string(),
            enable,
        })
    }

    fn dhcp6_server_prefix(&mut self, ifname: &str, add: bool, prefix: &Ip6Addr) -> bool {
        self.record(BackendCall::Dhcp6ServerPrefix {
            ifname: ifname.to_string(),
            add,
            prefix: *prefix,
        })
    }

    fn dhcp6_server_option_send(&mut self, ifname: &str, tag: u8, value: Option<&str>) -> bool {
        self.record(BackendCall::Dhcp6ServerOptionSend {
            ifname: ifname.to_string(),
            tag,
            value: value.map(str::to_string),
        })
    }

    fn dhcp6_server_lease(&mut self, ifname: &str, add: bool, lease: &ServerLease) -> bool {
        self.record(BackendCall::Dhcp6ServerLease {
            ifname: ifname.to_string(),
            add,
            lease: lease.clone(),
        })
    }

    fn radv(&mut self, ifname: &str, enable: bool, options: &RouterAdvOptions) -> bool {
        self.record(BackendCall::Radv {
            ifname: ifname.to_string(),
            enable,
            options: *options,
        })
    }

    fn radv_prefix(&mut self, ifname: &str, add: bool, prefix: &Ip6Addr, autonomous: bool, on_link: bool) -> bool {
        self.record(BackendCall::RadvPrefix {
            ifname: ifname.to_string(),
            add,
            prefix: *prefix,
            autonomous,
            on_link,
        })
    }

    fn radv_rdnss(&mut self, ifname: &str, add: bool, addr: &Ip6Addr) -> bool {
        self.record(BackendCall::RadvRdnss {
            ifname: ifname.to_string(),
            add,
            addr: *addr,
        })
    }

    fn radv_dnssl(&mut self, ifname: &str, add: bool, domain: &str) -> bool {
        self.record(BackendCall::RadvDnssl {
            ifname: ifname.to_string(),
            add,
            domain: domain.to_string(),
        })
    }

    fn commit(&mut self, ifname: &str) -> bool {
        self.record(BackendCall::Commit {
            ifname: ifname.to_string(),
        })
    }
}

/// Table store kept as JSON rows, keyed by table and UUID.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    tables: BTreeMap<Table, BTreeMap<Uuid, Value>>,
    read_only: bool,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row. `_uuid` is set from `uuid`.
    pub fn put(&mut self, table: Table, uuid: Uuid, mut row: Value) {
        if let Some(obj) = row.as_object_mut() {
            obj.insert("_uuid".to_string(), json!(uuid));
        }
        self.tables.entry(table).or_default().insert(uuid, row);
    }

    #[must_use]
    pub fn get(&self, table: Table, uuid: Uuid) -> Option<&Value> {
        self.tables.get(&table).and_then(|rows| rows.get(&uuid))
    }

    /// Rows of one table, in UUID order.
    pub fn rows(&self, table: Table) -> Vec<&Value> {
        self.tables.get(&table).map(|rows| rows.values().collect()).unwrap_or_default()
    }

    /// The UUIDs listed in `table[uuid].column`.
    pub fn column_uuids(&self, table: Table, uuid: Uuid, column: &str) -> Vec<Uuid> {
        self.get(table, uuid)
            .and_then(|row| row.get(column))
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(|v| serde_json::from_value(v.clone()).ok()).collect())
            .unwrap_or_default()
    }

    /// Reject every write from now on.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    fn parent_column(&mut self, table: Table, uuid: Uuid, column: &str) -> Result<&mut Vec<Value>, StoreError> {
        let row = self
            .tables
            .get_mut(&table)
            .and_then(|rows| rows.get_mut(&uuid))
            .and_then(Value::as_object_mut)
            .ok_or(StoreError::NotFound { table, uuid })?;
        let col = row.entry(column.to_string()).or_insert_with(|| json!([]));
        if !col.is_array() {
            *col = json!([]);
        }
        col.as_array_mut()
            .ok_or_else(|| StoreError::Backend(format!("{table}.{column} is not a set")))
    }
}

impl RecordStore for MemoryRecordStore {
    fn insert_with_parent(
        &mut self,
        table: Table,
        row: Value,
        parent_table: Table,
        parent: Uuid,
        column: &str,
    ) -> Result<Uuid, StoreError> {
        if self.read_only {
            return Err(StoreError::Rejected("store is read-only".into()));
        }
        if !row.is_object() {
            return Err(StoreError::Rejected(format!("{table} row is not an object")));
        }

        let uuid = Uuid::new_v4();
        self.parent_column(parent_table, parent, column)?.push(json!(uuid));
        self.put(table, uuid, row);
        Ok(uuid)
    }

    fn remove_from_parent(
        &mut self,
        parent_table: Table,
        parent: Uuid,
        column: &str,
        child: Uuid,
    ) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::Rejected("store is read-only".into()));
        }
        let needle = json!(child);
        self.parent_column(parent_table, parent, column)?.retain(|v| *v != needle);
        Ok(())
    }
}
