// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The network cache.
//!
//! The [`Cache`] keeps one typed object per upstream row and ties them together:
//! - one ordered index per table, keyed by row UUID
//! - a main reflink per object that listeners subscribe to
//! - a parent link from DHCPv6 client/server and router advertisement
//!   objects to their `IP_Interface`
//! - one [`UuidSet`](crate::uuidset::UuidSet) per set-valued reference column
//!
//! # Object lifecycle
//!
//! ```text
//! Absent ──get_or_create──▶ Placeholder ──New──▶ Valid ──Modify──▶ Valid
//!                               ▲                  │
//!                               └──── Delete ──────┘ (held by others)
//!                      refcount 0 ──▶ Released (removed from the index)
//! ```
//!
//! Each accepted row runs invalidate+signal, copy, set resync, parent
//! reconnect, validate+signal, then the backend push. Listeners never see
//! an object mid-update as valid.
//!
//! # Example
//!
//! ```
//! use netcache::{Cache, CacheConfig, MemoryRecordStore, ObjectState, RecordingBackend, RowEvent, Table};
//! use netcache::schema::IpInterfaceRow;
//! use uuid::Uuid;
//!
//! let mut cache = Cache::new(CacheConfig::default(), RecordingBackend::new(), MemoryRecordStore::new());
//! let uuid = Uuid::from_u128(1);
//!
//! cache
//!     .ip_interface(RowEvent::New(IpInterfaceRow {
//!         uuid,
//!         name: "br-lan".into(),
//!         enable: true,
//!         ..Default::default()
//!     }))
//!     .unwrap();
//! assert_eq!(cache.state(Table::IpInterface, uuid), ObjectState::Valid);
//!
//! cache.ip_interface(RowEvent::Delete(uuid)).unwrap();
//! assert_eq!(cache.state(Table::IpInterface, uuid), ObjectState::Absent);
//! ```

mod dhcp_option;
mod dhcpv6_client;
mod dhcpv6_lease;
mod dhcpv6_server;
mod ip_interface;
mod ipv6_address;
mod ipv6_prefix;
mod ipv6_routeadv;
pub(crate) mod record;
mod types;

pub use types::{CacheStats, ObjectState, Route, SetField, SetKey};

use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use self::dhcp_option::DhcpOption;
use self::dhcpv6_client::Dhcpv6Client;
use self::dhcpv6_lease::Dhcpv6Lease;
use self::dhcpv6_server::Dhcpv6Server;
use self::ip_interface::IpInterface;
use self::ipv6_address::Ipv6Address;
use self::ipv6_prefix::Ipv6Prefix;
use self::ipv6_routeadv::Ipv6RouteAdv;
use self::record::Record;
use crate::backend::{Backend, RecordStore};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::metrics::{self, UpdateTimer};
use crate::reflink::{RefGraph, RefId, Reactor, ReflinkError};
use crate::schema::{
    DhcpOptionRow, Dhcpv6ClientRow, Dhcpv6LeaseRow, Dhcpv6ServerRow, IpInterfaceRow, Ipv6AddressRow,
    Ipv6PrefixRow, Ipv6RouteAdvRow, RowEvent, Table,
};
use crate::tree::DsTree;
use crate::uuidset::{UuidSet, UuidsetEvent, UuidsetHost};

/// Run `$body` with `$r` bound to the record type of `$table`.
macro_rules! dispatch {
    ($table:expr, $r:ident => $body:expr) => {
        match $table {
            Table::IpInterface => {
                type $r = IpInterface;
                $body
            }
            Table::Ipv6Address => {
                type $r = Ipv6Address;
                $body
            }
            Table::Ipv6Prefix => {
                type $r = Ipv6Prefix;
                $body
            }
            Table::DhcpOption => {
                type $r = DhcpOption;
                $body
            }
            Table::Dhcpv6Lease => {
                type $r = Dhcpv6Lease;
                $body
            }
            Table::Dhcpv6Client => {
                type $r = Dhcpv6Client;
                $body
            }
            Table::Dhcpv6Server => {
                type $r = Dhcpv6Server;
                $body
            }
            Table::Ipv6RouteAdv => {
                type $r = Ipv6RouteAdv;
                $body
            }
        }
    };
}

/// Per-table object indexes.
#[derive(Default)]
pub(crate) struct Objects {
    ip_interfaces: DsTree<Uuid, IpInterface>,
    ipv6_addresses: DsTree<Uuid, Ipv6Address>,
    ipv6_prefixes: DsTree<Uuid, Ipv6Prefix>,
    dhcp_options: DsTree<Uuid, DhcpOption>,
    dhcpv6_leases: DsTree<Uuid, Dhcpv6Lease>,
    dhcpv6_clients: DsTree<Uuid, Dhcpv6Client>,
    dhcpv6_servers: DsTree<Uuid, Dhcpv6Server>,
    ipv6_routeadvs: DsTree<Uuid, Ipv6RouteAdv>,
}

/// In-memory mirror of the network configuration tables.
///
/// `B` receives the resulting interface configuration; `S` takes the state
/// the cache writes back upstream (received options, leases, reported
/// addresses).
pub struct Cache<B, S> {
    config: CacheConfig,
    backend: B,
    store: S,
    graph: RefGraph<Route>,
    objects: Objects,
    /// Signals routed to a parent link or set so far
    deliveries: u64,
}

impl<B: Backend, S: RecordStore> Cache<B, S> {
    pub fn new(config: CacheConfig, backend: B, store: S) -> Self {
        info!(
            commit_on_change = config.commit_on_change,
            write_back = config.write_back,
            "Network cache created"
        );
        Self {
            config,
            backend,
            store,
            graph: RefGraph::new(),
            objects: Objects::default(),
            deliveries: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// The reference graph, for inspection.
    pub fn refgraph(&self) -> &RefGraph<Route> {
        &self.graph
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Upstream entry points
    // ═══════════════════════════════════════════════════════════════════════════

    #[tracing::instrument(skip(self, event), fields(op = event.op(), uuid = %event.uuid()))]
    pub fn ip_interface(&mut self, event: RowEvent<IpInterfaceRow>) -> Result<(), CacheError> {
        self.handle_event::<IpInterface>(event)
    }

    #[tracing::instrument(skip(self, event), fields(op = event.op(), uuid = %event.uuid()))]
    pub fn ipv6_address(&mut self, event: RowEvent<Ipv6AddressRow>) -> Result<(), CacheError> {
        self.handle_event::<Ipv6Address>(event)
    }

    #[tracing::instrument(skip(self, event), fields(op = event.op(), uuid = %event.uuid()))]
    pub fn ipv6_prefix(&mut self, event: RowEvent<Ipv6PrefixRow>) -> Result<(), CacheError> {
        self.handle_event::<Ipv6Prefix>(event)
    }

    #[tracing::instrument(skip(self, event), fields(op = event.op(), uuid = %event.uuid()))]
    pub fn dhcp_option(&mut self, event: RowEvent<DhcpOptionRow>) -> Result<(), CacheError> {
        self.handle_event::<DhcpOption>(event)
    }

    #[tracing::instrument(skip(self, event), fields(op = event.op(), uuid = %event.uuid()))]
    pub fn dhcpv6_lease(&mut self, event: RowEvent<Dhcpv6LeaseRow>) -> Result<(), CacheError> {
        self.handle_event::<Dhcpv6Lease>(event)
    }

    #[tracing::instrument(skip(self, event), fields(op = event.op(), uuid = %event.uuid()))]
    pub fn dhcpv6_client(&mut self, event: RowEvent<Dhcpv6ClientRow>) -> Result<(), CacheError> {
        self.handle_event::<Dhcpv6Client>(event)
    }

    #[tracing::instrument(skip(self, event), fields(op = event.op(), uuid = %event.uuid()))]
    pub fn dhcpv6_server(&mut self, event: RowEvent<Dhcpv6ServerRow>) -> Result<(), CacheError> {
        self.handle_event::<Dhcpv6Server>(event)
    }

    #[tracing::instrument(skip(self, event), fields(op = event.op(), uuid = %event.uuid()))]
    pub fn ipv6_routeadv(&mut self, event: RowEvent<Ipv6RouteAdvRow>) -> Result<(), CacheError> {
        self.handle_event::<Ipv6RouteAdv>(event)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // References and inspection
    // ═══════════════════════════════════════════════════════════════════════════

    /// Find or create the object `uuid` of `table` and take one hold on it.
    ///
    /// The returned link is the object's main reflink. Give the hold back
    /// with [`Cache::drop_ref`].
    pub fn get_or_create(&mut self, table: Table, uuid: Uuid) -> Result<RefId, CacheError> {
        dispatch!(table, R => self.acquire::<R>(uuid))
    }

    /// Give back one hold taken by [`Cache::get_or_create`].
    pub fn drop_ref(&mut self, link: RefId) {
        self.ref_adjust(link, -1);
    }

    /// Main reflink of a cached object.
    pub fn link(&self, table: Table, uuid: Uuid) -> Option<RefId> {
        dispatch!(table, R => self.object::<R>(&uuid).map(|o| o.header().link))
    }

    pub fn is_valid(&self, table: Table, uuid: Uuid) -> bool {
        dispatch!(table, R => self.object::<R>(&uuid).map_or(false, |o| o.header().valid))
    }

    pub fn state(&self, table: Table, uuid: Uuid) -> ObjectState {
        let valid = dispatch!(table, R => self.object::<R>(&uuid).map(|o| o.header().valid));
        match valid {
            None => ObjectState::Absent,
            Some(false) => ObjectState::Placeholder,
            Some(true) => ObjectState::Valid,
        }
    }

    /// Current members of one set column, in UUID order.
    pub fn members(&self, table: Table, uuid: Uuid, field: SetField) -> Vec<Uuid> {
        let key = SetKey { table, owner: uuid, field };
        self.uuidset(key)
            .map(|set| set.ids().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            reflinks: self.graph.len(),
            deliveries: self.deliveries,
            ..Default::default()
        };
        for table in Table::ALL {
            let (total, valid) = dispatch!(table, R => {
                let index = R::index(&self.objects);
                (index.len(), index.values().filter(|o| o.header().valid).count())
            });
            stats.objects.insert(table, total);
            stats.valid.insert(table, valid);
        }
        stats
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Object plumbing shared by the record types
    // ═══════════════════════════════════════════════════════════════════════════

    fn object<R: Record>(&self, uuid: &Uuid) -> Option<&R> {
        R::index(&self.objects).get(uuid)
    }

    fn object_mut<R: Record>(&mut self, uuid: &Uuid) -> Option<&mut R> {
        R::index_mut(&mut self.objects).get_mut(uuid)
    }

    /// The object a remote reflink belongs to, if it is of type `R`.
    fn member<R: Record>(&self, remote: RefId) -> Option<&R> {
        match self.graph.tag(remote) {
            Some(&Route::Object { table, uuid }) if table == R::TABLE => self.object::<R>(&uuid),
            _ => None,
        }
    }

    /// Whether a set event means "apply" (true) or "withdraw" (false).
    fn event_adds(&self, event: UuidsetEvent, remote: RefId) -> bool {
        match event {
            UuidsetEvent::New => true,
            UuidsetEvent::Mod => self.remote_valid(remote),
            UuidsetEvent::Del => false,
        }
    }

    fn acquire<R: Record>(&mut self, uuid: Uuid) -> Result<RefId, CacheError> {
        let existing = self.object::<R>(&uuid).map(|o| o.header().link);
        let link = match existing {
            Some(link) => {
                if self.graph.is_released(link) {
                    return Err(ReflinkError::Released(link).into());
                }
                link
            }
            None => {
                let obj = R::create(&mut self.graph, uuid)?;
                let link = obj.header().link;
                R::index_mut(&mut self.objects).insert(uuid, obj)?;
                debug!(table = %R::TABLE, %uuid, "Placeholder created");
                metrics::set_objects(R::TABLE.name(), R::index(&self.objects).len());
                link
            }
        };
        self.graph.adjust(link, 1)?;
        Ok(link)
    }

    fn handle_event<R: Record>(&mut self, event: RowEvent<R::Row>) -> Result<(), CacheError> {
        let table = R::TABLE;
        let uuid = event.uuid();
        let _timer = UpdateTimer::new(table.name());
        metrics::record_event(table.name(), event.op());

        match event {
            RowEvent::New(row) => {
                let link = self.acquire::<R>(uuid)?;
                let duplicate = match self.object_mut::<R>(&uuid) {
                    Some(obj) => std::mem::replace(&mut obj.header_mut().in_table, true),
                    None => false,
                };
                if duplicate {
                    warn!(%table, %uuid, "Duplicate insert, treating as modify");
                    self.ref_adjust(link, -1);
                }
                self.apply_row::<R>(uuid, &row)
            }
            RowEvent::Modify(row) => {
                if !self.object::<R>(&uuid).map_or(false, |o| o.header().in_table) {
                    error!(%table, %uuid, "Modify for unknown row");
                    return Err(CacheError::NotFound { table, uuid });
                }
                self.apply_row::<R>(uuid, &row)
            }
            RowEvent::Delete(_) => {
                let link = match self.object::<R>(&uuid) {
                    Some(obj) if obj.header().in_table => obj.header().link,
                    _ => {
                        error!(%table, %uuid, "Delete for unknown row");
                        return Err(CacheError::NotFound { table, uuid });
                    }
                };
                R::deleted(self, uuid);
                if let Some(obj) = self.object_mut::<R>(&uuid) {
                    obj.header_mut().in_table = false;
                }
                self.invalidate::<R>(uuid);
                self.detach_parent::<R>(uuid);
                debug!(%table, %uuid, "Row deleted, dropping table hold");
                self.ref_adjust(link, -1);
                Ok(())
            }
        }
    }

    fn apply_row<R: Record>(&mut self, uuid: Uuid, row: &R::Row) -> Result<(), CacheError> {
        let update = R::parse(&self.config, row).map_err(|reason| {
            error!(table = %R::TABLE, %uuid, %reason, "Rejecting malformed row");
            metrics::record_rejected_row(R::TABLE.name());
            CacheError::InvalidRow {
                table: R::TABLE,
                uuid,
                reason,
            }
        })?;
        R::update(self, uuid, update);
        Ok(())
    }

    /// Clear the valid flag and tell every listener.
    fn invalidate<R: Record>(&mut self, uuid: Uuid) {
        let Some(obj) = self.object_mut::<R>(&uuid) else {
            return;
        };
        let header = obj.header_mut();
        header.valid = false;
        let link = header.link;
        if !self.graph.is_released(link) {
            self.signal(link);
        }
    }

    fn revalidate<R: Record>(&mut self, uuid: Uuid) {
        let Some(obj) = self.object_mut::<R>(&uuid) else {
            return;
        };
        let header = obj.header_mut();
        header.valid = true;
        let link = header.link;
        trace!(table = %R::TABLE, %uuid, "Object valid");
        if !self.graph.is_released(link) {
            self.signal(link);
        }
    }

    fn sync_set<R: Record>(&mut self, uuid: Uuid, field: SetField, ids: &[Uuid]) {
        let key = SetKey {
            table: R::TABLE,
            owner: uuid,
            field,
        };
        if !self.uuidset_set(key, ids) {
            warn!(set = %key, "Some members could not be linked, retrying on next update");
        }
    }

    fn refresh_set<R: Record>(&mut self, uuid: Uuid, field: SetField) {
        self.uuidset_refresh(SetKey {
            table: R::TABLE,
            owner: uuid,
            field,
        });
    }

    /// Subscribe the parent link to the interface named in the last row.
    fn attach_parent<R: Record>(&mut self, uuid: Uuid) -> bool {
        let Some((link, interface)) = self
            .object::<R>(&uuid)
            .and_then(|o| o.parent())
            .and_then(|p| p.interface.map(|i| (p.link, i)))
        else {
            return false;
        };

        let target = match self.acquire::<IpInterface>(interface) {
            Ok(target) => target,
            Err(e) => {
                error!(table = %R::TABLE, %uuid, %interface, error = %e, "Unable to reference parent interface");
                return false;
            }
        };
        let connected = self.connect(link, target);
        // The connection (if any) now keeps the interface alive
        self.ref_adjust(target, -1);

        if connected {
            if let Some(parent) = self.object_mut::<R>(&uuid).and_then(|o| o.parent_mut()) {
                parent.connected = Some(target);
            }
        }
        connected
    }

    fn detach_parent<R: Record>(&mut self, uuid: Uuid) {
        let Some((link, target)) = self
            .object_mut::<R>(&uuid)
            .and_then(|o| o.parent_mut())
            .and_then(|p| p.connected.take().map(|t| (p.link, t)))
        else {
            return;
        };
        self.disconnect(link, target);
    }

    /// Interface name of the object's parent, if that interface is usable.
    fn parent_ifname<R: Record>(&self, uuid: Uuid) -> Option<String> {
        let interface = self.object::<R>(&uuid)?.parent()?.interface?;
        self.object::<IpInterface>(&interface)
            .filter(|ipi| ipi.usable)
            .map(|ipi| ipi.ifname.clone())
    }

    fn on_parent_signal<R: Record>(&mut self, uuid: Uuid, sender: RefId) {
        let Some(parent) = self.member::<IpInterface>(sender) else {
            trace!(table = %R::TABLE, %uuid, "Signal from unknown parent");
            return;
        };
        debug!(
            table = %R::TABLE,
            %uuid,
            parent_valid = parent.header.valid,
            ifname = parent.ifname.as_str(),
            "Parent signalled"
        );
        let ready = parent.header.valid && parent.usable;
        if !ready {
            trace!(table = %R::TABLE, %uuid, "Parent interface not ready");
            return;
        }
        R::parent_signalled(self, uuid);
    }

    fn release<R: Record>(&mut self, uuid: Uuid) {
        let Some(obj) = self.object::<R>(&uuid) else {
            warn!(table = %R::TABLE, %uuid, "Release of unknown object");
            return;
        };
        let link = obj.header().link;
        let parent_link = obj.parent().map(|p| p.link);
        info!(table = %R::TABLE, %uuid, "Reference count reached zero, releasing");

        self.detach_parent::<R>(uuid);
        self.invalidate::<R>(uuid);
        for &field in R::SETS {
            self.uuidset_fini(SetKey {
                table: R::TABLE,
                owner: uuid,
                field,
            });
        }
        if let Some(parent_link) = parent_link {
            self.fini(parent_link);
        }
        self.fini(link);

        R::index_mut(&mut self.objects).remove_key(&uuid);
        metrics::record_release(R::TABLE.name());
        metrics::set_objects(R::TABLE.name(), R::index(&self.objects).len());
    }

    /// Run one backend call and account for it.
    fn backend_call(&mut self, op: &'static str, ifname: &str, f: impl FnOnce(&mut B) -> bool) -> bool {
        let ok = f(&mut self.backend);
        backend_result(op, ifname, ok)
    }

    fn commit(&mut self, ifname: &str) {
        if self.config.commit_on_change {
            self.backend_call("commit", ifname, |b| b.commit(ifname));
        }
    }
}

/// Log and count the outcome of a backend call.
fn backend_result(op: &'static str, ifname: &str, ok: bool) -> bool {
    metrics::record_backend_call(op, ok);
    if ok {
        debug!(op, ifname, "Backend call applied");
    } else {
        error!(op, ifname, "Backend call failed");
    }
    ok
}

impl<B: Backend, S: RecordStore> Reactor<Route> for Cache<B, S> {
    fn graph(&self) -> &RefGraph<Route> {
        &self.graph
    }

    fn graph_mut(&mut self) -> &mut RefGraph<Route> {
        &mut self.graph
    }

    fn react(&mut self, obj: RefId, sender: Option<RefId>) {
        let Some(&route) = self.graph.tag(obj) else {
            warn!(%obj, "Callback for unknown reflink");
            return;
        };
        if sender.is_some() {
            self.deliveries += 1;
        }

        match (route, sender) {
            (Route::Object { table, uuid }, None) => dispatch!(table, R => self.release::<R>(uuid)),
            (Route::Parent { table, uuid }, Some(sender)) => {
                dispatch!(table, R => self.on_parent_signal::<R>(uuid, sender))
            }
            (Route::Set(key), Some(remote)) => self.uuidset_signal(key, remote),
            // Parent and set links hold themselves until teardown
            (Route::Parent { .. } | Route::Set(_), None) => {}
            (Route::Object { table, uuid }, Some(_)) => {
                trace!(%table, %uuid, "Object link signalled as a listener, ignoring");
            }
        }
    }
}

impl<B: Backend, S: RecordStore> UuidsetHost<Route> for Cache<B, S> {
    type Key = SetKey;

    fn uuidset(&self, key: SetKey) -> Option<&UuidSet> {
        dispatch!(key.table, R => self.object::<R>(&key.owner).and_then(|o| o.uuidset(key.field)))
    }

    fn uuidset_mut(&mut self, key: SetKey) -> Option<&mut UuidSet> {
        dispatch!(key.table, R => self.object_mut::<R>(&key.owner).and_then(|o| o.uuidset_mut(key.field)))
    }

    fn resolve(&mut self, key: SetKey, id: &Uuid) -> Option<RefId> {
        let table = key.field.member_table();
        match dispatch!(table, R => self.acquire::<R>(*id)) {
            Ok(link) => Some(link),
            Err(e) => {
                error!(set = %key, %id, error = %e, "Unable to create set member");
                None
            }
        }
    }

    fn remote_valid(&self, remote: RefId) -> bool {
        match self.graph.tag(remote) {
            Some(&Route::Object { table, uuid }) => self.is_valid(table, uuid),
            _ => false,
        }
    }

    fn uuidset_event(&mut self, key: SetKey, event: UuidsetEvent, remote: RefId) {
        trace!(set = %key, %event, %remote, "Set event");
        dispatch!(key.table, R => R::set_event(self, key, event, remote))
    }
}
