// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `DHCPv6_Server`: server configuration per interface, plus the leases the
//! running server reports back.

use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::dhcp_option::DhcpOption;
use super::dhcpv6_lease::Dhcpv6Lease;
use super::ipv6_prefix::Ipv6Prefix;
use super::record::{create_set, record_storage, Header, ParentLink, Record};
use super::types::{Route, SetField, SetKey};
use super::Cache;
use crate::backend::{Backend, RecordStore, ServerStatus, StoreError};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::metrics;
use crate::reflink::{RefGraph, RefId, ReflinkError};
use crate::schema::{Dhcpv6ServerRow, Table};
use crate::synclist::{Change, SyncList};
use crate::uuidset::{UuidSet, UuidsetEvent};

/// A reported lease, keyed by DUID.
#[derive(Debug, Default)]
pub(crate) struct LeaseEntry {
    /// Row written back for it, if any.
    uuid: Option<Uuid>,
}

pub(crate) struct Dhcpv6Server {
    pub header: Header,
    parent: ParentLink,
    status: String,
    prefix_delegation: bool,
    prefixes: UuidSet,
    options: UuidSet,
    lease_prefix: UuidSet,
    static_prefix: UuidSet,
    leases: SyncList<String, LeaseEntry>,
}

pub(crate) struct Dhcpv6ServerUpdate {
    interface: Uuid,
    status: String,
    prefix_delegation: bool,
    prefixes: Vec<Uuid>,
    options: Vec<Uuid>,
    lease_prefix: Vec<Uuid>,
    static_prefix: Vec<Uuid>,
}

impl Record for Dhcpv6Server {
    const TABLE: Table = Table::Dhcpv6Server;
    const SETS: &'static [SetField] = &[
        SetField::Prefixes,
        SetField::Options,
        SetField::LeasePrefix,
        SetField::StaticPrefix,
    ];

    type Row = Dhcpv6ServerRow;
    type Update = Dhcpv6ServerUpdate;

    record_storage!(dhcpv6_servers);

    fn create(graph: &mut RefGraph<Route>, uuid: Uuid) -> Result<Self, ReflinkError> {
        Ok(Self {
            header: Header::create(graph, Self::TABLE, uuid)?,
            parent: ParentLink::create(graph, Self::TABLE, uuid)?,
            status: String::new(),
            prefix_delegation: false,
            prefixes: create_set(graph, Self::TABLE, uuid, SetField::Prefixes)?,
            options: create_set(graph, Self::TABLE, uuid, SetField::Options)?,
            lease_prefix: create_set(graph, Self::TABLE, uuid, SetField::LeasePrefix)?,
            static_prefix: create_set(graph, Self::TABLE, uuid, SetField::StaticPrefix)?,
            leases: SyncList::new(),
        })
    }

    fn parent(&self) -> Option<&ParentLink> {
        Some(&self.parent)
    }

    fn parent_mut(&mut self) -> Option<&mut ParentLink> {
        Some(&mut self.parent)
    }

    fn uuidset(&self, field: SetField) -> Option<&UuidSet> {
        match field {
            SetField::Prefixes => Some(&self.prefixes),
            SetField::Options => Some(&self.options),
            SetField::LeasePrefix => Some(&self.lease_prefix),
            SetField::StaticPrefix => Some(&self.static_prefix),
            _ => None,
        }
    }

    fn uuidset_mut(&mut self, field: SetField) -> Option<&mut UuidSet> {
        match field {
            SetField::Prefixes => Some(&mut self.prefixes),
            SetField::Options => Some(&mut self.options),
            SetField::LeasePrefix => Some(&mut self.lease_prefix),
            SetField::StaticPrefix => Some(&mut self.static_prefix),
            _ => None,
        }
    }

    fn parse(config: &CacheConfig, row: &Dhcpv6ServerRow) -> Result<Dhcpv6ServerUpdate, String> {
        if row.status.len() > config.max_server_status_len {
            return Err(format!("status longer than {} bytes", config.max_server_status_len));
        }
        Ok(Dhcpv6ServerUpdate {
            interface: row.interface,
            status: row.status.clone(),
            prefix_delegation: row.prefix_delegation,
            prefixes: row.prefixes.clone(),
            options: row.options.clone(),
            lease_prefix: row.lease_prefix.clone(),
            static_prefix: row.static_prefix.clone(),
        })
    }

    fn update<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid, update: Dhcpv6ServerUpdate) {
        cache.invalidate::<Self>(uuid);
        cache.detach_parent::<Self>(uuid);

        let Some(server) = cache.object_mut::<Self>(&uuid) else {
            return;
        };
        server.parent.interface = Some(update.interface);
        server.status = update.status;
        server.prefix_delegation = update.prefix_delegation;

        cache.sync_set::<Self>(uuid, SetField::Prefixes, &update.prefixes);
        cache.sync_set::<Self>(uuid, SetField::Options, &update.options);
        cache.sync_set::<Self>(uuid, SetField::LeasePrefix, &update.lease_prefix);
        cache.sync_set::<Self>(uuid, SetField::StaticPrefix, &update.static_prefix);
        cache.attach_parent::<Self>(uuid);

        cache.revalidate::<Self>(uuid);
        Self::apply(cache, uuid, true);
    }

    fn deleted<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid) {
        Self::apply(cache, uuid, false);
    }

    fn parent_signalled<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid) {
        for &field in Self::SETS {
            cache.refresh_set::<Self>(uuid, field);
        }
        Self::apply(cache, uuid, true);
    }

    fn set_event<B: Backend, S: RecordStore>(
        cache: &mut Cache<B, S>,
        key: SetKey,
        event: UuidsetEvent,
        remote: RefId,
    ) {
        if key.field == SetField::StaticPrefix {
            debug!(set = %key, %event, "Static prefix changed");
            return;
        }
        let Some(ifname) = cache.parent_ifname::<Self>(key.owner) else {
            debug!(set = %key, %event, "Interface not usable, server change deferred");
            return;
        };
        let add = cache.event_adds(event, remote);

        match key.field {
            SetField::Prefixes => {
                let Some(prefix) = cache.member::<Ipv6Prefix>(remote).and_then(|p| p.addr) else {
                    return;
                };
                cache.backend_call("dhcp6_server_prefix", &ifname, |b| {
                    b.dhcp6_server_prefix(&ifname, add, &prefix)
                });
            }
            SetField::Options => {
                let Some(option) = cache.member::<DhcpOption>(remote) else {
                    return;
                };
                let tag = option.tag;
                let value = add.then(|| option.value.clone());
                cache.backend_call("dhcp6_server_option_send", &ifname, |b| {
                    b.dhcp6_server_option_send(&ifname, tag, value.as_deref())
                });
            }
            SetField::LeasePrefix => {
                let Some(lease) = cache.member::<Dhcpv6Lease>(remote).and_then(Dhcpv6Lease::server_lease) else {
                    return;
                };
                cache.backend_call("dhcp6_server_lease", &ifname, |b| {
                    b.dhcp6_server_lease(&ifname, add, &lease)
                });
            }
            _ => {
                warn!(set = %key, "Event for unknown set");
                return;
            }
        }
        cache.commit(&ifname);
    }
}

impl Dhcpv6Server {
    fn apply<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid, enable: bool) {
        let Some(ifname) = cache.parent_ifname::<Self>(uuid) else {
            debug!(%uuid, "Interface not usable, server configuration deferred");
            return;
        };
        let Some(server) = cache.object::<Self>(&uuid) else {
            return;
        };
        if enable && !server.header.valid {
            return;
        }
        debug!(
            %uuid,
            ifname,
            enable,
            status = %server.status,
            prefix_delegation = server.prefix_delegation,
            "Applying DHCPv6 server"
        );

        if cache.backend_call("dhcp6_server", &ifname, |b| b.dhcp6_server(&ifname, enable)) {
            cache.commit(&ifname);
        }
    }
}

impl<B: Backend, S: RecordStore> Cache<B, S> {
    /// Reconcile the leases a running DHCPv6 server reports.
    ///
    /// Leases are keyed by DUID. New ones are written back as
    /// `DHCPv6_Lease` rows under the server's `lease_prefix`; leases no
    /// longer reported are dropped from that column. Reports for a server
    /// whose interface is not usable yet are ignored.
    #[tracing::instrument(skip(self, status), fields(leases = status.leases.len()))]
    pub fn dhcpv6_server_status(&mut self, uuid: Uuid, status: &ServerStatus) -> Result<(), CacheError> {
        if !self.object::<Dhcpv6Server>(&uuid).map_or(false, |s| s.header.valid) {
            error!(%uuid, "Status for unknown DHCPv6 server");
            return Err(CacheError::NotFound {
                table: Table::Dhcpv6Server,
                uuid,
            });
        }
        if self.parent_ifname::<Dhcpv6Server>(uuid).is_none() {
            debug!(%uuid, "Interface not usable, ignoring server status");
            return Ok(());
        }
        let Some(server) = self.object_mut::<Dhcpv6Server>(&uuid) else {
            return Ok(());
        };
        let mut leases = std::mem::take(&mut server.leases);

        let write_back = self.config.write_back;
        let max_duid = self.config.max_duid_len;
        let max_hostname = self.config.max_hostname_len;
        let store = &mut self.store;
        let mut first_error: Option<StoreError> = None;
        let column = SetField::LeasePrefix.column();

        let mut pass = leases.begin();
        for lease in &status.leases {
            if lease.duid.is_empty() || lease.duid.len() > max_duid {
                warn!(%uuid, duid = %lease.duid, "Ignoring lease with invalid DUID");
                continue;
            }
            if lease.hostname.len() > max_hostname {
                warn!(%uuid, duid = %lease.duid, "Ignoring lease with oversized hostname");
                continue;
            }

            let mut sync = |change: Change<'_, String, LeaseEntry>| match change {
                Change::Insert { key: duid, new } => {
                    if !write_back {
                        return Some(new);
                    }
                    let row = json!({
                        "duid": duid,
                        "hostname": lease.hostname,
                        "prefix": lease.addr.to_string(),
                        "leased_time": lease.leased_time,
                        "status": "leased",
                    });
                    let result = store.insert_with_parent(Table::Dhcpv6Lease, row, Table::Dhcpv6Server, uuid, column);
                    metrics::record_store_write("insert", result.is_ok());
                    match result {
                        Ok(child) => {
                            info!(%uuid, %duid, %child, "Lease written back");
                            Some(LeaseEntry { uuid: Some(child) })
                        }
                        Err(e) => {
                            error!(%uuid, %duid, error = %e, "Unable to write back lease");
                            first_error.get_or_insert(e);
                            None
                        }
                    }
                }
                Change::Update { .. } => None,
                Change::Remove { .. } => None,
            };
            pass.add(lease.duid.clone(), LeaseEntry::default(), &mut sync);
        }

        let mut sweep = |change: Change<'_, String, LeaseEntry>| {
            if let Change::Remove { key: duid, old } = change {
                if let (true, Some(child)) = (write_back, old.uuid) {
                    let result = store.remove_from_parent(Table::Dhcpv6Server, uuid, column, child);
                    metrics::record_store_write("remove", result.is_ok());
                    match result {
                        Ok(()) => info!(%uuid, %duid, %child, "Expired lease removed"),
                        Err(e) => {
                            error!(%uuid, %duid, error = %e, "Unable to remove expired lease");
                            first_error.get_or_insert(e);
                        }
                    }
                }
            }
            None
        };
        pass.end(&mut sweep);

        if let Some(server) = self.object_mut::<Dhcpv6Server>(&uuid) {
            server.leases = leases;
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
