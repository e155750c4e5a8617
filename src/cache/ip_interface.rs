// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `IP_Interface`: the parent every per-interface service hangs off.

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ipv6_address::{AddrOrigin, Ipv6Address};
use super::ipv6_prefix::Ipv6Prefix;
use super::record::{create_set, record_storage, Header, Record};
use super::types::{Route, SetField, SetKey};
use super::Cache;
use crate::backend::{Backend, RecordStore};
use crate::config::CacheConfig;
use crate::reflink::{RefGraph, RefId, Reactor, ReflinkError};
use crate::schema::{IpInterfaceRow, Table};
use crate::uuidset::{UuidSet, UuidsetEvent};

pub(crate) struct IpInterface {
    pub header: Header,
    pub ifname: String,
    pub enable: bool,
    /// The backend knows the interface, so configuration can be pushed.
    pub usable: bool,
    ipv6_addr: UuidSet,
    ipv6_prefix: UuidSet,
}

pub(crate) struct IpInterfaceUpdate {
    ifname: String,
    enable: bool,
    ipv6_addr: Vec<Uuid>,
    ipv6_prefix: Vec<Uuid>,
}

impl IpInterface {
    pub fn ipv6_addr(&self) -> &UuidSet {
        &self.ipv6_addr
    }
}

impl Record for IpInterface {
    const TABLE: Table = Table::IpInterface;
    const SETS: &'static [SetField] = &[SetField::Ipv6Addr, SetField::Ipv6Prefix];

    type Row = IpInterfaceRow;
    type Update = IpInterfaceUpdate;

    record_storage!(ip_interfaces);

    fn create(graph: &mut RefGraph<Route>, uuid: Uuid) -> Result<Self, ReflinkError> {
        Ok(Self {
            header: Header::create(graph, Self::TABLE, uuid)?,
            ifname: String::new(),
            enable: false,
            usable: false,
            ipv6_addr: create_set(graph, Self::TABLE, uuid, SetField::Ipv6Addr)?,
            ipv6_prefix: create_set(graph, Self::TABLE, uuid, SetField::Ipv6Prefix)?,
        })
    }

    fn uuidset(&self, field: SetField) -> Option<&UuidSet> {
        match field {
            SetField::Ipv6Addr => Some(&self.ipv6_addr),
            SetField::Ipv6Prefix => Some(&self.ipv6_prefix),
            _ => None,
        }
    }

    fn uuidset_mut(&mut self, field: SetField) -> Option<&mut UuidSet> {
        match field {
            SetField::Ipv6Addr => Some(&mut self.ipv6_addr),
            SetField::Ipv6Prefix => Some(&mut self.ipv6_prefix),
            _ => None,
        }
    }

    fn parse(config: &CacheConfig, row: &IpInterfaceRow) -> Result<IpInterfaceUpdate, String> {
        if row.name.is_empty() {
            return Err("empty interface name".into());
        }
        if row.name.len() > config.max_ifname_len {
            return Err(format!("interface name longer than {} bytes", config.max_ifname_len));
        }
        Ok(IpInterfaceUpdate {
            ifname: row.name.clone(),
            enable: row.enable,
            ipv6_addr: row.ipv6_addr.clone(),
            ipv6_prefix: row.ipv6_prefix.clone(),
        })
    }

    fn update<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid, update: IpInterfaceUpdate) {
        cache.invalidate::<Self>(uuid);

        let usable = cache.backend.interface_exists(&update.ifname);
        if !usable {
            debug!(ifname = %update.ifname, "Interface not present yet, deferring configuration");
        }
        let Some(ipi) = cache.object_mut::<Self>(&uuid) else {
            return;
        };
        let became_usable = usable && !(ipi.usable && ipi.ifname == update.ifname);
        ipi.ifname = update.ifname;
        ipi.enable = update.enable;
        ipi.usable = usable;
        debug!(%uuid, ifname = %ipi.ifname, enable = ipi.enable, usable, "Interface updated");

        // Members deferred while the interface was missing get applied now;
        // members added below arrive as NEW.
        if became_usable {
            cache.refresh_set::<Self>(uuid, SetField::Ipv6Addr);
        }
        cache.sync_set::<Self>(uuid, SetField::Ipv6Addr, &update.ipv6_addr);
        cache.sync_set::<Self>(uuid, SetField::Ipv6Prefix, &update.ipv6_prefix);

        cache.revalidate::<Self>(uuid);
    }

    fn set_event<B: Backend, S: RecordStore>(
        cache: &mut Cache<B, S>,
        key: SetKey,
        event: UuidsetEvent,
        remote: RefId,
    ) {
        let add = cache.event_adds(event, remote);
        match key.field {
            SetField::Ipv6Addr => {
                let Some(ipi) = cache.object::<Self>(&key.owner) else {
                    return;
                };
                if !ipi.usable {
                    debug!(set = %key, %event, "Interface not usable, address change deferred");
                    return;
                }
                let ifname = ipi.ifname.clone();

                let Some(address) = cache.member::<Ipv6Address>(remote) else {
                    return;
                };
                // Auto-configured addresses are managed by the system
                if address.origin != AddrOrigin::Static {
                    debug!(set = %key, %event, "Skipping non-static address");
                    return;
                }
                let Some(addr) = address.addr else {
                    return;
                };

                cache.backend_call("ip6_addr", &ifname, |b| b.ip6_addr(&ifname, add, &addr));
                cache.commit(&ifname);
            }
            SetField::Ipv6Prefix => {
                let prefix = cache.member::<Ipv6Prefix>(remote).and_then(|p| p.addr);
                info!(set = %key, %event, add, prefix = ?prefix, "IPv6 prefix membership changed");
            }
            _ => warn!(set = %key, "Event for unknown set"),
        }
    }
}

impl<B: Backend, S: RecordStore> Cache<B, S> {
    /// The backend reports that `ifname` now exists.
    ///
    /// Every `IP_Interface` with that name becomes usable: its deferred
    /// addresses are applied and its dependents are signalled so they push
    /// their configuration. Returns the number of interfaces affected.
    #[tracing::instrument(skip(self))]
    pub fn interface_appeared(&mut self, ifname: &str) -> usize {
        let matching: Vec<Uuid> = self
            .objects
            .ip_interfaces
            .values()
            .filter(|ipi| ipi.header.valid && !ipi.usable && ipi.ifname == ifname)
            .map(|ipi| ipi.header.uuid)
            .collect();

        for &uuid in &matching {
            let Some(ipi) = self.object_mut::<IpInterface>(&uuid) else {
                continue;
            };
            ipi.usable = true;
            let link = ipi.header.link;
            info!(ifname, %uuid, "Interface appeared");

            self.refresh_set::<IpInterface>(uuid, SetField::Ipv6Addr);
            if !self.graph.is_released(link) {
                self.signal(link);
            }
        }

        if matching.is_empty() {
            warn!(ifname, "No waiting IP_Interface for appeared interface");
        }
        matching.len()
    }

    /// UUID of the valid `IP_Interface` named `ifname`.
    pub(crate) fn interface_by_name(&self, ifname: &str) -> Option<Uuid> {
        self.objects
            .ip_interfaces
            .values()
            .find(|ipi| ipi.header.valid && ipi.ifname == ifname)
            .map(|ipi| ipi.header.uuid)
    }
}
