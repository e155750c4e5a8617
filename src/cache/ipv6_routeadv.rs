// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `IPv6_RouteAdv`: router advertisement daemon settings per interface.

use tracing::{debug, warn};
use uuid::Uuid;

use super::ip_interface::IpInterface;
use super::ipv6_address::Ipv6Address;
use super::ipv6_prefix::Ipv6Prefix;
use super::record::{create_set, record_storage, Header, ParentLink, Record};
use super::types::{Route, SetField, SetKey};
use super::{backend_result, Cache};
use crate::backend::{Backend, RecordStore, RouterAdvOptions, RouterPreference};
use crate::config::CacheConfig;
use crate::reflink::{RefGraph, RefId, ReflinkError};
use crate::schema::{Ipv6RouteAdvRow, Table};
use crate::synclist::{Change, SyncList};
use crate::uuidset::{UuidSet, UuidsetEvent};

pub(crate) struct Ipv6RouteAdv {
    pub header: Header,
    parent: ParentLink,
    status: String,
    options: RouterAdvOptions,
    prefixes: UuidSet,
    rdnss: UuidSet,
    /// Search domains currently pushed, keyed by domain.
    dnssl: SyncList<String, ()>,
}

pub(crate) struct Ipv6RouteAdvUpdate {
    interface: Uuid,
    status: String,
    options: RouterAdvOptions,
    prefixes: Vec<Uuid>,
    rdnss: Vec<Uuid>,
    dnssl: Vec<String>,
}

impl Record for Ipv6RouteAdv {
    const TABLE: Table = Table::Ipv6RouteAdv;
    const SETS: &'static [SetField] = &[SetField::Prefixes, SetField::Rdnss];

    type Row = Ipv6RouteAdvRow;
    type Update = Ipv6RouteAdvUpdate;

    record_storage!(ipv6_routeadvs);

    fn create(graph: &mut RefGraph<Route>, uuid: Uuid) -> Result<Self, ReflinkError> {
        Ok(Self {
            header: Header::create(graph, Self::TABLE, uuid)?,
            parent: ParentLink::create(graph, Self::TABLE, uuid)?,
            status: String::new(),
            options: RouterAdvOptions::default(),
            prefixes: create_set(graph, Self::TABLE, uuid, SetField::Prefixes)?,
            rdnss: create_set(graph, Self::TABLE, uuid, SetField::Rdnss)?,
            dnssl: SyncList::new(),
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
            SetField::Rdnss => Some(&self.rdnss),
            _ => None,
        }
    }

    fn uuidset_mut(&mut self, field: SetField) -> Option<&mut UuidSet> {
        match field {
            SetField::Prefixes => Some(&mut self.prefixes),
            SetField::Rdnss => Some(&mut self.rdnss),
            _ => None,
        }
    }

    fn parse(config: &CacheConfig, row: &Ipv6RouteAdvRow) -> Result<Ipv6RouteAdvUpdate, String> {
        if row.status.len() > config.max_routeadv_status_len {
            return Err(format!("status longer than {} bytes", config.max_routeadv_status_len));
        }
        let preferred_router = match row.preferred_router.as_str() {
            "" => None,
            other => Some(
                RouterPreference::parse(other).ok_or_else(|| format!("unknown preferred_router {other:?}"))?,
            ),
        };

        Ok(Ipv6RouteAdvUpdate {
            interface: row.interface,
            status: row.status.clone(),
            options: RouterAdvOptions {
                managed: row.managed,
                other_config: row.other_config,
                home_agent: row.home_agent,
                max_adv_interval: row.max_adv_interval,
                min_adv_interval: row.min_adv_interval,
                default_lifetime: row.default_lifetime,
                mtu: row.mtu,
                reachable_time: row.reachable_time,
                retrans_timer: row.retrans_timer,
                current_hop_limit: row.current_hop_limit,
                preferred_router,
            },
            prefixes: row.prefixes.clone(),
            rdnss: row.rdnss.clone(),
            dnssl: row.dnssl.iter().filter(|d| !d.is_empty()).cloned().collect(),
        })
    }

    fn update<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid, update: Ipv6RouteAdvUpdate) {
        cache.invalidate::<Self>(uuid);
        cache.detach_parent::<Self>(uuid);

        let Some(ra) = cache.object_mut::<Self>(&uuid) else {
            return;
        };
        ra.parent.interface = Some(update.interface);
        ra.status = update.status;
        ra.options = update.options;

        cache.sync_set::<Self>(uuid, SetField::Prefixes, &update.prefixes);
        cache.sync_set::<Self>(uuid, SetField::Rdnss, &update.rdnss);
        Self::sync_dnssl(cache, uuid, &update.dnssl);
        cache.attach_parent::<Self>(uuid);

        cache.revalidate::<Self>(uuid);
        Self::apply(cache, uuid, true);
    }

    fn deleted<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid) {
        Self::apply(cache, uuid, false);
    }

    fn parent_signalled<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid) {
        cache.refresh_set::<Self>(uuid, SetField::Prefixes);
        cache.refresh_set::<Self>(uuid, SetField::Rdnss);

        if let Some(ifname) = cache.parent_ifname::<Self>(uuid) {
            let domains: Vec<String> = cache
                .object::<Self>(&uuid)
                .map(|ra| ra.dnssl.iter().map(|(d, _)| d.clone()).collect())
                .unwrap_or_default();
            for domain in domains {
                cache.backend_call("radv_dnssl", &ifname, |b| b.radv_dnssl(&ifname, true, &domain));
            }
        }
        Self::apply(cache, uuid, true);
    }

    fn set_event<B: Backend, S: RecordStore>(
        cache: &mut Cache<B, S>,
        key: SetKey,
        event: UuidsetEvent,
        remote: RefId,
    ) {
        let Some(ifname) = cache.parent_ifname::<Self>(key.owner) else {
            debug!(set = %key, %event, "Interface not usable, advertisement change deferred");
            return;
        };
        let add = cache.event_adds(event, remote);

        match key.field {
            SetField::Prefixes => {
                let Some((prefix, autonomous, on_link)) = cache
                    .member::<Ipv6Prefix>(remote)
                    .and_then(|p| p.addr.map(|a| (a, p.autonomous, p.on_link)))
                else {
                    return;
                };
                cache.backend_call("radv_prefix", &ifname, |b| {
                    b.radv_prefix(&ifname, add, &prefix, autonomous, on_link)
                });
            }
            SetField::Rdnss => {
                let Some(addr) = cache.member::<Ipv6Address>(remote).and_then(|a| a.addr) else {
                    return;
                };
                cache.backend_call("radv_rdnss", &ifname, |b| b.radv_rdnss(&ifname, add, &addr));
            }
            _ => {
                warn!(set = %key, "Event for unknown set");
                return;
            }
        }
        cache.commit(&ifname);
    }
}

impl Ipv6RouteAdv {
    /// Reconcile the pushed search domains with `domains`. The backend only
    /// hears about it while the parent interface is valid and usable.
    fn sync_dnssl<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid, domains: &[String]) {
        let ifname = cache
            .object::<Self>(&uuid)
            .and_then(|ra| ra.parent.interface)
            .and_then(|iface| cache.object::<IpInterface>(&iface))
            .filter(|ipi| ipi.header.valid && ipi.usable)
            .map(|ipi| ipi.ifname.clone());

        let Some(ra) = cache.object_mut::<Self>(&uuid) else {
            return;
        };
        let mut dnssl = std::mem::take(&mut ra.dnssl);
        let backend = &mut cache.backend;

        let mut push = |add: bool, domain: &str| {
            if let Some(ifname) = ifname.as_deref() {
                let ok = backend.radv_dnssl(ifname, add, domain);
                backend_result("radv_dnssl", ifname, ok);
            }
        };
        let mut sync = |change: Change<'_, String, ()>| match change {
            Change::Insert { key, new } => {
                push(true, key);
                Some(new)
            }
            Change::Update { .. } => None,
            Change::Remove { key, .. } => {
                push(false, &key);
                None
            }
        };

        let mut pass = dnssl.begin();
        for domain in domains {
            pass.add(domain.clone(), (), &mut sync);
        }
        pass.end(&mut sync);

        if let Some(ra) = cache.object_mut::<Self>(&uuid) {
            ra.dnssl = dnssl;
        }
    }

    fn apply<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid, enable: bool) {
        let Some(ifname) = cache.parent_ifname::<Self>(uuid) else {
            debug!(%uuid, "Interface not usable, advertisement configuration deferred");
            return;
        };
        let Some(ra) = cache.object::<Self>(&uuid) else {
            return;
        };
        if !ra.header.valid {
            return;
        }
        let options = ra.options;
        debug!(%uuid, ifname, enable, status = %ra.status, "Applying router advertisement");

        if cache.backend_call("radv", &ifname, |b| b.radv(&ifname, enable, &options)) {
            cache.commit(&ifname);
        }
    }
}
