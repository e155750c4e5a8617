// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `IPv6_Address` rows and addresses the system reports on an interface.

use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::ip_interface::IpInterface;
use super::record::{record_storage, Header, Record};
use super::types::{Route, SetField};
use super::Cache;
use crate::addr::Ip6Addr;
use crate::backend::{Backend, RecordStore};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::metrics;
use crate::reflink::{RefGraph, ReflinkError};
use crate::schema::{Ipv6AddressRow, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddrOrigin {
    Static,
    AutoConfigured,
}

pub(crate) struct Ipv6Address {
    pub header: Header,
    pub addr: Option<Ip6Addr>,
    pub origin: AddrOrigin,
    pub enable: bool,
    pub status: String,
}

pub(crate) struct Ipv6AddressUpdate {
    addr: Ip6Addr,
    origin: AddrOrigin,
    enable: bool,
    status: String,
}

fn parse_lifetime(column: &str, value: &str) -> Result<i32, String> {
    value
        .trim()
        .parse::<i32>()
        .map_err(|_| format!("invalid {column} {value:?}"))
}

impl Record for Ipv6Address {
    const TABLE: Table = Table::Ipv6Address;

    type Row = Ipv6AddressRow;
    type Update = Ipv6AddressUpdate;

    record_storage!(ipv6_addresses);

    fn create(graph: &mut RefGraph<Route>, uuid: Uuid) -> Result<Self, ReflinkError> {
        Ok(Self {
            header: Header::create(graph, Self::TABLE, uuid)?,
            addr: None,
            origin: AddrOrigin::AutoConfigured,
            enable: false,
            status: String::new(),
        })
    }

    fn parse(_config: &CacheConfig, row: &Ipv6AddressRow) -> Result<Ipv6AddressUpdate, String> {
        let mut addr: Ip6Addr = row.address.parse().map_err(|e| format!("{e}"))?;

        // The lifetime columns take precedence over the address suffix
        if let Some(preferred) = row.preferred_lifetime.as_deref() {
            addr.preferred_lifetime = Some(parse_lifetime("preferred_lifetime", preferred)?);
        }
        if let Some(valid) = row.valid_lifetime.as_deref() {
            addr.valid_lifetime = Some(parse_lifetime("valid_lifetime", valid)?);
        }

        let origin = if row.origin == "static" {
            AddrOrigin::Static
        } else {
            AddrOrigin::AutoConfigured
        };

        Ok(Ipv6AddressUpdate {
            addr,
            origin,
            enable: row.enable,
            status: row.address_status.clone(),
        })
    }

    fn update<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid, update: Ipv6AddressUpdate) {
        cache.invalidate::<Self>(uuid);
        let Some(addr) = cache.object_mut::<Self>(&uuid) else {
            return;
        };
        addr.addr = Some(update.addr);
        addr.origin = update.origin;
        addr.enable = update.enable;
        addr.status = update.status;
        debug!(%uuid, addr = ?addr.addr, enable = addr.enable, status = %addr.status, "Address updated");
        cache.revalidate::<Self>(uuid);
    }
}

impl<B: Backend, S: RecordStore> Cache<B, S> {
    /// Mirror an address the system reports on `ifname`.
    ///
    /// Additions are written back as `IPv6_Address` rows under the
    /// interface's `ipv6_addr` column; the row then arrives through the
    /// regular [`Cache::ipv6_address`] path. Removals drop the matching
    /// member, compared without lifetimes.
    #[tracing::instrument(skip(self, addr), fields(addr = %addr))]
    pub fn ipv6_address_status(&mut self, ifname: &str, addr: &Ip6Addr, removed: bool) -> Result<(), CacheError> {
        let Some(parent) = self.interface_by_name(ifname) else {
            error!(ifname, "Address report for unknown interface");
            return Err(CacheError::UnknownInterface(ifname.to_string()));
        };
        let bare = addr.without_lifetimes();

        if !self.config.write_back {
            debug!(ifname, removed, "Write-back disabled, ignoring address report");
            return Ok(());
        }

        if !removed {
            let row = json!({
                "address": bare.to_string(),
                "prefix": bare.to_string(),
                "origin": "auto_configured",
                "address_status": "unknown",
                "enable": true,
            });
            let result = self.store.insert_with_parent(
                Table::Ipv6Address,
                row,
                Table::IpInterface,
                parent,
                SetField::Ipv6Addr.column(),
            );
            metrics::record_store_write("insert", result.is_ok());
            let uuid = result?;
            info!(ifname, %uuid, "Reported address written back");
            return Ok(());
        }

        let found = self.object::<IpInterface>(&parent).and_then(|ipi| {
            ipi.ipv6_addr()
                .ids()
                .copied()
                .find(|id| {
                    self.object::<Ipv6Address>(id)
                        .and_then(|a| a.addr)
                        .map_or(false, |a| a.without_lifetimes() == bare)
                })
        });
        let Some(child) = found else {
            error!(ifname, "Reported address removal for unknown address");
            return Err(CacheError::AddressNotFound {
                ifname: ifname.to_string(),
                addr: bare.to_string(),
            });
        };

        let result = self
            .store
            .remove_from_parent(Table::IpInterface, parent, SetField::Ipv6Addr.column(), child);
        metrics::record_store_write("remove", result.is_ok());
        result?;
        info!(ifname, %child, "Reported address removed");
        Ok(())
    }
}
