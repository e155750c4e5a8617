// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use tracing::debug;
use uuid::Uuid;

use super::record::{record_storage, Header, Record};
use super::types::Route;
use super::Cache;
use crate::addr::Ip6Addr;
use crate::backend::{Backend, RecordStore};
use crate::config::CacheConfig;
use crate::reflink::{RefGraph, ReflinkError};
use crate::schema::{Ipv6PrefixRow, Table};

pub(crate) struct Ipv6Prefix {
    pub header: Header,
    pub addr: Option<Ip6Addr>,
    pub on_link: bool,
    pub autonomous: bool,
    pub enable: bool,
}

pub(crate) struct Ipv6PrefixUpdate {
    addr: Ip6Addr,
    on_link: bool,
    autonomous: bool,
    enable: bool,
}

impl Record for Ipv6Prefix {
    const TABLE: Table = Table::Ipv6Prefix;

    type Row = Ipv6PrefixRow;
    type Update = Ipv6PrefixUpdate;

    record_storage!(ipv6_prefixes);

    fn create(graph: &mut RefGraph<Route>, uuid: Uuid) -> Result<Self, ReflinkError> {
        Ok(Self {
            header: Header::create(graph, Self::TABLE, uuid)?,
            addr: None,
            on_link: false,
            autonomous: false,
            enable: false,
        })
    }

    fn parse(_config: &CacheConfig, row: &Ipv6PrefixRow) -> Result<Ipv6PrefixUpdate, String> {
        Ok(Ipv6PrefixUpdate {
            addr: row.address.parse().map_err(|e| format!("{e}"))?,
            on_link: row.on_link,
            autonomous: row.autonomous,
            enable: row.enable,
        })
    }

    fn update<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid, update: Ipv6PrefixUpdate) {
        cache.invalidate::<Self>(uuid);
        let Some(prefix) = cache.object_mut::<Self>(&uuid) else {
            return;
        };
        prefix.addr = Some(update.addr);
        prefix.on_link = update.on_link;
        prefix.autonomous = update.autonomous;
        prefix.enable = update.enable;
        debug!(%uuid, prefix = %update.addr, enable = prefix.enable, "Prefix updated");
        cache.revalidate::<Self>(uuid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefix_with_lifetimes() {
        let row = Ipv6PrefixRow {
            uuid: Uuid::from_u128(1),
            address: "2001:db8:1::/48,3600,7200".into(),
            on_link: true,
            ..Default::default()
        };
        let update = Ipv6Prefix::parse(&CacheConfig::default(), &row).unwrap();
        assert_eq!(update.addr.prefix_len, Some(48));
        assert_eq!(update.addr.valid_lifetime, Some(7200));
        assert!(update.on_link);
        assert!(!update.autonomous);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let row = Ipv6PrefixRow {
            uuid: Uuid::from_u128(1),
            address: "not-a-prefix".into(),
            ..Default::default()
        };
        assert!(Ipv6Prefix::parse(&CacheConfig::default(), &row).is_err());
    }
}
