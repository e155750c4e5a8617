// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use tracing::debug;
use uuid::Uuid;

use super::record::{record_storage, Header, Record};
use super::types::Route;
use super::Cache;
use crate::addr::Ip6Addr;
use crate::backend::{Backend, RecordStore, ServerLease};
use crate::config::CacheConfig;
use crate::reflink::{RefGraph, ReflinkError};
use crate::schema::{Dhcpv6LeaseRow, Table};

pub(crate) struct Dhcpv6Lease {
    pub header: Header,
    pub status: String,
    pub prefix: Option<Ip6Addr>,
    pub duid: String,
    pub hwaddr: Option<[u8; 6]>,
    pub hostname: String,
    pub leased_time: i64,
}

pub(crate) struct Dhcpv6LeaseUpdate {
    status: String,
    prefix: Ip6Addr,
    duid: String,
    hwaddr: Option<[u8; 6]>,
    hostname: String,
    leased_time: i64,
}

impl Dhcpv6Lease {
    /// The lease as handed to the DHCPv6 server.
    pub fn server_lease(&self) -> Option<ServerLease> {
        Some(ServerLease {
            addr: self.prefix?,
            duid: self.duid.clone(),
            hostname: self.hostname.clone(),
            leased_time: self.leased_time,
        })
    }
}

/// `aa:bb:cc:dd:ee:ff`
fn parse_hwaddr(s: &str) -> Option<[u8; 6]> {
    let mut out = [0u8; 6];
    let mut parts = s.split(':');
    for byte in &mut out {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    parts.next().is_none().then_some(out)
}

fn check_len(column: &str, value: &str, max: usize) -> Result<(), String> {
    if value.len() > max {
        return Err(format!("{column} longer than {max} bytes"));
    }
    Ok(())
}

impl Record for Dhcpv6Lease {
    const TABLE: Table = Table::Dhcpv6Lease;

    type Row = Dhcpv6LeaseRow;
    type Update = Dhcpv6LeaseUpdate;

    record_storage!(dhcpv6_leases);

    fn create(graph: &mut RefGraph<Route>, uuid: Uuid) -> Result<Self, ReflinkError> {
        Ok(Self {
            header: Header::create(graph, Self::TABLE, uuid)?,
            status: String::new(),
            prefix: None,
            duid: String::new(),
            hwaddr: None,
            hostname: String::new(),
            leased_time: 0,
        })
    }

    fn parse(config: &CacheConfig, row: &Dhcpv6LeaseRow) -> Result<Dhcpv6LeaseUpdate, String> {
        check_len("status", &row.status, config.max_lease_status_len)?;
        check_len("duid", &row.duid, config.max_duid_len)?;
        check_len("hostname", &row.hostname, config.max_hostname_len)?;

        let prefix = row.prefix.parse().map_err(|e| format!("{e}"))?;
        let hwaddr = if row.hwaddr.is_empty() {
            None
        } else {
            Some(parse_hwaddr(&row.hwaddr).ok_or_else(|| format!("invalid hwaddr {:?}", row.hwaddr))?)
        };

        Ok(Dhcpv6LeaseUpdate {
            status: row.status.clone(),
            prefix,
            duid: row.duid.clone(),
            hwaddr,
            hostname: row.hostname.clone(),
            leased_time: row.leased_time,
        })
    }

    fn update<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid, update: Dhcpv6LeaseUpdate) {
        cache.invalidate::<Self>(uuid);
        let Some(lease) = cache.object_mut::<Self>(&uuid) else {
            return;
        };
        lease.status = update.status;
        lease.prefix = Some(update.prefix);
        lease.duid = update.duid;
        lease.hwaddr = update.hwaddr;
        lease.hostname = update.hostname;
        lease.leased_time = update.leased_time;
        debug!(
            %uuid,
            prefix = %update.prefix,
            status = %lease.status,
            hwaddr = ?lease.hwaddr,
            "Lease updated"
        );
        cache.revalidate::<Self>(uuid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Dhcpv6LeaseRow {
        Dhcpv6LeaseRow {
            uuid: Uuid::from_u128(1),
            status: "leased".into(),
            prefix: "2001:db8:0:10::/64".into(),
            duid: "00:01:00:01:2a:2b:2c:2d".into(),
            hwaddr: "02:00:00:aa:bb:cc".into(),
            hostname: "laptop".into(),
            leased_time: 3600,
        }
    }

    #[test]
    fn test_parse_lease() {
        let update = Dhcpv6Lease::parse(&CacheConfig::default(), &row()).unwrap();
        assert_eq!(update.hwaddr, Some([0x02, 0, 0, 0xaa, 0xbb, 0xcc]));
        assert_eq!(update.prefix.prefix_len, Some(64));
    }

    #[test]
    fn test_parse_rejects_oversized_and_bad_hwaddr() {
        let config = CacheConfig::default();
        let r = Dhcpv6LeaseRow {
            hostname: "h".repeat(65),
            ..row()
        };
        assert!(Dhcpv6Lease::parse(&config, &r).is_err());

        let r = Dhcpv6LeaseRow {
            hwaddr: "02:00:00:aa:bb".into(),
            ..row()
        };
        assert!(Dhcpv6Lease::parse(&config, &r).is_err());

        let r = Dhcpv6LeaseRow {
            hwaddr: String::new(),
            ..row()
        };
        assert_eq!(Dhcpv6Lease::parse(&config, &r).unwrap().hwaddr, None);
    }

    #[test]
    fn test_hwaddr_parser() {
        assert_eq!(parse_hwaddr("ff:ff:ff:ff:ff:ff"), Some([0xff; 6]));
        assert_eq!(parse_hwaddr("ff:ff:ff:ff:ff:ff:ff"), None);
        assert_eq!(parse_hwaddr("f:ff:ff:ff:ff:fff"), None);
        assert_eq!(parse_hwaddr("zz:ff:ff:ff:ff:ff"), None);
    }
}
