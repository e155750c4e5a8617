// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Row snapshots delivered by the upstream table store.
//!
//! Each table gets a plain serde struct that uses the table's column names.
//! `_uuid` maps to `uuid`. Optional columns default to empty, so a row with
//! only its identifier and required columns still deserializes.
//!
//! # Example
//!
//! ```
//! use netcache::schema::{IpInterfaceRow, RowEvent};
//! use serde_json::json;
//!
//! let event: RowEvent<IpInterfaceRow> = serde_json::from_value(json!({
//!     "op": "new",
//!     "row": {
//!         "_uuid": "00000000-0000-0000-0000-000000000001",
//!         "name": "br-lan",
//!         "enable": true
//!     }
//! })).unwrap();
//!
//! assert_eq!(event.uuid().as_u128(), 1);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Record types mirrored by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Table {
    #[serde(rename = "IP_Interface")]
    IpInterface,
    #[serde(rename = "IPv6_Address")]
    Ipv6Address,
    #[serde(rename = "IPv6_Prefix")]
    Ipv6Prefix,
    #[serde(rename = "DHCP_Option")]
    DhcpOption,
    #[serde(rename = "DHCPv6_Lease")]
    Dhcpv6Lease,
    #[serde(rename = "DHCPv6_Client")]
    Dhcpv6Client,
    #[serde(rename = "DHCPv6_Server")]
    Dhcpv6Server,
    #[serde(rename = "IPv6_RouteAdv")]
    Ipv6RouteAdv,
}

impl Table {
    pub const ALL: [Table; 8] = [
        Table::IpInterface,
        Table::Ipv6Address,
        Table::Ipv6Prefix,
        Table::DhcpOption,
        Table::Dhcpv6Lease,
        Table::Dhcpv6Client,
        Table::Dhcpv6Server,
        Table::Ipv6RouteAdv,
    ];

    /// Table name as used by the upstream store.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::IpInterface => "IP_Interface",
            Self::Ipv6Address => "IPv6_Address",
            Self::Ipv6Prefix => "IPv6_Prefix",
            Self::DhcpOption => "DHCP_Option",
            Self::Dhcpv6Lease => "DHCPv6_Lease",
            Self::Dhcpv6Client => "DHCPv6_Client",
            Self::Dhcpv6Server => "DHCPv6_Server",
            Self::Ipv6RouteAdv => "IPv6_RouteAdv",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single upstream change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "row", rename_all = "lowercase")]
pub enum RowEvent<T> {
    /// First appearance of a row, with its full snapshot.
    New(T),
    /// Full replacement snapshot of an existing row.
    Modify(T),
    /// Row removed; only its identifier is known.
    Delete(Uuid),
}

impl<T: Row> RowEvent<T> {
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::New(row) | Self::Modify(row) => row.uuid(),
            Self::Delete(uuid) => *uuid,
        }
    }

    #[must_use]
    pub fn op(&self) -> &'static str {
        match self {
            Self::New(_) => "new",
            Self::Modify(_) => "modify",
            Self::Delete(_) => "delete",
        }
    }
}

/// Common accessors for row snapshots.
pub trait Row {
    const TABLE: Table;

    fn uuid(&self) -> Uuid;
}

macro_rules! impl_row {
    ($($ty:ty => $table:expr),* $(,)?) => {
        $(
            impl Row for $ty {
                const TABLE: Table = $table;

                fn uuid(&self) -> Uuid {
                    self.uuid
                }
            }
        )*
    };
}

impl_row! {
    IpInterfaceRow => Table::IpInterface,
    Ipv6AddressRow => Table::Ipv6Address,
    Ipv6PrefixRow => Table::Ipv6Prefix,
    DhcpOptionRow => Table::DhcpOption,
    Dhcpv6LeaseRow => Table::Dhcpv6Lease,
    Dhcpv6ClientRow => Table::Dhcpv6Client,
    Dhcpv6ServerRow => Table::Dhcpv6Server,
    Ipv6RouteAdvRow => Table::Ipv6RouteAdv,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpInterfaceRow {
    #[serde(rename = "_uuid")]
    pub uuid: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enable: bool,
    /// Not mirrored; IPv4 is configured elsewhere.
    #[serde(default)]
    pub ipv4_addr: Vec<Uuid>,
    #[serde(default)]
    pub ipv6_addr: Vec<Uuid>,
    #[serde(default)]
    pub ipv6_prefix: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ipv6AddressRow {
    #[serde(rename = "_uuid")]
    pub uuid: Uuid,
    /// `ADDR/LEN[,PREFERRED,VALID]`
    pub address: String,
    /// `static` or `auto_configured`
    #[serde(default)]
    pub origin: String,
    /// Overrides the lifetime embedded in `address`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_lifetime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_lifetime: Option<String>,
    #[serde(default)]
    pub address_status: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub enable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ipv6PrefixRow {
    #[serde(rename = "_uuid")]
    pub uuid: Uuid,
    pub address: String,
    #[serde(default)]
    pub on_link: bool,
    #[serde(default)]
    pub autonomous: bool,
    #[serde(default)]
    pub enable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DhcpOptionRow {
    #[serde(rename = "_uuid")]
    pub uuid: Uuid,
    #[serde(default)]
    pub enable: bool,
    /// `v4` or `v6`
    pub version: String,
    /// `rx` or `tx`
    #[serde(rename = "type")]
    pub kind: String,
    pub tag: i64,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dhcpv6LeaseRow {
    #[serde(rename = "_uuid")]
    pub uuid: Uuid,
    #[serde(default)]
    pub status: String,
    pub prefix: String,
    #[serde(default)]
    pub duid: String,
    #[serde(default)]
    pub hwaddr: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub leased_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dhcpv6ClientRow {
    #[serde(rename = "_uuid")]
    pub uuid: Uuid,
    pub ip_interface: Uuid,
    #[serde(default)]
    pub request_address: bool,
    #[serde(default)]
    pub request_prefixes: bool,
    #[serde(default)]
    pub rapid_commit: bool,
    #[serde(default)]
    pub renew: bool,
    #[serde(default)]
    pub request_options: Vec<i64>,
    #[serde(default)]
    pub send_options: Vec<Uuid>,
    /// Written back by the cache from client status reports.
    #[serde(default)]
    pub received_options: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dhcpv6ServerRow {
    #[serde(rename = "_uuid")]
    pub uuid: Uuid,
    pub interface: Uuid,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub prefix_delegation: bool,
    #[serde(default)]
    pub prefixes: Vec<Uuid>,
    #[serde(default)]
    pub options: Vec<Uuid>,
    /// Written back by the cache from server status reports.
    #[serde(default)]
    pub lease_prefix: Vec<Uuid>,
    #[serde(default)]
    pub static_prefix: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ipv6RouteAdvRow {
    #[serde(rename = "_uuid")]
    pub uuid: Uuid,
    pub interface: Uuid,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub managed: Option<bool>,
    #[serde(default)]
    pub other_config: Option<bool>,
    #[serde(default)]
    pub home_agent: Option<bool>,
    #[serde(default)]
    pub max_adv_interval: Option<i64>,
    #[serde(default)]
    pub min_adv_interval: Option<i64>,
    #[serde(default)]
    pub default_lifetime: Option<i64>,
    #[serde(default)]
    pub mtu: Option<i64>,
    #[serde(default)]
    pub reachable_time: Option<i64>,
    #[serde(default)]
    pub retrans_timer: Option<i64>,
    #[serde(default)]
    pub current_hop_limit: Option<i64>,
    /// `low`, `medium` or `high`
    #[serde(default)]
    pub preferred_router: String,
    #[serde(default)]
    pub prefixes: Vec<Uuid>,
    #[serde(default)]
    pub rdnss: Vec<Uuid>,
    #[serde(default)]
    pub dnssl: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_names_round_trip_serde() {
        for table in Table::ALL {
            let v = serde_json::to_value(table).unwrap();
            assert_eq!(v, json!(table.name()));
            assert_eq!(table.to_string(), table.name());
        }
    }

    #[test]
    fn test_defaults_for_missing_columns() {
        let row: Dhcpv6ClientRow = serde_json::from_value(json!({
            "_uuid": Uuid::from_u128(7),
            "ip_interface": Uuid::from_u128(1),
        }))
        .unwrap();
        assert!(!row.request_address);
        assert!(row.request_options.is_empty());
        assert_eq!(row.uuid(), Uuid::from_u128(7));
    }

    #[test]
    fn test_delete_event() {
        let ev: RowEvent<DhcpOptionRow> = serde_json::from_value(json!({
            "op": "delete",
            "row": Uuid::from_u128(3),
        }))
        .unwrap();
        assert_eq!(ev, RowEvent::Delete(Uuid::from_u128(3)));
        assert_eq!(ev.op(), "delete");
        assert_eq!(ev.uuid(), Uuid::from_u128(3));
    }

    #[test]
    fn test_option_type_column_rename() {
        let row: DhcpOptionRow = serde_json::from_value(json!({
            "_uuid": Uuid::from_u128(9),
            "version": "v6",
            "type": "tx",
            "tag": 23,
            "value": "2001:db8::53",
        }))
        .unwrap();
        assert_eq!(row.kind, "tx");
        assert_eq!(row.tag, 23);
    }
}
