//! Public types for the network cache.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::schema::Table;

/// What a reflink belongs to. Stored as the reflink tag and used to route
/// callbacks back to the owning object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Route {
    /// An object's main link. Other objects subscribe to it.
    Object { table: Table, uuid: Uuid },
    /// A child's subscription to its parent `IP_Interface`.
    Parent { table: Table, uuid: Uuid },
    /// A foreign-key set of an object.
    Set(SetKey),
}

/// Identifies one set column of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SetKey {
    pub table: Table,
    pub owner: Uuid,
    pub field: SetField,
}

impl std::fmt::Display for SetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}].{}", self.table, self.owner, self.field)
    }
}

/// Set-valued columns that hold references to other rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SetField {
    Ipv6Addr,
    Ipv6Prefix,
    SendOptions,
    ReceivedOptions,
    Prefixes,
    Options,
    LeasePrefix,
    StaticPrefix,
    Rdnss,
}

impl SetField {
    /// Column name in the owning table.
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Self::Ipv6Addr => "ipv6_addr",
            Self::Ipv6Prefix => "ipv6_prefix",
            Self::SendOptions => "send_options",
            Self::ReceivedOptions => "received_options",
            Self::Prefixes => "prefixes",
            Self::Options => "options",
            Self::LeasePrefix => "lease_prefix",
            Self::StaticPrefix => "static_prefix",
            Self::Rdnss => "rdnss",
        }
    }

    /// Table the members of this column live in.
    #[must_use]
    pub fn member_table(self) -> Table {
        match self {
            Self::Ipv6Addr | Self::Rdnss => Table::Ipv6Address,
            Self::Ipv6Prefix | Self::Prefixes => Table::Ipv6Prefix,
            Self::SendOptions | Self::ReceivedOptions | Self::Options => Table::DhcpOption,
            Self::LeasePrefix | Self::StaticPrefix => Table::Dhcpv6Lease,
        }
    }
}

impl std::fmt::Display for SetField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

/// Lifecycle state of one cached object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Not in the cache
    Absent,
    /// Referenced, but no accepted row is currently backing it
    Placeholder,
    /// Backed by an accepted row
    Valid,
}

impl std::fmt::Display for ObjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "Absent"),
            Self::Placeholder => write!(f, "Placeholder"),
            Self::Valid => write!(f, "Valid"),
        }
    }
}

/// Point-in-time counters, see [`super::Cache::stats()`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Cached objects per table, placeholders included
    pub objects: BTreeMap<Table, usize>,
    /// Valid objects per table
    pub valid: BTreeMap<Table, usize>,
    /// Live reflinks
    pub reflinks: usize,
    /// Signal deliveries routed to a parent or set subscriber so far
    pub deliveries: u64,
}

impl CacheStats {
    /// Total cached objects across tables.
    #[must_use]
    pub fn total_objects(&self) -> usize {
        self.objects.values().sum()
    }
}
