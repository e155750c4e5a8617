// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;
use uuid::Uuid;

use super::{ClientConfig, RouterAdvOptions, ServerLease};
use crate::addr::Ip6Addr;
use crate::schema::Table;

/// Downstream sink that turns cache state into interface configuration.
///
/// Every call names the target interface and returns false on failure. The
/// cache logs and counts failures but never retries on its own. Changes
/// are staged until [`Backend::commit`].
pub trait Backend {
    /// Whether the interface is known to the system. An `IP_Interface` row
    /// naming an unknown interface stays unusable until
    /// [`crate::Cache::interface_appeared`].
    fn interface_exists(&self, _ifname: &str) -> bool {
        true
    }

    fn ip6_addr(&mut self, ifname: &str, add: bool, addr: &Ip6Addr) -> bool;

    fn dhcp6_client(&mut self, ifname: &str, config: &ClientConfig) -> bool;

    /// Request (or stop requesting) option `tag` from the DHCPv6 server.
    fn dhcp6_client_option_request(&mut self, ifname: &str, tag: u8, request: bool) -> bool;

    /// Send option `tag` with `value`; `None` stops sending it.
    fn dhcp6_client_option_send(&mut self, ifname: &str, tag: u8, value: Option<&str>) -> bool;

    fn dhcp6_server(&mut self, ifname: &str, enable: bool) -> bool;

    fn dhcp6_server_prefix(&mut self, ifname: &str, add: bool, prefix: &Ip6Addr) -> bool;

    fn dhcp6_server_option_send(&mut self, ifname: &str, tag: u8, value: Option<&str>) -> bool;

    fn dhcp6_server_lease(&mut self, ifname: &str, add: bool, lease: &ServerLease) -> bool;

    fn radv(&mut self, ifname: &str, enable: bool, options: &RouterAdvOptions) -> bool;

    fn radv_prefix(&mut self, ifname: &str, add: bool, prefix: &Ip6Addr, autonomous: bool, on_link: bool) -> bool;

    fn radv_rdnss(&mut self, ifname: &str, add: bool, addr: &Ip6Addr) -> bool;

    fn radv_dnssl(&mut self, ifname: &str, add: bool, domain: &str) -> bool;

    fn commit(&mut self, ifname: &str) -> bool;
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{table} row {uuid} not found")]
    NotFound { table: Table, uuid: Uuid },
    #[error("Row rejected: {0}")]
    Rejected(String),
    #[error("Record store error: {0}")]
    Backend(String),
    #[error("Row serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Write-back path into the upstream table store.
///
/// Used for state the cache learns from the system (received DHCP options,
/// server leases, addresses reported on an interface). The upstream store
/// echoes every write back as a regular row event.
pub trait RecordStore {
    /// Insert `row` into `table` and append its new UUID to
    /// `parent_table[parent].column`. Returns the new UUID.
    fn insert_with_parent(
        &mut self,
        table: Table,
        row: serde_json::Value,
        parent_table: Table,
        parent: Uuid,
        column: &str,
    ) -> Result<Uuid, StoreError>;

    /// Drop `child` from `parent_table[parent].column`.
    fn remove_from_parent(
        &mut self,
        parent_table: Table,
        parent: Uuid,
        column: &str,
        child: Uuid,
    ) -> Result<(), StoreError>;
}
