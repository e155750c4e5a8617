// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the network cache.
//!
//! # Example
//!
//! ```
//! use netcache::CacheConfig;
//!
//! // Minimal config (uses defaults)
//! let config = CacheConfig::default();
//! assert_eq!(config.max_ifname_len, 64);
//!
//! // Dry run: apply to the backend, never write rows back
//! let config = CacheConfig {
//!     write_back: false,
//!     ..Default::default()
//! };
//! assert!(config.commit_on_change);
//! ```

use serde::Deserialize;

/// Configuration for the network cache.
///
/// The length limits match the column constraints of the upstream schema.
/// Rows exceeding them are rejected as malformed.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Longest accepted interface name (default: 64)
    #[serde(default = "default_max_ifname_len")]
    pub max_ifname_len: usize,

    /// Most option tags a DHCPv6 client may request (default: 32)
    #[serde(default = "default_max_request_options")]
    pub max_request_options: usize,

    /// Longest DHCP option value (default: 340)
    #[serde(default = "default_max_option_value_len")]
    pub max_option_value_len: usize,

    /// Lease field limits
    #[serde(default = "default_max_duid_len")]
    pub max_duid_len: usize,
    #[serde(default = "default_max_hostname_len")]
    pub max_hostname_len: usize,
    #[serde(default = "default_max_lease_status_len")]
    pub max_lease_status_len: usize,

    /// Longest DHCPv6 server status string (default: 16)
    #[serde(default = "default_max_server_status_len")]
    pub max_server_status_len: usize,

    /// Longest router advertisement status string (default: 16)
    #[serde(default = "default_max_routeadv_status_len")]
    pub max_routeadv_status_len: usize,

    /// Call `Backend::commit` after every apply (default: true)
    #[serde(default = "default_true")]
    pub commit_on_change: bool,

    /// Write status reports back through the record store (default: true)
    #[serde(default = "default_true")]
    pub write_back: bool,
}

fn default_max_ifname_len() -> usize { 64 }
fn default_max_request_options() -> usize { 32 }
fn default_max_option_value_len() -> usize { 340 }
fn default_max_duid_len() -> usize { 260 }
fn default_max_hostname_len() -> usize { 64 }
fn default_max_lease_status_len() -> usize { 32 }
fn default_max_server_status_len() -> usize { 16 }
fn default_max_routeadv_status_len() -> usize { 16 }
fn default_true() -> bool { true }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_ifname_len: default_max_ifname_len(),
            max_request_options: default_max_request_options(),
            max_option_value_len: default_max_option_value_len(),
            max_duid_len: default_max_duid_len(),
            max_hostname_len: default_max_hostname_len(),
            max_lease_status_len: default_max_lease_status_len(),
            max_server_status_len: default_max_server_status_len(),
            max_routeadv_status_len: default_max_routeadv_status_len(),
            commit_on_change: default_true(),
            write_back: default_true(),
        }
    }
}
