// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Collaborators of the cache: the apply sink and the write-back store.
//!
//! ```text
//!   upstream rows ──▶ Cache ──▶ Backend (interface configuration)
//!        ▲              │
//!        └── RecordStore ◀┘  (status write-back)
//! ```
//!
//! Payload types shared by both directions live here.

pub mod memory;
pub mod traits;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::addr::Ip6Addr;

pub use memory::{BackendCall, MemoryRecordStore, RecordingBackend};
pub use traits::{Backend, RecordStore, StoreError};

/// DHCPv6 client settings pushed with [`Backend::dhcp6_client`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientConfig {
    pub enable: bool,
    pub request_address: bool,
    pub request_prefixes: bool,
    pub rapid_commit: bool,
    /// Renew the current lease instead of soliciting a new one.
    pub renew: bool,
}

/// One lease handed out by the DHCPv6 server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLease {
    pub addr: Ip6Addr,
    pub duid: String,
    pub hostname: String,
    pub leased_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterPreference {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl RouterPreference {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl fmt::Display for RouterPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Router advertisement options. `None` leaves the daemon default in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterAdvOptions {
    pub managed: Option<bool>,
    pub other_config: Option<bool>,
    pub home_agent: Option<bool>,
    pub max_adv_interval: Option<i64>,
    pub min_adv_interval: Option<i64>,
    pub default_lifetime: Option<i64>,
    pub mtu: Option<i64>,
    pub reachable_time: Option<i64>,
    pub retrans_timer: Option<i64>,
    pub current_hop_limit: Option<i64>,
    pub preferred_router: Option<RouterPreference>,
}

/// Status report from a DHCPv6 client: received option data by tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStatus {
    pub received_options: BTreeMap<u8, String>,
}

impl ClientStatus {
    pub fn with_option(mut self, tag: u8, data: impl Into<String>) -> Self {
        self.received_options.insert(tag, data.into());
        self
    }
}

/// Status report from a DHCPv6 server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStatus {
    pub leases: Vec<ServerLease>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_preference_parse() {
        assert_eq!(RouterPreference::parse("low"), Some(RouterPreference::Low));
        assert_eq!(RouterPreference::parse("high"), Some(RouterPreference::High));
        assert_eq!(RouterPreference::parse("HIGH"), None);
        assert_eq!(RouterPreference::Medium as u8, 1);
        assert_eq!(RouterPreference::Medium.to_string(), "medium");
    }

    #[test]
    fn test_client_status_builder() {
        let status = ClientStatus::default().with_option(23, "2001:db8::53").with_option(24, "lan");
        assert_eq!(status.received_options.len(), 2);
        assert_eq!(status.received_options[&24], "lan");
    }
}
