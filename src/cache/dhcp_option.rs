// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use tracing::debug;
use uuid::Uuid;

use super::record::{record_storage, Header, Record};
use super::types::Route;
use super::Cache;
use crate::backend::{Backend, RecordStore};
use crate::config::CacheConfig;
use crate::reflink::{RefGraph, ReflinkError};
use crate::schema::{DhcpOptionRow, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DhcpVersion {
    V4,
    V6,
}

/// Whether the option was received from a peer or is sent to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OptionKind {
    Rx,
    Tx,
}

pub(crate) struct DhcpOption {
    pub header: Header,
    pub enable: bool,
    pub version: DhcpVersion,
    pub kind: OptionKind,
    pub tag: u8,
    pub value: String,
}

pub(crate) struct DhcpOptionUpdate {
    enable: bool,
    version: DhcpVersion,
    kind: OptionKind,
    tag: u8,
    value: String,
}

impl Record for DhcpOption {
    const TABLE: Table = Table::DhcpOption;

    type Row = DhcpOptionRow;
    type Update = DhcpOptionUpdate;

    record_storage!(dhcp_options);

    fn create(graph: &mut RefGraph<Route>, uuid: Uuid) -> Result<Self, ReflinkError> {
        Ok(Self {
            header: Header::create(graph, Self::TABLE, uuid)?,
            enable: false,
            version: DhcpVersion::V6,
            kind: OptionKind::Tx,
            tag: 0,
            value: String::new(),
        })
    }

    fn parse(config: &CacheConfig, row: &DhcpOptionRow) -> Result<DhcpOptionUpdate, String> {
        let version = match row.version.as_str() {
            "v4" => DhcpVersion::V4,
            "v6" => DhcpVersion::V6,
            other => return Err(format!("unknown version {other:?}")),
        };
        let kind = match row.kind.as_str() {
            "rx" => OptionKind::Rx,
            "tx" => OptionKind::Tx,
            other => return Err(format!("unknown type {other:?}")),
        };
        let tag = u8::try_from(row.tag).map_err(|_| format!("tag {} out of range", row.tag))?;
        if row.value.len() > config.max_option_value_len {
            return Err(format!("value longer than {} bytes", config.max_option_value_len));
        }

        Ok(DhcpOptionUpdate {
            enable: row.enable,
            version,
            kind,
            tag,
            value: row.value.clone(),
        })
    }

    fn update<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid, update: DhcpOptionUpdate) {
        cache.invalidate::<Self>(uuid);
        let Some(option) = cache.object_mut::<Self>(&uuid) else {
            return;
        };
        option.enable = update.enable;
        option.version = update.version;
        option.kind = update.kind;
        option.tag = update.tag;
        option.value = update.value;
        debug!(
            %uuid,
            tag = option.tag,
            version = ?option.version,
            kind = ?option.kind,
            enable = option.enable,
            "Option updated"
        );
        cache.revalidate::<Self>(uuid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(version: &str, kind: &str, tag: i64, value: &str) -> DhcpOptionRow {
        DhcpOptionRow {
            uuid: Uuid::from_u128(1),
            enable: true,
            version: version.into(),
            kind: kind.into(),
            tag,
            value: value.into(),
        }
    }

    #[test]
    fn test_parse_valid_option() {
        let update = DhcpOption::parse(&CacheConfig::default(), &row("v6", "tx", 23, "2001:db8::53")).unwrap();
        assert_eq!(update.tag, 23);
        assert_eq!(update.version, DhcpVersion::V6);
        assert_eq!(update.kind, OptionKind::Tx);
    }

    #[test]
    fn test_parse_rejects_bad_columns() {
        let config = CacheConfig::default();
        assert!(DhcpOption::parse(&config, &row("v5", "tx", 23, "")).is_err());
        assert!(DhcpOption::parse(&config, &row("v6", "both", 23, "")).is_err());
        assert!(DhcpOption::parse(&config, &row("v6", "tx", 256, "")).is_err());
        assert!(DhcpOption::parse(&config, &row("v6", "tx", -1, "")).is_err());
        assert!(DhcpOption::parse(&config, &row("v6", "tx", 1, &"a".repeat(341))).is_err());
    }
}
