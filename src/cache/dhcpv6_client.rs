// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `DHCPv6_Client`: client configuration per interface, plus the options
//! the running client reports back.

use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::dhcp_option::DhcpOption;
use super::record::{create_set, record_storage, Header, ParentLink, Record};
use super::types::{Route, SetField, SetKey};
use super::Cache;
use crate::backend::{Backend, ClientConfig, ClientStatus, RecordStore, StoreError};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::metrics;
use crate::reflink::{RefGraph, RefId, ReflinkError};
use crate::schema::{Dhcpv6ClientRow, Table};
use crate::synclist::{Change, SyncList};
use crate::uuidset::{UuidSet, UuidsetEvent};

/// A received option as last reported, keyed by `(tag, data)`.
#[derive(Debug, Default)]
pub(crate) struct ReceivedOption {
    /// Row written back for it, if any.
    uuid: Option<Uuid>,
}

pub(crate) struct Dhcpv6Client {
    pub header: Header,
    parent: ParentLink,
    request_address: bool,
    request_prefixes: bool,
    rapid_commit: bool,
    renew: bool,
    request_options: Vec<u8>,
    send_options: UuidSet,
    received_options: UuidSet,
    received: SyncList<(u8, String), ReceivedOption>,
}

pub(crate) struct Dhcpv6ClientUpdate {
    ip_interface: Uuid,
    request_address: bool,
    request_prefixes: bool,
    rapid_commit: bool,
    renew: bool,
    request_options: Vec<u8>,
    send_options: Vec<Uuid>,
    received_options: Vec<Uuid>,
}

impl Record for Dhcpv6Client {
    const TABLE: Table = Table::Dhcpv6Client;
    const SETS: &'static [SetField] = &[SetField::SendOptions, SetField::ReceivedOptions];

    type Row = Dhcpv6ClientRow;
    type Update = Dhcpv6ClientUpdate;

    record_storage!(dhcpv6_clients);

    fn create(graph: &mut RefGraph<Route>, uuid: Uuid) -> Result<Self, ReflinkError> {
        Ok(Self {
            header: Header::create(graph, Self::TABLE, uuid)?,
            parent: ParentLink::create(graph, Self::TABLE, uuid)?,
            request_address: false,
            request_prefixes: false,
            rapid_commit: false,
            renew: false,
            request_options: Vec::new(),
            send_options: create_set(graph, Self::TABLE, uuid, SetField::SendOptions)?,
            received_options: create_set(graph, Self::TABLE, uuid, SetField::ReceivedOptions)?,
            received: SyncList::new(),
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
            SetField::SendOptions => Some(&self.send_options),
            SetField::ReceivedOptions => Some(&self.received_options),
            _ => None,
        }
    }

    fn uuidset_mut(&mut self, field: SetField) -> Option<&mut UuidSet> {
        match field {
            SetField::SendOptions => Some(&mut self.send_options),
            SetField::ReceivedOptions => Some(&mut self.received_options),
            _ => None,
        }
    }

    fn parse(config: &CacheConfig, row: &Dhcpv6ClientRow) -> Result<Dhcpv6ClientUpdate, String> {
        if row.request_options.len() > config.max_request_options {
            return Err(format!("more than {} requested options", config.max_request_options));
        }
        let request_options = row
            .request_options
            .iter()
            .map(|&tag| u8::try_from(tag).map_err(|_| format!("requested option {tag} out of range")))
            .collect::<Result<Vec<u8>, String>>()?;

        Ok(Dhcpv6ClientUpdate {
            ip_interface: row.ip_interface,
            request_address: row.request_address,
            request_prefixes: row.request_prefixes,
            rapid_commit: row.rapid_commit,
            renew: row.renew,
            request_options,
            send_options: row.send_options.clone(),
            received_options: row.received_options.clone(),
        })
    }

    fn update<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid, update: Dhcpv6ClientUpdate) {
        cache.invalidate::<Self>(uuid);
        cache.detach_parent::<Self>(uuid);

        let Some(client) = cache.object_mut::<Self>(&uuid) else {
            return;
        };
        client.parent.interface = Some(update.ip_interface);
        client.request_address = update.request_address;
        client.request_prefixes = update.request_prefixes;
        client.rapid_commit = update.rapid_commit;
        client.renew = update.renew;
        client.request_options = update.request_options;

        cache.sync_set::<Self>(uuid, SetField::SendOptions, &update.send_options);
        cache.sync_set::<Self>(uuid, SetField::ReceivedOptions, &update.received_options);
        cache.attach_parent::<Self>(uuid);

        cache.revalidate::<Self>(uuid);
        Self::apply(cache, uuid, true);
    }

    fn deleted<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid) {
        Self::apply(cache, uuid, false);
    }

    fn parent_signalled<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid) {
        cache.refresh_set::<Self>(uuid, SetField::SendOptions);
        cache.refresh_set::<Self>(uuid, SetField::ReceivedOptions);
        Self::apply(cache, uuid, true);
    }

    fn set_event<B: Backend, S: RecordStore>(
        cache: &mut Cache<B, S>,
        key: SetKey,
        event: UuidsetEvent,
        remote: RefId,
    ) {
        match key.field {
            SetField::SendOptions => {
                let Some(ifname) = cache.parent_ifname::<Self>(key.owner) else {
                    debug!(set = %key, %event, "Interface not usable, option change deferred");
                    return;
                };
                let Some(option) = cache.member::<DhcpOption>(remote) else {
                    return;
                };
                let tag = option.tag;
                let value = cache.event_adds(event, remote).then(|| option.value.clone());

                cache.backend_call("dhcp6_client_option_send", &ifname, |b| {
                    b.dhcp6_client_option_send(&ifname, tag, value.as_deref())
                });
                cache.commit(&ifname);
            }
            // Mirrors of what the client reported; nothing to push
            SetField::ReceivedOptions => debug!(set = %key, %event, "Received option changed"),
            _ => warn!(set = %key, "Event for unknown set"),
        }
    }
}

impl Dhcpv6Client {
    /// Push the client configuration and the requested option list.
    fn apply<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid, enable: bool) {
        let Some(ifname) = cache.parent_ifname::<Self>(uuid) else {
            debug!(%uuid, "Interface not usable, client configuration deferred");
            return;
        };
        let Some(client) = cache.object::<Self>(&uuid) else {
            return;
        };
        if enable && !client.header.valid {
            return;
        }

        let config = ClientConfig {
            enable,
            request_address: client.request_address,
            request_prefixes: client.request_prefixes,
            rapid_commit: client.rapid_commit,
            renew: client.renew,
        };
        let requested = client.request_options.clone();
        debug!(%uuid, ifname, enable, "Applying DHCPv6 client");

        if !cache.backend_call("dhcp6_client", &ifname, |b| b.dhcp6_client(&ifname, &config)) {
            return;
        }
        for tag in 0..=u8::MAX {
            let request = requested.contains(&tag);
            cache.backend_call("dhcp6_client_option_request", &ifname, |b| {
                b.dhcp6_client_option_request(&ifname, tag, request)
            });
        }
        cache.commit(&ifname);
    }
}

impl<B: Backend, S: RecordStore> Cache<B, S> {
    /// Reconcile the options a running DHCPv6 client reports.
    ///
    /// New `(tag, data)` pairs are written back as `DHCP_Option` rows under
    /// the client's `received_options`; pairs no longer reported are dropped
    /// from that column. A pair whose write-back fails is retried on the
    /// next report.
    #[tracing::instrument(skip(self, status), fields(options = status.received_options.len()))]
    pub fn dhcpv6_client_status(&mut self, uuid: Uuid, status: &ClientStatus) -> Result<(), CacheError> {
        let Some(client) = self
            .object_mut::<Dhcpv6Client>(&uuid)
            .filter(|c| c.header.valid)
        else {
            error!(%uuid, "Status for unknown DHCPv6 client");
            return Err(CacheError::NotFound {
                table: Table::Dhcpv6Client,
                uuid,
            });
        };
        let mut received = std::mem::take(&mut client.received);

        let write_back = self.config.write_back;
        let store = &mut self.store;
        let mut first_error: Option<StoreError> = None;
        let column = SetField::ReceivedOptions.column();

        let mut sync = |change: Change<'_, (u8, String), ReceivedOption>| match change {
            Change::Insert { key: (tag, data), new } => {
                if !write_back {
                    return Some(new);
                }
                let row = json!({
                    "enable": true,
                    "version": "v6",
                    "type": "rx",
                    "tag": tag,
                    "value": data,
                });
                let result = store.insert_with_parent(Table::DhcpOption, row, Table::Dhcpv6Client, uuid, column);
                metrics::record_store_write("insert", result.is_ok());
                match result {
                    Ok(child) => {
                        info!(%uuid, tag, %child, "Received option written back");
                        Some(ReceivedOption { uuid: Some(child) })
                    }
                    Err(e) => {
                        error!(%uuid, tag, error = %e, "Unable to write back received option");
                        first_error.get_or_insert(e);
                        None
                    }
                }
            }
            Change::Update { .. } => None,
            Change::Remove { key: (tag, _), old } => {
                if let (true, Some(child)) = (write_back, old.uuid) {
                    let result = store.remove_from_parent(Table::Dhcpv6Client, uuid, column, child);
                    metrics::record_store_write("remove", result.is_ok());
                    match result {
                        Ok(()) => info!(%uuid, tag, %child, "Received option removed"),
                        Err(e) => {
                            error!(%uuid, tag, error = %e, "Unable to remove received option");
                            first_error.get_or_insert(e);
                        }
                    }
                }
                None
            }
        };

        let mut pass = received.begin();
        for (&tag, data) in &status.received_options {
            if data.is_empty() {
                warn!(%uuid, tag, "Ignoring received option without data");
                continue;
            }
            pass.add((tag, data.clone()), ReceivedOption::default(), &mut sync);
        }
        pass.end(&mut sync);

        if let Some(client) = self.object_mut::<Dhcpv6Client>(&uuid) {
            client.received = received;
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, MemoryRecordStore, RecordingBackend};
    use crate::schema::{IpInterfaceRow, RowEvent};

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn setup() -> Cache<RecordingBackend, MemoryRecordStore> {
        let mut cache = Cache::new(CacheConfig::default(), RecordingBackend::new(), MemoryRecordStore::new());
        cache
            .ip_interface(RowEvent::New(IpInterfaceRow {
                uuid: id(1),
                name: "wan".into(),
                enable: true,
                ..Default::default()
            }))
            .unwrap();
        cache
            .store_mut()
            .put(Table::Dhcpv6Client, id(2), json!({ "ip_interface": id(1) }));
        cache
            .dhcpv6_client(RowEvent::New(Dhcpv6ClientRow {
                uuid: id(2),
                ip_interface: id(1),
                request_prefixes: true,
                request_options: vec![23, 24],
                ..Default::default()
            }))
            .unwrap();
        cache
    }

    #[test]
    fn test_parse_rejects_out_of_range_tag() {
        let row = Dhcpv6ClientRow {
            request_options: vec![23, 300],
            ..Default::default()
        };
        assert!(Dhcpv6Client::parse(&CacheConfig::default(), &row).is_err());

        let row = Dhcpv6ClientRow {
            request_options: (0..33).collect(),
            ..Default::default()
        };
        assert!(Dhcpv6Client::parse(&CacheConfig::default(), &row).is_err());
    }

    #[test]
    fn test_apply_requests_every_tag() {
        let cache = setup();
        let configs = cache.backend().calls_of("dhcp6_client");
        assert_eq!(configs.len(), 1);
        assert!(matches!(
            configs[0],
            BackendCall::Dhcp6Client {
                config: ClientConfig {
                    enable: true,
                    request_prefixes: true,
                    ..
                },
                ..
            }
        ));

        let requests = cache.backend().calls_of("dhcp6_client_option_request");
        assert_eq!(requests.len(), 256);
        let requested: Vec<u8> = requests
            .iter()
            .filter_map(|c| match c {
                BackendCall::Dhcp6ClientOptionRequest { tag, request: true, .. } => Some(*tag),
                _ => None,
            })
            .collect();
        assert_eq!(requested, vec![23, 24]);
    }

    #[test]
    fn test_renew_reaches_backend() {
        let mut cache = setup();
        cache.backend_mut().clear();
        cache
            .dhcpv6_client(RowEvent::Modify(Dhcpv6ClientRow {
                uuid: id(2),
                ip_interface: id(1),
                request_prefixes: true,
                renew: true,
                ..Default::default()
            }))
            .unwrap();

        let configs = cache.backend().calls_of("dhcp6_client");
        assert_eq!(configs.len(), 1);
        match configs[0] {
            BackendCall::Dhcp6Client { config, .. } => {
                assert!(config.renew);
                assert!(config.enable);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn test_status_writes_back_and_removes() {
        let mut cache = setup();
        let status = ClientStatus::default().with_option(23, "2001:db8::53");
        cache.dhcpv6_client_status(id(2), &status).unwrap();

        let written = cache.store().column_uuids(Table::Dhcpv6Client, id(2), "received_options");
        assert_eq!(written.len(), 1);
        let row = cache.store().get(Table::DhcpOption, written[0]).unwrap();
        assert_eq!(row["type"], "rx");
        assert_eq!(row["tag"], 23);

        // Same report again: nothing new
        cache.dhcpv6_client_status(id(2), &status).unwrap();
        assert_eq!(cache.store().rows(Table::DhcpOption).len(), 1);

        cache.dhcpv6_client_status(id(2), &ClientStatus::default()).unwrap();
        assert!(cache
            .store()
            .column_uuids(Table::Dhcpv6Client, id(2), "received_options")
            .is_empty());
    }

    #[test]
    fn test_status_failure_retried() {
        let mut cache = setup();
        cache.store_mut().set_read_only(true);
        let status = ClientStatus::default().with_option(24, "lan");
        assert!(matches!(
            cache.dhcpv6_client_status(id(2), &status),
            Err(CacheError::Store(_))
        ));

        cache.store_mut().set_read_only(false);
        cache.dhcpv6_client_status(id(2), &status).unwrap();
        assert_eq!(cache.store().rows(Table::DhcpOption).len(), 1);
    }

    #[test]
    fn test_status_for_unknown_client() {
        let mut cache = setup();
        assert!(matches!(
            cache.dhcpv6_client_status(id(99), &ClientStatus::default()),
            Err(CacheError::NotFound { .. })
        ));
    }
}
