//! Property-based tests (fuzzing) for the cache substrate.
//!
//! Uses proptest to drive the tree, reflink graph, synclist and cache with
//! random operation sequences and check them against simple models. The
//! cache must never panic and must drain to nothing once every row is gone.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv6Addr;

use proptest::prelude::*;
use serde_json::json;
use uuid::Uuid;

use netcache::schema::{
    DhcpOptionRow, Dhcpv6ClientRow, Dhcpv6LeaseRow, Dhcpv6ServerRow, IpInterfaceRow, Ipv6AddressRow,
    Ipv6PrefixRow, Ipv6RouteAdvRow,
};
use netcache::{
    Cache, CacheConfig, CacheError, Change, ClientStatus, DsTree, Ip6Addr, MemoryRecordStore, RecordingBackend,
    RefGraph, RowEvent, ServerLease, ServerStatus, SyncList, Table, TreeError,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

#[derive(Debug, Clone)]
enum TreeOp {
    Insert(u16),
    Remove(u16),
}

fn tree_op_strategy() -> impl Strategy<Value = TreeOp> {
    prop_oneof![
        3 => (0u16..200).prop_map(TreeOp::Insert),
        2 => (0u16..200).prop_map(TreeOp::Remove),
    ]
}

#[derive(Debug, Clone)]
enum LinkOp {
    Link(usize, usize),
    Unlink(usize, usize),
}

const NODES: usize = 6;

fn link_op_strategy() -> impl Strategy<Value = LinkOp> {
    prop_oneof![
        (0..NODES, 0..NODES).prop_map(|(a, b)| LinkOp::Link(a, b)),
        (0..NODES, 0..NODES).prop_map(|(a, b)| LinkOp::Unlink(a, b)),
    ]
}

/// One upstream event. `kind` is 0 = new, 1 = modify, 2 = delete.
#[derive(Debug, Clone)]
enum RowOp {
    Interface { kind: u8, id: u8, name: usize, addrs: Vec<u8>, prefixes: Vec<u8> },
    Address { kind: u8, id: u8, addr: usize },
    Prefix { kind: u8, id: u8, prefix: usize },
    DhcpOption { kind: u8, id: u8, tag: i64 },
    Lease { kind: u8, id: u8, prefix: usize, duid: usize },
    Client { kind: u8, id: u8, interface: u8, request: Vec<i64>, options: Vec<u8> },
    Server { kind: u8, id: u8, interface: u8, options: Vec<u8>, leases: Vec<u8> },
    RouteAdv { kind: u8, id: u8, interface: u8, prefixes: Vec<u8>, rdnss: Vec<u8>, preference: usize },
}

/// Row events plus the status reports that come from the running daemons.
#[derive(Debug, Clone)]
enum CacheOp {
    Row(RowOp),
    InterfaceAppeared { name: usize },
    ClientStatus { id: u8, options: Vec<(u8, usize)> },
    ServerStatus { id: u8, duids: Vec<usize> },
}

const IDS: u8 = 5;
const NAMES: [&str; 3] = ["eth0", "br-lan", ""];
const ADDRS: [&str; 4] = ["2001:db8::1/64", "fe80::1", "not-an-address", "2001:db8::2/64,100,200"];
const PREFIXES: [&str; 3] = ["2001:db8:1::/64", "2001:db8:2::/48", "bogus"];
const DUIDS: [&str; 3] = ["00:01:00:01:2a:3b", "00:03:00:01:aa:bb", ""];
const OPTION_DATA: [&str; 3] = ["2001:db8::53", "lan.example", ""];
const PREFERENCES: [&str; 3] = ["", "high", "urgent"];

fn row_op_strategy() -> impl Strategy<Value = RowOp> {
    let kind = 0u8..3;
    let id = 1u8..=IDS;
    let ids = prop::collection::vec(1u8..=IDS, 0..4);
    prop_oneof![
        (kind.clone(), id.clone(), 0..NAMES.len(), ids.clone(), ids.clone()).prop_map(
            |(kind, id, name, addrs, prefixes)| RowOp::Interface { kind, id, name, addrs, prefixes }
        ),
        (kind.clone(), id.clone(), 0..ADDRS.len()).prop_map(|(kind, id, addr)| RowOp::Address { kind, id, addr }),
        (kind.clone(), id.clone(), 0..PREFIXES.len())
            .prop_map(|(kind, id, prefix)| RowOp::Prefix { kind, id, prefix }),
        (kind.clone(), id.clone(), -5i64..300).prop_map(|(kind, id, tag)| RowOp::DhcpOption { kind, id, tag }),
        (kind.clone(), id.clone(), 0..PREFIXES.len(), 0..DUIDS.len())
            .prop_map(|(kind, id, prefix, duid)| RowOp::Lease { kind, id, prefix, duid }),
        (
            kind.clone(),
            id.clone(),
            id.clone(),
            prop::collection::vec(-2i64..300, 0..4),
            ids.clone()
        )
            .prop_map(|(kind, id, interface, request, options)| RowOp::Client {
                kind,
                id,
                interface,
                request,
                options
            }),
        (kind.clone(), id.clone(), id.clone(), ids.clone(), ids.clone()).prop_map(
            |(kind, id, interface, options, leases)| RowOp::Server {
                kind,
                id,
                interface,
                options,
                leases
            }
        ),
        (kind, id.clone(), id, ids.clone(), ids, 0..PREFERENCES.len()).prop_map(
            |(kind, id, interface, prefixes, rdnss, preference)| RowOp::RouteAdv {
                kind,
                id,
                interface,
                prefixes,
                rdnss,
                preference
            }
        ),
    ]
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    let id = 1u8..=IDS;
    prop_oneof![
        8 => row_op_strategy().prop_map(CacheOp::Row),
        1 => (0..NAMES.len()).prop_map(|name| CacheOp::InterfaceAppeared { name }),
        1 => (id.clone(), prop::collection::vec((0u8..40, 0..OPTION_DATA.len()), 0..4))
            .prop_map(|(id, options)| CacheOp::ClientStatus { id, options }),
        1 => (id, prop::collection::vec(0..DUIDS.len(), 0..4))
            .prop_map(|(id, duids)| CacheOp::ServerStatus { id, duids }),
    ]
}

fn uuid(n: u8) -> Uuid {
    Uuid::from_u128(u128::from(n))
}

fn uuids(ns: &[u8]) -> Vec<Uuid> {
    ns.iter().copied().map(uuid).collect()
}

fn event<T>(kind: u8, id: Uuid, row: T) -> RowEvent<T> {
    match kind {
        0 => RowEvent::New(row),
        1 => RowEvent::Modify(row),
        _ => RowEvent::Delete(id),
    }
}

type FuzzCache = Cache<RecordingBackend, MemoryRecordStore>;

/// Feed one row op to the cache. Returns the table, uuid, kind and result.
fn apply(cache: &mut FuzzCache, op: &RowOp) -> (Table, Uuid, u8, Result<(), CacheError>) {
    match op {
        RowOp::Interface { kind, id, name, addrs, prefixes } => {
            let id = uuid(*id);
            let row = IpInterfaceRow {
                uuid: id,
                name: NAMES[*name].into(),
                enable: true,
                ipv6_addr: uuids(addrs),
                ipv6_prefix: uuids(prefixes),
                ..Default::default()
            };
            (Table::IpInterface, id, *kind, cache.ip_interface(event(*kind, id, row)))
        }
        RowOp::Address { kind, id, addr } => {
            let id = uuid(*id);
            let row = Ipv6AddressRow {
                uuid: id,
                address: ADDRS[*addr].into(),
                origin: "static".into(),
                enable: true,
                ..Default::default()
            };
            (Table::Ipv6Address, id, *kind, cache.ipv6_address(event(*kind, id, row)))
        }
        RowOp::Prefix { kind, id, prefix } => {
            let id = uuid(*id);
            let row = Ipv6PrefixRow {
                uuid: id,
                address: PREFIXES[*prefix].into(),
                on_link: true,
                autonomous: true,
                enable: true,
            };
            (Table::Ipv6Prefix, id, *kind, cache.ipv6_prefix(event(*kind, id, row)))
        }
        RowOp::DhcpOption { kind, id, tag } => {
            let id = uuid(*id);
            let row = DhcpOptionRow {
                uuid: id,
                enable: true,
                version: "v6".into(),
                kind: "tx".into(),
                tag: *tag,
                value: "x".into(),
            };
            (Table::DhcpOption, id, *kind, cache.dhcp_option(event(*kind, id, row)))
        }
        RowOp::Lease { kind, id, prefix, duid } => {
            let id = uuid(*id);
            let row = Dhcpv6LeaseRow {
                uuid: id,
                status: "leased".into(),
                prefix: PREFIXES[*prefix].into(),
                duid: DUIDS[*duid].into(),
                leased_time: 3600,
                ..Default::default()
            };
            (Table::Dhcpv6Lease, id, *kind, cache.dhcpv6_lease(event(*kind, id, row)))
        }
        RowOp::Client { kind, id, interface, request, options } => {
            let id = uuid(*id);
            let row = Dhcpv6ClientRow {
                uuid: id,
                ip_interface: uuid(*interface),
                request_prefixes: true,
                request_options: request.clone(),
                send_options: uuids(options),
                ..Default::default()
            };
            (Table::Dhcpv6Client, id, *kind, cache.dhcpv6_client(event(*kind, id, row)))
        }
        RowOp::Server { kind, id, interface, options, leases } => {
            let id = uuid(*id);
            let row = Dhcpv6ServerRow {
                uuid: id,
                interface: uuid(*interface),
                options: uuids(options),
                lease_prefix: uuids(leases),
                ..Default::default()
            };
            (Table::Dhcpv6Server, id, *kind, cache.dhcpv6_server(event(*kind, id, row)))
        }
        RowOp::RouteAdv { kind, id, interface, prefixes, rdnss, preference } => {
            let id = uuid(*id);
            let row = Ipv6RouteAdvRow {
                uuid: id,
                interface: uuid(*interface),
                preferred_router: PREFERENCES[*preference].into(),
                prefixes: uuids(prefixes),
                rdnss: uuids(rdnss),
                dnssl: vec!["lan.example".into()],
                ..Default::default()
            };
            (Table::Ipv6RouteAdv, id, *kind, cache.ipv6_routeadv(event(*kind, id, row)))
        }
    }
}

/// Feed one status report. Write-back needs the owning row in the store.
fn report(cache: &mut FuzzCache, op: &CacheOp) -> Result<(), CacheError> {
    match op {
        CacheOp::Row(_) => Ok(()),
        CacheOp::InterfaceAppeared { name } => {
            cache.backend_mut().add_interface(NAMES[*name]);
            cache.interface_appeared(NAMES[*name]);
            Ok(())
        }
        CacheOp::ClientStatus { id, options } => {
            let id = uuid(*id);
            if cache.store().get(Table::Dhcpv6Client, id).is_none() {
                cache.store_mut().put(Table::Dhcpv6Client, id, json!({}));
            }
            let status = options
                .iter()
                .fold(ClientStatus::default(), |status, &(tag, data)| status.with_option(tag, OPTION_DATA[data]));
            cache.dhcpv6_client_status(id, &status)
        }
        CacheOp::ServerStatus { id, duids } => {
            let id = uuid(*id);
            if cache.store().get(Table::Dhcpv6Server, id).is_none() {
                cache.store_mut().put(Table::Dhcpv6Server, id, json!({}));
            }
            let leases = duids
                .iter()
                .enumerate()
                .map(|(n, &duid)| ServerLease {
                    addr: Ip6Addr::new(Ipv6Addr::new(0x2001, 0xdb8, 1, 0, 0, 0, 0, n as u16 + 0x100), Some(128)),
                    duid: DUIDS[duid].into(),
                    hostname: format!("host{n}"),
                    leased_time: 3600,
                })
                .collect();
            cache.dhcpv6_server_status(id, &ServerStatus { leases })
        }
    }
}

fn delete(cache: &mut FuzzCache, table: Table, id: Uuid) -> Result<(), CacheError> {
    match table {
        Table::IpInterface => cache.ip_interface(RowEvent::Delete(id)),
        Table::Ipv6Address => cache.ipv6_address(RowEvent::Delete(id)),
        Table::Ipv6Prefix => cache.ipv6_prefix(RowEvent::Delete(id)),
        Table::DhcpOption => cache.dhcp_option(RowEvent::Delete(id)),
        Table::Dhcpv6Lease => cache.dhcpv6_lease(RowEvent::Delete(id)),
        Table::Dhcpv6Client => cache.dhcpv6_client(RowEvent::Delete(id)),
        Table::Dhcpv6Server => cache.dhcpv6_server(RowEvent::Delete(id)),
        Table::Ipv6RouteAdv => cache.ipv6_routeadv(RowEvent::Delete(id)),
    }
}

// =============================================================================
// Tree
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// The tree behaves like a BTreeMap and stays balanced after every step
    #[test]
    fn prop_tree_matches_model(ops in prop::collection::vec(tree_op_strategy(), 0..300)) {
        let mut tree: DsTree<u16, u32> = DsTree::new();
        let mut model: BTreeMap<u16, u32> = BTreeMap::new();

        for (step, op) in ops.iter().enumerate() {
            let step = step as u32;
            match *op {
                TreeOp::Insert(k) => {
                    let result = tree.insert(k, step);
                    if model.contains_key(&k) {
                        prop_assert!(matches!(result, Err(TreeError::DuplicateKey)));
                    } else {
                        prop_assert!(result.is_ok());
                        model.insert(k, step);
                    }
                }
                TreeOp::Remove(k) => {
                    prop_assert_eq!(tree.remove_key(&k), model.remove(&k));
                }
            }
            prop_assert!(tree.is_valid(), "tree invalid after {:?}", op);
        }

        prop_assert_eq!(tree.len(), model.len());
        let keys: Vec<u16> = tree.keys().copied().collect();
        let expected: Vec<u16> = model.keys().copied().collect();
        prop_assert_eq!(keys, expected);
        let back: Vec<u16> = tree.keys().rev().copied().collect();
        let expected_back: Vec<u16> = model.keys().rev().copied().collect();
        prop_assert_eq!(back, expected_back);
    }

    /// Black height stays logarithmic in the number of keys
    #[test]
    fn prop_tree_black_height_bounded(keys in prop::collection::btree_set(any::<u32>(), 1..500)) {
        let mut tree: DsTree<u32, ()> = DsTree::new();
        for k in &keys {
            prop_assert!(tree.insert(*k, ()).is_ok());
        }
        let height = tree.check().map_err(|e| TestCaseError::fail(e.to_string()))?;
        let bound = 2 * (usize::BITS - keys.len().leading_zeros()) as usize + 1;
        prop_assert!(height <= bound, "black height {} over {}", height, bound);
    }
}

// =============================================================================
// Reflink graph
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Edge counts and refcounts follow a plain multiset of edges
    #[test]
    fn prop_reflink_link_unlink_symmetry(ops in prop::collection::vec(link_op_strategy(), 0..200)) {
        let mut graph: RefGraph<usize> = RefGraph::new();
        let mut nodes = Vec::new();
        for n in 0..NODES {
            let id = graph.create(format!("node{n}"), n).map_err(|e| TestCaseError::fail(e.to_string()))?;
            // Pinned so no node is released mid-run
            graph.adjust(id, 1).map_err(|e| TestCaseError::fail(e.to_string()))?;
            nodes.push(id);
        }
        let mut edges: BTreeMap<(usize, usize), usize> = BTreeMap::new();

        for op in &ops {
            match *op {
                LinkOp::Link(a, b) => {
                    prop_assert!(graph.link(nodes[a], nodes[b]).is_ok());
                    *edges.entry((a, b)).or_default() += 1;
                }
                LinkOp::Unlink(a, b) => {
                    let result = graph.unlink(nodes[a], nodes[b]);
                    match edges.get_mut(&(a, b)) {
                        Some(count) if *count > 0 => {
                            prop_assert_eq!(result.ok(), Some(Vec::new()));
                            *count -= 1;
                        }
                        _ => prop_assert!(result.is_err()),
                    }
                }
            }
        }

        for a in 0..NODES {
            for b in 0..NODES {
                let expected = edges.get(&(a, b)).copied().unwrap_or(0);
                prop_assert_eq!(graph.connections(nodes[a], nodes[b]), expected);
            }
            let touching: usize = edges
                .iter()
                .map(|(&(src, dst), &n)| n * (usize::from(src == a) + usize::from(dst == a)))
                .sum();
            prop_assert_eq!(graph.refcount(nodes[a]), Some(1 + touching as i32));
            let inbound: usize = edges.iter().filter(|((_, dst), _)| *dst == a).map(|(_, n)| n).sum();
            prop_assert_eq!(graph.listeners(nodes[a]).len(), inbound);
        }
    }
}

// =============================================================================
// Synclist
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Each pass reports exactly the set difference against the last one
    #[test]
    fn prop_synclist_reports_set_difference(
        generations in prop::collection::vec(prop::collection::vec(0u8..32, 0..20), 1..10)
    ) {
        let mut list: SyncList<u8, u32> = SyncList::new();
        let mut previous: BTreeSet<u8> = BTreeSet::new();

        for (gen, members) in generations.iter().enumerate() {
            let mut inserted = BTreeSet::new();
            let mut removed = BTreeSet::new();
            let mut sync = |change: Change<'_, u8, u32>| match change {
                Change::Insert { key, new } => {
                    inserted.insert(*key);
                    Some(new)
                }
                Change::Update { .. } => None,
                Change::Remove { key, .. } => {
                    removed.insert(key);
                    None
                }
            };

            let mut pass = list.begin();
            for &m in members {
                pass.add(m, gen as u32, &mut sync);
            }
            pass.end(&mut sync);

            let current: BTreeSet<u8> = members.iter().copied().collect();
            let added: BTreeSet<u8> = current.difference(&previous).copied().collect();
            let dropped: BTreeSet<u8> = previous.difference(&current).copied().collect();
            prop_assert_eq!(inserted, added);
            prop_assert_eq!(removed, dropped);

            let stored: BTreeSet<u8> = list.iter().map(|(k, _)| *k).collect();
            prop_assert_eq!(&stored, &current);
            previous = current;
        }
    }

    /// Feeding the same generation twice is silent the second time
    #[test]
    fn prop_synclist_idempotent(members in prop::collection::btree_set(any::<u16>(), 0..50)) {
        let mut list: SyncList<u16, ()> = SyncList::new();
        let mut insert = |change: Change<'_, u16, ()>| match change {
            Change::Insert { new, .. } => Some(new),
            _ => None,
        };
        let mut pass = list.begin();
        for &m in &members {
            pass.add(m, (), &mut insert);
        }
        pass.end(&mut insert);

        let mut structural = 0usize;
        let mut count = |change: Change<'_, u16, ()>| {
            if !matches!(change, Change::Update { .. }) {
                structural += 1;
            }
            None
        };
        let mut pass = list.begin();
        for &m in &members {
            pass.add(m, (), &mut count);
        }
        pass.end(&mut count);

        prop_assert_eq!(structural, 0);
        prop_assert_eq!(list.len(), members.len());
    }
}

// =============================================================================
// Cache
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Random row streams and status reports never panic, errors match the
    /// row model, and deleting every row drains every object and reflink
    #[test]
    fn prop_cache_random_events_drain(ops in prop::collection::vec(cache_op_strategy(), 0..120)) {
        let backend = RecordingBackend::with_interfaces(["eth0"]);
        let mut cache = Cache::new(CacheConfig::default(), backend, MemoryRecordStore::new());
        let mut rows: BTreeSet<(Table, Uuid)> = BTreeSet::new();

        for op in &ops {
            let CacheOp::Row(row_op) = op else {
                let result = report(&mut cache, op);
                prop_assert!(
                    matches!(result, Ok(()) | Err(CacheError::NotFound { .. })),
                    "report {:?}: {:?}", op, result
                );
                continue;
            };
            let (table, id, kind, result) = apply(&mut cache, row_op);
            let known = rows.contains(&(table, id));
            match kind {
                0 => {
                    prop_assert!(
                        matches!(result, Ok(()) | Err(CacheError::InvalidRow { .. })),
                        "new {:?}: {:?}", op, result
                    );
                    rows.insert((table, id));
                }
                1 if known => prop_assert!(
                    matches!(result, Ok(()) | Err(CacheError::InvalidRow { .. })),
                    "modify {:?}: {:?}", op, result
                ),
                2 if known => {
                    prop_assert!(result.is_ok(), "delete {:?}: {:?}", op, result);
                    rows.remove(&(table, id));
                }
                _ => prop_assert!(matches!(result, Err(CacheError::NotFound { .. })), "{:?}: {:?}", op, result),
            }

            let stats = cache.stats();
            for table in Table::ALL {
                prop_assert!(stats.valid[&table] <= stats.objects[&table]);
            }
        }

        for (table, id) in std::mem::take(&mut rows) {
            let result = delete(&mut cache, table, id);
            prop_assert!(result.is_ok(), "final delete {} {}: {:?}", table, id, result);
        }

        let stats = cache.stats();
        prop_assert_eq!(stats.total_objects(), 0);
        prop_assert_eq!(stats.reflinks, 0);
    }
}
