// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Plumbing shared by every cached record type.

use uuid::Uuid;

use super::types::{Route, SetField, SetKey};
use super::{Cache, Objects};
use crate::backend::{Backend, RecordStore};
use crate::config::CacheConfig;
use crate::reflink::{RefGraph, RefId, ReflinkError};
use crate::schema::{Row, Table};
use crate::tree::DsTree;
use crate::uuidset::{UuidSet, UuidsetEvent};

/// State every cached object carries.
#[derive(Debug)]
pub(crate) struct Header {
    pub uuid: Uuid,
    /// Main link. Holds one reference per row-table membership and one per
    /// subscriber.
    pub link: RefId,
    /// Backed by an accepted row.
    pub valid: bool,
    /// The row is present upstream (between New and Delete).
    pub in_table: bool,
}

impl Header {
    pub fn create(graph: &mut RefGraph<Route>, table: Table, uuid: Uuid) -> Result<Self, ReflinkError> {
        let link = graph.create(format!("{table}[{uuid}]"), Route::Object { table, uuid })?;
        Ok(Self {
            uuid,
            link,
            valid: false,
            in_table: false,
        })
    }
}

/// A child's subscription to the `IP_Interface` it belongs to.
#[derive(Debug)]
pub(crate) struct ParentLink {
    /// Held once by the child itself, so a disconnect never releases it.
    pub link: RefId,
    /// Interface named by the last accepted row.
    pub interface: Option<Uuid>,
    /// The interface's main link while connected.
    pub connected: Option<RefId>,
}

impl ParentLink {
    pub fn create(graph: &mut RefGraph<Route>, table: Table, uuid: Uuid) -> Result<Self, ReflinkError> {
        let link = graph.create(format!("{table}[{uuid}].interface"), Route::Parent { table, uuid })?;
        graph.adjust(link, 1)?;
        Ok(Self {
            link,
            interface: None,
            connected: None,
        })
    }
}

pub(crate) fn create_set(
    graph: &mut RefGraph<Route>,
    table: Table,
    owner: Uuid,
    field: SetField,
) -> Result<UuidSet, ReflinkError> {
    let key = SetKey { table, owner, field };
    UuidSet::create(graph, key.to_string(), Route::Set(key))
}

/// A record type mirrored by the cache.
///
/// The hooks receive the whole cache because applying one object usually
/// needs another one (the parent interface, set members) plus the backend.
pub(crate) trait Record: Sized {
    const TABLE: Table;
    /// Set columns, in teardown order.
    const SETS: &'static [SetField] = &[];

    type Row: Row;
    /// Validated form of a row.
    type Update;

    /// Empty placeholder with all of its reflinks.
    fn create(graph: &mut RefGraph<Route>, uuid: Uuid) -> Result<Self, ReflinkError>;

    fn index(objects: &Objects) -> &DsTree<Uuid, Self>;

    fn index_mut(objects: &mut Objects) -> &mut DsTree<Uuid, Self>;

    fn header(&self) -> &Header;

    fn header_mut(&mut self) -> &mut Header;

    fn parent(&self) -> Option<&ParentLink> {
        None
    }

    fn parent_mut(&mut self) -> Option<&mut ParentLink> {
        None
    }

    fn uuidset(&self, _field: SetField) -> Option<&UuidSet> {
        None
    }

    fn uuidset_mut(&mut self, _field: SetField) -> Option<&mut UuidSet> {
        None
    }

    /// Validate a row. Nothing in the cache changes when this fails.
    fn parse(config: &CacheConfig, row: &Self::Row) -> Result<Self::Update, String>;

    /// Install a validated row. Must invalidate first and revalidate last.
    fn update<B: Backend, S: RecordStore>(cache: &mut Cache<B, S>, uuid: Uuid, update: Self::Update);

    /// The row was deleted upstream. Runs before invalidation.
    fn deleted<B: Backend, S: RecordStore>(_cache: &mut Cache<B, S>, _uuid: Uuid) {}

    /// The parent interface signalled while valid and usable.
    fn parent_signalled<B: Backend, S: RecordStore>(_cache: &mut Cache<B, S>, _uuid: Uuid) {}

    fn set_event<B: Backend, S: RecordStore>(
        _cache: &mut Cache<B, S>,
        _key: SetKey,
        _event: UuidsetEvent,
        _remote: RefId,
    ) {
    }
}

/// Index and header accessors for a record stored in `Objects::$field`.
macro_rules! record_storage {
    ($field:ident) => {
        fn index(objects: &$crate::cache::Objects) -> &$crate::tree::DsTree<uuid::Uuid, Self> {
            &objects.$field
        }

        fn index_mut(objects: &mut $crate::cache::Objects) -> &mut $crate::tree::DsTree<uuid::Uuid, Self> {
            &mut objects.$field
        }

        fn header(&self) -> &$crate::cache::record::Header {
            &self.header
        }

        fn header_mut(&mut self) -> &mut $crate::cache::record::Header {
            &mut self.header
        }
    };
}

pub(crate) use record_storage;
