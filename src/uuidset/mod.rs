// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Foreign-key set: a one-to-many reference by UUID, kept connected to the
//! referenced objects' reflinks.
//!
//! A [`UuidSet`] owns one reflink (the set link). It subscribes that link to
//! every member's remote reflink and turns membership and validity changes
//! into [`UuidsetEvent`]s for the owner:
//!
//! | Transition                                  | Event |
//! |---------------------------------------------|-------|
//! | member added, remote already valid          | NEW   |
//! | remote signals while valid                  | MOD   |
//! | remote signals invalid after NEW/MOD        | MOD (withdrawal) |
//! | member removed after NEW/MOD                | DEL   |
//!
//! A member whose remote never became valid produces no events at all.

use std::fmt;

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::reflink::{RefGraph, RefId, Reactor, ReflinkError};
use crate::synclist::{Change, SyncList};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UuidsetEvent {
    New,
    Mod,
    Del,
}

impl fmt::Display for UuidsetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Mod => write!(f, "MOD"),
            Self::Del => write!(f, "DEL"),
        }
    }
}

/// Per-member bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct UuidsetMember {
    /// Reflink of the referenced object, once resolved and connected.
    pub remote: Option<RefId>,
    /// A NEW or MOD(valid) was delivered and not withdrawn since.
    pub applied: bool,
}

pub struct UuidSet {
    name: String,
    link: RefId,
    members: SyncList<Uuid, UuidsetMember>,
}

impl UuidSet {
    /// Create the set and its link. The link holds one reference of its own
    /// until [`UuidsetHost::uuidset_fini`].
    pub fn create<T>(graph: &mut RefGraph<T>, name: impl Into<String>, tag: T) -> Result<Self, ReflinkError> {
        let name = name.into();
        let link = graph.create(name.clone(), tag)?;
        graph.adjust(link, 1)?;
        Ok(Self {
            name,
            link,
            members: SyncList::new(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn link(&self) -> RefId {
        self.link
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.members.contains(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &Uuid> + '_ {
        self.members.iter().map(|(id, _)| id)
    }

    pub fn member(&self, id: &Uuid) -> Option<&UuidsetMember> {
        self.members.get(id)
    }

    /// Connected remotes, in member order.
    pub fn remotes(&self) -> Vec<RefId> {
        self.members.iter().filter_map(|(_, m)| m.remote).collect()
    }

    fn mark(&mut self, remote: RefId, valid: bool) -> bool {
        let mut deliver = false;
        self.members.iter_mut_with(|_, m| {
            if m.remote != Some(remote) {
                return;
            }
            if valid {
                m.applied = true;
                deliver = true;
            } else if m.applied {
                m.applied = false;
                deliver = true;
            }
        });
        deliver
    }
}

impl fmt::Debug for UuidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UuidSet")
            .field("name", &self.name)
            .field("link", &self.link)
            .field("members", &self.members.iter().map(|(id, _)| *id).collect::<Vec<_>>())
            .finish()
    }
}

/// Owner of one or more [`UuidSet`]s.
///
/// The owner resolves member UUIDs to reflinks, reports remote validity and
/// receives the resulting events. Signals arriving on a set link must be
/// forwarded to [`UuidsetHost::uuidset_signal`].
pub trait UuidsetHost<T>: Reactor<T> {
    /// Identifies one set field of one owner.
    type Key: Copy + fmt::Debug;

    fn uuidset(&self, key: Self::Key) -> Option<&UuidSet>;

    fn uuidset_mut(&mut self, key: Self::Key) -> Option<&mut UuidSet>;

    /// Find or create the object `id` refers to. The returned reflink carries
    /// one reference owned by the caller.
    fn resolve(&mut self, key: Self::Key, id: &Uuid) -> Option<RefId>;

    fn remote_valid(&self, remote: RefId) -> bool;

    fn uuidset_event(&mut self, key: Self::Key, event: UuidsetEvent, remote: RefId);

    /// Replace the member set with `ids`.
    ///
    /// Returns false if some member could not be resolved or connected; those
    /// members are left out and retried on the next call.
    fn uuidset_set(&mut self, key: Self::Key, ids: &[Uuid]) -> bool {
        let Some(set) = self.uuidset_mut(key) else {
            warn!(?key, "uuidset_set on unknown set");
            return false;
        };

        let mut added: Vec<Uuid> = Vec::new();
        let mut removed: Vec<UuidsetMember> = Vec::new();
        {
            let mut sync = |change: Change<'_, Uuid, UuidsetMember>| match change {
                Change::Insert { key: id, new } => {
                    added.push(*id);
                    Some(new)
                }
                Change::Update { .. } => None,
                Change::Remove { old, .. } => {
                    removed.push(old);
                    None
                }
            };
            let mut pass = set.members.begin();
            for id in ids {
                pass.add(*id, UuidsetMember::default(), &mut sync);
            }
            pass.end(&mut sync);
        }

        let link = set.link;
        let name = set.name.clone();
        let mut ok = true;

        for id in added {
            let Some(remote) = self.resolve(key, &id) else {
                error!(set = %name, %id, "uuidset: unable to resolve member");
                forget(self, key, &id);
                ok = false;
                continue;
            };

            let connected = self.connect(link, remote);
            // The connection (if any) now keeps the remote alive
            self.ref_adjust(remote, -1);
            if !connected {
                forget(self, key, &id);
                ok = false;
                continue;
            }

            let valid = self.remote_valid(remote);
            if let Some(member) = self.uuidset_mut(key).and_then(|s| s.members.get_mut(&id)) {
                member.remote = Some(remote);
                member.applied = valid;
            }
            debug!(set = %name, %id, valid, "uuidset: member added");
            if valid {
                self.uuidset_event(key, UuidsetEvent::New, remote);
            }
        }

        for member in removed {
            detach(self, key, link, member);
        }

        ok
    }

    /// A member's remote signalled; translate it into MOD if it matters.
    fn uuidset_signal(&mut self, key: Self::Key, remote: RefId) {
        let valid = self.remote_valid(remote);
        let Some(set) = self.uuidset_mut(key) else {
            return;
        };
        if set.mark(remote, valid) {
            self.uuidset_event(key, UuidsetEvent::Mod, remote);
        }
    }

    /// Re-deliver MOD for every connected member that is currently valid.
    fn uuidset_refresh(&mut self, key: Self::Key) {
        let Some(set) = self.uuidset(key) else {
            return;
        };
        for remote in set.remotes() {
            if !self.remote_valid(remote) {
                continue;
            }
            if let Some(set) = self.uuidset_mut(key) {
                set.mark(remote, true);
            }
            self.uuidset_event(key, UuidsetEvent::Mod, remote);
        }
    }

    /// Drop every member and destroy the set link.
    fn uuidset_fini(&mut self, key: Self::Key) {
        let Some(set) = self.uuidset_mut(key) else {
            return;
        };
        let link = set.link;
        let mut removed = Vec::new();
        set.members.clear(|change| {
            if let Change::Remove { old, .. } = change {
                removed.push(old);
            }
            None
        });

        for member in removed {
            detach(self, key, link, member);
        }
        self.fini(link);
    }
}

fn forget<T, H: UuidsetHost<T> + ?Sized>(host: &mut H, key: H::Key, id: &Uuid) {
    if let Some(set) = host.uuidset_mut(key) {
        set.members.del(id, |_| None);
    }
}

fn detach<T, H: UuidsetHost<T> + ?Sized>(host: &mut H, key: H::Key, link: RefId, member: UuidsetMember) {
    let Some(remote) = member.remote else {
        return;
    };
    if member.applied {
        host.uuidset_event(key, UuidsetEvent::Del, remote);
    }
    host.disconnect(link, remote);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, Copy)]
    enum Tag {
        Set,
        Object(Uuid),
    }

    struct Host {
        graph: RefGraph<Tag>,
        set: Option<UuidSet>,
        objects: BTreeMap<Uuid, (RefId, bool)>,
        events: Vec<(UuidsetEvent, Uuid)>,
        released: Vec<Uuid>,
    }

    impl Host {
        fn new() -> Self {
            let mut graph = RefGraph::new();
            let set = UuidSet::create(&mut graph, "Test.members", Tag::Set).unwrap();
            Self {
                graph,
                set: Some(set),
                objects: BTreeMap::new(),
                events: Vec::new(),
                released: Vec::new(),
            }
        }

        /// Publish an object and keep it alive with a table-style hold.
        fn publish(&mut self, id: Uuid, valid: bool) {
            self.resolve((), &id).unwrap();
            self.set_valid(id, valid);
        }

        fn set_valid(&mut self, id: Uuid, valid: bool) {
            let link = {
                let entry = self.objects.get_mut(&id).unwrap();
                entry.1 = valid;
                entry.0
            };
            self.signal(link);
        }

        fn drop_hold(&mut self, id: Uuid) {
            let link = self.objects[&id].0;
            self.ref_adjust(link, -1);
        }
    }

    impl Reactor<Tag> for Host {
        fn graph(&self) -> &RefGraph<Tag> {
            &self.graph
        }

        fn graph_mut(&mut self) -> &mut RefGraph<Tag> {
            &mut self.graph
        }

        fn react(&mut self, obj: RefId, sender: Option<RefId>) {
            match (self.graph.tag(obj).copied(), sender) {
                (Some(Tag::Set), Some(remote)) => self.uuidset_signal((), remote),
                (Some(Tag::Object(id)), None) => {
                    self.objects.remove(&id);
                    self.released.push(id);
                    self.fini(obj);
                }
                _ => {}
            }
        }
    }

    impl UuidsetHost<Tag> for Host {
        type Key = ();

        fn uuidset(&self, _key: ()) -> Option<&UuidSet> {
            self.set.as_ref()
        }

        fn uuidset_mut(&mut self, _key: ()) -> Option<&mut UuidSet> {
            self.set.as_mut()
        }

        fn resolve(&mut self, _key: (), id: &Uuid) -> Option<RefId> {
            let link = match self.objects.get(id) {
                Some((link, _)) => *link,
                None => {
                    let link = self.graph.create(id.to_string(), Tag::Object(*id)).ok()?;
                    self.objects.insert(*id, (link, false));
                    link
                }
            };
            self.graph.adjust(link, 1).ok()?;
            Some(link)
        }

        fn remote_valid(&self, remote: RefId) -> bool {
            match self.graph.tag(remote) {
                Some(Tag::Object(id)) => self.objects.get(id).map_or(false, |(_, v)| *v),
                _ => false,
            }
        }

        fn uuidset_event(&mut self, _key: (), event: UuidsetEvent, remote: RefId) {
            if let Some(Tag::Object(id)) = self.graph.tag(remote) {
                self.events.push((event, *id));
            }
        }
    }

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn test_ab_to_bc_scenario() {
        let (a, b, c) = (id(1), id(2), id(3));
        let mut host = Host::new();
        for x in [a, b, c] {
            host.publish(x, true);
        }

        assert!(host.uuidset_set((), &[a, b]));
        assert_eq!(host.events, vec![(UuidsetEvent::New, a), (UuidsetEvent::New, b)]);

        host.events.clear();
        assert!(host.uuidset_set((), &[b, c]));
        assert_eq!(host.events, vec![(UuidsetEvent::New, c), (UuidsetEvent::Del, a)]);

        let set = host.set.as_ref().unwrap();
        assert_eq!(set.ids().copied().collect::<Vec<_>>(), vec![b, c]);
        assert!(!host.graph.is_connected(set.link(), host.objects[&a].0));
    }

    #[test]
    fn test_pending_member_applied_on_signal() {
        let a = id(10);
        let mut host = Host::new();

        // Unknown id: a placeholder is created and kept alive by the set
        assert!(host.uuidset_set((), &[a]));
        assert!(host.events.is_empty());
        let link = host.objects[&a].0;
        assert_eq!(host.graph.refcount(link), Some(1));

        host.set_valid(a, true);
        assert_eq!(host.events, vec![(UuidsetEvent::Mod, a)]);
        assert!(host.set.as_ref().unwrap().member(&a).unwrap().applied);

        host.set_valid(a, false);
        assert_eq!(host.events, vec![(UuidsetEvent::Mod, a), (UuidsetEvent::Mod, a)]);
        assert!(!host.set.as_ref().unwrap().member(&a).unwrap().applied);

        // Invalid again: no repeated withdrawal
        host.set_valid(a, false);
        assert_eq!(host.events.len(), 2);
    }

    #[test]
    fn test_never_valid_member_removed_silently() {
        let a = id(20);
        let mut host = Host::new();
        host.uuidset_set((), &[a]);
        host.uuidset_set((), &[]);

        assert!(host.events.is_empty());
        // The placeholder had no other holder and was released
        assert_eq!(host.released, vec![a]);
    }

    #[test]
    fn test_unchanged_set_no_events() {
        let (a, b) = (id(1), id(2));
        let mut host = Host::new();
        host.publish(a, true);
        host.publish(b, true);
        host.uuidset_set((), &[a, b]);
        host.events.clear();

        host.uuidset_set((), &[b, a]);
        assert!(host.events.is_empty());
    }

    #[test]
    fn test_refresh_only_valid_members() {
        let (a, b) = (id(1), id(2));
        let mut host = Host::new();
        host.publish(a, true);
        host.publish(b, false);
        host.uuidset_set((), &[a, b]);
        host.events.clear();

        host.uuidset_refresh(());
        assert_eq!(host.events, vec![(UuidsetEvent::Mod, a)]);
    }

    #[test]
    fn test_remote_released_while_held_by_set() {
        let a = id(5);
        let mut host = Host::new();
        host.publish(a, true);
        host.uuidset_set((), &[a]);

        // Table hold goes away; the set still references the object
        host.drop_hold(a);
        assert!(host.released.is_empty());

        host.uuidset_set((), &[]);
        assert_eq!(host.events, vec![(UuidsetEvent::New, a), (UuidsetEvent::Del, a)]);
        assert_eq!(host.released, vec![a]);
    }

    #[test]
    fn test_fini_dels_applied_and_destroys_link() {
        let (a, b) = (id(1), id(2));
        let mut host = Host::new();
        host.publish(a, true);
        host.uuidset_set((), &[a, b]);
        host.events.clear();

        let link = host.set.as_ref().unwrap().link();
        host.uuidset_fini(());
        assert_eq!(host.events, vec![(UuidsetEvent::Del, a)]);
        assert!(!host.graph.contains(link));
        // b was only a placeholder
        assert_eq!(host.released, vec![b]);
    }
}
