// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! List reconciler: mark-and-sweep diffing of a member set against the
//! previous generation.
//!
//! A reconciliation pass is a [`SyncPass`] guard returned by
//! [`SyncList::begin`]. `begin` marks every member inactive. Each
//! [`SyncPass::add`] re-activates (or inserts) one member. [`SyncPass::end`]
//! sweeps whatever stayed inactive. Every structural change goes through one
//! sync function that receives a [`Change`] and decides what is stored.
//!
//! ```
//! use netcache::synclist::{Change, SyncList};
//!
//! let mut list: SyncList<u32, ()> = SyncList::new();
//! let mut events = Vec::new();
//! let mut sync = |change: Change<'_, u32, ()>| match change {
//!     Change::Insert { key, new } => { events.push(format!("+{key}")); Some(new) }
//!     Change::Update { .. } => None,
//!     Change::Remove { key, .. } => { events.push(format!("-{key}")); None }
//! };
//!
//! let mut pass = list.begin();
//! pass.add(1, (), &mut sync);
//! pass.add(2, (), &mut sync);
//! pass.end(&mut sync);
//!
//! let mut pass = list.begin();
//! pass.add(2, (), &mut sync);
//! pass.end(&mut sync);
//!
//! assert_eq!(events, vec!["+1", "+2", "-1"]);
//! ```

use tracing::{trace, warn};

use crate::tree::{Comparator, DsTree, NaturalOrder};

/// A single reconciliation step handed to the sync function.
pub enum Change<'a, K, V> {
    /// `key` is new. Return the record to store, or `None` to reject it.
    Insert { key: &'a K, new: V },
    /// `key` is already present. Return `None` to keep `old` (it may be
    /// edited in place), or a replacement record. A replacement is applied
    /// as a `Remove` of `old` followed by an `Insert` of the replacement.
    Update { key: &'a K, old: &'a mut V, new: V },
    /// `key` left the set. The return value is ignored.
    Remove { key: K, old: V },
}

struct Entry<V> {
    active: bool,
    value: V,
}

/// Reconciled member set keyed by `K`.
pub struct SyncList<K, V, C = NaturalOrder> {
    tree: DsTree<K, Entry<V>, C>,
}

impl<K: Ord, V> SyncList<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self { tree: DsTree::new() }
    }
}

impl<K: Ord, V> Default for SyncList<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C: Comparator<K>> SyncList<K, V, C> {
    #[must_use]
    pub fn with_comparator(cmp: C) -> Self {
        Self {
            tree: DsTree::with_comparator(cmp),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.tree.get(key).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.tree.get_mut(key).map(|e| &mut e.value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.tree.contains_key(key)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&K, &V)> + '_ {
        self.tree.iter().map(|(k, e)| (k, &e.value))
    }

    pub fn iter_mut_with<F: FnMut(&K, &mut V)>(&mut self, mut f: F) {
        self.tree.for_each_mut(|k, e| f(k, &mut e.value));
    }

    /// Open a reconciliation pass. Every member is marked inactive until
    /// re-added.
    pub fn begin(&mut self) -> SyncPass<'_, K, V, C> {
        self.tree.for_each_mut(|_, e| e.active = false);
        SyncPass {
            list: self,
            finished: false,
        }
    }

    /// Remove `key` unconditionally, reporting it as a `Remove`.
    pub fn del<F>(&mut self, key: &K, mut f: F) -> bool
    where
        F: FnMut(Change<'_, K, V>) -> Option<V>,
    {
        let Some(idx) = self.tree.find(key) else {
            return false;
        };
        match self.tree.remove(idx) {
            Some((key, entry)) => {
                f(Change::Remove { key, old: entry.value });
                true
            }
            None => false,
        }
    }

    /// Remove every member, reporting each as a `Remove`.
    pub fn clear<F>(&mut self, mut f: F) -> usize
    where
        F: FnMut(Change<'_, K, V>) -> Option<V>,
    {
        let mut removed = 0;
        let mut cursor = self.tree.cursor();
        while let Ok(Some(_)) = cursor.advance(&self.tree) {
            if let Ok(Some((key, entry))) = cursor.remove_current(&mut self.tree) {
                f(Change::Remove { key, old: entry.value });
                removed += 1;
            }
        }
        removed
    }

    fn store(&mut self, key: K, value: V) -> bool {
        match self.tree.insert(key, Entry { active: true, value }) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "synclist insert failed");
                false
            }
        }
    }
}

/// An open reconciliation pass. Finish it with [`SyncPass::end`].
///
/// Dropping an unfinished pass sweeps nothing: every member is
/// re-activated and a warning is logged.
#[must_use = "a sync pass only removes stale members when end() is called"]
pub struct SyncPass<'a, K, V, C: Comparator<K>> {
    list: &'a mut SyncList<K, V, C>,
    finished: bool,
}

impl<K, V, C: Comparator<K>> SyncPass<'_, K, V, C> {
    /// Declare `key` a member of the current generation.
    ///
    /// Returns whether `key` is stored once the call completes.
    pub fn add<F>(&mut self, key: K, item: V, f: &mut F) -> bool
    where
        F: FnMut(Change<'_, K, V>) -> Option<V>,
    {
        let tree = &mut self.list.tree;

        let Some(idx) = tree.find(&key) else {
            return match f(Change::Insert { key: &key, new: item }) {
                Some(value) => self.list.store(key, value),
                None => false,
            };
        };

        let replacement = match tree.value_mut(idx) {
            Some(entry) => {
                entry.active = true;
                f(Change::Update {
                    key: &key,
                    old: &mut entry.value,
                    new: item,
                })
            }
            None => return false,
        };

        let Some(replacement) = replacement else {
            return true;
        };

        trace!("synclist replace");
        if let Some((old_key, old)) = tree.remove(idx) {
            f(Change::Remove { key: old_key, old: old.value });
        }
        match f(Change::Insert { key: &key, new: replacement }) {
            Some(value) => self.list.store(key, value),
            None => false,
        }
    }

    /// Close the pass: remove every member that was not re-added.
    ///
    /// Returns the number of members removed.
    pub fn end<F>(mut self, f: &mut F) -> usize
    where
        F: FnMut(Change<'_, K, V>) -> Option<V>,
    {
        self.finished = true;

        let tree = &mut self.list.tree;
        let mut removed = 0;
        let mut cursor = tree.cursor();
        loop {
            let idx = match cursor.advance(tree) {
                Ok(Some(idx)) => idx,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "synclist sweep aborted");
                    break;
                }
            };
            if tree.value(idx).map_or(true, |e| e.active) {
                continue;
            }
            if let Ok(Some((key, entry))) = cursor.remove_current(tree) {
                f(Change::Remove { key, old: entry.value });
                removed += 1;
            }
        }
        removed
    }
}

impl<K, V, C: Comparator<K>> Drop for SyncPass<'_, K, V, C> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("synclist pass dropped without end(); keeping all members");
            self.list.tree.for_each_mut(|_, e| e.active = true);
        }
    }
}
