// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ordered index: an arena-backed red-black tree.
//!
//! Insertion is single-pass top-down: colors are flipped on the way down
//! whenever a node has two red children and red-red edges are rotated away
//! immediately. Removal replaces an inner node with its in-order predecessor
//! and rebalances bottom-up.
//!
//! ```
//! use netcache::tree::DsTree;
//!
//! let mut tree = DsTree::new();
//! for k in [5, 3, 8, 1, 4, 7, 9] {
//!     tree.insert(k, ()).unwrap();
//! }
//! assert!(tree.is_valid());
//! assert_eq!(tree.keys().copied().collect::<Vec<_>>(), vec![1, 3, 4, 5, 7, 8, 9]);
//! ```
//!
//! # Iteration and removal
//!
//! [`DsTree::iter`] borrows the tree. To remove entries while walking, use a
//! [`Cursor`]: it holds plain indices, stays valid across its own
//! [`Cursor::remove_current`], and reports any other removal made behind its
//! back as [`TreeError::ConcurrentModification`].

mod arena;
mod check;
mod iter;

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

use arena::{Color, NodeArena, LEFT, RIGHT};

pub use arena::NodeIndex;
pub use iter::{Cursor, Iter};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Key already present in tree")]
    DuplicateKey,
    #[error("Node index space exhausted")]
    CapacityExhausted,
    #[error("Tree modified during iteration (cursor saw {expected} deletions, tree has {found})")]
    ConcurrentModification { expected: u64, found: u64 },
    #[error("Red-black invariant violated: {0}")]
    Invariant(String),
}

/// Total order over tree keys.
pub trait Comparator<K: ?Sized> {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Orders keys by their [`Ord`] implementation. Covers integer, string and
/// tuple keys without a custom comparator.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalOrder;

impl<K: Ord + ?Sized> Comparator<K> for NaturalOrder {
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Adapts a closure into a [`Comparator`].
#[derive(Clone, Copy)]
pub struct ByFn<F>(pub F);

impl<K: ?Sized, F> Comparator<K> for ByFn<F>
where
    F: Fn(&K, &K) -> Ordering,
{
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        (self.0)(a, b)
    }
}

impl<F> fmt::Debug for ByFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ByFn(..)")
    }
}

/// Red-black tree mapping unique keys to values.
pub struct DsTree<K, V, C = NaturalOrder> {
    arena: NodeArena<K, V>,
    root: Option<NodeIndex>,
    cmp: C,
    len: usize,
    ndel: u64,
}

impl<K: Ord, V> DsTree<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_comparator(NaturalOrder)
    }
}

impl<K, V, C: Default> Default for DsTree<K, V, C> {
    fn default() -> Self {
        Self::with_comparator(C::default())
    }
}

impl<K: fmt::Debug, V: fmt::Debug, C> fmt::Debug for DsTree<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

// Structural operations; none of these need the comparator.
impl<K, V, C> DsTree<K, V, C> {
    #[must_use]
    pub fn with_comparator(cmp: C) -> Self {
        Self {
            arena: NodeArena::new(),
            root: None,
            cmp,
            len: 0,
            ndel: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of removals performed over the tree's lifetime.
    #[must_use]
    pub fn deletions(&self) -> u64 {
        self.ndel
    }

    pub fn key(&self, idx: NodeIndex) -> Option<&K> {
        self.arena.get(idx).map(|n| &n.key)
    }

    pub fn value(&self, idx: NodeIndex) -> Option<&V> {
        self.arena.get(idx).map(|n| &n.value)
    }

    pub fn value_mut(&mut self, idx: NodeIndex) -> Option<&mut V> {
        self.arena.get_mut(idx).map(|n| &mut n.value)
    }

    pub fn entry_mut(&mut self, idx: NodeIndex) -> Option<(&K, &mut V)> {
        self.arena.get_mut(idx).map(|n| (&n.key, &mut n.value))
    }

    pub fn head(&self) -> Option<NodeIndex> {
        self.root.map(|r| self.extreme(r, LEFT))
    }

    pub fn tail(&self) -> Option<NodeIndex> {
        self.root.map(|r| self.extreme(r, RIGHT))
    }

    /// In-order successor.
    pub fn next(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.neighbor(idx, RIGHT)
    }

    /// In-order predecessor.
    pub fn prev(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.neighbor(idx, LEFT)
    }

    pub fn iter(&self) -> Iter<'_, K, V, C> {
        Iter::new(self)
    }

    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    /// Visit every entry in order with mutable access to the value.
    pub fn for_each_mut<F: FnMut(&K, &mut V)>(&mut self, mut f: F) {
        let mut cur = self.head();
        while let Some(idx) = cur {
            let node = &mut self.arena[idx];
            f(&node.key, &mut node.value);
            cur = self.next(idx);
        }
    }

    /// Cursor positioned before the first entry.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.head(), self.ndel)
    }

    /// Remove the node at `idx`, returning its key and value.
    ///
    /// Handles to every other node stay valid.
    pub fn remove(&mut self, node: NodeIndex) -> Option<(K, V)> {
        self.arena.get(node)?;

        let mut dir = LEFT;
        let mut base;

        if let (Some(left), Some(_)) = (self.child(node, LEFT), self.child(node, RIGHT)) {
            // Inner node: unlink the predecessor and move it into node's place
            let mut rnode = left;
            while let Some(r) = self.child(rnode, RIGHT) {
                rnode = r;
            }
            if let Some(p) = self.parent(rnode) {
                dir = self.side(p, rnode);
            }
            base = self.remove_leaf(rnode);
            self.replace_node(node, rnode);
            if base == Some(node) {
                base = Some(rnode);
            }
        } else {
            if let Some(p) = self.parent(node) {
                dir = self.side(p, node);
            }
            base = self.remove_leaf(node);
        }

        while let Some(b) = base {
            if !self.remove_rebalance(b, dir) {
                break;
            }
            base = self.parent(b);
            if let Some(p) = base {
                dir = self.side(p, b);
            }
        }

        self.paint_root_black();
        self.ndel += 1;
        self.len -= 1;

        self.arena.free(node).map(|n| (n.key, n.value))
    }

    /// Drop every entry. Outstanding cursors are invalidated.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.root = None;
        self.len = 0;
        self.ndel += 1;
    }

    // ---------------------------------------------------------------------
    // Node helpers
    // ---------------------------------------------------------------------

    #[inline]
    fn child(&self, n: NodeIndex, dir: usize) -> Option<NodeIndex> {
        self.arena[n].child[dir]
    }

    #[inline]
    fn parent(&self, n: NodeIndex) -> Option<NodeIndex> {
        self.arena[n].parent
    }

    #[inline]
    fn is_red(&self, n: Option<NodeIndex>) -> bool {
        matches!(n, Some(n) if self.arena[n].color == Color::Red)
    }

    /// Which child slot of `parent` holds `node`.
    #[inline]
    fn side(&self, parent: NodeIndex, node: NodeIndex) -> usize {
        if self.arena[parent].child[RIGHT] == Some(node) {
            RIGHT
        } else {
            LEFT
        }
    }

    fn paint_root_black(&mut self) {
        if let Some(root) = self.root {
            self.arena[root].color = Color::Black;
        }
    }

    fn extreme(&self, mut n: NodeIndex, dir: usize) -> NodeIndex {
        while let Some(c) = self.child(n, dir) {
            n = c;
        }
        n
    }

    fn neighbor(&self, idx: NodeIndex, dir: usize) -> Option<NodeIndex> {
        let node = self.arena.get(idx)?;
        if let Some(c) = node.child[dir] {
            return Some(self.extreme(c, 1 - dir));
        }
        let mut n = idx;
        while let Some(p) = self.parent(n) {
            if self.child(p, 1 - dir) == Some(n) {
                return Some(p);
            }
            n = p;
        }
        None
    }

    /// Lift `node.child[dir]` into `node`'s place. Returns the new subtree top.
    fn rotate(&mut self, node: NodeIndex, dir: usize) -> NodeIndex {
        let Some(save) = self.child(node, dir) else {
            return node;
        };
        let parent = self.parent(node);
        let inner = self.child(save, 1 - dir);

        self.arena[node].child[dir] = inner;
        if let Some(i) = inner {
            self.arena[i].parent = Some(node);
        }

        match parent {
            None => self.root = Some(save),
            Some(p) => {
                let pdir = self.side(p, node);
                self.arena[p].child[pdir] = Some(save);
            }
        }
        self.arena[save].parent = parent;
        self.arena[save].child[1 - dir] = Some(node);
        self.arena[node].parent = Some(save);

        save
    }

    fn rb_rotate(&mut self, node: NodeIndex, dir: usize) -> NodeIndex {
        let save = self.rotate(node, dir);
        self.arena[node].color = Color::Red;
        self.arena[save].color = Color::Black;
        save
    }

    fn rb_rotate_double(&mut self, node: NodeIndex, dir: usize) -> NodeIndex {
        if let Some(c) = self.child(node, dir) {
            self.rb_rotate(c, 1 - dir);
        }
        self.rb_rotate(node, dir)
    }

    /// Fix a red-red edge between `base` and its parent.
    fn insert_rebalance(&mut self, base: NodeIndex) {
        if !self.is_red(Some(base)) {
            return;
        }
        let Some(p) = self.parent(base) else {
            return;
        };
        if !self.is_red(Some(p)) {
            return;
        }
        let Some(g) = self.parent(p) else {
            return;
        };

        let gdir = self.side(g, p);
        let pdir = self.side(p, base);
        if gdir == pdir {
            self.rb_rotate(g, gdir);
        } else {
            self.rb_rotate_double(g, gdir);
        }
    }

    /// Unlink a node with at most one child. Returns where fix-up starts, or
    /// `None` when no black height was lost.
    fn remove_leaf(&mut self, node: NodeIndex) -> Option<NodeIndex> {
        let parent = self.parent(node);
        let dir = if self.child(node, LEFT).is_none() { RIGHT } else { LEFT };
        let c = self.child(node, dir);

        let mut base = parent;
        if self.is_red(Some(node)) {
            base = None;
        } else if self.is_red(c) {
            if let Some(c) = c {
                self.arena[c].color = Color::Black;
            }
            base = None;
        }

        match parent {
            None => self.root = c,
            Some(p) => {
                let pdir = self.side(p, node);
                self.arena[p].child[pdir] = c;
            }
        }
        if let Some(c) = c {
            self.arena[c].parent = parent;
        }

        base
    }

    /// Put `new` exactly where `old` is: parent, children and color.
    fn replace_node(&mut self, old: NodeIndex, new: NodeIndex) {
        let (parent, child, color) = {
            let o = &self.arena[old];
            (o.parent, o.child, o.color)
        };

        match parent {
            None => self.root = Some(new),
            Some(p) => {
                let pdir = self.side(p, old);
                self.arena[p].child[pdir] = Some(new);
            }
        }
        for c in child.into_iter().flatten() {
            self.arena[c].parent = Some(new);
        }

        let n = &mut self.arena[new];
        n.parent = parent;
        n.child = child;
        n.color = color;
    }

    /// One fix-up step for a black-height deficit on `node.child[dir]`.
    /// Returns true when the deficit moved up to `node`'s parent.
    fn remove_rebalance(&mut self, node: NodeIndex, dir: usize) -> bool {
        let other = 1 - dir;

        let mut sibling = self.child(node, other);
        if self.is_red(sibling) {
            self.rb_rotate(node, other);
            sibling = self.child(node, other);
        }

        let Some(s) = sibling else {
            return true;
        };

        if !self.is_red(self.child(s, LEFT)) && !self.is_red(self.child(s, RIGHT)) {
            self.arena[s].color = Color::Red;
            if self.is_red(Some(node)) {
                self.arena[node].color = Color::Black;
                return false;
            }
            return true;
        }

        let color = self.arena[node].color;
        let top = if self.is_red(self.child(s, other)) {
            self.rb_rotate(node, other)
        } else {
            self.rb_rotate_double(node, other)
        };

        self.arena[top].color = color;
        let children = self.arena[top].child;
        for c in children.into_iter().flatten() {
            self.arena[c].color = Color::Black;
        }
        false
    }
}

// Keyed operations.
impl<K, V, C: Comparator<K>> DsTree<K, V, C> {
    /// Insert a unique key.
    ///
    /// On [`TreeError::DuplicateKey`] the tree is left valid and its contents
    /// unchanged; the rejected key and value are dropped.
    pub fn insert(&mut self, key: K, value: V) -> Result<NodeIndex, TreeError> {
        let Some(mut base) = self.root else {
            let idx = self
                .arena
                .alloc(key, value, Color::Black)
                .ok_or(TreeError::CapacityExhausted)?;
            self.root = Some(idx);
            self.len += 1;
            return Ok(idx);
        };

        let mut dir = self.direction(base, &key)?;

        while self.child(base, dir).is_some() {
            let [l, r] = self.arena[base].child;
            if let (Some(l), Some(r)) = (l, r) {
                if self.is_red(Some(l)) && self.is_red(Some(r)) {
                    self.arena[base].color = Color::Red;
                    self.arena[l].color = Color::Black;
                    self.arena[r].color = Color::Black;
                }
            }
            self.insert_rebalance(base);

            let Some(next) = self.child(base, dir) else {
                break;
            };
            base = next;
            dir = match self.direction(base, &key) {
                Ok(d) => d,
                Err(e) => {
                    self.paint_root_black();
                    return Err(e);
                }
            };
        }

        let Some(idx) = self.arena.alloc(key, value, Color::Red) else {
            self.paint_root_black();
            return Err(TreeError::CapacityExhausted);
        };
        self.arena[idx].parent = Some(base);
        self.arena[base].child[dir] = Some(idx);
        self.insert_rebalance(idx);

        self.paint_root_black();
        self.len += 1;
        Ok(idx)
    }

    pub fn find(&self, key: &K) -> Option<NodeIndex> {
        let mut cur = self.root;
        while let Some(n) = cur {
            cur = match self.cmp.compare(&self.arena[n].key, key) {
                Ordering::Equal => return Some(n),
                Ordering::Less => self.child(n, RIGHT),
                Ordering::Greater => self.child(n, LEFT),
            };
        }
        None
    }

    /// First node whose key is not less than `key`.
    pub fn lower_bound(&self, key: &K) -> Option<NodeIndex> {
        let mut cur = self.root;
        let mut best = None;
        while let Some(n) = cur {
            if self.cmp.compare(&self.arena[n].key, key) == Ordering::Less {
                cur = self.child(n, RIGHT);
            } else {
                best = Some(n);
                cur = self.child(n, LEFT);
            }
        }
        best
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.find(key).and_then(|idx| self.value(idx))
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = self.find(key)?;
        self.value_mut(idx)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    pub fn remove_key(&mut self, key: &K) -> Option<V> {
        let idx = self.find(key)?;
        self.remove(idx).map(|(_, v)| v)
    }

    fn direction(&self, base: NodeIndex, key: &K) -> Result<usize, TreeError> {
        match self.cmp.compare(&self.arena[base].key, key) {
            Ordering::Less => Ok(RIGHT),
            Ordering::Greater => Ok(LEFT),
            Ordering::Equal => Err(TreeError::DuplicateKey),
        }
    }
}

impl<'a, K, V, C> IntoIterator for &'a DsTree<K, V, C> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
