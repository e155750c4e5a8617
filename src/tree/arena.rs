// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Slab-backed node storage for [`DsTree`](super::DsTree).
//!
//! Nodes reference each other by [`NodeIndex`] instead of by pointer, so the
//! parent/child cycles of a red-black tree never need shared ownership.

use std::ops::{Index, IndexMut};

use slab::Slab;

pub(crate) const LEFT: usize = 0;
pub(crate) const RIGHT: usize = 1;

/// Handle to a node stored in a [`DsTree`](super::DsTree).
///
/// A handle stays valid until the node it names is removed. After that the
/// slot may be reused by a later insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(u32);

impl NodeIndex {
    #[inline]
    pub(crate) fn slot(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Color {
    Red,
    Black,
}

#[derive(Debug)]
pub(crate) struct Node<K, V> {
    pub key: K,
    pub value: V,
    pub parent: Option<NodeIndex>,
    pub child: [Option<NodeIndex>; 2],
    pub color: Color,
}

#[derive(Debug)]
pub(crate) struct NodeArena<K, V> {
    nodes: Slab<Node<K, V>>,
}

impl<K, V> NodeArena<K, V> {
    pub fn new() -> Self {
        Self { nodes: Slab::new() }
    }

    /// Store a fresh, unlinked node. Returns `None` once the index space is used up.
    pub fn alloc(&mut self, key: K, value: V, color: Color) -> Option<NodeIndex> {
        let entry = self.nodes.vacant_entry();
        let idx = u32::try_from(entry.key()).ok()?;
        entry.insert(Node {
            key,
            value,
            parent: None,
            child: [None, None],
            color,
        });
        Some(NodeIndex(idx))
    }

    pub fn free(&mut self, idx: NodeIndex) -> Option<Node<K, V>> {
        self.nodes.try_remove(idx.slot())
    }

    pub fn get(&self, idx: NodeIndex) -> Option<&Node<K, V>> {
        self.nodes.get(idx.slot())
    }

    pub fn get_mut(&mut self, idx: NodeIndex) -> Option<&mut Node<K, V>> {
        self.nodes.get_mut(idx.slot())
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

impl<K, V> Index<NodeIndex> for NodeArena<K, V> {
    type Output = Node<K, V>;

    fn index(&self, idx: NodeIndex) -> &Self::Output {
        &self.nodes[idx.slot()]
    }
}

impl<K, V> IndexMut<NodeIndex> for NodeArena<K, V> {
    fn index_mut(&mut self, idx: NodeIndex) -> &mut Self::Output {
        &mut self.nodes[idx.slot()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_free_reuses_slot() {
        let mut arena: NodeArena<u32, ()> = NodeArena::new();
        let a = arena.alloc(1, (), Color::Red).unwrap();
        let b = arena.alloc(2, (), Color::Black).unwrap();
        assert_ne!(a, b);
        assert_eq!(arena[b].key, 2);

        let node = arena.free(a).unwrap();
        assert_eq!(node.key, 1);
        assert!(arena.get(a).is_none());
        assert!(arena.free(a).is_none());

        let c = arena.alloc(3, (), Color::Red).unwrap();
        assert_eq!(c, a);
        assert_eq!(arena[c].key, 3);
    }
}
