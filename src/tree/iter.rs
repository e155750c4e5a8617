// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use super::{DsTree, NodeIndex, TreeError};

/// Borrowing in-order iterator over a [`DsTree`].
pub struct Iter<'a, K, V, C> {
    tree: &'a DsTree<K, V, C>,
    front: Option<NodeIndex>,
    back: Option<NodeIndex>,
    remaining: usize,
}

impl<'a, K, V, C> Iter<'a, K, V, C> {
    pub(super) fn new(tree: &'a DsTree<K, V, C>) -> Self {
        Self {
            tree,
            front: tree.head(),
            back: tree.tail(),
            remaining: tree.len(),
        }
    }

    fn entry(&self, idx: NodeIndex) -> (&'a K, &'a V) {
        let node = &self.tree.arena[idx];
        (&node.key, &node.value)
    }
}

impl<'a, K, V, C> Iterator for Iter<'a, K, V, C> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let idx = self.front?;
        self.remaining -= 1;
        self.front = self.tree.next(idx);
        Some(self.entry(idx))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V, C> DoubleEndedIterator for Iter<'_, K, V, C> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let idx = self.back?;
        self.remaining -= 1;
        self.back = self.tree.prev(idx);
        Some(self.entry(idx))
    }
}

impl<K, V, C> ExactSizeIterator for Iter<'_, K, V, C> {}

/// Removal-safe iterator over a [`DsTree`].
///
/// A cursor does not borrow the tree; every step takes the tree explicitly.
/// It remembers the tree's deletion count, so a removal that did not go
/// through [`Cursor::remove_current`] is caught on the next step.
#[derive(Debug, Clone)]
pub struct Cursor {
    next: Option<NodeIndex>,
    current: Option<NodeIndex>,
    ndel: u64,
}

impl Cursor {
    pub(super) fn new(head: Option<NodeIndex>, ndel: u64) -> Self {
        Self {
            next: head,
            current: None,
            ndel,
        }
    }

    /// Step to the next entry in order.
    pub fn advance<K, V, C>(&mut self, tree: &DsTree<K, V, C>) -> Result<Option<NodeIndex>, TreeError> {
        self.verify(tree)?;
        self.current = self.next;
        if let Some(idx) = self.current {
            self.next = tree.next(idx);
        }
        Ok(self.current)
    }

    /// Remove the entry the cursor is positioned on. The cursor stays usable.
    pub fn remove_current<K, V, C>(&mut self, tree: &mut DsTree<K, V, C>) -> Result<Option<(K, V)>, TreeError> {
        self.verify(tree)?;
        let Some(idx) = self.current.take() else {
            return Ok(None);
        };
        let removed = tree.remove(idx);
        self.ndel = tree.deletions();
        Ok(removed)
    }

    fn verify<K, V, C>(&self, tree: &DsTree<K, V, C>) -> Result<(), TreeError> {
        if tree.deletions() != self.ndel {
            return Err(TreeError::ConcurrentModification {
                expected: self.ndel,
                found: tree.deletions(),
            });
        }
        Ok(())
    }
}
