// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Debug helpers: invariant checking and graphviz rendering.

use std::cmp::Ordering;
use std::fmt;

use super::arena::{Color, LEFT, RIGHT};
use super::{Comparator, DsTree, NodeIndex, TreeError};

impl<K, V, C: Comparator<K>> DsTree<K, V, C> {
    /// Verify every red-black property and the key order.
    ///
    /// Returns the black height (counting the nil leaves), or the first
    /// violation found.
    pub fn check(&self) -> Result<usize, TreeError> {
        let Some(root) = self.root else {
            return if self.len == 0 {
                Ok(0)
            } else {
                Err(TreeError::Invariant(format!("empty root with length {}", self.len)))
            };
        };

        if self.parent(root).is_some() {
            return Err(TreeError::Invariant("root has a parent".into()));
        }
        if self.is_red(Some(root)) {
            return Err(TreeError::Invariant("root is red".into()));
        }

        let height = self.check_node(root)?;

        let mut count = 0usize;
        let mut prev: Option<NodeIndex> = None;
        let mut cur = self.head();
        while let Some(idx) = cur {
            if let Some(p) = prev {
                if self.cmp.compare(&self.arena[p].key, &self.arena[idx].key) != Ordering::Less {
                    return Err(TreeError::Invariant(format!("keys out of order at position {count}")));
                }
            }
            prev = Some(idx);
            count += 1;
            cur = self.next(idx);
        }
        if count != self.len {
            return Err(TreeError::Invariant(format!(
                "walked {count} nodes but length is {}",
                self.len
            )));
        }

        Ok(height)
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.check().is_ok()
    }

    fn check_node(&self, node: NodeIndex) -> Result<usize, TreeError> {
        let [left, right] = self.arena[node].child;

        for c in [left, right].into_iter().flatten() {
            if self.parent(c) != Some(node) {
                return Err(TreeError::Invariant(format!(
                    "node {} does not point back to its parent",
                    c.slot()
                )));
            }
        }

        if self.is_red(Some(node)) && (self.is_red(left) || self.is_red(right)) {
            return Err(TreeError::Invariant(format!("red violation at node {}", node.slot())));
        }

        let lh = match left {
            Some(l) => self.check_node(l)?,
            None => 1,
        };
        let rh = match right {
            Some(r) => self.check_node(r)?,
            None => 1,
        };
        if lh != rh {
            return Err(TreeError::Invariant(format!(
                "black violation at node {} ({lh} vs {rh})",
                node.slot()
            )));
        }

        Ok(lh + usize::from(self.arena[node].color == Color::Black))
    }
}

impl<K: fmt::Display, V, C> DsTree<K, V, C> {
    /// Render the tree in graphviz DOT format.
    pub fn graphviz<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        writeln!(out, "digraph ds_tree {{")?;
        writeln!(out, "    node [style=filled, fontcolor=white];")?;

        let mut stack: Vec<NodeIndex> = self.root.into_iter().collect();
        while let Some(idx) = stack.pop() {
            let node = &self.arena[idx];
            let fill = match node.color {
                Color::Red => "red",
                Color::Black => "black",
            };
            let label = node.key.to_string().replace('"', "\\\"");
            writeln!(out, "    n{} [label=\"{}\", fillcolor={}];", idx.slot(), label, fill)?;

            for dir in [LEFT, RIGHT] {
                if let Some(c) = node.child[dir] {
                    writeln!(out, "    n{} -> n{};", idx.slot(), c.slot())?;
                    stack.push(c);
                }
            }
        }

        writeln!(out, "}}")
    }
}
