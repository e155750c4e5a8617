// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reference graph: refcounted reflinks joined by directional subscription
//! edges.
//!
//! `connect(src, dst)` subscribes `src` to `dst`. Both endpoints gain one
//! reference per edge, and `signal(dst)` calls back every subscribed `src`
//! with `dst` as the sender. When a reflink's refcount drops to zero or
//! below, the reflink itself is called back once with no sender. That is the
//! release notification.
//!
//! # Ownership
//!
//! [`RefGraph`] only stores reflinks and edges. Callbacks are dispatched
//! through the [`Reactor`] trait, implemented by the context that owns both
//! the graph and the objects behind it. Every reflink carries a caller tag
//! `T`, and [`Reactor::react`] uses it to route a callback to the right
//! object. A callback may therefore connect, disconnect or signal again
//! without aliasing any borrow.
//!
//! ```text
//!   src ──connect──▶ dst          inbound(dst)  = {(src, serial)}
//!    ▲                 │          outbound(src) = {(dst, serial)}
//!    └──── react ◀─ signal(dst)
//! ```

use std::fmt;

use slab::Slab;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::tree::DsTree;

/// Handle to a reflink. Generation-checked, so a handle to a destroyed
/// reflink never resolves to a later one that reuses its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefId {
    slot: u32,
    generation: u32,
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.slot, self.generation)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReflinkError {
    #[error("Unknown reflink {0}")]
    Unknown(RefId),
    #[error("Reflink {0} has already been released")]
    Released(RefId),
    #[error("No connection from {src} to {dst}")]
    NotConnected { src: RefId, dst: RefId },
    #[error("Reflink index space exhausted")]
    CapacityExhausted,
}

/// Edge key: the peer plus a serial that keeps repeated connects distinct.
type EdgeKey = (RefId, u64);

struct Reflink<T> {
    name: String,
    generation: u32,
    refcount: i32,
    released: bool,
    tag: T,
    /// Edges whose destination is this reflink, keyed by source.
    inbound: DsTree<EdgeKey, ()>,
    /// Mirror of the edges this reflink is the source of, keyed by destination.
    outbound: DsTree<EdgeKey, ()>,
}

/// Outcome of [`RefGraph::destroy`].
#[derive(Debug, Default)]
pub struct Teardown {
    /// Edges that were still attached and had to be dropped.
    pub dropped_edges: usize,
    /// Peers whose refcount reached zero because of the dropped edges.
    pub released: Vec<RefId>,
}

/// Storage for reflinks and their edges.
pub struct RefGraph<T> {
    links: Slab<Reflink<T>>,
    generation: u32,
    serial: u64,
}

impl<T> Default for RefGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RefGraph<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            links: Slab::new(),
            generation: 0,
            serial: 0,
        }
    }

    /// Number of live reflinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Create a reflink with refcount 0.
    pub fn create(&mut self, name: impl Into<String>, tag: T) -> Result<RefId, ReflinkError> {
        let entry = self.links.vacant_entry();
        let slot = u32::try_from(entry.key()).map_err(|_| ReflinkError::CapacityExhausted)?;
        self.generation = self.generation.wrapping_add(1);
        let id = RefId {
            slot,
            generation: self.generation,
        };
        entry.insert(Reflink {
            name: name.into(),
            generation: self.generation,
            refcount: 0,
            released: false,
            tag,
            inbound: DsTree::new(),
            outbound: DsTree::new(),
        });
        Ok(id)
    }

    fn node(&self, id: RefId) -> Result<&Reflink<T>, ReflinkError> {
        self.links
            .get(id.slot as usize)
            .filter(|l| l.generation == id.generation)
            .ok_or(ReflinkError::Unknown(id))
    }

    fn node_mut(&mut self, id: RefId) -> Result<&mut Reflink<T>, ReflinkError> {
        self.links
            .get_mut(id.slot as usize)
            .filter(|l| l.generation == id.generation)
            .ok_or(ReflinkError::Unknown(id))
    }

    #[must_use]
    pub fn contains(&self, id: RefId) -> bool {
        self.node(id).is_ok()
    }

    /// True once the release notification has fired, or if `id` is gone.
    #[must_use]
    pub fn is_released(&self, id: RefId) -> bool {
        self.node(id).map_or(true, |l| l.released)
    }

    pub fn name(&self, id: RefId) -> Option<&str> {
        self.node(id).ok().map(|l| l.name.as_str())
    }

    pub fn tag(&self, id: RefId) -> Option<&T> {
        self.node(id).ok().map(|l| &l.tag)
    }

    pub fn refcount(&self, id: RefId) -> Option<i32> {
        self.node(id).ok().map(|l| l.refcount)
    }

    /// Subscribers of `id`, one entry per edge, in key order.
    pub fn listeners(&self, id: RefId) -> Vec<RefId> {
        self.node(id)
            .map(|l| l.inbound.keys().map(|(src, _)| *src).collect())
            .unwrap_or_default()
    }

    /// Number of edges from `src` to `dst`.
    #[must_use]
    pub fn connections(&self, src: RefId, dst: RefId) -> usize {
        let Ok(node) = self.node(dst) else {
            return 0;
        };
        let mut count = 0;
        let mut cur = node.inbound.lower_bound(&(src, 0));
        while let Some(idx) = cur {
            match node.inbound.key(idx) {
                Some((peer, _)) if *peer == src => count += 1,
                _ => break,
            }
            cur = node.inbound.next(idx);
        }
        count
    }

    #[must_use]
    pub fn is_connected(&self, src: RefId, dst: RefId) -> bool {
        self.connections(src, dst) > 0
    }

    fn edges_into(&self, id: RefId) -> Vec<EdgeKey> {
        self.node(id)
            .map(|l| l.inbound.keys().copied().collect())
            .unwrap_or_default()
    }

    fn has_edge(&self, dst: RefId, key: &EdgeKey) -> bool {
        self.node(dst).map_or(false, |l| l.inbound.contains_key(key))
    }

    /// Record one `src → dst` edge and take a reference on both ends.
    pub fn link(&mut self, src: RefId, dst: RefId) -> Result<(), ReflinkError> {
        for id in [src, dst] {
            if self.node(id)?.released {
                return Err(ReflinkError::Released(id));
            }
        }

        self.serial += 1;
        let serial = self.serial;

        self.node_mut(dst)?
            .inbound
            .insert((src, serial), ())
            .map_err(|_| ReflinkError::CapacityExhausted)?;
        if self.node_mut(src)?.outbound.insert((dst, serial), ()).is_err() {
            self.node_mut(dst)?.inbound.remove_key(&(src, serial));
            return Err(ReflinkError::CapacityExhausted);
        }

        self.node_mut(src)?.refcount += 1;
        self.node_mut(dst)?.refcount += 1;
        Ok(())
    }

    /// Drop one `src → dst` edge and release a reference on both ends.
    ///
    /// Returns the endpoints that were released as a result.
    pub fn unlink(&mut self, src: RefId, dst: RefId) -> Result<Vec<RefId>, ReflinkError> {
        self.node(src)?;
        let node = self.node(dst)?;

        let key = node
            .inbound
            .lower_bound(&(src, 0))
            .and_then(|idx| node.inbound.key(idx))
            .copied()
            .filter(|(peer, _)| *peer == src)
            .ok_or(ReflinkError::NotConnected { src, dst })?;

        self.node_mut(dst)?.inbound.remove_key(&key);
        self.node_mut(src)?.outbound.remove_key(&(dst, key.1));

        let mut released = Vec::new();
        for id in [src, dst] {
            if self.drop_ref(id, 1)? {
                released.push(id);
            }
        }
        Ok(released)
    }

    /// Manual hold adjustment. Returns true if this call released `id`.
    pub fn adjust(&mut self, id: RefId, delta: i32) -> Result<bool, ReflinkError> {
        if delta >= 0 {
            self.node_mut(id)?.refcount += delta;
            return Ok(false);
        }
        self.drop_ref(id, -delta)
    }

    fn drop_ref(&mut self, id: RefId, amount: i32) -> Result<bool, ReflinkError> {
        let node = self.node_mut(id)?;
        node.refcount -= amount;
        if node.refcount <= 0 && !node.released {
            node.released = true;
            return Ok(true);
        }
        Ok(false)
    }

    /// Remove a reflink. Edges still attached are dropped and the peers'
    /// refcounts adjusted.
    pub fn destroy(&mut self, id: RefId) -> Result<Teardown, ReflinkError> {
        let node = self.node(id)?;
        let inbound: Vec<EdgeKey> = node.inbound.keys().copied().collect();
        let outbound: Vec<EdgeKey> = node.outbound.keys().copied().collect();

        let mut teardown = Teardown {
            dropped_edges: inbound.len() + outbound.len(),
            released: Vec::new(),
        };

        for (src, serial) in inbound {
            if src == id {
                continue;
            }
            if let Ok(peer) = self.node_mut(src) {
                peer.outbound.remove_key(&(id, serial));
            }
            if let Ok(true) = self.drop_ref(src, 1) {
                teardown.released.push(src);
            }
        }
        for (dst, serial) in outbound {
            if dst == id {
                continue;
            }
            if let Ok(peer) = self.node_mut(dst) {
                peer.inbound.remove_key(&(id, serial));
            }
            if let Ok(true) = self.drop_ref(dst, 1) {
                teardown.released.push(dst);
            }
        }

        self.links.remove(id.slot as usize);
        Ok(teardown)
    }
}

/// Callback dispatch over a [`RefGraph`].
///
/// Implementors supply storage access and [`Reactor::react`]; the graph
/// operations that can trigger callbacks are provided on top.
pub trait Reactor<T> {
    fn graph(&self) -> &RefGraph<T>;

    fn graph_mut(&mut self) -> &mut RefGraph<T>;

    /// Callback for reflink `obj`. `sender` is the signalling reflink, or
    /// `None` for the release notification.
    fn react(&mut self, obj: RefId, sender: Option<RefId>);

    /// Subscribe `src` to `dst`. Not idempotent: each call adds an edge.
    fn connect(&mut self, src: RefId, dst: RefId) -> bool {
        match self.graph_mut().link(src, dst) {
            Ok(()) => {
                trace!(%src, %dst, "reflink connected");
                true
            }
            Err(e) => {
                warn!(%src, %dst, error = %e, "reflink connect failed");
                false
            }
        }
    }

    /// Remove one `src → dst` edge. Releases either end if its refcount
    /// drops to zero.
    fn disconnect(&mut self, src: RefId, dst: RefId) -> bool {
        match self.graph_mut().unlink(src, dst) {
            Ok(released) => {
                trace!(%src, %dst, "reflink disconnected");
                for id in released {
                    self.react(id, None);
                }
                true
            }
            Err(e) => {
                warn!(%src, %dst, error = %e, "reflink disconnect failed");
                false
            }
        }
    }

    /// Call back every current subscriber of `obj` once per edge.
    ///
    /// Subscribers are snapshotted up front; an edge removed by an earlier
    /// callback in the same chain is skipped.
    fn signal(&mut self, obj: RefId) {
        if self.graph().is_released(obj) {
            warn!(%obj, "signal on released reflink ignored");
            return;
        }

        let edges = self.graph().edges_into(obj);
        let mut delivered = 0usize;
        for edge in edges {
            let src = edge.0;
            if !self.graph().has_edge(obj, &edge) || self.graph().is_released(src) {
                continue;
            }
            self.react(src, Some(obj));
            delivered += 1;
        }

        trace!(%obj, delivered, "reflink signalled");
        crate::metrics::record_signal(delivered);
    }

    /// Manual hold adjustment. Reaching zero fires the release notification.
    fn ref_adjust(&mut self, obj: RefId, delta: i32) {
        match self.graph_mut().adjust(obj, delta) {
            Ok(true) => self.react(obj, None),
            Ok(false) => {}
            Err(e) => warn!(%obj, delta, error = %e, "reflink ref adjust failed"),
        }
    }

    /// Destroy `obj`. Edges still attached are dropped with a warning.
    fn fini(&mut self, obj: RefId) {
        let name = self.graph().name(obj).unwrap_or_default().to_string();
        match self.graph_mut().destroy(obj) {
            Ok(teardown) => {
                if teardown.dropped_edges > 0 {
                    warn!(%obj, %name, edges = teardown.dropped_edges, "reflink destroyed with live connections");
                } else {
                    debug!(%obj, %name, "reflink destroyed");
                }
                for id in teardown.released {
                    self.react(id, None);
                }
            }
            Err(e) => warn!(%obj, error = %e, "reflink fini failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every callback; destroys reflinks on release when asked to.
    #[derive(Default)]
    struct Recorder {
        graph: RefGraph<&'static str>,
        log: Vec<(RefId, Option<RefId>)>,
        fini_on_release: bool,
    }

    impl Reactor<&'static str> for Recorder {
        fn graph(&self) -> &RefGraph<&'static str> {
            &self.graph
        }

        fn graph_mut(&mut self) -> &mut RefGraph<&'static str> {
            &mut self.graph
        }

        fn react(&mut self, obj: RefId, sender: Option<RefId>) {
            self.log.push((obj, sender));
            if sender.is_none() && self.fini_on_release {
                self.fini(obj);
            }
        }
    }

    fn pair(r: &mut Recorder) -> (RefId, RefId) {
        let a = r.graph.create("A", "a").unwrap();
        let b = r.graph.create("B", "b").unwrap();
        (a, b)
    }

    #[test]
    fn test_signal_then_release_scenario() {
        let mut r = Recorder::default();
        let (a, b) = pair(&mut r);

        assert!(r.connect(a, b));
        r.signal(b);
        assert_eq!(r.log, vec![(a, Some(b))]);

        // B holds one reference from the edge
        r.ref_adjust(b, -1);
        assert_eq!(r.log, vec![(a, Some(b)), (b, None)]);

        // Released: further signals on B reach nobody
        r.signal(b);
        r.ref_adjust(b, -1);
        assert_eq!(r.log.len(), 2);
    }

    #[test]
    fn test_connect_counts_on_both_ends() {
        let mut r = Recorder::default();
        let (a, b) = pair(&mut r);

        r.connect(a, b);
        r.connect(a, b);
        assert_eq!(r.graph.refcount(a), Some(2));
        assert_eq!(r.graph.refcount(b), Some(2));
        assert_eq!(r.graph.connections(a, b), 2);
        assert!(!r.graph.is_connected(b, a));

        // Two edges, two deliveries
        r.signal(b);
        assert_eq!(r.log.len(), 2);
    }

    #[test]
    fn test_disconnect_missing_edge_is_false() {
        let mut r = Recorder::default();
        let (a, b) = pair(&mut r);
        r.ref_adjust(a, 1);
        r.ref_adjust(b, 1);

        assert!(!r.disconnect(a, b));
        assert_eq!(r.graph.refcount(a), Some(1));
        assert_eq!(r.graph.refcount(b), Some(1));
        assert!(r.log.is_empty());
    }

    #[test]
    fn test_disconnect_releases_both_ends() {
        let mut r = Recorder::default();
        let (a, b) = pair(&mut r);

        r.connect(a, b);
        assert!(r.disconnect(a, b));
        assert_eq!(r.log, vec![(a, None), (b, None)]);
        assert!(r.graph.is_released(a));
        assert!(r.graph.is_released(b));
    }

    #[test]
    fn test_connect_to_released_fails() {
        let mut r = Recorder::default();
        let (a, b) = pair(&mut r);
        r.ref_adjust(b, -1);
        assert!(!r.connect(a, b));
        assert_eq!(r.graph.refcount(a), Some(0));
    }

    #[test]
    fn test_listener_removed_mid_chain_is_skipped() {
        struct Unsubscriber {
            graph: RefGraph<&'static str>,
            victim: Option<RefId>,
            hits: Vec<RefId>,
        }

        impl Reactor<&'static str> for Unsubscriber {
            fn graph(&self) -> &RefGraph<&'static str> {
                &self.graph
            }
            fn graph_mut(&mut self) -> &mut RefGraph<&'static str> {
                &mut self.graph
            }
            fn react(&mut self, obj: RefId, sender: Option<RefId>) {
                let Some(sender) = sender else { return };
                self.hits.push(obj);
                // First listener to run unsubscribes the other one
                if let Some(victim) = self.victim.take() {
                    self.disconnect(victim, sender);
                }
            }
        }

        let mut u = Unsubscriber {
            graph: RefGraph::new(),
            victim: None,
            hits: Vec::new(),
        };
        let hub = u.graph.create("hub", "hub").unwrap();
        let l1 = u.graph.create("l1", "l1").unwrap();
        let l2 = u.graph.create("l2", "l2").unwrap();
        u.ref_adjust(hub, 1);
        u.ref_adjust(l1, 1);
        u.ref_adjust(l2, 1);
        u.connect(l1, hub);
        u.connect(l2, hub);
        u.victim = Some(l2);

        u.signal(hub);
        assert_eq!(u.hits.len(), 1);
    }

    #[test]
    fn test_fini_drops_leftover_edges() {
        let mut r = Recorder::default();
        let (a, b) = pair(&mut r);
        let c = r.graph.create("C", "c").unwrap();
        r.ref_adjust(c, 1);

        r.connect(a, b);
        r.connect(b, c);
        r.fini(b);

        assert!(!r.graph.contains(b));
        // A lost its only reference; C keeps its manual hold
        assert_eq!(r.log, vec![(a, None)]);
        assert_eq!(r.graph.refcount(c), Some(1));
        assert!(r.graph.listeners(c).is_empty());
    }

    #[test]
    fn test_stale_id_does_not_alias() {
        let mut r = Recorder::default();
        let a = r.graph.create("A", "a").unwrap();
        r.fini(a);
        let b = r.graph.create("B", "b").unwrap();

        assert_ne!(a, b);
        assert!(!r.graph.contains(a));
        assert_eq!(r.graph.name(b), Some("B"));
        assert_eq!(r.graph.tag(a), None);
    }

    #[test]
    fn test_release_cascade_through_fini() {
        let mut r = Recorder {
            fini_on_release: true,
            ..Default::default()
        };
        let (a, b) = pair(&mut r);
        r.connect(a, b);
        r.ref_adjust(b, 1);

        // Dropping B's last manual hold does not release it; the edge still counts
        r.ref_adjust(b, -1);
        assert!(r.log.is_empty());

        r.disconnect(a, b);
        assert_eq!(r.log, vec![(a, None), (b, None)]);
        assert!(r.graph.is_empty());
    }
}
