use crate::router::{Router, RouterId};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// The routers of the registered continuous queries and the edges between them.
///
/// At runtime each router looks up where to send its mappings with [`next`](Self::next).
/// Lookups can be done concurrently from any number of threads.
/// The table is only mutated when whole queries are registered or unregistered.
///
/// A router has a single downstream router except when it feeds merge stages.
///
/// ```
/// use sparstream::{Router, RoutingTable};
///
/// let table = RoutingTable::new();
/// let a = table.allocate_id();
/// let merge = table.insert(Router::Merge {
///     id: table.allocate_id(),
///     inputs: vec![a],
/// });
/// table.add(a, merge);
/// assert_eq!(table.next(a), vec![merge]);
/// ```
#[derive(Debug, Default)]
pub struct RoutingTable {
    last_id: AtomicU64,
    routers: DashMap<RouterId, Arc<Router>>,
    next: DashMap<RouterId, Vec<RouterId>>,
}

impl RoutingTable {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh router identity
    pub fn allocate_id(&self) -> RouterId {
        RouterId::new(self.last_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Stores a router, replacing any router with the same identity
    pub fn insert(&self, router: Router) -> RouterId {
        let id = router.id();
        debug!(router = %id, kind = router.kind(), "new router");
        self.routers.insert(id, Arc::new(router));
        id
    }

    pub fn router(&self, id: RouterId) -> Option<Arc<Router>> {
        self.routers.get(&id).map(|r| Arc::clone(r.value()))
    }

    /// A snapshot of all the routers, ordered by identity
    pub fn routers(&self) -> Vec<Arc<Router>> {
        let mut routers = self
            .routers
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect::<Vec<_>>();
        routers.sort_unstable_by_key(|r| r.id());
        routers
    }

    #[inline]
    pub fn contains(&self, id: RouterId) -> bool {
        self.routers.contains_key(&id)
    }

    /// Adds the edge `from → to`.
    ///
    /// If `to` is a merge stage the edge is added to the downstream routers of `from`,
    /// else it replaces them.
    pub fn add(&self, from: RouterId, to: RouterId) {
        let to_merge = self.routers.get(&to).is_some_and(|r| r.is_merge());
        let mut downstream = self.next.entry(from).or_default();
        if to_merge {
            if !downstream.contains(&to) {
                downstream.push(to);
            }
        } else {
            downstream.clear();
            downstream.push(to);
        }
        debug!(%from, %to, "new edge");
    }

    /// Removes the edge `from → to`, returns if it existed
    pub fn remove(&self, from: RouterId, to: RouterId) -> bool {
        let Some(mut downstream) = self.next.get_mut(&from) else {
            return false;
        };
        let len = downstream.len();
        downstream.retain(|id| *id != to);
        let removed = downstream.len() < len;
        drop(downstream);
        self.next.remove_if(&from, |_, downstream| downstream.is_empty());
        removed
    }

    /// The routers the mappings produced by `from` go to
    pub fn next(&self, from: RouterId) -> Vec<RouterId> {
        self.next
            .get(&from)
            .map(|downstream| downstream.value().clone())
            .unwrap_or_default()
    }

    /// Removes the given routers and all their outgoing edges
    pub fn release(&self, routers: &[RouterId]) {
        for id in routers {
            self.next.remove(id);
            self.routers.remove(id);
        }
        debug!(count = routers.len(), "released routers");
    }

    /// Number of routers
    #[inline]
    pub fn len(&self) -> usize {
        self.routers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.routers.is_empty()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.next.iter().map(|downstream| downstream.len()).sum()
    }
}
