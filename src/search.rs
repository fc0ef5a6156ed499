//! Leaf resolution: the search collaborator and its traversal context.
//!
//! The engine does not walk the tree itself. It asks a [`LeafSearch`]
//! implementation for the leaf owning a key, handing it an [`OpContext`] with
//! handles into the mapping table, the physical store, and the cache. After a
//! CAS rejection the engine re-resolves through
//! [`LeafSearch::lower_bound_node_with_context`] with an explicit bound mode
//! and cache policy instead of restarting the top-level search.
//!
//! [`DirectorySearch`] is the reference resolver: a flat, single-level
//! directory from leaf low keys to logical pointers. It is sufficient for
//! wirings without structural rebalancing and for the test suite; a full
//! index-node traversal is structurally symmetric and lives outside this
//! engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::cache::{NodeCache, NodePointer};
use crate::error::{EngineError, Result};
use crate::node::LeafNode;
use crate::pointer::{LogicalPtr, TxId};
use crate::store::NodeTable;
use crate::table::MappingTable;

// ============================================================================
//  Context
// ============================================================================

/// Handles carried through one engine invocation: the backend tables, the
/// cache, and the caller's transaction id.
#[derive(Debug, Clone, Copy)]
pub struct OpContext<'a, M, N, C> {
    ptr_table: &'a M,
    node_table: &'a N,
    cache: &'a C,
    tx_id: TxId,
}

impl<'a, M, N, C> OpContext<'a, M, N, C> {
    /// Bundle the collaborators for one engine invocation.
    #[must_use]
    pub const fn new(ptr_table: &'a M, node_table: &'a N, cache: &'a C, tx_id: TxId) -> Self {
        Self {
            ptr_table,
            node_table,
            cache,
            tx_id,
        }
    }

    /// The mapping table handle.
    #[must_use]
    pub const fn get_ptr_table(&self) -> &'a M {
        self.ptr_table
    }

    /// The physical store handle.
    #[must_use]
    pub const fn get_node_table(&self) -> &'a N {
        self.node_table
    }

    /// The node cache handle.
    #[must_use]
    pub const fn get_cache(&self) -> &'a C {
        self.cache
    }

    /// The caller's transaction id.
    #[must_use]
    pub const fn tx_id(&self) -> TxId {
        self.tx_id
    }
}

// ============================================================================
//  Search contract
// ============================================================================

/// Bound mode for re-resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBound {
    /// Resolve the leaf whose low key is strictly smaller than the key.
    LastSmaller,

    /// Resolve the leaf whose low key is smaller than or equal to the key.
    LastSmallerEqual,
}

/// Cache policy for re-resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Serve from the cache when the cached version still matches the
    /// mapping entry.
    UseCache,

    /// Ignore the cache and rebuild from the store. Used on retry, where the
    /// cached view is known or suspected stale.
    Bypass,
}

/// Resolves the leaf owning a key.
pub trait LeafSearch<K, V>: Send + Sync {
    /// Locate the leaf whose range contains `key`, using the cache when its
    /// view is current.
    ///
    /// # Errors
    /// [`EngineError::UnresolvedLeaf`] if no leaf covers the key, or any
    /// store/codec failure while materializing the node.
    fn lower_node_bound<M, N, C>(
        &self,
        key: &K,
        ctx: &OpContext<'_, M, N, C>,
    ) -> Result<Arc<NodePointer<K, V>>>
    where
        M: MappingTable,
        N: NodeTable,
        C: NodeCache<K, V>;

    /// Re-resolve using an existing context, selecting the node at or before
    /// `key` per `bound`, with an explicit cache policy.
    ///
    /// # Errors
    /// As [`Self::lower_node_bound`].
    fn lower_bound_node_with_context<M, N, C>(
        &self,
        key: &K,
        ctx: &OpContext<'_, M, N, C>,
        bound: SearchBound,
        policy: CachePolicy,
    ) -> Result<Arc<NodePointer<K, V>>>
    where
        M: MappingTable,
        N: NodeTable,
        C: NodeCache<K, V>;
}

// ============================================================================
//  DirectorySearch
// ============================================================================

/// Single-level reference resolver: leaf low key → logical pointer.
///
/// Cloning shares the directory, so a wiring can keep a handle for
/// registration and iteration while the engine owns another.
#[derive(Debug, Default)]
pub struct DirectorySearch<K> {
    directory: Arc<Mutex<BTreeMap<K, LogicalPtr>>>,
}

impl<K> Clone for DirectorySearch<K> {
    fn clone(&self) -> Self {
        Self {
            directory: Arc::clone(&self.directory),
        }
    }
}

impl<K: Ord + Clone> DirectorySearch<K> {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            directory: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Register the leaf owning the range starting at `low_key`.
    pub fn register(&self, low_key: K, lptr: LogicalPtr) {
        self.directory.lock().insert(low_key, lptr);
    }

    /// All registered logical pointers, in low-key order.
    #[must_use]
    pub fn logical_ptrs(&self) -> Vec<LogicalPtr> {
        self.directory.lock().values().copied().collect()
    }

    /// The logical pointer of the leaf selected for `key` under `bound`.
    fn select(&self, key: &K, bound: SearchBound) -> Option<LogicalPtr> {
        let directory = self.directory.lock();
        let candidate = match bound {
            SearchBound::LastSmallerEqual => directory.range(..=key.clone()).next_back(),
            SearchBound::LastSmaller => directory.range(..key.clone()).next_back(),
        };
        candidate.map(|(_, lptr)| *lptr)
    }
}

/// Materialize (or serve from cache) the node currently mapped at `lptr`.
fn resolve<K, V, M, N, C>(
    lptr: LogicalPtr,
    ctx: &OpContext<'_, M, N, C>,
    policy: CachePolicy,
) -> Result<Arc<NodePointer<K, V>>>
where
    K: Ord + Clone + DeserializeOwned,
    V: Clone + PartialEq + DeserializeOwned,
    M: MappingTable,
    N: NodeTable,
    C: NodeCache<K, V>,
{
    loop {
        let (pptr, version) = ctx
            .get_ptr_table()
            .get(lptr)
            .ok_or(EngineError::UnresolvedLeaf)?;

        if policy == CachePolicy::UseCache {
            if let Some(cached) = ctx.get_cache().lookup(lptr) {
                if cached.version() == version {
                    return Ok(cached);
                }
            }
        }

        let leaf = match LeafNode::materialize(ctx.get_node_table(), pptr) {
            Ok(leaf) => leaf,
            Err(EngineError::MissingPayload(missing)) => {
                // A racing consolidation may reclaim the chain between our
                // entry read and the chain walk. The version is monotonic,
                // so a moved-on entry means exactly that; an unchanged
                // entry with a missing payload is real corruption.
                let moved_on = ctx
                    .get_ptr_table()
                    .get(lptr)
                    .is_none_or(|(p, v)| (p, v) != (pptr, version));
                if moved_on {
                    continue;
                }
                return Err(EngineError::MissingPayload(missing));
            }
            Err(other) => return Err(other),
        };

        let node = Arc::new(NodePointer::new(lptr, pptr, version, leaf));

        // Best-effort refresh; a rejected offer just drops our extra Arc.
        let _ = ctx.get_cache().add_entry(Arc::clone(&node), ctx.tx_id());
        return Ok(node);
    }
}

impl<K, V> LeafSearch<K, V> for DirectorySearch<K>
where
    K: Ord + Clone + DeserializeOwned + Send + Sync,
    V: Clone + PartialEq + DeserializeOwned + Send + Sync,
{
    fn lower_node_bound<M, N, C>(
        &self,
        key: &K,
        ctx: &OpContext<'_, M, N, C>,
    ) -> Result<Arc<NodePointer<K, V>>>
    where
        M: MappingTable,
        N: NodeTable,
        C: NodeCache<K, V>,
    {
        let lptr = self
            .select(key, SearchBound::LastSmallerEqual)
            .ok_or(EngineError::UnresolvedLeaf)?;
        resolve(lptr, ctx, CachePolicy::UseCache)
    }

    fn lower_bound_node_with_context<M, N, C>(
        &self,
        key: &K,
        ctx: &OpContext<'_, M, N, C>,
        bound: SearchBound,
        policy: CachePolicy,
    ) -> Result<Arc<NodePointer<K, V>>>
    where
        M: MappingTable,
        N: NodeTable,
        C: NodeCache<K, V>,
    {
        let lptr = self.select(key, bound).ok_or(EngineError::UnresolvedLeaf)?;
        resolve(lptr, ctx, policy)
    }
}
