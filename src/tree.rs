//! `BwTree`: a ready-made single-level wiring of the update engine.
//!
//! The facade owns the in-memory reference collaborators (mapping table,
//! physical store, cache, leaf directory) and routes every mutation through
//! [`LeafUpdateEngine::execute`]. It exists so the engine can be exercised —
//! and benchmarked, and differentially tested — without a full index-node
//! layer: structural rebalancing is disabled ([`TreeConfig::unbounded`] +
//! [`NoRebalance`]), leaving one sentinel leaf that grows, consolidates, and
//! reclaims exactly as a leaf inside a full tree would.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::InMemoryNodeCache;
use crate::config::TreeConfig;
use crate::engine::LeafUpdateEngine;
use crate::error::{EngineError, Result};
use crate::node::LeafNode;
use crate::ops::{DeleteOperation, InsertOperation};
use crate::pointer::TxId;
use crate::rebalance::NoRebalance;
use crate::search::{DirectorySearch, LeafSearch, OpContext};
use crate::store::{InMemoryNodeTable, NodeTable};
use crate::table::{InMemoryMappingTable, MappingTable};

/// Default consolidation threshold for facade-built trees.
const DEFAULT_CONSOLIDATE_AT: usize = 8;

/// A concurrent ordered map backed by the leaf-update engine and the
/// in-memory reference collaborators.
///
/// All methods take `&self`; the tree is `Send + Sync` when `K` and `V` are,
/// and callers on any number of threads may mutate it concurrently. Each
/// call is one linearizable single-key update (per-key atomicity only — no
/// multi-key transactions, no range-scan consistency).
///
/// # Example
///
/// ```rust
/// use bwtree::BwTree;
///
/// let tree: BwTree<u64, String> = BwTree::new();
///
/// assert!(tree.insert(10, "ten".to_string())?);
/// assert_eq!(tree.get(&10)?, Some("ten".to_string()));
///
/// assert!(tree.remove(&10)?);
/// assert!(!tree.remove(&10)?, "delete of an absent key is a no-op");
/// # Ok::<(), bwtree::EngineError>(())
/// ```
#[derive(Debug)]
pub struct BwTree<K, V> {
    engine: LeafUpdateEngine<K, V, DirectorySearch<K>, NoRebalance>,
    directory: DirectorySearch<K>,
    map: InMemoryMappingTable,
    nodes: InMemoryNodeTable,
    cache: InMemoryNodeCache<K, V>,
    next_tx: AtomicU64,
}

impl<K, V> BwTree<K, V>
where
    K: Ord + Clone + Default + Serialize + DeserializeOwned + Send + Sync,
    V: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync,
{
    /// Create an empty tree with the default consolidation threshold.
    ///
    /// # Panics
    /// Panics if the empty sentinel leaf fails to encode, which requires a
    /// `Serialize` implementation that errors on `K::default()`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_consolidation(DEFAULT_CONSOLIDATE_AT)
    }

    /// Create an empty tree consolidating once a chain of `consolidate_at`
    /// deltas would form.
    ///
    /// # Panics
    /// As [`Self::new`].
    #[must_use]
    #[expect(
        clippy::expect_used,
        reason = "encoding an empty leaf of a well-behaved key type cannot fail"
    )]
    pub fn with_consolidation(consolidate_at: usize) -> Self {
        let map = InMemoryMappingTable::new();
        let nodes = InMemoryNodeTable::new();
        let directory = DirectorySearch::new();

        // Seed the left sentinel: global minimum low key, no high key.
        let lptr = map.allocate();
        let pptr = nodes.next_ptr();
        let sentinel: LeafNode<K, V> = LeafNode::new(K::default(), None, pptr);
        nodes.insert(
            pptr,
            &sentinel
                .serialize_base()
                .expect("empty sentinel leaf must encode"),
        );
        map.insert_entry(lptr, pptr);
        directory.register(K::default(), lptr);

        Self {
            engine: LeafUpdateEngine::new(
                TreeConfig::unbounded(consolidate_at),
                directory.clone(),
                NoRebalance,
            ),
            directory,
            map,
            nodes,
            cache: InMemoryNodeCache::new(),
            next_tx: AtomicU64::new(1),
        }
    }

    fn tx(&self) -> TxId {
        TxId::new(self.next_tx.fetch_add(1, Ordering::Relaxed))
    }

    /// Insert (or overwrite) `key` → `value`.
    ///
    /// Always returns `Ok(true)` — insert has no conflict condition. Note
    /// the inherited duplicate-key edge case: inserting an existing key with
    /// a different value adds a second entry rather than replacing the first
    /// (see [`InsertOperation`]); [`Self::get`] observes the newer one.
    ///
    /// # Errors
    /// Fatal collaborator failures only.
    pub fn insert(&self, key: K, value: V) -> Result<bool> {
        let lookup = key.clone();
        self.engine.execute(
            &lookup,
            &self.map,
            &self.nodes,
            &self.cache,
            self.tx(),
            InsertOperation::new(key, value),
        )
    }

    /// Delete `key`.
    ///
    /// Returns `Ok(false)` — not applied — when the key is absent.
    ///
    /// # Errors
    /// Fatal collaborator failures only.
    pub fn remove(&self, key: &K) -> Result<bool> {
        self.engine.execute(
            key,
            &self.map,
            &self.nodes,
            &self.cache,
            self.tx(),
            DeleteOperation::new(key.clone()),
        )
    }

    /// The value at `key`, if present.
    ///
    /// # Errors
    /// Fatal collaborator failures only.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let ctx = OpContext::new(&self.map, &self.nodes, &self.cache, self.tx());
        let node = self.directory.lower_node_bound(key, &ctx)?;
        Ok(node.leaf().get(key).cloned())
    }

    /// Whether `key` is present.
    ///
    /// # Errors
    /// Fatal collaborator failures only.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Total number of entries across all leaves.
    ///
    /// A point-in-time sum, not a consistent snapshot under concurrent
    /// writers.
    ///
    /// # Errors
    /// Fatal collaborator failures only.
    pub fn len(&self) -> Result<usize> {
        let mut total = 0;
        for lptr in self.directory.logical_ptrs() {
            // Retry when a racing consolidation reclaims the chain between
            // the entry read and the walk; the entry's version moving on is
            // the tell.
            loop {
                let Some((pptr, version)) = self.map.get(lptr) else {
                    break;
                };
                match LeafNode::<K, V>::materialize(&self.nodes, pptr) {
                    Ok(leaf) => {
                        total += leaf.entries().len();
                        break;
                    }
                    Err(EngineError::MissingPayload(missing)) => {
                        let moved_on = self
                            .map
                            .get(lptr)
                            .is_none_or(|(p, v)| (p, v) != (pptr, version));
                        if !moved_on {
                            return Err(EngineError::MissingPayload(missing));
                        }
                    }
                    Err(other) => return Err(other),
                }
            }
        }
        Ok(total)
    }

    /// Whether the tree holds no entries.
    ///
    /// # Errors
    /// Fatal collaborator failures only.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of live payloads in the backing store (base snapshots plus
    /// chained deltas). Exposed for reclamation assertions in tests and
    /// benches.
    #[must_use]
    pub fn stored_payloads(&self) -> usize {
        self.nodes.len()
    }
}

impl<K, V> Default for BwTree<K, V>
where
    K: Ord + Clone + Default + Serialize + DeserializeOwned + Send + Sync,
    V: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}
