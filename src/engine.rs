//! The CAS update engine.
//!
//! [`LeafUpdateEngine::execute`] drives one single-key mutation through the
//! state machine
//!
//! ```text
//! RESOLVE -> SIZE-CHECK -> CONFLICT-CHECK -> BUILD -> PERSIST -> CAS
//!                                                                 |
//!            +--------- SUCCESS | RETRY-SAME | RETRY-RESOLVE | FATAL
//! ```
//!
//! 1. Resolve the leaf owning the key (search collaborator).
//! 2. If the leaf is out of size bounds, hand off to split/merge and restart
//!    resolution — rebalancing takes priority over the mutation.
//! 3. Evaluate the operation's conflict predicate; a conflict aborts the call
//!    as a semantic no-op (`Ok(false)`).
//! 4. Allocate a fresh physical pointer, deep-clone the observed leaf, run
//!    the operation's apply step (delta or consolidated payload).
//! 5. Persist the payload speculatively — not yet reachable through the
//!    mapping table.
//! 6. CAS the mapping entry from the observed version to the new pointer.
//!    On success, publish to the cache, reclaim if consolidated, and return.
//!    On the benign failure classes, discard the speculative payload and
//!    re-resolve; on anything else, discard and propagate.
//!
//! # Retry discipline
//!
//! The loop is unbounded: under sustained contention it retries until it wins
//! a round. There is deliberately no retry cap, backoff, or helping scheme —
//! a livelock risk worth knowing about when many writers hammer one leaf.
//! Every retry rebuilds from a freshly resolved node, so an attempt is never
//! applied against stale data.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::{NodeCache, NodePointer};
use crate::config::TreeConfig;
use crate::error::{Result, TableError};
use crate::ops::LeafOperation;
use crate::pointer::{PhysicalPtr, TxId};
use crate::rebalance::Rebalancer;
use crate::search::{CachePolicy, LeafSearch, OpContext, SearchBound};
use crate::store::NodeTable;
use crate::table::MappingTable;
use crate::tracing_helpers::{debug_log, trace_log, warn_log};

/// The leaf-update engine: thresholds plus the search and rebalance
/// collaborators, shared by every invocation.
///
/// The engine is stateless between calls; all shared mutable state lives in
/// the collaborators handed to [`Self::execute`]. It is `Send + Sync` and
/// intended to be called concurrently from many threads with no mutual
/// exclusion.
#[derive(Debug)]
pub struct LeafUpdateEngine<K, V, S, R> {
    config: TreeConfig,
    search: S,
    rebalancer: R,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, S, R> LeafUpdateEngine<K, V, S, R>
where
    K: Ord + Clone + Default + Serialize + DeserializeOwned,
    V: Clone + PartialEq + Serialize + DeserializeOwned,
    S: LeafSearch<K, V>,
    R: Rebalancer<K, V>,
{
    /// Create an engine with the given thresholds and collaborators.
    #[must_use]
    pub const fn new(config: TreeConfig, search: S, rebalancer: R) -> Self {
        Self {
            config,
            search,
            rebalancer,
            _marker: PhantomData,
        }
    }

    /// The engine's thresholds.
    #[must_use]
    pub const fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Execute one single-key operation against the leaf owning `key`.
    ///
    /// Returns `Ok(true)` when the mutation is durably visible through the
    /// mapping table, `Ok(false)` when the operation's conflict predicate
    /// rejected it (no mutation, no partial state — callers treat this as a
    /// semantic no-op, e.g. delete of an absent key).
    ///
    /// # Errors
    /// Fatal mapping-table failures and codec/store corruption. The
    /// speculative physical payload of the failing attempt is removed before
    /// the error propagates, but the caller must treat the index state for
    /// this key as unknown.
    pub fn execute<M, N, C, O>(
        &self,
        key: &K,
        ptr_table: &M,
        node_table: &N,
        cache: &C,
        tx_id: TxId,
        mut op: O,
    ) -> Result<bool>
    where
        M: MappingTable,
        N: NodeTable,
        C: NodeCache<K, V>,
        O: LeafOperation<K, V>,
    {
        let ctx = OpContext::new(ptr_table, node_table, cache, tx_id);

        // RESOLVE + SIZE-CHECK. A structural hand-off invalidates the
        // resolved leaf, so restart resolution until the size is in bounds.
        let mut current = loop {
            let node = self.search.lower_node_bound(key, &ctx)?;
            let nsize = node.leaf().serialized_size()?;

            if nsize >= self.config.max_node_size {
                debug_log!(lptr = node.lptr().raw(), size = nsize, "leaf over max size, splitting");
                self.rebalancer.split(&node, &ctx)?;
                continue;
            }

            if nsize < self.config.min_node_size && !node.leaf().is_left_sentinel() {
                debug_log!(lptr = node.lptr().raw(), size = nsize, "leaf under min size, merging");
                self.rebalancer.merge(&node, &ctx)?;
                continue;
            }

            break node;
        };

        loop {
            // CONFLICT-CHECK: a semantic no-op, not an error.
            if op.has_conflicts(current.leaf()) {
                trace_log!(lptr = current.lptr().raw(), "operation conflicts, not applied");
                return Ok(false);
            }

            // BUILD: fresh physical pointer, deep clone, apply.
            let pptr = node_table.next_ptr();
            let mut working = current.leaf().clone();
            let bytes = op.apply(&current, &mut working, pptr, &self.config)?;

            // PERSIST: speculative — unreachable until the CAS succeeds.
            node_table.insert(pptr, &bytes);

            // CAS on the mapping entry, keyed on the observed version.
            match ptr_table.update(current.lptr(), pptr, current.version()) {
                Ok(new_version) => {
                    let installed = Arc::new(NodePointer::new(
                        current.lptr(),
                        pptr,
                        new_version,
                        working,
                    ));
                    // Ownership transfers on acceptance; a rejected offer
                    // just drops our Arc without touching persisted state.
                    let _ = cache.add_entry(installed, tx_id);

                    // Everything the old chain referenced, plus the old
                    // base, is garbage once a consolidation superseded it.
                    let mut stale: Vec<PhysicalPtr> = current.leaf().deltas().to_vec();
                    stale.push(current.leaf().base());
                    op.cleanup(node_table, &stale);

                    trace_log!(
                        lptr = current.lptr().raw(),
                        version = new_version.raw(),
                        consolidated = op.consolidated(),
                        "update applied"
                    );
                    return Ok(true);
                }

                // The logical slot vanished (concurrent split/merge): the
                // cached view is useless, re-resolve from scratch.
                Err(TableError::ObjectDoesntExist) => {
                    debug_log!(lptr = current.lptr().raw(), "logical slot gone, invalidating cache");
                    cache.invalidate(current.lptr());
                }

                // Another update won this version; retry at the same slot.
                Err(TableError::WrongVersion) => {
                    trace_log!(lptr = current.lptr().raw(), "lost CAS race, retrying");
                }

                // Fatal: clean up the speculative payload, then surface.
                Err(fatal) => {
                    warn_log!(lptr = current.lptr().raw(), error = %fatal, "fatal mapping-table error");
                    node_table.remove(pptr);
                    return Err(fatal.into());
                }
            }

            // Both retry classes discard the speculative payload and rebuild
            // against the now-current node, bypassing the cache.
            node_table.remove(pptr);
            current = self.search.lower_bound_node_with_context(
                key,
                &ctx,
                SearchBound::LastSmallerEqual,
                CachePolicy::Bypass,
            )?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryNodeCache;
    use crate::node::LeafNode;
    use crate::ops::{DeleteOperation, InsertOperation};
    use crate::rebalance::NoRebalance;
    use crate::search::DirectorySearch;
    use crate::store::InMemoryNodeTable;
    use crate::table::InMemoryMappingTable;

    struct Rig {
        map: InMemoryMappingTable,
        nodes: InMemoryNodeTable,
        cache: InMemoryNodeCache<u64, u64>,
        engine: LeafUpdateEngine<u64, u64, DirectorySearch<u64>, NoRebalance>,
    }

    fn rig(consolidate_at: usize) -> Rig {
        let map = InMemoryMappingTable::new();
        let nodes = InMemoryNodeTable::new();
        let search = DirectorySearch::new();

        let lptr = map.allocate();
        let pptr = nodes.next_ptr();
        let leaf: LeafNode<u64, u64> = LeafNode::new(0, None, pptr);
        nodes.insert(pptr, &leaf.serialize_base().unwrap());
        map.insert_entry(lptr, pptr);
        search.register(0, lptr);

        Rig {
            map,
            nodes,
            cache: InMemoryNodeCache::new(),
            engine: LeafUpdateEngine::new(
                TreeConfig::unbounded(consolidate_at),
                search,
                NoRebalance,
            ),
        }
    }

    impl Rig {
        fn insert(&self, key: u64, value: u64) -> Result<bool> {
            self.engine.execute(
                &key,
                &self.map,
                &self.nodes,
                &self.cache,
                TxId::new(0),
                InsertOperation::new(key, value),
            )
        }

        fn delete(&self, key: u64) -> Result<bool> {
            self.engine.execute(
                &key,
                &self.map,
                &self.nodes,
                &self.cache,
                TxId::new(0),
                DeleteOperation::new(key),
            )
        }
    }

    #[test]
    fn test_insert_then_delete_roundtrip() {
        let rig = rig(8);

        assert!(rig.insert(10, 100).unwrap());
        assert!(rig.delete(10).unwrap());
        assert!(!rig.delete(10).unwrap(), "second delete is a semantic no-op");
    }

    #[test]
    fn test_delta_append_keeps_predecessors_alive() {
        let rig = rig(8);

        // Base + one delta: the base payload must survive the append, it is
        // still referenced through the delta's next pointer.
        assert!(rig.insert(1, 1).unwrap());
        assert_eq!(rig.nodes.len(), 2);
    }
}
