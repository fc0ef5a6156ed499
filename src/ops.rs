//! Leaf operation variants: insert and delete.
//!
//! An operation knows how to detect conflicts against a leaf's current state
//! and how to produce either a new delta record or a fully consolidated leaf.
//! The consolidate-vs-delta decision is made inside [`LeafOperation::apply`]
//! on the *pre-mutation* chain length: if appending one more delta would
//! reach the configured threshold, the operation emits the full flattened
//! leaf as a new base instead and marks itself `consolidated`, which gates
//! reclamation after the CAS commits.

use serde::Serialize;

use crate::cache::NodePointer;
use crate::config::TreeConfig;
use crate::error::Result;
use crate::node::{DeltaRecord, LeafNode};
use crate::pointer::PhysicalPtr;
use crate::store::NodeTable;

/// A single-key mutation executable by the update engine.
pub trait LeafOperation<K, V> {
    /// Whether this operation cannot proceed against `leaf`.
    ///
    /// A conflict is a caller-visible semantic no-op, not an error: the
    /// engine aborts the call returning "not applied" with no mutation.
    fn has_conflicts(&self, leaf: &LeafNode<K, V>) -> bool;

    /// Mutate `clone` (a deep copy of the observed leaf) and produce the
    /// serialized payload to persist under the freshly allocated `pptr`.
    ///
    /// `current` is the node pointer the clone was taken from; its chain
    /// length drives the consolidation decision and its physical pointer
    /// becomes the `next` link of an emitted delta.
    ///
    /// # Errors
    /// Payload encoding failures only.
    fn apply(
        &mut self,
        current: &NodePointer<K, V>,
        clone: &mut LeafNode<K, V>,
        pptr: PhysicalPtr,
        config: &TreeConfig,
    ) -> Result<Vec<u8>>;

    /// Whether the last [`Self::apply`] emitted a full-leaf consolidation.
    fn consolidated(&self) -> bool;

    /// Reclaim the payloads superseded by a successful consolidating update.
    ///
    /// No-op unless [`Self::consolidated`]; the pointers of a plain delta
    /// append stay alive, still referenced through the new delta's `next`
    /// link by lazy readers reconstructing history.
    fn cleanup<N: NodeTable>(&self, node_table: &N, ptrs: &[PhysicalPtr]) {
        if !self.consolidated() {
            return;
        }
        for &pptr in ptrs {
            node_table.remove(pptr);
        }
    }
}

/// Shared consolidate-vs-delta tail of `apply`.
///
/// Returns the serialized payload and records the chain bookkeeping on the
/// clone. `consolidated` is written back through the out-parameter so both
/// variants keep the flag handling identical; the delta record is only built
/// on the append path.
fn finish_apply<K, V>(
    current: &NodePointer<K, V>,
    clone: &mut LeafNode<K, V>,
    pptr: PhysicalPtr,
    config: &TreeConfig,
    consolidated: &mut bool,
    make_delta: impl FnOnce() -> DeltaRecord<K, V>,
) -> Result<Vec<u8>>
where
    K: Serialize,
    V: Serialize,
{
    let chain_len = current.leaf().deltas().len();

    if chain_len + 1 >= config.consolidate_at {
        clone.clear_deltas();
        clone.set_base(pptr);
        *consolidated = true;
        clone.serialize_base()
    } else {
        *consolidated = false;
        clone.push_delta_front(pptr);
        make_delta().serialize()
    }
}

// ============================================================================
//  Insert
// ============================================================================

/// Insert (or overwrite) `key` → `value`.
///
/// Insert never reports a conflict. Writing the exact `(key, value)` pair
/// already present leaves the entry array untouched but still goes through a
/// delta/CAS round like any update, so the version advances. Writing an
/// existing key with a different value inserts a second entry at the sorted
/// position without removing the first — the reference duplicate-key edge
/// case, reproduced deliberately (see [`LeafNode::apply_insert`]).
#[derive(Debug)]
pub struct InsertOperation<K, V> {
    key: K,
    value: V,
    consolidated: bool,
}

impl<K, V> InsertOperation<K, V> {
    /// Create an insert of `key` → `value`.
    #[must_use]
    pub const fn new(key: K, value: V) -> Self {
        Self {
            key,
            value,
            consolidated: false,
        }
    }
}

impl<K, V> LeafOperation<K, V> for InsertOperation<K, V>
where
    K: Ord + Clone + Serialize,
    V: Clone + PartialEq + Serialize,
{
    fn has_conflicts(&self, _leaf: &LeafNode<K, V>) -> bool {
        false
    }

    fn apply(
        &mut self,
        current: &NodePointer<K, V>,
        clone: &mut LeafNode<K, V>,
        pptr: PhysicalPtr,
        config: &TreeConfig,
    ) -> Result<Vec<u8>> {
        clone.apply_insert(self.key.clone(), self.value.clone());

        finish_apply(current, clone, pptr, config, &mut self.consolidated, || {
            DeltaRecord::Insert {
                key: self.key.clone(),
                value: self.value.clone(),
                next: current.pptr(),
            }
        })
    }

    fn consolidated(&self) -> bool {
        self.consolidated
    }
}

// ============================================================================
//  Delete
// ============================================================================

/// Delete `key`.
///
/// Conflicts (cannot proceed) when the key is absent from the leaf's logical
/// content; the engine then returns "not applied" without mutating anything.
#[derive(Debug)]
pub struct DeleteOperation<K> {
    key: K,
    consolidated: bool,
}

impl<K> DeleteOperation<K> {
    /// Create a delete of `key`.
    #[must_use]
    pub const fn new(key: K) -> Self {
        Self {
            key,
            consolidated: false,
        }
    }
}

impl<K, V> LeafOperation<K, V> for DeleteOperation<K>
where
    K: Ord + Clone + Serialize,
    V: Clone + PartialEq + Serialize,
{
    fn has_conflicts(&self, leaf: &LeafNode<K, V>) -> bool {
        !leaf.contains_key(&self.key)
    }

    fn apply(
        &mut self,
        current: &NodePointer<K, V>,
        clone: &mut LeafNode<K, V>,
        pptr: PhysicalPtr,
        config: &TreeConfig,
    ) -> Result<Vec<u8>> {
        let removed = clone.apply_delete(&self.key);
        debug_assert!(removed, "conflict check guarantees the key is present");

        finish_apply(current, clone, pptr, config, &mut self.consolidated, || {
            DeltaRecord::Delete {
                key: self.key.clone(),
                next: current.pptr(),
            }
        })
    }

    fn consolidated(&self) -> bool {
        self.consolidated
    }
}

// ============================================================================
//  Tests
// ============================================================================
