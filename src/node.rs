//! Delta and base leaf representation.
//!
//! A leaf's logical content at any instant is the result of applying its
//! delta chain (newest-first) on top of its base entry array. The in-memory
//! [`LeafNode`] always holds the *materialized* content — deltas are already
//! folded into `entries` — while `deltas` keeps the chain's physical pointers
//! for reclamation bookkeeping.
//!
//! # Wire format
//!
//! Every stored payload is a bincode-encoded [`LeafPayload`]: either a full
//! base leaf snapshot or a single [`DeltaRecord`] chained to its predecessor
//! via a `next` physical pointer. Payloads are immutable once written.
//!
//! # Read and write amplification
//!
//! Consolidation (re-emitting the flattened content as a new base with an
//! empty chain) bounds read amplification; deferring it until the chain
//! reaches the configured length bounds write amplification.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::pointer::PhysicalPtr;
use crate::store::NodeTable;

// ============================================================================
//  DeltaRecord
// ============================================================================

/// A minimal description of one logical mutation, chained to the previous
/// state (base or another delta) via `next`. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaRecord<K, V> {
    /// A pending insert of `key` → `value`.
    Insert {
        /// The inserted key.
        key: K,
        /// The inserted value.
        value: V,
        /// Physical pointer to the superseded state.
        next: PhysicalPtr,
    },

    /// A pending delete of `key`.
    Delete {
        /// The deleted key.
        key: K,
        /// Physical pointer to the superseded state.
        next: PhysicalPtr,
    },
}

impl<K, V> DeltaRecord<K, V> {
    /// The physical pointer of the state this record supersedes.
    #[must_use]
    pub const fn next(&self) -> PhysicalPtr {
        match self {
            Self::Insert { next, .. } | Self::Delete { next, .. } => *next,
        }
    }
}

// ============================================================================
//  Wire payloads
// ============================================================================

/// One stored payload: a full base leaf snapshot or a single delta record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LeafPayload<K, V> {
    /// A consolidated base leaf (entries array plus range keys).
    Base(LeafNode<K, V>),

    /// A single incremental mutation.
    Delta(DeltaRecord<K, V>),
}

/// Borrowed mirror of [`LeafPayload`] so encoding never clones the leaf.
/// Variant order must match `LeafPayload` (bincode encodes the index).
#[derive(Serialize)]
enum LeafPayloadRef<'a, K, V> {
    Base(&'a LeafNode<K, V>),
    Delta(&'a DeltaRecord<K, V>),
}

impl<K, V> LeafPayload<K, V>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    /// Decode a stored payload.
    ///
    /// # Errors
    /// Returns [`EngineError::Codec`] if the bytes are not a valid payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| EngineError::codec(&e))
    }
}

// ============================================================================
//  LeafNode
// ============================================================================

/// A leaf node: sorted key/value entries, the half-open key range it owns,
/// its base physical pointer, and the delta-chain pointers layered on top
/// (most-recent first).
///
/// The entry array is sorted by key and keys are unique, with one documented
/// exception: inserting an existing key with a *different* value adds a
/// second entry at the sorted position without removing the first. This
/// reproduces the reference behavior exactly; see [`LeafNode::apply_insert`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafNode<K, V> {
    /// Inclusive lower bound of the owned key range. The global minimum is
    /// `K::default()`.
    low_key: K,

    /// Exclusive upper bound of the owned key range; `None` for the
    /// rightmost leaf.
    high_key: Option<K>,

    /// Sorted key/value entries (the materialized logical content).
    entries: Vec<(K, V)>,

    /// Physical pointer of the base snapshot this content was built from.
    base: PhysicalPtr,

    /// Physical pointers of the delta chain applied on top of `base`,
    /// most-recent first. Kept for reclamation at consolidation time.
    deltas: Vec<PhysicalPtr>,
}

impl<K, V> LeafNode<K, V> {
    /// Create an empty leaf owning `[low_key, high_key)`, based at `base`.
    #[must_use]
    pub const fn new(low_key: K, high_key: Option<K>, base: PhysicalPtr) -> Self {
        Self {
            low_key,
            high_key,
            entries: Vec::new(),
            base,
            deltas: Vec::new(),
        }
    }

    /// The inclusive lower bound of the owned range.
    #[must_use]
    pub const fn low_key(&self) -> &K {
        &self.low_key
    }

    /// The exclusive upper bound of the owned range, if any.
    #[must_use]
    pub const fn high_key(&self) -> Option<&K> {
        self.high_key.as_ref()
    }

    /// The sorted entry array.
    #[must_use]
    pub fn entries(&self) -> &[(K, V)] {
        &self.entries
    }

    /// The base physical pointer.
    #[must_use]
    pub const fn base(&self) -> PhysicalPtr {
        self.base
    }

    /// The delta-chain pointers, most-recent first.
    #[must_use]
    pub fn deltas(&self) -> &[PhysicalPtr] {
        &self.deltas
    }

    /// Rebind the base pointer (consolidation step).
    pub(crate) fn set_base(&mut self, base: PhysicalPtr) {
        self.base = base;
    }

    /// Clear the delta-chain pointer list (consolidation step).
    pub(crate) fn clear_deltas(&mut self) {
        self.deltas.clear();
    }

    /// Record a freshly appended delta at the head of the chain list.
    pub(crate) fn push_delta_front(&mut self, pptr: PhysicalPtr) {
        self.deltas.insert(0, pptr);
    }
}

impl<K, V> LeafNode<K, V>
where
    K: Ord,
{
    /// Index of the first entry whose key is not less than `key`.
    #[must_use]
    pub fn lower_bound(&self, key: &K) -> usize {
        self.entries.partition_point(|(k, _)| k < key)
    }

    /// Whether an entry with `key` is logically present.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries
            .binary_search_by(|(k, _)| k.cmp(key))
            .is_ok()
    }

    /// The value at `key`, if present.
    ///
    /// When the duplicate-key edge case has produced several entries for the
    /// same key, this returns the first in sorted order, which is the most
    /// recently inserted one.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        let pos = self.lower_bound(key);
        self.entries
            .get(pos)
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Remove the first entry matching `key` in sorted order.
    ///
    /// Returns whether an entry was removed. Callers that have verified
    /// presence beforehand (the delete operation's conflict check) can rely
    /// on `true`.
    pub fn apply_delete(&mut self, key: &K) -> bool {
        let pos = self.lower_bound(key);
        if self.entries.get(pos).is_some_and(|(k, _)| k == key) {
            self.entries.remove(pos);
            return true;
        }
        false
    }
}

impl<K, V> LeafNode<K, V>
where
    K: Ord,
    V: PartialEq,
{
    /// Insert `key` → `value` at the sorted position.
    ///
    /// If the entry at that position is an exact `(key, value)` match the
    /// array is left untouched (idempotent rewrite of the same record) and
    /// `false` is returned. If the key matches but the value differs, a new
    /// entry is inserted *without removing the old one* — the reference
    /// implementation's duplicate-key edge case, reproduced deliberately.
    pub fn apply_insert(&mut self, key: K, value: V) -> bool {
        let pos = self.lower_bound(&key);
        let exact = self
            .entries
            .get(pos)
            .is_some_and(|(k, v)| *k == key && *v == value);

        if exact {
            return false;
        }

        self.entries.insert(pos, (key, value));
        true
    }
}

impl<K, V> LeafNode<K, V>
where
    K: Default + PartialEq,
{
    /// Whether this leaf is the left boundary sentinel: global minimum low
    /// key (`K::default()`) and no high key. Sentinels are exempt from the
    /// merge-on-shrink policy — there is no sibling to merge with.
    #[must_use]
    pub fn is_left_sentinel(&self) -> bool {
        self.low_key == K::default() && self.high_key.is_none()
    }
}

impl<K, V> LeafNode<K, V>
where
    K: Serialize,
    V: Serialize,
{
    /// Encode this leaf as a base payload.
    ///
    /// # Errors
    /// Returns [`EngineError::Codec`] if a key or value fails to serialize.
    pub fn serialize_base(&self) -> Result<Vec<u8>> {
        bincode::serialize(&LeafPayloadRef::Base(self)).map_err(|e| EngineError::codec(&e))
    }

    /// Encoded size of the consolidated representation of this leaf.
    ///
    /// This is the metric compared against the split/merge thresholds. It is
    /// computed without producing the encoded bytes.
    ///
    /// # Errors
    /// Returns [`EngineError::Codec`] if a key or value fails to serialize.
    pub fn serialized_size(&self) -> Result<usize> {
        bincode::serialized_size(&LeafPayloadRef::Base(self))
            .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
            .map_err(|e| EngineError::codec(&e))
    }
}

impl<K, V> DeltaRecord<K, V>
where
    K: Serialize,
    V: Serialize,
{
    /// Encode this record as a delta payload.
    ///
    /// # Errors
    /// Returns [`EngineError::Codec`] if the key or value fails to serialize.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(&LeafPayloadRef::Delta(self)).map_err(|e| EngineError::codec(&e))
    }
}

impl<K, V> LeafNode<K, V>
where
    K: Ord + Clone + DeserializeOwned,
    V: Clone + PartialEq + DeserializeOwned,
{
    /// Rebuild the materialized leaf reachable from `pptr`.
    ///
    /// Walks the chain newest-to-oldest until the base payload, then replays
    /// the collected deltas oldest-to-newest on top of it. The result carries
    /// the chain's physical pointers (most-recent first) for reclamation
    /// bookkeeping. This is the read-side complement of consolidation.
    ///
    /// # Errors
    /// Returns [`EngineError::MissingPayload`] if a chained pointer has no
    /// stored payload, or [`EngineError::Codec`] on a decode failure.
    pub fn materialize<N: NodeTable>(node_table: &N, pptr: PhysicalPtr) -> Result<Self> {
        let mut chain: Vec<(PhysicalPtr, DeltaRecord<K, V>)> = Vec::new();
        let mut cursor = pptr;

        let mut leaf = loop {
            let bytes = node_table
                .get(cursor)
                .ok_or(EngineError::MissingPayload(cursor))?;

            match LeafPayload::decode(&bytes)? {
                LeafPayload::Base(leaf) => break leaf,
                LeafPayload::Delta(delta) => {
                    let next = delta.next();
                    chain.push((cursor, delta));
                    cursor = next;
                }
            }
        };

        // chain is newest-first; replay in chronological order
        for (_, delta) in chain.iter().rev() {
            match delta {
                DeltaRecord::Insert { key, value, .. } => {
                    leaf.apply_insert(key.clone(), value.clone());
                }
                DeltaRecord::Delete { key, .. } => {
                    leaf.apply_delete(key);
                }
            }
        }

        leaf.deltas = chain.into_iter().map(|(p, _)| p).collect();
        Ok(leaf)
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryNodeTable, NodeTable};

    fn leaf_with(entries: &[(u64, u64)]) -> LeafNode<u64, u64> {
        let mut leaf = LeafNode::new(0, None, PhysicalPtr::new(1));
        for &(k, v) in entries {
            leaf.apply_insert(k, v);
        }
        leaf
    }

    #[test]
    fn test_lower_bound_positions() {
        let leaf = leaf_with(&[(10, 0), (20, 0), (30, 0)]);
        assert_eq!(leaf.lower_bound(&5), 0);
        assert_eq!(leaf.lower_bound(&10), 0);
        assert_eq!(leaf.lower_bound(&15), 1);
        assert_eq!(leaf.lower_bound(&30), 2);
        assert_eq!(leaf.lower_bound(&31), 3);
    }

    #[test]
    fn test_apply_insert_identical_pair_is_noop() {
        let mut leaf = leaf_with(&[(10, 100)]);
        assert!(!leaf.apply_insert(10, 100));
        assert_eq!(leaf.entries().len(), 1);
    }

    #[test]
    fn test_apply_insert_same_key_different_value_grows() {
        let mut leaf = leaf_with(&[(10, 100)]);
        assert!(leaf.apply_insert(10, 200));

        // Both entries present; the newer one sits at the lower-bound
        // position, so get() observes it.
        assert_eq!(leaf.entries(), &[(10, 200), (10, 100)]);
        assert_eq!(leaf.get(&10), Some(&200));
    }

    #[test]
    fn test_apply_delete_removes_first_match() {
        let mut leaf = leaf_with(&[(10, 100)]);
        leaf.apply_insert(10, 200);

        assert!(leaf.apply_delete(&10));
        assert_eq!(leaf.entries(), &[(10, 100)]);

        assert!(leaf.apply_delete(&10));
        assert!(!leaf.apply_delete(&10));
        assert!(leaf.entries().is_empty());
    }

    #[test]
    fn test_left_sentinel_detection() {
        let sentinel: LeafNode<u64, u64> = LeafNode::new(0, None, PhysicalPtr::new(1));
        assert!(sentinel.is_left_sentinel());

        let bounded: LeafNode<u64, u64> = LeafNode::new(0, Some(50), PhysicalPtr::new(1));
        assert!(!bounded.is_left_sentinel());

        let interior: LeafNode<u64, u64> = LeafNode::new(50, None, PhysicalPtr::new(1));
        assert!(!interior.is_left_sentinel());
    }

    #[test]
    fn test_base_payload_roundtrip() {
        let leaf = leaf_with(&[(1, 2), (3, 4)]);
        let bytes = leaf.serialize_base().unwrap();

        assert_eq!(bytes.len(), leaf.serialized_size().unwrap());

        match LeafPayload::<u64, u64>::decode(&bytes).unwrap() {
            LeafPayload::Base(decoded) => assert_eq!(decoded, leaf),
            LeafPayload::Delta(_) => panic!("expected base payload"),
        }
    }

    #[test]
    fn test_materialize_replays_chain_in_order() {
        let store = InMemoryNodeTable::new();

        // Base: {10: 1}
        let base_ptr = store.next_ptr();
        let mut base = LeafNode::new(0u64, None, base_ptr);
        base.apply_insert(10u64, 1u64);
        store.insert(base_ptr, &base.serialize_base().unwrap());

        // Delta 1: insert (20, 2)
        let d1 = store.next_ptr();
        let r1 = DeltaRecord::Insert {
            key: 20u64,
            value: 2u64,
            next: base_ptr,
        };
        store.insert(d1, &r1.serialize().unwrap());

        // Delta 2: delete 10
        let d2 = store.next_ptr();
        let r2: DeltaRecord<u64, u64> = DeltaRecord::Delete { key: 10, next: d1 };
        store.insert(d2, &r2.serialize().unwrap());

        let leaf = LeafNode::<u64, u64>::materialize(&store, d2).unwrap();
        assert_eq!(leaf.entries(), &[(20, 2)]);
        assert_eq!(leaf.base(), base_ptr);
        assert_eq!(leaf.deltas(), &[d2, d1]);
    }

    #[test]
    fn test_materialize_missing_payload() {
        let store = InMemoryNodeTable::new();
        let err = LeafNode::<u64, u64>::materialize(&store, PhysicalPtr::new(99)).unwrap_err();
        assert!(matches!(err, EngineError::MissingPayload(p) if p == PhysicalPtr::new(99)));
    }
}
