//! The node cache: best-effort materialized views of mapping-table entries.
//!
//! A [`NodePointer`] ties a logical pointer to the physical pointer/version
//! last observed for it and the deserialized leaf content. At most one node
//! pointer is installed per logical pointer at a time; installation is an
//! ownership-transferring offer that the cache may reject under a race, in
//! which case the caller's `Arc` simply drops. The cache's correctness is
//! independent of whether every constructed node pointer survives — persisted
//! state is never affected by a rejected offer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::node::LeafNode;
use crate::pointer::{LogicalPtr, PhysicalPtr, TxId, Version};

// ============================================================================
//  NodePointer
// ============================================================================

/// An in-memory materialization of one mapping-table entry: the logical
/// pointer, the physical pointer and version last observed for it, and the
/// flattened leaf content.
///
/// Node pointers are immutable; a successful update constructs a fresh one
/// rather than mutating the installed one, so a reader holding an `Arc` can
/// never observe a node changing underneath it.
#[derive(Debug)]
pub struct NodePointer<K, V> {
    lptr: LogicalPtr,
    pptr: PhysicalPtr,
    version: Version,
    node: LeafNode<K, V>,
}

impl<K, V> NodePointer<K, V> {
    /// Tie `node` to the observed `(lptr, pptr, version)` triple.
    #[must_use]
    pub const fn new(
        lptr: LogicalPtr,
        pptr: PhysicalPtr,
        version: Version,
        node: LeafNode<K, V>,
    ) -> Self {
        Self {
            lptr,
            pptr,
            version,
            node,
        }
    }

    /// The logical pointer this view belongs to.
    #[must_use]
    pub const fn lptr(&self) -> LogicalPtr {
        self.lptr
    }

    /// The physical pointer observed for the logical pointer.
    #[must_use]
    pub const fn pptr(&self) -> PhysicalPtr {
        self.pptr
    }

    /// The mapping-entry version observed alongside [`Self::pptr`].
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// The materialized leaf content.
    #[must_use]
    pub const fn leaf(&self) -> &LeafNode<K, V> {
        &self.node
    }
}

// ============================================================================
//  NodeCache
// ============================================================================

/// Shared, best-effort cache of node pointers keyed by logical pointer.
pub trait NodeCache<K, V>: Send + Sync {
    /// Offer `entry` for installation.
    ///
    /// Returns `true` if the cache took ownership. `false` means the offer
    /// lost a race (an entry at the same or a newer version is already
    /// installed) and the caller must discard it — which for an `Arc` is
    /// just letting it drop.
    fn add_entry(&self, entry: Arc<NodePointer<K, V>>, tx_id: TxId) -> bool;

    /// Drop whatever is installed for `lptr`.
    fn invalidate(&self, lptr: LogicalPtr);

    /// The currently installed entry for `lptr`, if any.
    fn lookup(&self, lptr: LogicalPtr) -> Option<Arc<NodePointer<K, V>>>;
}

/// One installed cache slot.
#[derive(Debug)]
struct CacheSlot<K, V> {
    node: Arc<NodePointer<K, V>>,

    /// Transaction that installed the entry. Bookkeeping only.
    installed_by: TxId,
}

/// Process-local reference implementation of [`NodeCache`].
///
/// Installation is version-gated: an offer is accepted only if no entry is
/// installed for the logical pointer or the installed entry's version is
/// older than the offered one. Concurrent updaters may thus both construct
/// candidate node pointers, but only one remains visible.
#[derive(Debug, Default)]
pub struct InMemoryNodeCache<K, V> {
    slots: Mutex<HashMap<LogicalPtr, CacheSlot<K, V>>>,
}

impl<K, V> InMemoryNodeCache<K, V> {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// The transaction that installed the current entry for `lptr`.
    #[must_use]
    pub fn installed_by(&self, lptr: LogicalPtr) -> Option<TxId> {
        self.slots.lock().get(&lptr).map(|slot| slot.installed_by)
    }
}

impl<K, V> NodeCache<K, V> for InMemoryNodeCache<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn add_entry(&self, entry: Arc<NodePointer<K, V>>, tx_id: TxId) -> bool {
        let mut slots = self.slots.lock();

        if let Some(installed) = slots.get(&entry.lptr()) {
            if installed.node.version() >= entry.version() {
                return false;
            }
        }

        slots.insert(
            entry.lptr(),
            CacheSlot {
                node: entry,
                installed_by: tx_id,
            },
        );
        true
    }

    fn invalidate(&self, lptr: LogicalPtr) {
        self.slots.lock().remove(&lptr);
    }

    fn lookup(&self, lptr: LogicalPtr) -> Option<Arc<NodePointer<K, V>>> {
        self.slots.lock().get(&lptr).map(|slot| Arc::clone(&slot.node))
    }
}
