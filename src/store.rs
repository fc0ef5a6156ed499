//! Physical node storage: byte-addressed allocation and deletion.
//!
//! The engine consumes storage through the [`NodeTable`] trait: allocate a
//! fresh physical pointer, persist immutable bytes under it, and remove
//! superseded payloads. Payloads are write-once — there is no update
//! primitive by design.
//!
//! [`InMemoryNodeTable`] is the reference implementation used by the
//! in-process wiring and the test suite. Its internal synchronization (one
//! lock around the payload map, an atomic allocation counter) is outside the
//! engine's concurrency model; the engine only relies on the operations
//! being non-blocking and linearizable per pointer.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::pointer::PhysicalPtr;

/// Byte-addressed physical payload store.
pub trait NodeTable: Send + Sync {
    /// Allocate a fresh, never-before-returned physical pointer.
    fn next_ptr(&self) -> PhysicalPtr;

    /// Persist `bytes` under `pptr`. The payload is immutable afterwards.
    fn insert(&self, pptr: PhysicalPtr, bytes: &[u8]);

    /// Delete the payload stored under `pptr`. Removing an absent pointer is
    /// a no-op (reclamation may race with nothing at this layer).
    fn remove(&self, pptr: PhysicalPtr);

    /// Fetch the payload stored under `pptr`, if any.
    fn get(&self, pptr: PhysicalPtr) -> Option<Arc<[u8]>>;
}

/// Heap-backed reference implementation of [`NodeTable`].
#[derive(Debug)]
pub struct InMemoryNodeTable {
    /// Stored payloads, shared out as `Arc<[u8]>` so readers never copy.
    payloads: Mutex<HashMap<PhysicalPtr, Arc<[u8]>>>,

    /// Next raw pointer value. Starts at 1; zero is the null sentinel.
    next: AtomicU64,
}

impl InMemoryNodeTable {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            payloads: Mutex::new(HashMap::new()),
            next: AtomicU64::new(1),
        }
    }

    /// Number of live payloads. Test suites use this to check that
    /// reclamation leaves no orphans behind.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payloads.lock().len()
    }

    /// Whether the store holds no payloads.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payloads.lock().is_empty()
    }

    /// Whether a payload is stored under `pptr`.
    #[must_use]
    pub fn contains(&self, pptr: PhysicalPtr) -> bool {
        self.payloads.lock().contains_key(&pptr)
    }
}

impl Default for InMemoryNodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTable for InMemoryNodeTable {
    fn next_ptr(&self) -> PhysicalPtr {
        PhysicalPtr::new(self.next.fetch_add(1, Ordering::Relaxed))
    }

    fn insert(&self, pptr: PhysicalPtr, bytes: &[u8]) {
        debug_assert!(!pptr.is_zero(), "null physical pointer is never stored");
        self.payloads.lock().insert(pptr, Arc::from(bytes));
    }

    fn remove(&self, pptr: PhysicalPtr) {
        self.payloads.lock().remove(&pptr);
    }

    fn get(&self, pptr: PhysicalPtr) -> Option<Arc<[u8]>> {
        self.payloads.lock().get(&pptr).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_unique_and_nonzero() {
        let store = InMemoryNodeTable::new();
        let a = store.next_ptr();
        let b = store.next_ptr();

        assert!(!a.is_zero());
        assert_ne!(a, b);
    }

    #[test]
    fn test_insert_get_remove() {
        let store = InMemoryNodeTable::new();
        let p = store.next_ptr();

        store.insert(p, b"payload");
        assert_eq!(store.get(p).as_deref(), Some(b"payload".as_slice()));
        assert_eq!(store.len(), 1);

        store.remove(p);
        assert!(store.get(p).is_none());
        assert!(store.is_empty());

        // removing again is a no-op
        store.remove(p);
    }
}
