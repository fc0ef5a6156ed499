//! The mapping table: logical→physical indirection with versioned CAS.
//!
//! Every structural mutation in the tree is installed by
//! [`MappingTable::update`] — an atomic compare-and-swap keyed on the entry's
//! version counter. Exactly one update can succeed per version, which
//! linearizes all updates to a logical pointer without any locking visible to
//! the engine.
//!
//! [`InMemoryMappingTable`] is the reference implementation. Its internal
//! mutex is an implementation detail of this process-local backend (the
//! contract assumes the primitive is bounded and non-blocking); the engine
//! itself never blocks on another updater.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::TableError;
use crate::pointer::{LogicalPtr, PhysicalPtr, Version};

/// Logical→physical indirection table with optimistic versioning.
pub trait MappingTable: Send + Sync {
    /// Current `(physical pointer, version)` for `lptr`, if the slot exists.
    fn get(&self, lptr: LogicalPtr) -> Option<(PhysicalPtr, Version)>;

    /// Compare-and-swap the entry for `lptr` from `expected` to
    /// `new_pptr`, bumping the version.
    ///
    /// # Errors
    /// - [`TableError::ObjectDoesntExist`] — the slot is not mapped (it may
    ///   have been split or merged away).
    /// - [`TableError::WrongVersion`] — the entry's version is not
    ///   `expected`; another update won the race.
    /// - [`TableError::Fatal`] — any other backend failure.
    fn update(
        &self,
        lptr: LogicalPtr,
        new_pptr: PhysicalPtr,
        expected: Version,
    ) -> Result<Version, TableError>;
}

/// Process-local reference implementation of [`MappingTable`].
#[derive(Debug)]
pub struct InMemoryMappingTable {
    entries: Mutex<HashMap<LogicalPtr, (PhysicalPtr, Version)>>,
    next_logical: AtomicU64,
}

impl InMemoryMappingTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_logical: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh logical pointer (not yet mapped).
    #[must_use]
    pub fn allocate(&self) -> LogicalPtr {
        LogicalPtr::new(self.next_logical.fetch_add(1, Ordering::Relaxed))
    }

    /// Install the initial mapping for `lptr` at [`Version::INITIAL`].
    ///
    /// Used when seeding a tree or installing the product of a structural
    /// operation.
    pub fn insert_entry(&self, lptr: LogicalPtr, pptr: PhysicalPtr) -> Version {
        self.entries
            .lock()
            .insert(lptr, (pptr, Version::INITIAL));
        Version::INITIAL
    }

    /// Drop the mapping for `lptr` entirely.
    ///
    /// Simulates the slot disappearing under a concurrent split/merge; used
    /// by tests of the stale-structure retry path.
    pub fn remove_entry(&self, lptr: LogicalPtr) {
        self.entries.lock().remove(&lptr);
    }
}

impl Default for InMemoryMappingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingTable for InMemoryMappingTable {
    fn get(&self, lptr: LogicalPtr) -> Option<(PhysicalPtr, Version)> {
        self.entries.lock().get(&lptr).copied()
    }

    fn update(
        &self,
        lptr: LogicalPtr,
        new_pptr: PhysicalPtr,
        expected: Version,
    ) -> Result<Version, TableError> {
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get_mut(&lptr) else {
            return Err(TableError::ObjectDoesntExist);
        };

        if entry.1 != expected {
            return Err(TableError::WrongVersion);
        }

        let new_version = entry.1.next();
        *entry = (new_pptr, new_version);
        Ok(new_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_bumps_version() {
        let table = InMemoryMappingTable::new();
        let lptr = table.allocate();
        let v0 = table.insert_entry(lptr, PhysicalPtr::new(1));

        let v1 = table.update(lptr, PhysicalPtr::new(2), v0).unwrap();
        assert_eq!(v1, v0.next());
        assert_eq!(table.get(lptr), Some((PhysicalPtr::new(2), v1)));
    }

    #[test]
    fn test_update_rejects_stale_version() {
        let table = InMemoryMappingTable::new();
        let lptr = table.allocate();
        let v0 = table.insert_entry(lptr, PhysicalPtr::new(1));

        table.update(lptr, PhysicalPtr::new(2), v0).unwrap();

        // A second update against the old version loses the race.
        let err = table.update(lptr, PhysicalPtr::new(3), v0).unwrap_err();
        assert_eq!(err, TableError::WrongVersion);
    }

    #[test]
    fn test_update_missing_slot() {
        let table = InMemoryMappingTable::new();
        let err = table
            .update(LogicalPtr::new(7), PhysicalPtr::new(1), Version::INITIAL)
            .unwrap_err();
        assert_eq!(err, TableError::ObjectDoesntExist);
    }

    #[test]
    fn test_exactly_one_winner_per_version() {
        let table = InMemoryMappingTable::new();
        let lptr = table.allocate();
        let v0 = table.insert_entry(lptr, PhysicalPtr::new(1));

        let first = table.update(lptr, PhysicalPtr::new(2), v0);
        let second = table.update(lptr, PhysicalPtr::new(3), v0);

        assert!(first.is_ok());
        assert_eq!(second.unwrap_err(), TableError::WrongVersion);
    }
}
