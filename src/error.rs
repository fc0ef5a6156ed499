//! Error taxonomy for the leaf-update engine.
//!
//! The engine distinguishes four classes of outcome (only the last two appear
//! here as errors):
//!
//! - **Semantic conflict** (delete of an absent key): not an error, reported
//!   as `Ok(false)` from [`LeafUpdateEngine::execute`].
//! - **Transient contention** ([`TableError::WrongVersion`]): recovered
//!   internally by retrying in place, never surfaced.
//! - **Stale structure** ([`TableError::ObjectDoesntExist`]): recovered
//!   internally via cache invalidation and re-resolution, never surfaced.
//! - **Fatal failures** (anything else): propagated as [`EngineError`] after
//!   the speculative physical allocation has been cleaned up.
//!
//! [`LeafUpdateEngine::execute`]: crate::engine::LeafUpdateEngine::execute

use thiserror::Error;

use crate::pointer::PhysicalPtr;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error classes returned by [`MappingTable::update`].
///
/// [`MappingTable::update`]: crate::table::MappingTable::update
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// The logical pointer is no longer mapped; the slot itself may have been
    /// split or merged away. Recoverable: invalidate the cache entry and
    /// fully re-resolve.
    #[error("logical pointer is no longer mapped")]
    ObjectDoesntExist,

    /// Another update won the race since the entry was last observed.
    /// Recoverable: re-resolve the node at the same logical pointer and
    /// retry.
    #[error("mapping entry version changed since resolution")]
    WrongVersion,

    /// Any other mapping-table failure. Not recoverable by the engine.
    #[error("mapping table failure: {0}")]
    Fatal(String),
}

/// Fatal errors surfaced to the caller of the engine.
///
/// A call that returns `Err` made no externally visible mutation: the
/// speculative physical payload written before the failure is removed before
/// the error propagates. The caller must nevertheless treat the index state
/// for that key as unknown and retry from scratch at a higher level.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The mapping table failed with a non-recoverable error class.
    #[error(transparent)]
    Table(#[from] TableError),

    /// A node or delta payload could not be encoded or decoded.
    #[error("payload codec error: {0}")]
    Codec(String),

    /// No leaf could be resolved for the requested key.
    #[error("no leaf resolved for key")]
    UnresolvedLeaf,

    /// A physical pointer reachable from the mapping table had no stored
    /// payload. Indicates store corruption or a reclamation bug.
    #[error("stored payload missing for {0:?}")]
    MissingPayload(PhysicalPtr),
}

impl EngineError {
    /// Wrap a bincode failure as a codec error.
    pub(crate) fn codec(err: &bincode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_error_display() {
        assert_eq!(
            TableError::WrongVersion.to_string(),
            "mapping entry version changed since resolution"
        );
        assert_eq!(
            TableError::Fatal("backend down".into()).to_string(),
            "mapping table failure: backend down"
        );
    }

    #[test]
    fn test_fatal_table_error_converts_transparently() {
        let err: EngineError = TableError::Fatal("boom".into()).into();
        assert_eq!(err.to_string(), "mapping table failure: boom");
    }
}
