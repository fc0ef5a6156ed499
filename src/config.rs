//! Size and consolidation thresholds for the leaf-update engine.
//!
//! The thresholds are process-wide constants in spirit, but they are carried
//! in an explicit [`TreeConfig`] value handed to the engine at construction
//! rather than living in global state.

/// Thresholds governing structural rebalancing and delta-chain consolidation.
///
/// Sizes are compared against [`LeafNode::serialized_size`], the encoded size
/// of the leaf's consolidated representation.
///
/// [`LeafNode::serialized_size`]: crate::node::LeafNode::serialized_size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    /// A leaf at or above this serialized size is split before any mutation
    /// is attempted against it.
    pub max_node_size: usize,

    /// A leaf below this serialized size is merged before any mutation is
    /// attempted, unless it is the left boundary sentinel (global minimum
    /// low key, no high key), which has no left sibling to merge with.
    pub min_node_size: usize,

    /// When the pre-mutation delta-chain length plus one reaches this value,
    /// the update consolidates: the chain is flattened into a new base and
    /// the superseded payloads are reclaimed.
    pub consolidate_at: usize,
}

impl TreeConfig {
    /// Create a config with explicit thresholds.
    #[must_use]
    pub const fn new(max_node_size: usize, min_node_size: usize, consolidate_at: usize) -> Self {
        Self {
            max_node_size,
            min_node_size,
            consolidate_at,
        }
    }

    /// A config with structural rebalancing disabled.
    ///
    /// The size checks can never fire (`max` at the type maximum, `min` at
    /// zero), so split/merge collaborators are never invoked. This is the
    /// right config for wirings whose rebalancer is a no-op, such as
    /// [`NoRebalance`]; with a finite `max_node_size` a no-op rebalancer
    /// would make the engine restart resolution forever.
    ///
    /// [`NoRebalance`]: crate::rebalance::NoRebalance
    #[must_use]
    pub const fn unbounded(consolidate_at: usize) -> Self {
        Self {
            max_node_size: usize::MAX,
            min_node_size: 0,
            consolidate_at,
        }
    }
}

impl Default for TreeConfig {
    /// Defaults sized for small in-memory leaves: 4 KiB split threshold,
    /// 256-byte merge threshold, consolidation every 8 deltas.
    fn default() -> Self {
        Self {
            max_node_size: 4096,
            min_node_size: 256,
            consolidate_at: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds_are_ordered() {
        let config = TreeConfig::default();
        assert!(config.min_node_size < config.max_node_size);
        assert!(config.consolidate_at > 1);
    }

    #[test]
    fn test_unbounded_disables_structural_checks() {
        let config = TreeConfig::unbounded(4);
        assert_eq!(config.max_node_size, usize::MAX);
        assert_eq!(config.min_node_size, 0);
        assert_eq!(config.consolidate_at, 4);
    }
}
