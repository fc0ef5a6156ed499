//! Structural rebalancing hand-off.
//!
//! Split and merge are whole structural operations of their own — they
//! reshape the mapping table, not just one leaf — and live outside this
//! engine. The engine only decides *when* they are needed (the size checks on
//! every full resolution) and defers to a [`Rebalancer`]. Both operations
//! must be idempotent with respect to retry: the engine never assumes a
//! specific post-condition shape and always re-resolves afterward.

use crate::cache::{NodeCache, NodePointer};
use crate::error::Result;
use crate::search::OpContext;
use crate::store::NodeTable;
use crate::table::MappingTable;

/// Splits oversized and merges undersized leaves.
pub trait Rebalancer<K, V>: Send + Sync {
    /// Rebalance the tree around an oversized leaf.
    ///
    /// # Errors
    /// Any fatal failure of the underlying tables.
    fn split<M, N, C>(&self, node: &NodePointer<K, V>, ctx: &OpContext<'_, M, N, C>) -> Result<()>
    where
        M: MappingTable,
        N: NodeTable,
        C: NodeCache<K, V>;

    /// Rebalance the tree around an undersized, non-sentinel leaf.
    ///
    /// # Errors
    /// Any fatal failure of the underlying tables.
    fn merge<M, N, C>(&self, node: &NodePointer<K, V>, ctx: &OpContext<'_, M, N, C>) -> Result<()>
    where
        M: MappingTable,
        N: NodeTable,
        C: NodeCache<K, V>;
}

/// A rebalancer that never rebalances.
///
/// Only sound together with a config whose size checks cannot fire, such as
/// [`TreeConfig::unbounded`] — with a finite `max_node_size`, a no-op split
/// would leave the engine restarting resolution forever.
///
/// [`TreeConfig::unbounded`]: crate::config::TreeConfig::unbounded
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRebalance;

impl<K, V> Rebalancer<K, V> for NoRebalance {
    fn split<M, N, C>(&self, _node: &NodePointer<K, V>, _ctx: &OpContext<'_, M, N, C>) -> Result<()>
    where
        M: MappingTable,
        N: NodeTable,
        C: NodeCache<K, V>,
    {
        Ok(())
    }

    fn merge<M, N, C>(&self, _node: &NodePointer<K, V>, _ctx: &OpContext<'_, M, N, C>) -> Result<()>
    where
        M: MappingTable,
        N: NodeTable,
        C: NodeCache<K, V>,
    {
        Ok(())
    }
}
