//! # `bwtree`
//!
//! The leaf-update engine of a lock-free, log-structured B-tree (a
//! "Bw-tree"-style index).
//!
//! Every structural mutation is installed by an atomic compare-and-swap on a
//! versioned mapping table — never by in-place mutation or locking. Updates
//! are appended as immutable delta records layered over an immutable base
//! leaf; periodic consolidation flattens the chain to bound read
//! amplification, and superseded payloads are reclaimed eagerly at exactly
//! those consolidation points.
//!
//! | Mechanism | Status |
//! |-----------|--------|
//! | Delta-chained insert/delete | Works (CAS-published, unbounded retry) |
//! | Consolidation + reclamation | Works (threshold-driven, eager) |
//! | Split/merge hand-off | Size checks + [`Rebalancer`] contract (structural ops are external) |
//! | Mapping table / store / cache | Trait contracts + in-memory reference impls |
//! | Range scans | Not implemented |
//! | Durability / recovery | Not implemented |
//!
//! ## Thread Safety
//!
//! [`BwTree<K, V>`] is `Send + Sync` when `K` and `V` are, and every method
//! takes `&self`:
//!
//! ```rust
//! use bwtree::BwTree;
//!
//! let tree: BwTree<u64, u64> = BwTree::new();
//!
//! tree.insert(1, 100)?;
//! assert_eq!(tree.get(&1)?, Some(100));
//! # Ok::<(), bwtree::EngineError>(())
//! ```
//!
//! Concurrent updates to the same leaf are linearized by the mapping entry's
//! version counter: exactly one CAS succeeds per version, losers rebuild
//! against the freshly resolved state and retry. No caller ever blocks on a
//! lock held by another caller.
//!
//! ## Design
//!
//! The engine ([`LeafUpdateEngine`]) is generic over its collaborators: a
//! search routine resolving the leaf for a key ([`LeafSearch`]), a
//! structural rebalancer invoked on size-threshold violations
//! ([`Rebalancer`]), the versioned mapping table ([`MappingTable`]), the
//! write-once physical store ([`NodeTable`]), and a best-effort node cache
//! ([`NodeCache`]). In-memory reference implementations of each are
//! included; a disk-backed or distributed backend implements the same traits.
//!
//! ## Known quirk
//!
//! Inserting an existing key with a *different* value adds a second entry
//! for that key instead of replacing the first. This reproduces the
//! reference implementation's behavior deliberately; see
//! [`node::LeafNode::apply_insert`].

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod node;
pub mod ops;
pub mod pointer;
pub mod rebalance;
pub mod search;
pub mod store;
pub mod table;
pub mod tree;

mod tracing_helpers;

// Re-export main types for convenience
pub use cache::{InMemoryNodeCache, NodeCache, NodePointer};
pub use config::TreeConfig;
pub use engine::LeafUpdateEngine;
pub use error::{EngineError, Result, TableError};
pub use node::{DeltaRecord, LeafNode, LeafPayload};
pub use ops::{DeleteOperation, InsertOperation, LeafOperation};
pub use pointer::{LogicalPtr, PhysicalPtr, TxId, Version};
pub use rebalance::{NoRebalance, Rebalancer};
pub use search::{CachePolicy, DirectorySearch, LeafSearch, OpContext, SearchBound};
pub use store::{InMemoryNodeTable, NodeTable};
pub use table::{InMemoryMappingTable, MappingTable};
pub use tree::BwTree;
