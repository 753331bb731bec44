//! Node store: the document collection holding tree nodes.
//!
//! The store owns path uniqueness (a unique index on `path`) and node
//! existence. It answers prefix queries over paths and performs the bulk
//! path rewrite used by `mv`.
//!
//! Single-node updates are atomic. Multi-node operations (`rewrite_paths`,
//! `delete_subtree`) check their preconditions before writing and restore
//! the prior state if a write is refused midway, but a concurrent reader may
//! observe a subtree mid-rewrite. Callers needing strict subtree atomicity
//! must serialize structural mutations themselves.
//!
//! ```rust
//! use trueno_labdb::node::NewNode;
//! use trueno_labdb::store::{FindOptions, MemoryNodeStore, NodeStore};
//!
//! # fn main() -> trueno_labdb::Result<()> {
//! let store = MemoryNodeStore::new();
//! store.insert(NewNode::directory("/proj"))?;
//! store.insert(NewNode::experiment("/proj/1"))?;
//!
//! let children = store.find_children("/proj", false, &FindOptions::new())?;
//! assert_eq!(children.len(), 1);
//!
//! store.rewrite_paths("/proj", "/archive")?;
//! assert!(store.find_by_path("/archive/1")?.is_some());
//! # Ok(())
//! # }
//! ```

mod bucket;
mod memory;
mod query;

pub use bucket::{LargeObjectBucket, MemoryBucket, ObjectRecord};
pub use memory::MemoryNodeStore;
pub use query::{compare_values, lookup, Filter, FindOptions, Projection, Sort, SortOrder};

use std::fmt;

use crate::node::{NewNode, Node, NodeId, NodePatch};
use crate::Result;

/// Document collection of tree nodes.
pub trait NodeStore: Send + Sync + fmt::Debug {
    /// Look up a node by normalized path.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable.
    fn find_by_path(&self, path: &str) -> Result<Option<Node>>;

    /// Nodes below `path`: direct children, or every descendant when
    /// `recursive`. `options` are applied verbatim.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable.
    fn find_children(&self, path: &str, recursive: bool, options: &FindOptions)
        -> Result<Vec<Node>>;

    /// Number of nodes below `path` matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unavailable.
    fn count_children(&self, path: &str, recursive: bool, filter: &Filter) -> Result<usize> {
        let options = FindOptions::new().filter(filter.clone());
        Ok(self.find_children(path, recursive, &options)?.len())
    }

    /// Insert a node and return its assigned id.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the path is taken, `NotFound` if the parent
    /// is missing and `Conflict` if the parent is an experiment.
    fn insert(&self, node: NewNode) -> Result<NodeId>;

    /// Atomically apply `patch` to one node, returning the node as it was
    /// before the update.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no node has this id.
    fn update_fields(&self, id: NodeId, patch: &NodePatch) -> Result<Node>;

    /// Replace `old_prefix` with `new_prefix` in the path of the node at
    /// `old_prefix` and every descendant. Returns how many nodes changed.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` (with nothing written) if any new path collides
    /// with a node outside the rewritten set.
    fn rewrite_paths(&self, old_prefix: &str, new_prefix: &str) -> Result<usize>;

    /// Remove the node at `path` and every descendant, returning them.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing exists at `path`.
    fn delete_subtree(&self, path: &str) -> Result<Vec<Node>>;
}
