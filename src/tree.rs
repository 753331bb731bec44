//! Tree mutator: `mkdir`, `rm`, `mv` and `ls` over a [`NodeStore`].
//!
//! Every operation normalizes its operands, checks the structural
//! preconditions (existence, collisions, cycles, experiments-are-leaves) and
//! only then writes. `rm` hands the large-value references of every removed
//! experiment to the storage backend; a failed backend delete is logged and
//! leaves an orphaned object behind rather than failing the removal.
//!
//! ```rust
//! use trueno_labdb::LabDb;
//!
//! # fn main() -> trueno_labdb::Result<()> {
//! let db = LabDb::builder().build();
//! let tree = db.tree();
//! tree.mkdir("/a/b", true)?;
//! tree.mv("/a", "/c")?;
//! assert!(tree.dir_exists("/c/b")?);
//! assert!(!tree.exists("/a")?);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::node::{NewNode, Node, NodePatch};
use crate::path::{self, PathPattern, ROOT};
use crate::storage::{BlobStore, StorageBackend};
use crate::store::{FindOptions, NodeStore};
use crate::value::large_refs;
use crate::{Error, Result};

/// Nodes touched by an `rm` or `mv`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AffectedCounts {
    /// Directory nodes
    pub directories: usize,
    /// Experiment nodes
    pub experiments: usize,
}

impl AffectedCounts {
    fn of(nodes: &[Node]) -> Self {
        let experiments = nodes.iter().filter(|n| n.is_experiment()).count();
        Self {
            directories: nodes.len() - experiments,
            experiments,
        }
    }

    /// Total nodes.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.directories + self.experiments
    }

    const fn add(self, other: Self) -> Self {
        Self {
            directories: self.directories + other.directories,
            experiments: self.experiments + other.experiments,
        }
    }
}

/// Structural operations on the node tree.
#[derive(Debug, Clone)]
pub struct TreeMutator {
    store: Arc<dyn NodeStore>,
    backend: Arc<StorageBackend>,
}

impl TreeMutator {
    /// Create a mutator over a store and its storage backend.
    #[must_use]
    pub fn new(store: Arc<dyn NodeStore>, backend: Arc<StorageBackend>) -> Self {
        Self { store, backend }
    }

    /// True if any node exists at `path`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for malformed paths.
    pub fn exists(&self, path: &str) -> Result<bool> {
        let path = path::normalize_absolute(path)?;
        Ok(self.store.find_by_path(&path)?.is_some())
    }

    /// True if a directory exists at `path`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for malformed paths.
    pub fn dir_exists(&self, path: &str) -> Result<bool> {
        let path = path::normalize_absolute(path)?;
        Ok(self
            .store
            .find_by_path(&path)?
            .is_some_and(|n| n.is_directory()))
    }

    /// Create a directory, returning its normalized path.
    ///
    /// With `create_intermediate`, missing ancestors are created root-to-leaf.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the path is taken, `NotFound` if the parent
    /// is missing (without `create_intermediate`) and `Conflict` if an
    /// ancestor is an experiment.
    pub fn mkdir(&self, path: &str, create_intermediate: bool) -> Result<String> {
        let path = path::normalize_absolute(path)?;
        self.create(NewNode::directory(path), create_intermediate)
    }

    /// Create an experiment node at `path` with initial notes.
    ///
    /// # Errors
    ///
    /// Same as [`TreeMutator::mkdir`] without intermediates.
    pub fn create_experiment(&self, path: &str, notes: Map<String, Value>) -> Result<String> {
        let path = path::normalize_absolute(path)?;
        self.create(NewNode::experiment(path).with_notes(notes), false)
    }

    fn create(&self, node: NewNode, create_intermediate: bool) -> Result<String> {
        let path = node.path().to_string();
        if self.store.find_by_path(&path)?.is_some() {
            return Err(Error::already_exists(path));
        }
        if create_intermediate {
            self.ensure_directories(&path)?;
        } else if let Some(parent) = path::parent(&path) {
            self.require_directory(parent)?;
        }
        let kind = node.kind();
        let id = self.store.insert(node)?;
        info!(path = %path, kind = kind.as_str(), id = %id, "created node");
        Ok(path)
    }

    /// Create every missing strict ancestor of `path` as a directory.
    fn ensure_directories(&self, path: &str) -> Result<()> {
        for ancestor in path::ancestors(path) {
            match self.store.find_by_path(ancestor)? {
                Some(node) if node.is_directory() => {}
                Some(_) => return Err(experiment_in_the_way(ancestor, path)),
                None => match self.store.insert(NewNode::directory(ancestor)) {
                    Ok(id) => info!(path = ancestor, id = %id, "created intermediate directory"),
                    // Created by a concurrent session; fine as long as it is a directory.
                    Err(Error::AlreadyExists { .. }) => {
                        self.require_directory(ancestor)?;
                    }
                    Err(e) => return Err(e),
                },
            }
        }
        Ok(())
    }

    fn require_directory(&self, path: &str) -> Result<Node> {
        match self.store.find_by_path(path)? {
            Some(node) if node.is_directory() => Ok(node),
            Some(_) => Err(Error::Conflict(format!(
                "{path} is an experiment; experiments cannot contain other nodes"
            ))),
            None => Err(Error::not_found(path)),
        }
    }

    fn require_node(&self, path: &str) -> Result<Node> {
        self.store
            .find_by_path(path)?
            .ok_or_else(|| Error::not_found(path))
    }

    /// Remove a node and its whole subtree. A trailing `/*` removes every
    /// child of the directory instead (see [`TreeMutator::rm_children`]).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing exists at `path` and `Forbidden` for root.
    pub fn rm(&self, path: &str) -> Result<AffectedCounts> {
        match path::parse_pattern(path, ROOT)? {
            PathPattern::Exact(path) => self.rm_exact(&path),
            PathPattern::Children(dir) => self.rm_children(&dir),
        }
    }

    /// Remove every child subtree of `dir`, keeping `dir` itself.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` unless `dir` is an existing directory.
    pub fn rm_children(&self, dir: &str) -> Result<AffectedCounts> {
        let dir = path::normalize_absolute(dir)?;
        self.require_directory(&dir)?;
        let children = self.store.find_children(&dir, false, &FindOptions::new())?;
        let mut total = AffectedCounts::default();
        for child in children {
            total = total.add(self.rm_exact(child.path())?);
        }
        Ok(total)
    }

    /// Count what [`TreeMutator::rm`] would remove, without removing it.
    ///
    /// # Errors
    ///
    /// Same validation as [`TreeMutator::rm`].
    pub fn rm_dry_run(&self, path: &str) -> Result<AffectedCounts> {
        match path::parse_pattern(path, ROOT)? {
            PathPattern::Exact(path) => {
                forbid_root(&path, "deleted")?;
                let node = self.require_node(&path)?;
                let mut nodes = self.store.find_children(&path, true, &FindOptions::new())?;
                nodes.push(node);
                Ok(AffectedCounts::of(&nodes))
            }
            PathPattern::Children(dir) => {
                self.require_directory(&dir)?;
                let nodes = self.store.find_children(&dir, true, &FindOptions::new())?;
                Ok(AffectedCounts::of(&nodes))
            }
        }
    }

    fn rm_exact(&self, path: &str) -> Result<AffectedCounts> {
        forbid_root(path, "deleted")?;
        self.require_node(path)?;
        let removed = self.store.delete_subtree(path)?;
        let counts = AffectedCounts::of(&removed);

        for node in removed.iter().filter(|n| n.is_experiment()) {
            for reference in large_refs(node) {
                if let Err(e) = self.backend.delete(reference.token()) {
                    warn!(
                        path = node.path(),
                        token = %reference.token(),
                        error = %e,
                        "failed to delete large value; object left orphaned"
                    );
                }
            }
        }
        info!(
            path,
            directories = counts.directories,
            experiments = counts.experiments,
            "removed subtree"
        );
        Ok(counts)
    }

    /// Move (rename) `src` and its subtree to `dest`. A trailing `/*` on
    /// `src` moves every child into the directory `dest` instead (see
    /// [`TreeMutator::mv_children`]). Returns how many nodes moved.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `src` or the parent of `dest` is missing,
    /// `Conflict` if `dest` exists or lies inside `src` and `Forbidden` for
    /// root.
    pub fn mv(&self, src: &str, dest: &str) -> Result<usize> {
        self.mv_with(src, dest, false)
    }

    /// [`TreeMutator::mv`], optionally creating missing ancestors of `dest`.
    ///
    /// # Errors
    ///
    /// Same as [`TreeMutator::mv`].
    pub fn mv_with(&self, src: &str, dest: &str, create_intermediate: bool) -> Result<usize> {
        match path::parse_pattern(src, ROOT)? {
            PathPattern::Exact(src) => {
                let dest = path::normalize_absolute(dest)?;
                self.check_move(&src, &dest, create_intermediate)?;
                if create_intermediate {
                    self.ensure_directories(&dest)?;
                }
                self.move_node(&src, &dest)
            }
            PathPattern::Children(dir) => Ok(self.mv_children(&dir, dest)?.total()),
        }
    }

    /// Move every child of `src_dir` into the existing directory `dest_dir`.
    ///
    /// All targets are checked before anything moves.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` unless both are existing directories and
    /// `Conflict` if any target exists or lies inside the child being moved.
    pub fn mv_children(&self, src_dir: &str, dest_dir: &str) -> Result<AffectedCounts> {
        let moves = self.plan_children_move(src_dir, dest_dir)?;
        let mut total = AffectedCounts::default();
        for (child, target) in moves {
            let subtree = self.subtree_counts(child.path(), &child)?;
            self.move_node(child.path(), &target)?;
            total = total.add(subtree);
        }
        Ok(total)
    }

    /// Count what [`TreeMutator::mv`] would move, without moving it.
    ///
    /// # Errors
    ///
    /// Same validation as [`TreeMutator::mv`].
    pub fn mv_dry_run(&self, src: &str, dest: &str) -> Result<AffectedCounts> {
        match path::parse_pattern(src, ROOT)? {
            PathPattern::Exact(src) => {
                let dest = path::normalize_absolute(dest)?;
                let node = self.check_move(&src, &dest, false)?;
                self.subtree_counts(&src, &node)
            }
            PathPattern::Children(dir) => {
                let mut total = AffectedCounts::default();
                for (child, _) in self.plan_children_move(&dir, dest)? {
                    total = total.add(self.subtree_counts(child.path(), &child)?);
                }
                Ok(total)
            }
        }
    }

    fn plan_children_move(&self, src_dir: &str, dest_dir: &str) -> Result<Vec<(Node, String)>> {
        let src_dir = path::normalize_absolute(src_dir)?;
        let dest_dir = path::normalize_absolute(dest_dir)?;
        self.require_directory(&src_dir)?;
        self.require_directory(&dest_dir)?;

        let children = self.store.find_children(&src_dir, false, &FindOptions::new())?;
        let mut moves = Vec::with_capacity(children.len());
        for child in children {
            let target = path::join(&dest_dir, child.name());
            if path::is_within(child.path(), &target) {
                return Err(Error::Conflict(format!(
                    "cannot move {} into itself ({target})",
                    child.path()
                )));
            }
            if self.store.find_by_path(&target)?.is_some() {
                return Err(Error::Conflict(format!(
                    "cannot move {}: {target} already exists",
                    child.path()
                )));
            }
            moves.push((child, target));
        }
        Ok(moves)
    }

    /// Validate a single move; returns the source node.
    fn check_move(&self, src: &str, dest: &str, create_intermediate: bool) -> Result<Node> {
        forbid_root(src, "moved")?;
        let node = self.require_node(src)?;
        if path::is_within(src, dest) {
            return Err(Error::Conflict(format!(
                "cannot move {src} to {dest}: destination is the source or inside it"
            )));
        }
        if self.store.find_by_path(dest)?.is_some() {
            return Err(Error::Conflict(format!(
                "cannot move {src} to {dest}: {dest} already exists"
            )));
        }
        let Some(parent) = path::parent(dest) else {
            return Err(Error::already_exists(ROOT));
        };
        if create_intermediate {
            if let Some(blocker) = self.first_experiment_on(dest)? {
                return Err(experiment_in_the_way(&blocker, dest));
            }
        } else {
            self.require_directory(parent)?;
        }
        Ok(node)
    }

    fn first_experiment_on(&self, path: &str) -> Result<Option<String>> {
        for ancestor in path::ancestors(path) {
            if let Some(node) = self.store.find_by_path(ancestor)? {
                if node.is_experiment() {
                    return Ok(Some(ancestor.to_string()));
                }
            }
        }
        Ok(None)
    }

    fn move_node(&self, src: &str, dest: &str) -> Result<usize> {
        let count = self.store.rewrite_paths(src, dest)?;
        info!(src, dest, count, "moved subtree");
        Ok(count)
    }

    fn subtree_counts(&self, path: &str, root: &Node) -> Result<AffectedCounts> {
        let mut nodes = self.store.find_children(path, true, &FindOptions::new())?;
        nodes.push(root.clone());
        Ok(AffectedCounts::of(&nodes))
    }

    /// Children of the directory at `path`, or all descendants when
    /// `recursive`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` unless `path` is an existing directory.
    pub fn ls(&self, path: &str, recursive: bool) -> Result<Vec<Node>> {
        self.ls_with(path, recursive, &FindOptions::new())
    }

    /// [`TreeMutator::ls`] with filter, projection, sort and limit.
    ///
    /// # Errors
    ///
    /// Same as [`TreeMutator::ls`].
    pub fn ls_with(&self, path: &str, recursive: bool, options: &FindOptions) -> Result<Vec<Node>> {
        let path = path::normalize_absolute(path)?;
        match self.store.find_by_path(&path)? {
            Some(node) if node.is_directory() => {}
            _ => return Err(Error::not_found(path)),
        }
        let nodes = self.store.find_children(&path, recursive, options)?;
        debug!(path = %path, recursive, count = nodes.len(), "ls");
        Ok(nodes)
    }

    /// Replace the notes of the node at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing exists at `path`.
    pub fn update_notes(&self, path: &str, notes: Map<String, Value>) -> Result<()> {
        let path = path::normalize_absolute(path)?;
        let node = self.require_node(&path)?;
        self.store
            .update_fields(node.id(), &NodePatch::new().replace_notes(notes))?;
        info!(path = %path, "replaced notes");
        Ok(())
    }

    pub(crate) fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    pub(crate) fn backend(&self) -> &Arc<StorageBackend> {
        &self.backend
    }
}

fn forbid_root(path: &str, action: &str) -> Result<()> {
    if path == ROOT {
        return Err(Error::Forbidden(format!(
            "the root directory / cannot be {action}"
        )));
    }
    Ok(())
}

fn experiment_in_the_way(experiment: &str, target: &str) -> Error {
    Error::Conflict(format!(
        "cannot create {target}: {experiment} is an experiment, not a directory"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryNodeStore;

    fn tree() -> TreeMutator {
        TreeMutator::new(
            Arc::new(MemoryNodeStore::new()),
            Arc::new(StorageBackend::Disabled),
        )
    }

    #[test]
    fn test_mkdir_requires_parent() {
        let tree = tree();
        assert!(tree.mkdir("/a/b", false).unwrap_err().is_not_found());
        assert_eq!(tree.mkdir("/a/b", true).unwrap(), "/a/b");
        assert!(tree.dir_exists("/a").unwrap());
    }

    #[test]
    fn test_mkdir_existing_is_already_exists() {
        let tree = tree();
        tree.mkdir("/a", false).unwrap();
        assert!(matches!(tree.mkdir("/a", false), Err(Error::AlreadyExists { .. })));
        assert!(matches!(tree.mkdir("/", true), Err(Error::AlreadyExists { .. })));
    }

    #[test]
    fn test_mkdir_under_experiment_conflicts() {
        let tree = tree();
        tree.create_experiment("/e", Map::new()).unwrap();
        assert!(matches!(tree.mkdir("/e/x", false), Err(Error::Conflict(_))));
        assert!(matches!(tree.mkdir("/e/x/y", true), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_rm_root_forbidden() {
        assert!(matches!(tree().rm("/"), Err(Error::Forbidden(_))));
    }

    #[test]
    fn test_rm_counts() {
        let tree = tree();
        tree.mkdir("/a/b", true).unwrap();
        tree.create_experiment("/a/b/1", Map::new()).unwrap();
        let dry = tree.rm_dry_run("/a").unwrap();
        assert_eq!(dry, AffectedCounts { directories: 2, experiments: 1 });
        assert!(tree.exists("/a/b/1").unwrap());
        assert_eq!(tree.rm("/a").unwrap(), dry);
        assert!(!tree.exists("/a").unwrap());
    }

    #[test]
    fn test_rm_wildcard_keeps_directory() {
        let tree = tree();
        tree.mkdir("/a/x", true).unwrap();
        tree.mkdir("/a/y", true).unwrap();
        let counts = tree.rm("/a/*").unwrap();
        assert_eq!(counts.directories, 2);
        assert!(tree.dir_exists("/a").unwrap());
        assert!(tree.ls("/a", false).unwrap().is_empty());
    }

    #[test]
    fn test_mv_into_self_conflicts() {
        let tree = tree();
        tree.mkdir("/a", false).unwrap();
        assert!(matches!(tree.mv("/a", "/a/b"), Err(Error::Conflict(_))));
        assert!(matches!(tree.mv("/a", "/a"), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_mv_missing_parent() {
        let tree = tree();
        tree.mkdir("/a", false).unwrap();
        assert!(tree.mv("/a", "/x/y").unwrap_err().is_not_found());
        assert_eq!(tree.mv_with("/a", "/x/y", true).unwrap(), 1);
        assert!(tree.dir_exists("/x/y").unwrap());
    }

    #[test]
    fn test_mv_children() {
        let tree = tree();
        tree.mkdir("/src/a", true).unwrap();
        tree.mkdir("/src/b", true).unwrap();
        tree.mkdir("/dest", false).unwrap();
        assert_eq!(tree.mv_dry_run("/src/*", "/dest").unwrap().directories, 2);
        assert_eq!(tree.mv("/src/*", "/dest").unwrap(), 2);
        assert!(tree.dir_exists("/dest/a").unwrap());
        assert!(tree.ls("/src", false).unwrap().is_empty());
    }

    #[test]
    fn test_ls_requires_directory() {
        let tree = tree();
        tree.create_experiment("/e", Map::new()).unwrap();
        assert!(tree.ls("/e", false).unwrap_err().is_not_found());
        assert!(tree.ls("/missing", false).unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_notes_on_directory() {
        let tree = tree();
        tree.mkdir("/a", false).unwrap();
        let mut notes = Map::new();
        notes.insert("purpose".into(), Value::from("sweep"));
        tree.update_notes("/a", notes.clone()).unwrap();
        let node = tree.store().find_by_path("/a").unwrap().unwrap();
        assert_eq!(node.notes(), &notes);
    }
}
