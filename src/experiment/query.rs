//! Experiment query: stateless reads and writes addressed by explicit path.

use rustc_hash::FxHashSet;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::Experiment;
use crate::node::{Node, NodeKind, NodePatch};
use crate::path;
use crate::storage::BlobStore;
use crate::store::{Filter, FindOptions, Projection, Sort};
use crate::tree::TreeMutator;
use crate::value::{self, DataValue, LargeValueRef, OffloadPolicy};
use crate::{Error, Result};

fn experiments_only() -> Filter {
    Filter::new().eq("kind", Value::from(NodeKind::Experiment.as_str()))
}

/// Keys become dotted field paths in filters, so they cannot contain `.` or
/// start with `$`.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('.') || key.starts_with('$') {
        return Err(Error::InvalidInput(format!(
            "invalid key {key:?}: keys must be non-empty, without '.' and not start with '$'"
        )));
    }
    Ok(())
}

/// Read/write access to experiments by path.
#[derive(Debug, Clone)]
pub struct ExperimentQuery {
    tree: TreeMutator,
    policy: OffloadPolicy,
}

impl ExperimentQuery {
    /// Create a query façade over the tree's store and backend.
    #[must_use]
    pub const fn new(tree: TreeMutator, policy: OffloadPolicy) -> Self {
        Self { tree, policy }
    }

    /// The underlying tree mutator.
    #[must_use]
    pub const fn tree(&self) -> &TreeMutator {
        &self.tree
    }

    /// Value classification settings.
    #[must_use]
    pub const fn policy(&self) -> &OffloadPolicy {
        &self.policy
    }

    fn resolve(&self, node: Node) -> Result<Experiment> {
        Experiment::from_node(node, self.tree.backend().as_ref())
    }

    fn experiment_node(&self, path: &str) -> Result<Node> {
        let path = path::normalize_absolute(path)?;
        match self.tree.store().find_by_path(&path)? {
            Some(node) if node.is_experiment() => Ok(node),
            _ => Err(Error::not_found(path)),
        }
    }

    /// Experiments below `path` (direct children, or all descendants when
    /// `recursive`), with `options.filter` combined with `kind = experiment`.
    ///
    /// If `path` is itself an experiment it is returned alone when it
    /// matches the filter.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing exists at `path`.
    pub fn get_experiments(
        &self,
        path: &str,
        recursive: bool,
        options: &FindOptions,
    ) -> Result<Vec<Experiment>> {
        let path = path::normalize_absolute(path)?;
        let store = self.tree.store();
        let Some(node) = store.find_by_path(&path)? else {
            return Err(Error::not_found(path));
        };

        let nodes = if node.is_experiment() {
            if options.filter_ref().matches(&node.to_document()?) {
                let mut node = node;
                options.projection_ref().apply(&mut node);
                vec![node]
            } else {
                Vec::new()
            }
        } else {
            let options = options.clone().and_filter(experiments_only());
            store.find_children(&path, recursive, &options)?
        };
        debug!(path = %path, recursive, count = nodes.len(), "get_experiments");
        nodes.into_iter().map(|n| self.resolve(n)).collect()
    }

    /// Experiments at the given paths, in input order unless `sort` says
    /// otherwise. `$(a-b)` ranges are expanded; paths that do not resolve to
    /// an experiment are skipped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for malformed paths and `InvalidInput` for a
    /// range pattern that expands too far.
    pub fn get_experiments_in_list<I, S>(
        &self,
        paths: I,
        sort: &Sort,
        projection: &Projection,
    ) -> Result<Vec<Experiment>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let store = self.tree.store();
        let mut seen = FxHashSet::default();
        let mut found = Vec::new();
        for raw in paths {
            for expanded in path::expand_ranges(raw.as_ref())? {
                let path = path::normalize_absolute(&expanded)?;
                if !seen.insert(path.clone()) {
                    continue;
                }
                match store.find_by_path(&path)? {
                    Some(node) if node.is_experiment() => {
                        let doc = node.to_document()?;
                        found.push((node, doc));
                    }
                    _ => debug!(path = %path, "skipping missing experiment"),
                }
            }
        }

        if !sort.is_empty() {
            found.sort_by(|(_, a), (_, b)| sort.compare(a, b));
        }
        found
            .into_iter()
            .map(|(mut node, _)| {
                projection.apply(&mut node);
                self.resolve(node)
            })
            .collect()
    }

    /// The experiment at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `path` is missing or not an experiment.
    pub fn get_experiment(&self, path: &str) -> Result<Experiment> {
        let node = self.experiment_node(path)?;
        self.resolve(node)
    }

    /// Number of experiments below the directory at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` unless `path` is an existing directory.
    pub fn count_experiments(&self, path: &str, recursive: bool) -> Result<usize> {
        let path = path::normalize_absolute(path)?;
        if !self.tree.dir_exists(&path)? {
            return Err(Error::not_found(path));
        }
        self.tree
            .store()
            .count_children(&path, recursive, &experiments_only())
    }

    /// Set `data[key]` on the experiment at `path`.
    ///
    /// Arrays, blobs and oversized JSON are written to the storage backend
    /// first; a large value previously stored under `key` is deleted only
    /// after the document points at the new one.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `path` is not an experiment, `InvalidInput` for
    /// bad keys and `UnsupportedOperation`/`StorageError` from the backend.
    pub fn experiment_log_data(
        &self,
        path: &str,
        key: &str,
        value: impl Into<DataValue>,
    ) -> Result<()> {
        validate_key(key)?;
        let node = self.experiment_node(path)?;
        let backend = self.tree.backend();
        let encoded = value::encode(&value.into(), backend.as_ref(), &self.policy)?;
        let written = value::refs_in(&encoded);

        let before = match self
            .tree
            .store()
            .update_fields(node.id(), &NodePatch::new().set_data(key, encoded))
        {
            Ok(before) => before,
            Err(e) => {
                value::discard(backend.as_ref(), written.iter().map(LargeValueRef::token));
                return Err(e);
            }
        };

        let replaced = before.data().get(key).map(value::refs_in).unwrap_or_default();
        for old in replaced.iter().filter(|old| !written.contains(old)) {
            if let Err(e) = backend.delete(old.token()) {
                warn!(path = node.path(), key, token = %old.token(), error = %e, "failed to delete overwritten large value");
            }
        }
        debug!(path = node.path(), key, offloaded = written.len(), "logged data");
        Ok(())
    }

    /// Set `notes[key]` on the experiment at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `path` is not an experiment and `InvalidInput`
    /// for bad keys.
    pub fn experiment_log_note(&self, path: &str, key: &str, value: impl Into<Value>) -> Result<()> {
        validate_key(key)?;
        let node = self.experiment_node(path)?;
        self.tree
            .store()
            .update_fields(node.id(), &NodePatch::new().set_note(key, value.into()))?;
        debug!(path = node.path(), key, "logged note");
        Ok(())
    }

    /// Replace the whole notes map of the experiment at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `path` is not an experiment.
    pub fn update_experiment_notes(&self, path: &str, notes: Map<String, Value>) -> Result<()> {
        let node = self.experiment_node(path)?;
        self.tree
            .store()
            .update_fields(node.id(), &NodePatch::new().replace_notes(notes))?;
        info!(path = node.path(), "replaced experiment notes");
        Ok(())
    }
}
