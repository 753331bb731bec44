//! In-memory node store using `DashMap`.
//!
//! Two maps: node documents keyed by id, and a unique index from path to
//! id. Data is lost on process restart.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rustc_hash::FxHashSet;
use tracing::debug;

use super::{Filter, FindOptions, NodeStore};
use crate::node::{NewNode, Node, NodeId, NodePatch};
use crate::path::{self, ROOT};
use crate::{Error, Result};

/// In-memory node collection with a unique path index.
///
/// Created with the root directory already present.
#[derive(Debug)]
pub struct MemoryNodeStore {
    next_id: AtomicU64,
    nodes: DashMap<NodeId, Node>,
    paths: DashMap<String, NodeId>,
}

impl MemoryNodeStore {
    /// Create a store containing only the root directory.
    #[must_use]
    pub fn new() -> Self {
        let store = Self {
            next_id: AtomicU64::new(0),
            nodes: DashMap::new(),
            paths: DashMap::new(),
        };
        let id = store.allocate();
        store
            .nodes
            .insert(id, Node::from_new(id, NewNode::directory(ROOT)));
        store.paths.insert(ROOT.to_string(), id);
        store
    }

    /// Number of nodes, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if only the root directory exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Every node, ordered by path.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.iter().map(|e| e.value().clone()).collect();
        nodes.sort_by(|a, b| a.path().cmp(b.path()));
        nodes
    }

    fn allocate(&self) -> NodeId {
        NodeId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn id_of(&self, path: &str) -> Option<NodeId> {
        self.paths.get(path).map(|r| *r.value())
    }

    fn within(&self, prefix: &str) -> Vec<(NodeId, String)> {
        self.nodes
            .iter()
            .filter(|e| path::is_within(prefix, e.path()))
            .map(|e| (*e.key(), e.path().to_string()))
            .collect()
    }
}

impl Default for MemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for MemoryNodeStore {
    fn find_by_path(&self, path: &str) -> Result<Option<Node>> {
        let Some(id) = self.id_of(path) else {
            return Ok(None);
        };
        Ok(self.nodes.get(&id).map(|n| n.value().clone()))
    }

    fn find_children(
        &self,
        path: &str,
        recursive: bool,
        options: &FindOptions,
    ) -> Result<Vec<Node>> {
        let related = |candidate: &str| {
            if recursive {
                path::is_ancestor(path, candidate)
            } else {
                path::is_direct_child(path, candidate)
            }
        };

        let mut matched = Vec::new();
        for entry in self.nodes.iter() {
            if !related(entry.path()) {
                continue;
            }
            let doc = entry.to_document()?;
            if options.filter_ref().matches(&doc) {
                matched.push((entry.value().clone(), doc));
            }
        }

        let sort = options.sort_ref();
        matched.sort_by(|(a, a_doc), (b, b_doc)| {
            sort.compare(a_doc, b_doc).then_with(|| a.path().cmp(b.path()))
        });
        if let Some(limit) = options.limit_value() {
            matched.truncate(limit);
        }

        let projection = options.projection_ref();
        let nodes = matched
            .into_iter()
            .map(|(mut node, _)| {
                projection.apply(&mut node);
                node
            })
            .collect::<Vec<_>>();
        debug!(path, recursive, count = nodes.len(), "find_children");
        Ok(nodes)
    }

    fn count_children(&self, path: &str, recursive: bool, filter: &Filter) -> Result<usize> {
        let mut count = 0;
        for entry in self.nodes.iter() {
            let related = if recursive {
                path::is_ancestor(path, entry.path())
            } else {
                path::is_direct_child(path, entry.path())
            };
            if related && (filter.is_empty() || filter.matches(&entry.to_document()?)) {
                count += 1;
            }
        }
        Ok(count)
    }

    fn insert(&self, node: NewNode) -> Result<NodeId> {
        let target = node.path().to_string();
        let Some(parent) = path::parent(&target) else {
            return Err(Error::already_exists(ROOT));
        };
        match self.find_by_path(parent)? {
            None => return Err(Error::not_found(parent)),
            Some(p) if !p.is_directory() => {
                return Err(Error::Conflict(format!(
                    "cannot create {target}: parent {parent} is an experiment, not a directory"
                )))
            }
            Some(_) => {}
        }

        match self.paths.entry(target.clone()) {
            Entry::Occupied(_) => Err(Error::already_exists(target)),
            Entry::Vacant(slot) => {
                let id = self.allocate();
                self.nodes.insert(id, Node::from_new(id, node));
                slot.insert(id);
                Ok(id)
            }
        }
    }

    fn update_fields(&self, id: NodeId, patch: &NodePatch) -> Result<Node> {
        let mut node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(id.to_string()))?;
        let before = node.value().clone();
        patch.apply(node.value_mut());
        Ok(before)
    }

    fn rewrite_paths(&self, old_prefix: &str, new_prefix: &str) -> Result<usize> {
        if old_prefix == ROOT {
            return Err(Error::Forbidden("the root directory cannot be moved".into()));
        }
        if path::is_within(old_prefix, new_prefix) {
            return Err(Error::Conflict(format!(
                "cannot move {old_prefix} to {new_prefix}: destination is inside the source"
            )));
        }

        let affected: Vec<(NodeId, String, String)> = self
            .within(old_prefix)
            .into_iter()
            .map(|(id, old)| {
                let new = path::replace_prefix(&old, old_prefix, new_prefix);
                (id, old, new)
            })
            .collect();
        if affected.is_empty() {
            return Ok(0);
        }

        // Collision pre-check, before any write.
        let ids: FxHashSet<NodeId> = affected.iter().map(|(id, _, _)| *id).collect();
        for (_, _, new) in &affected {
            if self.id_of(new).is_some_and(|owner| !ids.contains(&owner)) {
                return Err(Error::Conflict(format!(
                    "cannot move {old_prefix} to {new_prefix}: {new} already exists"
                )));
            }
        }

        // Claim every new path; release the claims if one is taken meanwhile.
        let mut claimed: Vec<&str> = Vec::with_capacity(affected.len());
        for (id, _, new) in &affected {
            let taken = match self.paths.entry(new.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(*id);
                    false
                }
                Entry::Occupied(_) => true,
            };
            if taken {
                for claim in claimed {
                    self.paths.remove_if(claim, |_, owner| ids.contains(owner));
                }
                return Err(Error::Conflict(format!(
                    "cannot move {old_prefix} to {new_prefix}: {new} was created concurrently"
                )));
            }
            claimed.push(new);
        }

        for (id, old, new) in &affected {
            if let Some(mut node) = self.nodes.get_mut(id) {
                node.set_path(new.clone());
            }
            self.paths.remove_if(old, |_, owner| owner == id);
        }
        Ok(affected.len())
    }

    fn delete_subtree(&self, path: &str) -> Result<Vec<Node>> {
        if path == ROOT {
            return Err(Error::Forbidden("the root directory cannot be deleted".into()));
        }
        let mut doomed = self.within(path);
        if doomed.is_empty() {
            return Err(Error::not_found(path));
        }
        // Leaves first, so no orphan is ever visible.
        doomed.sort_by(|(_, a), (_, b)| path::depth(b).cmp(&path::depth(a)).then_with(|| a.cmp(b)));

        let mut removed = Vec::with_capacity(doomed.len());
        for (id, node_path) in doomed {
            self.paths.remove_if(&node_path, |_, owner| *owner == id);
            if let Some((_, node)) = self.nodes.remove(&id) {
                removed.push(node);
            }
        }
        Ok(removed)
    }
}
