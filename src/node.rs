//! Node - one entry in the path tree (directory or experiment)

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque node identifier, assigned by the node store on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identifier value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{:012x}", self.0)
    }
}

/// Kind of node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Interior node; may have children
    Directory,
    /// Leaf node holding data and notes
    Experiment,
}

impl NodeKind {
    /// Lowercase name as stored in documents.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::Experiment => "experiment",
        }
    }
}

/// A stored tree node.
///
/// `path`, `kind`, `id` and `created_at` never change in place; only `mv`
/// rewrites `path`. The parent is always derived from `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    path: String,
    kind: NodeKind,
    created_at: DateTime<Utc>,
    #[serde(default)]
    data: Map<String, Value>,
    #[serde(default)]
    notes: Map<String, Value>,
}

impl Node {
    /// Materialize a draft under an assigned id.
    #[must_use]
    pub fn from_new(id: NodeId, new: NewNode) -> Self {
        Self {
            id,
            path: new.path,
            kind: new.kind,
            created_at: new.created_at,
            data: new.data,
            notes: new.notes,
        }
    }

    /// Node identifier.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Normalized absolute path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Final path segment.
    #[must_use]
    pub fn name(&self) -> &str {
        crate::path::name(&self.path)
    }

    /// Parent path, derived from `path`.
    #[must_use]
    pub fn parent_path(&self) -> Option<&str> {
        crate::path::parent(&self.path)
    }

    /// Node kind.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    /// True for directories.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// True for experiments.
    #[must_use]
    pub fn is_experiment(&self) -> bool {
        self.kind == NodeKind::Experiment
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Stored data map (large values appear as reference documents).
    #[must_use]
    pub const fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Notes map.
    #[must_use]
    pub const fn notes(&self) -> &Map<String, Value> {
        &self.notes
    }

    pub(crate) fn set_path(&mut self, path: String) {
        self.path = path;
    }

    pub(crate) fn data_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.data
    }

    pub(crate) fn notes_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.notes
    }

    /// JSON document view used by the query layer.
    ///
    /// # Errors
    ///
    /// Returns error if the node cannot be serialized.
    pub fn to_document(&self) -> crate::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// A node not yet inserted (no id).
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    path: String,
    kind: NodeKind,
    created_at: DateTime<Utc>,
    data: Map<String, Value>,
    notes: Map<String, Value>,
}

impl NewNode {
    /// Draft a directory node at `path`.
    #[must_use]
    pub fn directory(path: impl Into<String>) -> Self {
        Self::new(path, NodeKind::Directory)
    }

    /// Draft an experiment node at `path`.
    #[must_use]
    pub fn experiment(path: impl Into<String>) -> Self {
        Self::new(path, NodeKind::Experiment)
    }

    fn new(path: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            created_at: Utc::now(),
            data: Map::new(),
            notes: Map::new(),
        }
    }

    /// Seed the notes map.
    #[must_use]
    pub fn with_notes(mut self, notes: Map<String, Value>) -> Self {
        self.notes = notes;
        self
    }

    /// Seed the data map (values must already be encoded for storage).
    #[must_use]
    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Set a custom creation timestamp (useful for testing).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Target path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Node kind.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }
}

/// Field-level update applied atomically to one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePatch {
    data: Vec<(String, Value)>,
    notes: Vec<(String, Value)>,
    replace_notes: Option<Map<String, Value>>,
}

impl NodePatch {
    /// Empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `data[key]`.
    #[must_use]
    pub fn set_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.push((key.into(), value));
        self
    }

    /// Set `notes[key]`.
    #[must_use]
    pub fn set_note(mut self, key: impl Into<String>, value: Value) -> Self {
        self.notes.push((key.into(), value));
        self
    }

    /// Replace the whole notes map (applied before `set_note` entries).
    #[must_use]
    pub fn replace_notes(mut self, notes: Map<String, Value>) -> Self {
        self.replace_notes = Some(notes);
        self
    }

    /// True if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.notes.is_empty() && self.replace_notes.is_none()
    }

    pub(crate) fn apply(&self, node: &mut Node) {
        if let Some(notes) = &self.replace_notes {
            node.notes_mut().clone_from(notes);
        }
        for (key, value) in &self.notes {
            node.notes_mut().insert(key.clone(), value.clone());
        }
        for (key, value) in &self.data {
            node.data_mut().insert(key.clone(), value.clone());
        }
    }
}
