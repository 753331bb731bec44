//! Experiment - an experiment node with its data values resolved

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::node::{Node, NodeId};
use crate::storage::BlobStore;
use crate::value::{self, DataValue};
use crate::{path, Result};

/// An experiment as returned by queries.
///
/// Large-value references in `data` have already been fetched from the
/// storage backend, so every entry holds its actual value.
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    id: NodeId,
    path: String,
    created_at: DateTime<Utc>,
    data: BTreeMap<String, DataValue>,
    notes: Map<String, Value>,
}

impl Experiment {
    /// Resolve an experiment node, fetching offloaded values from `backend`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if a referenced payload cannot be read.
    pub fn from_node(node: Node, backend: &dyn BlobStore) -> Result<Self> {
        let data = node
            .data()
            .iter()
            .map(|(key, stored)| -> Result<(String, DataValue)> {
                Ok((key.clone(), value::decode(stored, backend)?))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self {
            id: node.id(),
            path: node.path().to_string(),
            created_at: node.created_at(),
            notes: node.notes().clone(),
            data,
        })
    }

    /// Get the node ID.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Get the experiment path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get the final path segment.
    #[must_use]
    pub fn name(&self) -> &str {
        path::name(&self.path)
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the logged data.
    #[must_use]
    pub const fn data(&self) -> &BTreeMap<String, DataValue> {
        &self.data
    }

    /// Get the notes.
    #[must_use]
    pub const fn notes(&self) -> &Map<String, Value> {
        &self.notes
    }

    /// Get one data value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.data.get(key)
    }

    /// Get one note.
    #[must_use]
    pub fn note(&self, key: &str) -> Option<&Value> {
        self.notes.get(key)
    }
}
