//! # Trueno-LabDB: Path-Addressed Experiment Tree Store
//!
//! **Version**: 0.1.0
//!
//! Trueno-LabDB keeps experiments and directories in a hierarchical
//! namespace (`/proj/sweep/1`) stored as flat documents, and moves large
//! payloads (arrays, blobs) out to a pluggable storage backend.
//!
//! ## Design Principles
//!
//! - **One path, one node**: a unique path index backs every structural write
//! - **No orphans**: parents are checked on create, subtrees move and delete as a unit
//! - **Experiments are leaves**: nothing is ever created below an experiment
//! - **Write new, then delete old**: a logged key always has a readable value
//!
//! ## Example Usage
//!
//! ```rust
//! use trueno_labdb::{DataValue, LabDb};
//!
//! # fn main() -> trueno_labdb::Result<()> {
//! let db = LabDb::builder().content_store().build();
//! db.tree().mkdir("/proj", false)?;
//!
//! let mut logger = db.logger("/proj")?;
//! assert_eq!(logger.new_experiment(None)?, "/proj/1");
//! logger.log_data("loss", vec![0.9, 0.5, 0.1])?;
//!
//! let exp = db.query().get_experiment("/proj/1")?;
//! assert_eq!(exp.get("loss"), Some(&DataValue::from(vec![0.9, 0.5, 0.1])));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod experiment;
pub mod logging;
pub mod node;
pub mod path;
pub mod storage;
pub mod store;
pub mod tree;
pub mod value;

pub use config::LabConfig;
pub use error::{Error, Result};
pub use experiment::{Experiment, ExperimentLogger, ExperimentQuery};
pub use node::{Node, NodeKind};
pub use tree::{AffectedCounts, TreeMutator};
pub use value::{DataValue, NdArray};

use std::sync::Arc;

use storage::StorageBackend;
use store::{MemoryBucket, MemoryNodeStore, NodeStore};
use value::OffloadPolicy;

/// Database handle: a node store plus its storage backend.
///
/// Cloning is cheap and clones share the same store.
#[derive(Debug, Clone)]
pub struct LabDb {
    store: Arc<dyn NodeStore>,
    backend: Arc<StorageBackend>,
    policy: OffloadPolicy,
}

impl LabDb {
    /// Create a new database builder
    #[must_use]
    pub fn builder() -> LabDbBuilder {
        LabDbBuilder::default()
    }

    /// In-memory database configured from `config`.
    ///
    /// # Errors
    ///
    /// Returns `Config` for invalid settings and `StorageError` if the
    /// backend cannot be prepared.
    pub fn from_config(config: &LabConfig) -> Result<Self> {
        let backend = config.build_backend(Arc::new(MemoryBucket::new()))?;
        Ok(Self::builder()
            .backend(backend)
            .policy(config.offload_policy())
            .build())
    }

    /// Structural operations (`mkdir`, `rm`, `mv`, `ls`).
    #[must_use]
    pub fn tree(&self) -> TreeMutator {
        TreeMutator::new(Arc::clone(&self.store), Arc::clone(&self.backend))
    }

    /// Stateless experiment reads and writes.
    #[must_use]
    pub fn query(&self) -> ExperimentQuery {
        ExperimentQuery::new(self.tree(), self.policy)
    }

    /// New logging session in the directory `working_path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` unless `working_path` is an existing directory.
    pub fn logger(&self, working_path: &str) -> Result<ExperimentLogger> {
        ExperimentLogger::new(self.query(), working_path)
    }

    /// The node store.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    /// The storage backend.
    #[must_use]
    pub const fn backend(&self) -> &Arc<StorageBackend> {
        &self.backend
    }
}

/// Database builder
///
/// Defaults to an in-memory node store and the disabled backend.
#[derive(Debug, Default)]
pub struct LabDbBuilder {
    store: Option<Arc<dyn NodeStore>>,
    backend: Option<StorageBackend>,
    policy: OffloadPolicy,
}

impl LabDbBuilder {
    /// Use an existing node store (e.g. shared with another handle)
    #[must_use]
    pub fn store(mut self, store: Arc<dyn NodeStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the storage backend
    #[must_use]
    pub fn backend(mut self, backend: StorageBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Content-store backend over a fresh in-memory bucket
    #[must_use]
    pub fn content_store(self) -> Self {
        self.backend(StorageBackend::content(Arc::new(MemoryBucket::new())))
    }

    /// Set value classification (inline threshold, compression)
    #[must_use]
    pub fn policy(mut self, policy: OffloadPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the database
    #[must_use]
    pub fn build(self) -> LabDb {
        let store: Arc<dyn NodeStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryNodeStore::new()),
        };
        LabDb {
            store,
            backend: Arc::new(self.backend.unwrap_or(StorageBackend::Disabled)),
            policy: self.policy,
        }
    }
}
