//! Experiment logging and querying.
//!
//! ## Overview
//!
//! ```text
//! ExperimentLogger (session: working_path, current experiment)
//!        │
//!        └──> ExperimentQuery (stateless, explicit paths)
//!                    │
//!                    ├──> TreeMutator ──> NodeStore
//!                    └──> StorageBackend (large values)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use trueno_labdb::LabDb;
//!
//! # fn main() -> trueno_labdb::Result<()> {
//! let db = LabDb::builder().content_store().build();
//! db.tree().mkdir("/proj", false)?;
//!
//! let mut logger = db.logger("/proj")?;
//! let path = logger.new_experiment(None)?;
//! logger.log_data("loss", vec![0.9, 0.5, 0.1])?;
//! logger.log_note("optimizer", "adam")?;
//!
//! let exp = db.query().get_experiment(&path)?;
//! assert_eq!(exp.path(), "/proj/1");
//! # Ok(())
//! # }
//! ```

mod logger;
mod query;
mod record;

pub use logger::ExperimentLogger;
pub use query::ExperimentQuery;
pub use record::Experiment;
