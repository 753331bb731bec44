//! Experiment logger: a session with a working directory and a current
//! experiment.

use serde_json::{Map, Value};
use tracing::info;

use super::ExperimentQuery;
use crate::path;
use crate::store::{Filter, FindOptions};
use crate::value::DataValue;
use crate::{Error, Result};

/// Retries when a concurrent session takes the auto-generated name first.
const MAX_AUTO_NAME_ATTEMPTS: usize = 16;

/// Session state for logging experiments.
///
/// Each logger owns its own working path and current-experiment pointer;
/// nothing is shared between sessions except the underlying store.
#[derive(Debug, Clone)]
pub struct ExperimentLogger {
    query: ExperimentQuery,
    working_path: String,
    current_experiment_path: Option<String>,
}

impl ExperimentLogger {
    /// Start a session in the directory `working_path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` unless `working_path` is an existing directory.
    pub fn new(query: ExperimentQuery, working_path: &str) -> Result<Self> {
        let working_path = path::normalize_absolute(working_path)?;
        if !query.tree().dir_exists(&working_path)? {
            return Err(Error::not_found(working_path));
        }
        Ok(Self {
            query,
            working_path,
            current_experiment_path: None,
        })
    }

    /// Current working directory.
    #[must_use]
    pub fn working_path(&self) -> &str {
        &self.working_path
    }

    /// Path of the experiment targeted by `log_data`/`log_note`.
    #[must_use]
    pub fn current_experiment_path(&self) -> Option<&str> {
        self.current_experiment_path.as_deref()
    }

    /// The query façade this session writes through.
    #[must_use]
    pub const fn query(&self) -> &ExperimentQuery {
        &self.query
    }

    /// Change the working directory; relative paths resolve against the
    /// current one.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` unless the target is an existing directory.
    pub fn cd(&mut self, path: &str) -> Result<&str> {
        let target = path::normalize(path, &self.working_path)?;
        if !self.query.tree().dir_exists(&target)? {
            return Err(Error::not_found(target));
        }
        self.working_path = target;
        Ok(&self.working_path)
    }

    /// Create an experiment in the working directory and make it current.
    ///
    /// Without a name, the experiment is named one above the largest numeric
    /// name among the directory's children (`1` in an empty directory).
    /// Numbers of deleted experiments are therefore only reused once every
    /// higher number is gone too.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if `name` is taken and `InvalidPath` if it is
    /// not a valid segment.
    pub fn new_experiment(&mut self, name: Option<&str>) -> Result<String> {
        self.new_experiment_with(name, Map::new())
    }

    /// [`ExperimentLogger::new_experiment`] with initial notes.
    ///
    /// # Errors
    ///
    /// Same as [`ExperimentLogger::new_experiment`].
    pub fn new_experiment_with(
        &mut self,
        name: Option<&str>,
        notes: Map<String, Value>,
    ) -> Result<String> {
        let tree = self.query.tree();
        let created = if let Some(name) = name {
            path::validate_segment(name)?;
            tree.create_experiment(&path::join(&self.working_path, name), notes)?
        } else {
            let mut attempt = 0;
            loop {
                let candidate = path::join(&self.working_path, &self.next_auto_name()?.to_string());
                match tree.create_experiment(&candidate, notes.clone()) {
                    Ok(created) => break created,
                    Err(Error::AlreadyExists { .. }) if attempt + 1 < MAX_AUTO_NAME_ATTEMPTS => {
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        };
        info!(path = %created, "new experiment");
        self.current_experiment_path = Some(created.clone());
        Ok(created)
    }

    fn next_auto_name(&self) -> Result<u64> {
        let children = self.query.tree().ls(&self.working_path, false)?;
        let highest = children
            .iter()
            .filter_map(|n| n.name().parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok(highest.saturating_add(1))
    }

    /// Notes of the most recently created experiment in the working
    /// directory, for seeding the next one. Empty if there is none.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the working directory was removed.
    pub fn notes_template(&self) -> Result<Map<String, Value>> {
        let options = FindOptions::new().filter(Filter::new().eq("kind", Value::from("experiment")));
        let latest = self
            .query
            .tree()
            .ls_with(&self.working_path, false, &options)?
            .into_iter()
            .max_by_key(|n| (n.created_at(), n.id()));
        Ok(latest.map(|n| n.notes().clone()).unwrap_or_default())
    }

    fn require_current(&self) -> Result<&str> {
        self.current_experiment_path.as_deref().ok_or_else(|| {
            Error::Precondition(
                "no current experiment; call new_experiment before logging".into(),
            )
        })
    }

    /// Set `data[key]` on the current experiment.
    ///
    /// # Errors
    ///
    /// Returns `Precondition` if no experiment is current, plus the errors
    /// of [`ExperimentQuery::experiment_log_data`].
    pub fn log_data(&self, key: &str, value: impl Into<DataValue>) -> Result<()> {
        let path = self.require_current()?;
        self.query.experiment_log_data(path, key, value)
    }

    /// Set `notes[key]` on the current experiment.
    ///
    /// # Errors
    ///
    /// Returns `Precondition` if no experiment is current, plus the errors
    /// of [`ExperimentQuery::experiment_log_note`].
    pub fn log_note(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let path = self.require_current()?;
        self.query.experiment_log_note(path, key, value)
    }
}
