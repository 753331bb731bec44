//! Configuration file (`labdb.json`) and backend construction.
//!
//! ```json
//! {
//!   "large_file_storage": "local",
//!   "local_file_storage_path": "/data/labdb",
//!   "compress_arrays": true,
//!   "compression": "lz4"
//! }
//! ```
//!
//! Missing fields take their defaults. The core never reads configuration
//! itself; this module builds the [`StorageBackend`] it is handed.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::storage::{Compression, ContentStore, LocalDirectory, StorageBackend, StorageKind, DEFAULT_CHUNK_SIZE};
use crate::store::LargeObjectBucket;
use crate::value::{OffloadPolicy, DEFAULT_INLINE_THRESHOLD};
use crate::{Error, Result};

const fn default_true() -> bool {
    true
}

const fn default_inline_threshold() -> usize {
    DEFAULT_INLINE_THRESHOLD
}

const fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// Persisted settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabConfig {
    /// Backend variant for large values
    #[serde(default)]
    pub large_file_storage: StorageKind,
    /// Directory for the `local` backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_file_storage_path: Option<PathBuf>,
    /// Compress offloaded values
    #[serde(default = "default_true")]
    pub compress_arrays: bool,
    /// Compression codec
    #[serde(default)]
    pub compression: Compression,
    /// JSON values encoding to more bytes than this are offloaded
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold_bytes: usize,
    /// Content-store chunk size
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            large_file_storage: StorageKind::None,
            local_file_storage_path: None,
            compress_arrays: true,
            compression: Compression::default(),
            inline_threshold_bytes: DEFAULT_INLINE_THRESHOLD,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl LabConfig {
    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `Config` for malformed or inconsistent settings.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read and `Config` if it is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Write the configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the settings are invalid and `Io` on write failure.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.validate()?;
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), text)?;
        info!(path = %path.as_ref().display(), "saved configuration");
        Ok(())
    }

    /// Check that the settings are usable together.
    ///
    /// # Errors
    ///
    /// Returns `Config` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.large_file_storage == StorageKind::Local && self.local_file_storage_path.is_none() {
            return Err(Error::Config(
                "local_file_storage_path is required when large_file_storage is 'local'".into(),
            ));
        }
        if self.chunk_size_bytes == 0 {
            return Err(Error::Config("chunk_size_bytes must be at least 1".into()));
        }
        Ok(())
    }

    /// Classification settings derived from this configuration.
    #[must_use]
    pub const fn offload_policy(&self) -> OffloadPolicy {
        OffloadPolicy {
            inline_threshold_bytes: self.inline_threshold_bytes,
            compress: self.compress_arrays,
        }
    }

    /// Build the configured backend. `bucket` is only used by the
    /// `content` variant.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the settings are invalid and `StorageError` if
    /// the local directory cannot be created.
    pub fn build_backend(&self, bucket: Arc<dyn LargeObjectBucket>) -> Result<StorageBackend> {
        self.validate()?;
        let backend = match self.large_file_storage {
            StorageKind::None => StorageBackend::Disabled,
            StorageKind::Content => StorageBackend::ContentStore(
                ContentStore::new(bucket)
                    .with_chunk_size(self.chunk_size_bytes)
                    .with_compression(self.compression),
            ),
            StorageKind::Local => {
                let root = self.local_file_storage_path.clone().ok_or_else(|| {
                    Error::Config("local_file_storage_path is not set".into())
                })?;
                StorageBackend::LocalDirectory(
                    LocalDirectory::new(root)?.with_compression(self.compression),
                )
            }
        };
        info!(backend = %backend.kind(), "storage backend ready");
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = LabConfig::from_json_str("{}").unwrap();
        assert_eq!(config, LabConfig::default());
        assert!(config.compress_arrays);
        assert_eq!(config.large_file_storage, StorageKind::None);
    }

    #[test]
    fn test_local_requires_path() {
        let err = LabConfig::from_json_str(r#"{"large_file_storage": "local"}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(LabConfig::from_json_str(r#"{"storage": "x"}"#).is_err());
    }

    #[test]
    fn test_offload_policy() {
        let config = LabConfig {
            compress_arrays: false,
            inline_threshold_bytes: 10,
            ..LabConfig::default()
        };
        let policy = config.offload_policy();
        assert!(!policy.compress);
        assert_eq!(policy.inline_threshold_bytes, 10);
    }
}
