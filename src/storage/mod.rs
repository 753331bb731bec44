//! Storage backend for large values (arrays, blobs, oversized JSON)
//!
//! One capability contract, three variants selected once at construction:
//!
//! - [`StorageBackend::Disabled`]: `put` fails with `UnsupportedOperation`
//! - [`StorageBackend::ContentStore`]: chunked objects in the document
//!   store's large-object bucket
//! - [`StorageBackend::LocalDirectory`]: one file per object in a local directory
//!
//! Writes are write-then-publish: an object becomes visible to `get` only
//! after all of its bytes are durably written. `delete` is idempotent.
//!
//! ```rust
//! use trueno_labdb::storage::{BlobStore, StorageBackend};
//! use trueno_labdb::store::MemoryBucket;
//! use std::sync::Arc;
//!
//! # fn main() -> trueno_labdb::Result<()> {
//! let backend = StorageBackend::content(Arc::new(MemoryBucket::new()));
//! let token = backend.put(b"weights", true)?;
//! assert_eq!(backend.get(&token)?, b"weights".to_vec());
//! backend.delete(&token)?;
//! backend.delete(&token)?; // already absent: still Ok
//! # Ok(())
//! # }
//! ```

mod compression;
mod content;
mod local;

pub use compression::Compression;
pub use content::{ContentStore, DEFAULT_CHUNK_SIZE};
pub use local::LocalDirectory;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::LargeObjectBucket;
use crate::{Error, Result};

/// Which backend variant is configured (or issued a token).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Large values are rejected
    #[default]
    None,
    /// Document store large-object bucket
    Content,
    /// Local filesystem directory
    Local,
}

impl StorageKind {
    /// Name as used in configuration files
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Content => "content",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a stored object, persisted inside node documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobToken {
    backend: StorageKind,
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compression: Option<Compression>,
    size_bytes: u64,
}

impl BlobToken {
    /// Create a token (backends only; exposed for tests and migrations).
    #[must_use]
    pub fn new(
        backend: StorageKind,
        key: impl Into<String>,
        compression: Option<Compression>,
        size_bytes: u64,
    ) -> Self {
        Self {
            backend,
            key: key.into(),
            compression,
            size_bytes,
        }
    }

    /// Backend that issued the token.
    #[must_use]
    pub const fn backend(&self) -> StorageKind {
        self.backend
    }

    /// Backend-specific object key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Compression applied to the stored bytes, if any.
    #[must_use]
    pub const fn compression(&self) -> Option<Compression> {
        self.compression
    }

    /// True if the stored bytes are compressed.
    #[must_use]
    pub const fn is_compressed(&self) -> bool {
        self.compression.is_some()
    }

    /// Uncompressed payload size.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

impl fmt::Display for BlobToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend, self.key)
    }
}

/// Opaque key-to-blob store for large values.
pub trait BlobStore: Send + Sync {
    /// Store `bytes`, optionally compressed, and return a token for them.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on I/O failure, `UnsupportedOperation` if the
    /// backend cannot hold large values.
    fn put(&self, bytes: &[u8], compress: bool) -> Result<BlobToken>;

    /// Fetch the (decompressed) bytes behind `token`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the object is missing or unreadable.
    fn get(&self, token: &BlobToken) -> Result<Vec<u8>>;

    /// Delete the object behind `token`. Deleting an absent object succeeds.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on I/O failure.
    fn delete(&self, token: &BlobToken) -> Result<()>;
}

/// Tagged storage backend, selected once at construction.
#[derive(Debug)]
pub enum StorageBackend {
    /// Large values are not allowed
    Disabled,
    /// Document store large-object bucket
    ContentStore(ContentStore),
    /// Local filesystem directory
    LocalDirectory(LocalDirectory),
}

impl StorageBackend {
    /// Content-store backend with default chunking and LZ4 compression.
    #[must_use]
    pub fn content(bucket: Arc<dyn LargeObjectBucket>) -> Self {
        Self::ContentStore(ContentStore::new(bucket))
    }

    /// Local-directory backend with LZ4 compression.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the directory cannot be created.
    pub fn local(root: impl Into<std::path::PathBuf>) -> Result<Self> {
        Ok(Self::LocalDirectory(LocalDirectory::new(root)?))
    }

    /// Which variant this is.
    #[must_use]
    pub const fn kind(&self) -> StorageKind {
        match self {
            Self::Disabled => StorageKind::None,
            Self::ContentStore(_) => StorageKind::Content,
            Self::LocalDirectory(_) => StorageKind::Local,
        }
    }

    /// True unless this is the `Disabled` variant.
    #[must_use]
    pub const fn accepts_large_values(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    fn check_issuer(&self, token: &BlobToken) -> Result<()> {
        if token.backend() == self.kind() {
            Ok(())
        } else {
            Err(Error::StorageError(format!(
                "object {token} was stored by the {} backend but the {} backend is configured",
                token.backend(),
                self.kind()
            )))
        }
    }
}

impl BlobStore for StorageBackend {
    fn put(&self, bytes: &[u8], compress: bool) -> Result<BlobToken> {
        match self {
            Self::Disabled => Err(Error::UnsupportedOperation(format!(
                "cannot store a {}-byte large value: large_file_storage is set to 'none'",
                bytes.len()
            ))),
            Self::ContentStore(store) => store.put(bytes, compress),
            Self::LocalDirectory(dir) => dir.put(bytes, compress),
        }
    }

    fn get(&self, token: &BlobToken) -> Result<Vec<u8>> {
        match self {
            Self::Disabled => Err(Error::UnsupportedOperation(format!(
                "cannot load {token}: large_file_storage is set to 'none'"
            ))),
            Self::ContentStore(store) => {
                self.check_issuer(token)?;
                store.get(token)
            }
            Self::LocalDirectory(dir) => {
                self.check_issuer(token)?;
                dir.get(token)
            }
        }
    }

    fn delete(&self, token: &BlobToken) -> Result<()> {
        match self {
            Self::Disabled => {
                debug!(%token, "disabled backend holds no objects; nothing to delete");
                Ok(())
            }
            Self::ContentStore(store) => {
                self.check_issuer(token)?;
                store.delete(token)
            }
            Self::LocalDirectory(dir) => {
                self.check_issuer(token)?;
                dir.delete(token)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBucket;

    #[test]
    fn test_disabled_rejects_put() {
        let err = StorageBackend::Disabled.put(b"x", false).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation(_)));
        assert!(!StorageBackend::Disabled.accepts_large_values());
    }

    #[test]
    fn test_disabled_delete_is_noop() {
        let token = BlobToken::new(StorageKind::Local, "obj", None, 1);
        StorageBackend::Disabled.delete(&token).unwrap();
    }

    #[test]
    fn test_foreign_token_is_rejected() {
        let backend = StorageBackend::content(Arc::new(MemoryBucket::new()));
        let token = BlobToken::new(StorageKind::Local, "obj_1.bin", None, 3);
        assert!(matches!(backend.get(&token), Err(Error::StorageError(_))));
    }

    #[test]
    fn test_token_serde_skips_missing_compression() {
        let token = BlobToken::new(StorageKind::Content, "12", None, 4);
        let json = serde_json::to_value(&token).unwrap();
        assert!(json.get("compression").is_none());
        assert_eq!(json["backend"], "content");
        let back: BlobToken = serde_json::from_value(json).unwrap();
        assert_eq!(back, token);
        assert_eq!(back.to_string(), "content:12");
    }

    #[test]
    fn test_tokens_key_a_hash_set() {
        let lz4 = BlobToken::new(StorageKind::Content, "1", Some(Compression::Lz4), 4);
        let zstd = BlobToken::new(StorageKind::Content, "1", Some(Compression::Zstd), 4);
        let tokens: std::collections::HashSet<_> =
            [lz4.clone(), zstd, lz4].into_iter().collect();
        assert_eq!(tokens.len(), 2);
    }
}
