//! Local-directory backend: one file per object.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::compression::{self, Compression};
use super::{BlobStore, BlobToken, StorageKind};
use crate::{Error, Result};

/// Attempts at finding an unused random object name before giving up
const MAX_NAME_ATTEMPTS: usize = 8;

/// Prefix of every object file
const OBJECT_PREFIX: &str = "obj_";

/// Large-object backend writing files under a configured directory.
///
/// Objects are written to a hidden temp file, synced, then renamed into
/// place. Names carry 128 random bits, so concurrent writers never collide.
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    root: PathBuf,
    compression: Compression,
}

impl LocalDirectory {
    /// Open (creating if needed) a local object directory.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            Error::StorageError(format!(
                "Failed to create storage directory {}: {e}",
                root.display()
            ))
        })?;
        Ok(Self {
            root,
            compression: Compression::default(),
        })
    }

    /// Override the compression algorithm used when `compress` is requested.
    #[must_use]
    pub const fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Storage directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the object file behind `token`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` for keys that could escape the directory.
    pub fn object_path(&self, token: &BlobToken) -> Result<PathBuf> {
        let key = token.key();
        let well_formed = key.starts_with(OBJECT_PREFIX)
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.'))
            && !key.contains("..");
        if !well_formed {
            return Err(Error::StorageError(format!(
                "malformed local object key {key:?}"
            )));
        }
        Ok(self.root.join(key))
    }

    fn object_name(algo: Option<Compression>) -> String {
        let ext = algo.map_or("bin", |a| a.extension());
        format!("{OBJECT_PREFIX}{:032x}.{ext}", rand::random::<u128>())
    }

    fn write_temp(tmp: &Path, payload: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(tmp)?;
        file.write_all(payload)?;
        file.sync_all()
    }
}

impl BlobStore for LocalDirectory {
    fn put(&self, bytes: &[u8], compress: bool) -> Result<BlobToken> {
        let algo = compress.then_some(self.compression);
        let payload = compression::encode(bytes, algo)?;

        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = Self::object_name(algo);
            let target = self.root.join(&name);
            if target.exists() {
                continue;
            }
            let tmp = self.root.join(format!(".{name}.tmp"));
            match Self::write_temp(&tmp, &payload) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    let _ = fs::remove_file(&tmp);
                    return Err(Error::StorageError(format!(
                        "Failed to write large object to {}: {e}",
                        tmp.display()
                    )));
                }
            }
            if let Err(e) = fs::rename(&tmp, &target) {
                let _ = fs::remove_file(&tmp);
                return Err(Error::StorageError(format!(
                    "Failed to publish large object {}: {e}",
                    target.display()
                )));
            }
            debug!(file = %target.display(), bytes = bytes.len(), "stored large object");
            return Ok(BlobToken::new(
                StorageKind::Local,
                name,
                algo,
                bytes.len() as u64,
            ));
        }

        warn!(root = %self.root.display(), "exhausted object name attempts");
        Err(Error::StorageError(format!(
            "could not allocate a unique object name in {}",
            self.root.display()
        )))
    }

    fn get(&self, token: &BlobToken) -> Result<Vec<u8>> {
        let path = self.object_path(token)?;
        let payload = fs::read(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                Error::StorageError(format!("large object file not found at {}", path.display()))
            } else {
                Error::StorageError(format!(
                    "Failed to read large object {}: {e}",
                    path.display()
                ))
            }
        })?;
        compression::decode(payload, token.compression())
    }

    fn delete(&self, token: &BlobToken) -> Result<()> {
        let path = self.object_path(token)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(file = %path.display(), "deleted large object");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::StorageError(format!(
                "Failed to delete large object {}: {e}",
                path.display()
            ))),
        }
    }
}
