//! Large-object compression (LZ4 / ZSTD)
//!
//! The algorithm that compressed a stored object travels in its
//! [`BlobToken`](super::BlobToken); a token without one means the bytes were
//! stored verbatim. `get` therefore never has to guess.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const ZSTD_LEVEL: i32 = 3;

/// Compression flag recorded in a [`BlobToken`](super::BlobToken).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Size-prefixed LZ4 frame
    #[default]
    Lz4,
    /// ZSTD at level 3
    Zstd,
}

impl Compression {
    /// File suffix the local backend gives objects written with this flag.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Lz4 => "lz4",
            Self::Zstd => "zst",
        }
    }
}

/// Prepare `data` for storage under the given flag.
pub(crate) fn encode(data: &[u8], compression: Option<Compression>) -> Result<Vec<u8>> {
    match compression {
        None => Ok(data.to_vec()),
        Some(_) if data.is_empty() => Ok(Vec::new()),
        Some(Compression::Lz4) => Ok(lz4_flex::compress_prepend_size(data)),
        Some(Compression::Zstd) => zstd::encode_all(data, ZSTD_LEVEL)
            .map_err(|e| Error::StorageError(format!("zstd encode of large object: {e}"))),
    }
}

/// Restore a stored payload; corrupt input is a `StorageError`.
pub(crate) fn decode(payload: Vec<u8>, compression: Option<Compression>) -> Result<Vec<u8>> {
    match compression {
        None => Ok(payload),
        Some(_) if payload.is_empty() => Ok(payload),
        Some(Compression::Lz4) => lz4_flex::decompress_size_prepended(&payload)
            .map_err(|e| Error::StorageError(format!("corrupt lz4 large object: {e}"))),
        Some(Compression::Zstd) => zstd::decode_all(payload.as_slice())
            .map_err(|e| Error::StorageError(format!("corrupt zstd large object: {e}"))),
    }
}
