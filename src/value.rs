//! Data values and their storage encoding.
//!
//! Values logged to an experiment are classified on write:
//!
//! - JSON values whose encoding fits under the inline threshold are stored
//!   directly in the node document
//! - arrays, raw blobs and oversized JSON go to the storage backend; the
//!   document keeps a [`LargeValueRef`] in their place
//! - maps and lists are walked entry by entry, so an array nested at any
//!   depth is offloaded on its own
//!
//! ```text
//! data: {
//!   "lr":   0.001,                                  // inline
//!   "loss": {"__large_value__": {"token": {..},     // offloaded
//!            "layout": {"type": "array", "dtype": "float64", "shape": [3]}}},
//!   "head": {"bias": {"__large_value__": {..}}, "act": "relu"}
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::node::Node;
use crate::storage::{BlobStore, BlobToken};
use crate::{Error, Result};

/// Document key marking a large-value reference
pub const LARGE_VALUE_MARKER: &str = "__large_value__";

/// Inline threshold (the document size limit of the metadata store: 16 MiB)
pub const DEFAULT_INLINE_THRESHOLD: usize = 16 * 1024 * 1024;

/// Element type of an [`NdArray`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 64-bit float
    Float64,
    /// 32-bit float
    Float32,
    /// 64-bit signed integer
    Int64,
    /// 32-bit signed integer
    Int32,
    /// Unsigned byte
    Uint8,
}

impl DType {
    /// Bytes per element.
    #[must_use]
    pub const fn item_size(&self) -> usize {
        match self {
            Self::Float64 | Self::Int64 => 8,
            Self::Float32 | Self::Int32 => 4,
            Self::Uint8 => 1,
        }
    }
}

/// Dense n-dimensional array, little-endian, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdArray {
    dtype: DType,
    shape: Vec<usize>,
    bytes: Vec<u8>,
}

macro_rules! array_from_vec {
    ($ty:ty, $dtype:expr) => {
        impl From<Vec<$ty>> for NdArray {
            fn from(values: Vec<$ty>) -> Self {
                let shape = vec![values.len()];
                let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                Self {
                    dtype: $dtype,
                    shape,
                    bytes,
                }
            }
        }
    };
}

array_from_vec!(f64, DType::Float64);
array_from_vec!(f32, DType::Float32);
array_from_vec!(i64, DType::Int64);
array_from_vec!(i32, DType::Int32);

impl NdArray {
    /// Build an array from raw little-endian bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `bytes` does not hold exactly
    /// `product(shape)` elements of `dtype`, or if that size overflows.
    pub fn from_raw(dtype: DType, shape: Vec<usize>, bytes: Vec<u8>) -> Result<Self> {
        let expected = shape
            .iter()
            .try_fold(dtype.item_size(), |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| {
                Error::InvalidInput(format!("array of shape {shape:?} is too large to address"))
            })?;
        if bytes.len() != expected {
            return Err(Error::InvalidInput(format!(
                "array of shape {shape:?} and dtype {dtype:?} needs {expected} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            dtype,
            shape,
            bytes,
        })
    }

    /// Byte array with shape `[len]`.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            dtype: DType::Uint8,
            shape: vec![bytes.len()],
            bytes,
        }
    }

    /// Same elements under a new shape.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the element count changes.
    pub fn reshape(self, shape: Vec<usize>) -> Result<Self> {
        Self::from_raw(self.dtype, shape, self.bytes)
    }

    /// Element type.
    #[must_use]
    pub const fn dtype(&self) -> DType {
        self.dtype
    }

    /// Dimensions.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len() / self.dtype.item_size()
    }

    /// True if the array has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw little-endian element bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Elements widened to `f64`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64_vec(&self) -> Vec<f64> {
        let size = self.dtype.item_size();
        self.bytes
            .chunks_exact(size)
            .map(|c| match self.dtype {
                DType::Float64 => f64::from_le_bytes(c.try_into().unwrap_or([0; 8])),
                DType::Float32 => f64::from(f32::from_le_bytes(c.try_into().unwrap_or([0; 4]))),
                DType::Int64 => i64::from_le_bytes(c.try_into().unwrap_or([0; 8])) as f64,
                DType::Int32 => f64::from(i32::from_le_bytes(c.try_into().unwrap_or([0; 4]))),
                DType::Uint8 => f64::from(c[0]),
            })
            .collect()
    }
}

/// A value logged to an experiment's `data` map.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// JSON-compatible value (inlined when small)
    Json(Value),
    /// Numeric array (always offloaded)
    Array(NdArray),
    /// Opaque blob (always offloaded)
    Bytes(Vec<u8>),
    /// Mapping whose entries are encoded one by one
    Map(BTreeMap<String, DataValue>),
    /// Sequence whose items are encoded one by one
    List(Vec<DataValue>),
}

impl DataValue {
    /// The JSON value, if this is one.
    #[must_use]
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    /// The array, if this is one.
    #[must_use]
    pub const fn as_array(&self) -> Option<&NdArray> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The blob, if this is one.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The mapping, if this is one.
    #[must_use]
    pub const fn as_map(&self) -> Option<&BTreeMap<String, DataValue>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// The sequence, if this is one.
    #[must_use]
    pub fn as_list(&self) -> Option<&[DataValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<Value> for DataValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<NdArray> for DataValue {
    fn from(array: NdArray) -> Self {
        Self::Array(array)
    }
}

impl From<Vec<f64>> for DataValue {
    fn from(values: Vec<f64>) -> Self {
        Self::Array(values.into())
    }
}

impl From<Vec<f32>> for DataValue {
    fn from(values: Vec<f32>) -> Self {
        Self::Array(values.into())
    }
}

impl From<Vec<i64>> for DataValue {
    fn from(values: Vec<i64>) -> Self {
        Self::Array(values.into())
    }
}

impl From<Vec<i32>> for DataValue {
    fn from(values: Vec<i32>) -> Self {
        Self::Array(values.into())
    }
}

impl From<BTreeMap<String, DataValue>> for DataValue {
    fn from(entries: BTreeMap<String, DataValue>) -> Self {
        Self::Map(entries)
    }
}

impl From<Vec<DataValue>> for DataValue {
    fn from(items: Vec<DataValue>) -> Self {
        Self::List(items)
    }
}

impl From<Vec<u8>> for DataValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&str> for DataValue {
    fn from(s: &str) -> Self {
        Self::Json(Value::from(s))
    }
}

impl From<String> for DataValue {
    fn from(s: String) -> Self {
        Self::Json(Value::from(s))
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        Self::Json(Value::from(v))
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        Self::Json(Value::from(v))
    }
}

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        Self::Json(Value::from(v))
    }
}

/// How an offloaded payload is laid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Layout {
    /// UTF-8 JSON encoding of a value
    Json,
    /// Raw array elements
    Array {
        /// Element type
        dtype: DType,
        /// Dimensions
        shape: Vec<usize>,
    },
    /// Opaque bytes
    Bytes,
}

/// Reference stored in a document in place of an offloaded value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargeValueRef {
    token: BlobToken,
    layout: Layout,
}

impl LargeValueRef {
    /// Pair a backend token with its payload layout.
    #[must_use]
    pub const fn new(token: BlobToken, layout: Layout) -> Self {
        Self { token, layout }
    }

    /// Backend token.
    #[must_use]
    pub const fn token(&self) -> &BlobToken {
        &self.token
    }

    /// Payload layout.
    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Document form: `{"__large_value__": {..}}`.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_document_value(&self) -> Result<Value> {
        let mut map = Map::new();
        map.insert(LARGE_VALUE_MARKER.into(), serde_json::to_value(self)?);
        Ok(Value::Object(map))
    }

    /// Parse a document value; `None` if it is not a reference.
    #[must_use]
    pub fn from_document_value(value: &Value) -> Option<Self> {
        let inner = value.as_object()?.get(LARGE_VALUE_MARKER)?;
        serde_json::from_value(inner.clone()).ok()
    }
}

/// Classification settings for [`encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffloadPolicy {
    /// JSON values larger than this (encoded) are offloaded
    pub inline_threshold_bytes: usize,
    /// Request compression from the backend
    pub compress: bool,
}

impl Default for OffloadPolicy {
    fn default() -> Self {
        Self {
            inline_threshold_bytes: DEFAULT_INLINE_THRESHOLD,
            compress: true,
        }
    }
}

/// True if the reserved marker key appears anywhere inside `value`.
fn holds_marker(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.contains_key(LARGE_VALUE_MARKER) || map.values().any(holds_marker),
        Value::Array(items) => items.iter().any(holds_marker),
        _ => false,
    }
}

fn reserved_key() -> Error {
    Error::InvalidInput(format!("{LARGE_VALUE_MARKER} is a reserved key"))
}

/// Encode a value for the document, offloading to `backend` when needed.
///
/// If any part of a nested value fails, the objects already written for
/// its other parts are deleted again.
///
/// # Errors
///
/// Returns `UnsupportedOperation` when a large value meets a disabled
/// backend, `StorageError` on backend failure and `InvalidInput` for
/// values using the reserved marker key.
pub fn encode(value: &DataValue, backend: &dyn BlobStore, policy: &OffloadPolicy) -> Result<Value> {
    let mut written = Vec::new();
    match encode_into(value, backend, policy, &mut written) {
        Ok(encoded) => Ok(encoded),
        Err(e) => {
            discard(backend, &written);
            Err(e)
        }
    }
}

fn encode_into(
    value: &DataValue,
    backend: &dyn BlobStore,
    policy: &OffloadPolicy,
    written: &mut Vec<BlobToken>,
) -> Result<Value> {
    let (bytes, layout) = match value {
        DataValue::Json(json) => {
            if holds_marker(json) {
                return Err(reserved_key());
            }
            let encoded = serde_json::to_vec(json)?;
            if encoded.len() <= policy.inline_threshold_bytes {
                return Ok(json.clone());
            }
            (encoded, Layout::Json)
        }
        DataValue::Array(array) => (
            array.as_bytes().to_vec(),
            Layout::Array {
                dtype: array.dtype(),
                shape: array.shape().to_vec(),
            },
        ),
        DataValue::Bytes(bytes) => (bytes.clone(), Layout::Bytes),
        DataValue::Map(entries) => {
            let mut map = Map::new();
            for (key, entry) in entries {
                if key == LARGE_VALUE_MARKER {
                    return Err(reserved_key());
                }
                map.insert(key.clone(), encode_into(entry, backend, policy, written)?);
            }
            return Ok(Value::Object(map));
        }
        DataValue::List(items) => {
            let mut encoded = Vec::with_capacity(items.len());
            for item in items {
                encoded.push(encode_into(item, backend, policy, written)?);
            }
            return Ok(Value::Array(encoded));
        }
    };
    let token = backend.put(&bytes, policy.compress)?;
    written.push(token.clone());
    LargeValueRef::new(token, layout).to_document_value()
}

/// Decode a stored document value, fetching offloaded payloads.
///
/// Objects and arrays holding references come back as
/// [`DataValue::Map`] / [`DataValue::List`]; anything else is plain JSON.
///
/// # Errors
///
/// Returns `StorageError` if an offloaded payload is missing or corrupt.
pub fn decode(stored: &Value, backend: &dyn BlobStore) -> Result<DataValue> {
    if let Some(reference) = LargeValueRef::from_document_value(stored) {
        return fetch(&reference, backend);
    }
    if !holds_marker(stored) {
        return Ok(DataValue::Json(stored.clone()));
    }
    match stored {
        Value::Object(map) if map.contains_key(LARGE_VALUE_MARKER) => Err(Error::StorageError(
            format!("malformed large value reference: {stored}"),
        )),
        Value::Object(map) => map
            .iter()
            .map(|(key, entry)| -> Result<(String, DataValue)> {
                Ok((key.clone(), decode(entry, backend)?))
            })
            .collect::<Result<BTreeMap<_, _>>>()
            .map(DataValue::Map),
        Value::Array(items) => items
            .iter()
            .map(|item| decode(item, backend))
            .collect::<Result<Vec<_>>>()
            .map(DataValue::List),
        _ => Ok(DataValue::Json(stored.clone())),
    }
}

fn fetch(reference: &LargeValueRef, backend: &dyn BlobStore) -> Result<DataValue> {
    let bytes = backend.get(reference.token())?;
    match reference.layout() {
        Layout::Json => Ok(DataValue::Json(serde_json::from_slice(&bytes)?)),
        Layout::Array { dtype, shape } => Ok(DataValue::Array(
            NdArray::from_raw(*dtype, shape.clone(), bytes)
                .map_err(|e| Error::StorageError(format!("corrupt array payload: {e}")))?,
        )),
        Layout::Bytes => Ok(DataValue::Bytes(bytes)),
    }
}

/// Every large-value reference inside one stored value, at any depth.
#[must_use]
pub fn refs_in(stored: &Value) -> Vec<LargeValueRef> {
    let mut found = Vec::new();
    collect_refs(stored, &mut found);
    found
}

fn collect_refs(stored: &Value, found: &mut Vec<LargeValueRef>) {
    if let Some(reference) = LargeValueRef::from_document_value(stored) {
        found.push(reference);
        return;
    }
    match stored {
        Value::Object(map) => map.values().for_each(|v| collect_refs(v, found)),
        Value::Array(items) => items.iter().for_each(|v| collect_refs(v, found)),
        _ => {}
    }
}

/// Every large-value reference held in a node's data map.
#[must_use]
pub fn large_refs(node: &Node) -> Vec<LargeValueRef> {
    node.data().values().flat_map(refs_in).collect()
}

/// Best-effort delete of objects no document points at.
pub(crate) fn discard<'a>(backend: &dyn BlobStore, tokens: impl IntoIterator<Item = &'a BlobToken>) {
    for token in tokens {
        if let Err(e) = backend.delete(token) {
            warn!(%token, error = %e, "failed to delete unreferenced large value");
        }
    }
}
