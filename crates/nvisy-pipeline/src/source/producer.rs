//! Row-producing capability implemented by origin collaborators.

use serde_json::Value;
use thiserror::Error;

use crate::error::BoxedError;

/// Handle to one row produced by an origin.
///
/// The handle carries whatever the producer needs to load the row later;
/// loading happens lazily, the first time a node pulls from the row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowHandle {
    index: Option<Value>,
    data: Value,
}

impl RowHandle {
    /// Creates a handle whose index is the row ordinal.
    pub fn new(data: impl Into<Value>) -> Self {
        Self {
            index: None,
            data: data.into(),
        }
    }

    /// Creates a handle with an explicit index (for keyed origins).
    pub fn with_index(index: impl Into<Value>, data: impl Into<Value>) -> Self {
        Self {
            index: Some(index.into()),
            data: data.into(),
        }
    }

    /// Returns the explicit index, if the producer supplied one.
    #[inline]
    pub fn index(&self) -> Option<&Value> {
        self.index.as_ref()
    }

    /// Returns the raw row data.
    #[inline]
    pub fn data(&self) -> &Value {
        &self.data
    }
}

/// Capability of an origin to produce rows.
///
/// Producers are finite and are restarted by constructing a new one. The
/// driver calls [`next_row`](Self::next_row) strictly between rows; `load`
/// and `fetch` are called while a row is being resolved.
pub trait RowProducer: Send {
    /// Advances to the next row, returning `None` once exhausted.
    fn next_row(&mut self) -> Result<Option<RowHandle>, BoxedError>;

    /// Loads the record behind a row handle.
    ///
    /// Called at most once per row; the result is memoized by the origin node.
    fn load(&self, row: &RowHandle) -> Result<Value, BoxedError> {
        Ok(row.data().clone())
    }

    /// Extracts a keyed field from a loaded record.
    fn fetch(&self, record: &Value, key: &str) -> Result<Value, BoxedError> {
        lookup(record, key).map_err(Into::into)
    }

    /// Keys every row of this producer supports, if known up front.
    fn keys(&self) -> Option<Vec<String>> {
        None
    }

    /// Number of rows remaining, if known.
    fn size_hint(&self) -> Option<usize> {
        None
    }
}

/// Errors raised when extracting a field from a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The object has no member with this key.
    #[error("key `{0}` not found")]
    MissingKey(String),

    /// The array has no element at this position.
    #[error("index {index} out of bounds for array of length {len}")]
    OutOfBounds {
        /// Requested position.
        index: usize,
        /// Array length.
        len: usize,
    },

    /// The value cannot be indexed by the key.
    #[error("cannot take `{key}` from a {kind} value")]
    NotIndexable {
        /// Requested key.
        key: String,
        /// JSON type of the value.
        kind: &'static str,
    },
}

/// Extracts `key` from `value`.
///
/// Objects are indexed by member name, arrays by a numeric key. A `null`
/// value yields `null` so that absent intermediate values flow through.
pub fn lookup(value: &Value, key: &str) -> Result<Value, FetchError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Object(map) => map
            .get(key)
            .cloned()
            .ok_or_else(|| FetchError::MissingKey(key.to_owned())),
        Value::Array(items) => {
            let index = key.parse::<usize>().map_err(|_| FetchError::NotIndexable {
                key: key.to_owned(),
                kind: "array",
            })?;
            items.get(index).cloned().ok_or(FetchError::OutOfBounds {
                index,
                len: items.len(),
            })
        }
        other => Err(FetchError::NotIndexable {
            key: key.to_owned(),
            kind: kind_of(other),
        }),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
