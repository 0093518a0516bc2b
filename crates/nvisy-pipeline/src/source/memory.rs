//! In-memory row producers.

use serde_json::Value;

use super::producer::{RowHandle, RowProducer};
use crate::error::BoxedError;

/// Produces one row per item of an iterator.
///
/// ```rust
/// use nvisy_pipeline::source::{IterSource, RowProducer};
/// use serde_json::json;
///
/// let mut source = IterSource::from_records(vec![json!({"a": 1})]);
/// assert!(source.next_row().unwrap().is_some());
/// assert!(source.next_row().unwrap().is_none());
/// ```
#[derive(Debug)]
pub struct IterSource<I> {
    rows: I,
    keys: Option<Vec<String>>,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = Value> + Send,
{
    /// Creates a producer over the given rows.
    pub fn new(rows: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            rows: rows.into_iter(),
            keys: None,
        }
    }

    /// Declares the keys every row supports.
    pub fn with_keys<K>(mut self, keys: impl IntoIterator<Item = K>) -> Self
    where
        K: Into<String>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }
}

impl IterSource<std::vec::IntoIter<Value>> {
    /// Creates a producer over an owned list of records.
    pub fn from_records(records: Vec<Value>) -> Self {
        Self::new(records)
    }
}

impl<I> RowProducer for IterSource<I>
where
    I: Iterator<Item = Value> + Send,
{
    fn next_row(&mut self) -> Result<Option<RowHandle>, BoxedError> {
        Ok(self.rows.next().map(RowHandle::new))
    }

    fn keys(&self) -> Option<Vec<String>> {
        self.keys.clone()
    }

    fn size_hint(&self) -> Option<usize> {
        self.rows.size_hint().1
    }
}

/// Produces one row per `(index, value)` pair.
///
/// The index is exposed through `take_index` instead of the row ordinal.
#[derive(Debug)]
pub struct KeyedSource<I> {
    rows: I,
}

impl<I> KeyedSource<I>
where
    I: Iterator<Item = (Value, Value)> + Send,
{
    /// Creates a producer over the given pairs.
    pub fn new(rows: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl<I> RowProducer for KeyedSource<I>
where
    I: Iterator<Item = (Value, Value)> + Send,
{
    fn next_row(&mut self) -> Result<Option<RowHandle>, BoxedError> {
        Ok(self
            .rows
            .next()
            .map(|(index, data)| RowHandle::with_index(index, data)))
    }

    fn size_hint(&self) -> Option<usize> {
        self.rows.size_hint().1
    }
}
