//! Tuples and time-ordered tuple sources.

use crate::codec::ColumnValue;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// Marker for an invalid or unset instant.
pub const INVALID_INSTANT: i64 = i64::MIN;

/// Name of the generation time column carried by telemetry and parameter tuples.
pub const GENTIME_COLUMN: &str = "gentime";

/// An ordered set of named column values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tuple {
    columns: Vec<(String, ColumnValue)>,
}

impl Tuple {
    /// Creates an empty tuple.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column, replacing any existing column with the same name.
    pub fn with(mut self, name: impl Into<String>, value: ColumnValue) -> Self {
        self.set(name, value);
        self
    }

    /// Sets a column value.
    pub fn set(&mut self, name: impl Into<String>, value: ColumnValue) {
        let name = name.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.columns.push((name, value)),
        }
    }

    /// Returns the value of a column.
    pub fn get(&self, name: &str) -> Option<&ColumnValue> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    /// Iterates over columns in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &ColumnValue)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the tuple has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Reads a timestamp column as milliseconds.
    ///
    /// Accepts `Long` milliseconds or a high-resolution timestamp. Returns
    /// `None` if the column is missing, of another type, or holds
    /// [`INVALID_INSTANT`].
    pub fn timestamp(&self, name: &str) -> Option<i64> {
        let millis = match self.get(name)? {
            ColumnValue::Long(ms) => *ms,
            ColumnValue::HresTimestamp(instant) => instant.millis(),
            _ => return None,
        };
        (millis != INVALID_INSTANT).then_some(millis)
    }
}

/// A pull-based source of tuples ordered on some key column.
///
/// `None` means the source is closed; it stays closed afterwards.
#[async_trait]
pub trait TupleSource: Send {
    /// Returns the next tuple, or `None` once the source is exhausted.
    async fn next_tuple(&mut self) -> Option<Result<Tuple>>;
}

/// Boxed tuple source.
pub type BoxedSource = Box<dyn TupleSource>;

#[async_trait]
impl TupleSource for BoxedSource {
    async fn next_tuple(&mut self) -> Option<Result<Tuple>> {
        (**self).next_tuple().await
    }
}

/// Push-based delivery: a producer task sends tuples, dropping the sender closes the source.
#[async_trait]
impl TupleSource for mpsc::Receiver<Tuple> {
    async fn next_tuple(&mut self) -> Option<Result<Tuple>> {
        self.recv().await.map(Ok)
    }
}

/// An in-memory source that yields its tuples in order.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    tuples: VecDeque<Tuple>,
}

impl VecSource {
    /// Creates a source from already ordered tuples.
    pub fn new(tuples: Vec<Tuple>) -> Self {
        Self {
            tuples: tuples.into(),
        }
    }

    /// Returns the number of tuples not yet consumed.
    pub fn remaining(&self) -> usize {
        self.tuples.len()
    }
}

#[async_trait]
impl TupleSource for VecSource {
    async fn next_tuple(&mut self) -> Option<Result<Tuple>> {
        self.tuples.pop_front().map(Ok)
    }
}

/// Drains a source into a vector, stopping at the first error.
pub async fn collect<S: TupleSource + ?Sized>(source: &mut S) -> Result<Vec<Tuple>> {
    let mut out = Vec::new();
    while let Some(tuple) = source.next_tuple().await {
        out.push(tuple?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::HresInstant;

    #[test]
    fn test_set_replaces_existing_column() {
        let tuple = Tuple::new()
            .with("a", ColumnValue::Int(1))
            .with("b", ColumnValue::Int(2))
            .with("a", ColumnValue::Int(3));
        assert_eq!(tuple.len(), 2);
        assert_eq!(tuple.get("a"), Some(&ColumnValue::Int(3)));
        let names: Vec<&str> = tuple.columns().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_timestamp_extraction() {
        let long = Tuple::new().with(GENTIME_COLUMN, ColumnValue::Long(1234));
        assert_eq!(long.timestamp(GENTIME_COLUMN), Some(1234));

        let hres = Tuple::new().with(
            GENTIME_COLUMN,
            ColumnValue::HresTimestamp(HresInstant::new(99, 5).unwrap()),
        );
        assert_eq!(hres.timestamp(GENTIME_COLUMN), Some(99));

        let invalid = Tuple::new().with(GENTIME_COLUMN, ColumnValue::Long(INVALID_INSTANT));
        assert_eq!(invalid.timestamp(GENTIME_COLUMN), None);

        let wrong_type = Tuple::new().with(GENTIME_COLUMN, ColumnValue::Double(1.0));
        assert_eq!(wrong_type.timestamp(GENTIME_COLUMN), None);
        assert_eq!(Tuple::new().timestamp(GENTIME_COLUMN), None);
    }

    #[tokio::test]
    async fn test_channel_source_closes_with_sender() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(Tuple::new().with("x", ColumnValue::Int(1)))
            .await
            .unwrap();
        drop(tx);
        let tuples = collect(&mut rx).await.unwrap();
        assert_eq!(tuples.len(), 1);
        assert!(rx.next_tuple().await.is_none());
    }
}
