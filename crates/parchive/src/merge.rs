//! Sorted k-way merge of time-ordered tuple sources.
//!
//! A [`MergeExpression`] combines several sources that are each ordered on
//! the same merge key column into one source ordered on that column. With a
//! single input, the input is handed back untouched.
//!
//! # Ordering
//!
//! Keys are compared by their order-preserving encoding, so every column type
//! supported by the codec can be merged on. Among equal keys the input that
//! was registered first wins, in both directions.
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_parchive::merge::MergeExpression;
//!
//! let merged = MergeExpression::new("gentime")
//!     .with_source(tm_source)
//!     .with_source(pp_source)
//!     .execute()?;
//! ```

use crate::codec::ColumnValue;
use crate::error::{ArchiveError, Result};
use crate::tuple::{BoxedSource, Tuple, TupleSource};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::debug;

/// Builder for a merge over several sorted sources.
pub struct MergeExpression {
    sources: Vec<BoxedSource>,
    merge_column: String,
    ascending: bool,
}

impl MergeExpression {
    /// Creates an ascending merge on `merge_column` with no sources.
    pub fn new(merge_column: impl Into<String>) -> Self {
        Self {
            sources: Vec::new(),
            merge_column: merge_column.into(),
            ascending: true,
        }
    }

    /// Sets the merge direction.
    pub fn ascending(mut self, ascending: bool) -> Self {
        self.ascending = ascending;
        self
    }

    /// Registers a source. Registration order decides ties.
    pub fn with_source(mut self, source: impl TupleSource + 'static) -> Self {
        self.add_source(Box::new(source));
        self
    }

    /// Registers a boxed source.
    pub fn add_source(&mut self, source: BoxedSource) {
        self.sources.push(source);
    }

    /// Returns the number of registered sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Checks that the expression can be executed.
    pub fn bind(&self) -> Result<()> {
        if self.merge_column.is_empty() {
            return Err(ArchiveError::Configuration(
                "merge column name is empty".to_string(),
            ));
        }
        if self.sources.is_empty() {
            return Err(ArchiveError::Configuration(format!(
                "merge on '{}' has no sources",
                self.merge_column
            )));
        }
        Ok(())
    }

    /// Builds the merged stream.
    pub fn execute(mut self) -> Result<MergedStream> {
        self.bind()?;
        if self.sources.len() == 1 {
            if let Some(source) = self.sources.pop() {
                return Ok(MergedStream::Single(source));
            }
        }
        Ok(MergedStream::Merged(MergeStream::new(
            self.sources,
            self.merge_column,
            self.ascending,
        )))
    }
}

/// Output of [`MergeExpression::execute`].
pub enum MergedStream {
    /// The only input, unmodified.
    Single(BoxedSource),
    /// A k-way merge over two or more inputs.
    Merged(MergeStream),
}

impl MergedStream {
    /// Returns true if the input was passed through without merging.
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Single(_))
    }
}

#[async_trait]
impl TupleSource for MergedStream {
    async fn next_tuple(&mut self) -> Option<Result<Tuple>> {
        match self {
            Self::Single(source) => source.next_tuple().await,
            Self::Merged(merge) => merge.next_tuple().await,
        }
    }
}

/// Buffered head of one input.
struct Head {
    key: ColumnValue,
    source: usize,
    ascending: bool,
    tuple: Tuple,
}

impl Ord for Head {
    // Greater means "emit first": BinaryHeap pops the maximum.
    fn cmp(&self, other: &Self) -> Ordering {
        let by_key = self.key.cmp_encoded(&other.key).unwrap_or(Ordering::Equal);
        let by_key = if self.ascending {
            by_key.reverse()
        } else {
            by_key
        };
        by_key.then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

/// Online k-way merge holding at most one buffered tuple per input.
///
/// A tuple is emitted only once every open input has a buffered head, so the
/// output never runs ahead of a slow input. The stream ends after all inputs
/// have ended. A tuple without the merge key halts the merge with
/// [`ArchiveError::MalformedTuple`].
pub struct MergeStream {
    inputs: Vec<Option<BoxedSource>>,
    heads: BinaryHeap<Head>,
    /// Inputs whose head was consumed and must be refilled, in registration order.
    refill: Vec<usize>,
    merge_column: String,
    ascending: bool,
    consumed: u64,
    emitted: u64,
    halted: bool,
}

impl MergeStream {
    /// Creates a merge over `sources`.
    pub fn new(sources: Vec<BoxedSource>, merge_column: String, ascending: bool) -> Self {
        let refill = (0..sources.len()).collect();
        Self {
            heads: BinaryHeap::with_capacity(sources.len()),
            inputs: sources.into_iter().map(Some).collect(),
            refill,
            merge_column,
            ascending,
            consumed: 0,
            emitted: 0,
            halted: false,
        }
    }

    /// Number of tuples pulled from the inputs.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Number of tuples emitted.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Number of inputs still open.
    pub fn open_inputs(&self) -> usize {
        self.inputs.iter().filter(|input| input.is_some()).count()
    }

    fn halt(&mut self, err: ArchiveError) -> Option<Result<Tuple>> {
        self.halted = true;
        self.heads.clear();
        self.inputs.iter_mut().for_each(|input| *input = None);
        Some(Err(err))
    }

    /// Pulls a new head for every input waiting for one.
    async fn fill_heads(&mut self) -> Option<ArchiveError> {
        while let Some(&idx) = self.refill.first() {
            let next = match self.inputs[idx].as_mut() {
                Some(input) => input.next_tuple().await,
                None => None,
            };
            self.refill.remove(0);

            match next {
                Some(Ok(tuple)) => {
                    self.consumed += 1;
                    let key = match tuple.get(&self.merge_column) {
                        Some(key) => *key,
                        None => return Some(self.malformed()),
                    };
                    if let Some(top) = self.heads.peek() {
                        if top.key.column_type() != key.column_type() {
                            return Some(self.malformed());
                        }
                    }
                    self.heads.push(Head {
                        key,
                        source: idx,
                        ascending: self.ascending,
                        tuple,
                    });
                }
                Some(Err(err)) => return Some(err),
                None => {
                    if self.inputs[idx].take().is_some() {
                        debug!(input = idx, column = %self.merge_column, "merge input closed");
                    }
                }
            }
        }
        None
    }

    fn malformed(&self) -> ArchiveError {
        ArchiveError::MalformedTuple {
            column: self.merge_column.clone(),
        }
    }
}

#[async_trait]
impl TupleSource for MergeStream {
    async fn next_tuple(&mut self) -> Option<Result<Tuple>> {
        if self.halted {
            return None;
        }
        if let Some(err) = self.fill_heads().await {
            return self.halt(err);
        }
        let head = self.heads.pop()?;
        self.refill.push(head.source);
        self.emitted += 1;
        Some(Ok(head.tuple))
    }
}
