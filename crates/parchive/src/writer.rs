//! Segment writers: turn merged tuples into encoded archive segments.
//!
//! A [`ColumnarSegmentWriter`] collects the values of every column per
//! segment, splits each column into chunks of at most `max_segment_size`
//! values, and on [`SegmentWriter::flush`] stores every chunk in a sorted
//! [`SegmentStore`].
//!
//! ## Chunk Key
//!
//! ```text
//! Size    Field
//! ----    -----
//! N       column name (UTF-8)
//! 1       0x00 separator
//! 8       segment start (i64, order-preserving)
//! 4       chunk index (i32, order-preserving)
//! ```
//!
//! ## Chunk Value (repeated per sample)
//!
//! ```text
//! Size    Field
//! ----    -----
//! 1       column type tag
//! 12      sample time (hres timestamp)
//! T       value (T = encoded length of the type)
//! ```

use crate::codec::{scalar, ColumnType, ColumnValue, HresInstant};
use crate::error::{ArchiveError, Result};
use crate::segment::{SegmentClock, SegmentInterval};
use crate::tuple::Tuple;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Consumer of the tuples produced by one backfill.
pub trait SegmentWriter: Send {
    /// Accepts one tuple. Tuples arrive in time order.
    fn accept(&mut self, tuple: &Tuple) -> Result<()>;

    /// Persists everything accepted so far.
    fn flush(&mut self) -> Result<()>;

    /// Number of samples accepted into segments.
    fn processed(&self) -> u64;

    /// True once the writer has given up on this backfill.
    fn is_aborted(&self) -> bool;
}

/// Creates one writer per backfill window.
pub trait SegmentWriterFactory: Send + Sync {
    /// Creates a writer collecting samples inside `window`.
    fn create(&self, window: SegmentInterval, max_segment_size: usize)
        -> Result<Box<dyn SegmentWriter>>;
}

/// Sorted key-value storage for encoded segments.
pub trait SegmentStore: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;

    /// Returns the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Returns all entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// In-memory [`SegmentStore`] ordered by unsigned key bytes.
#[derive(Debug, Default)]
pub struct MemorySegmentStore {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemorySegmentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|err| err.into_inner()).len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns all keys in order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        let map = self.inner.read().unwrap_or_else(|err| err.into_inner());
        map.keys().cloned().collect()
    }
}

impl SegmentStore for MemorySegmentStore {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let mut map = self.inner.write().unwrap_or_else(|err| err.into_inner());
        map.insert(key, value);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let map = self.inner.read().unwrap_or_else(|err| err.into_inner());
        Ok(map.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.inner.read().unwrap_or_else(|err| err.into_inner());
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

/// Returns the key prefix shared by all chunks of a column.
pub fn column_prefix(column: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(column.len() + 1);
    key.extend_from_slice(column.as_bytes());
    key.push(0);
    key
}

/// Builds the store key of one chunk.
pub fn chunk_key(column: &str, segment_start: i64, chunk_index: u32) -> Vec<u8> {
    let mut key = column_prefix(column);
    key.extend_from_slice(&scalar::encode_long(segment_start));
    key.extend_from_slice(&scalar::encode_int(chunk_index as i32));
    key
}

/// Encodes a chunk of samples.
pub fn encode_chunk(samples: &[(HresInstant, ColumnValue)]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (time, value) in samples {
        out.push(value.column_type() as u8);
        out.extend_from_slice(&scalar::encode_instant(*time));
        value.serialize(&mut out)?;
    }
    Ok(out)
}

/// Decodes a chunk written by [`encode_chunk`].
///
/// # Errors
///
/// Returns [`ArchiveError::Decode`] on an unknown type tag or truncated data.
pub fn decode_chunk(bytes: &[u8]) -> Result<Vec<(HresInstant, ColumnValue)>> {
    let mut cursor = bytes;
    let mut samples = Vec::new();
    while let Some((&tag, rest)) = cursor.split_first() {
        cursor = rest;
        let ty = ColumnType::from_u8(tag)
            .ok_or_else(|| ArchiveError::Decode(format!("unknown column type tag {}", tag)))?;
        let time = match ColumnValue::deserialize(ColumnType::HresTimestamp, &mut cursor)? {
            ColumnValue::HresTimestamp(time) => time,
            other => {
                return Err(ArchiveError::Decode(format!(
                    "expected sample time, got {:?}",
                    other
                )))
            }
        };
        let value = ColumnValue::deserialize(ty, &mut cursor)?;
        samples.push((time, value));
    }
    Ok(samples)
}

/// Writer that lays out samples column by column, segment by segment.
pub struct ColumnarSegmentWriter {
    store: Arc<dyn SegmentStore>,
    clock: SegmentClock,
    window: SegmentInterval,
    timestamp_column: String,
    max_segment_size: usize,
    /// (column, segment start) -> chunks of samples.
    chunks: BTreeMap<(String, i64), Vec<Vec<(HresInstant, ColumnValue)>>>,
    last_time: Option<HresInstant>,
    processed: u64,
    aborted: bool,
}

impl ColumnarSegmentWriter {
    /// Creates a writer collecting samples inside `window`.
    ///
    /// Tuples before `window.start` are warmup data and are not stored.
    pub fn new(
        store: Arc<dyn SegmentStore>,
        clock: SegmentClock,
        window: SegmentInterval,
        timestamp_column: impl Into<String>,
        max_segment_size: usize,
    ) -> Self {
        Self {
            store,
            clock,
            window,
            timestamp_column: timestamp_column.into(),
            max_segment_size: max_segment_size.max(1),
            chunks: BTreeMap::new(),
            last_time: None,
            processed: 0,
            aborted: false,
        }
    }

    /// Stops accepting tuples; nothing further will be flushed.
    pub fn abort(&mut self) {
        self.aborted = true;
        self.chunks.clear();
    }

    fn sample_time(&self, tuple: &Tuple) -> Option<HresInstant> {
        match tuple.get(&self.timestamp_column)? {
            ColumnValue::HresTimestamp(time) => Some(*time),
            ColumnValue::Long(_) => tuple
                .timestamp(&self.timestamp_column)
                .map(HresInstant::from_millis),
            _ => None,
        }
    }
}

impl SegmentWriter for ColumnarSegmentWriter {
    fn accept(&mut self, tuple: &Tuple) -> Result<()> {
        if self.aborted {
            return Ok(());
        }
        let Some(time) = self.sample_time(tuple) else {
            warn!(column = %self.timestamp_column, "skipping tuple without sample time");
            return Ok(());
        };
        if !self.window.contains(time.millis()) {
            return Ok(());
        }
        if let Some(last) = self.last_time {
            if time < last {
                warn!(
                    window = %self.window,
                    last = last.millis(),
                    got = time.millis(),
                    "samples out of time order, aborting segment write"
                );
                self.abort();
                return Ok(());
            }
        }
        self.last_time = Some(time);

        let segment_start = self.clock.interval_start(time.millis());
        for (name, value) in tuple.columns() {
            if name == self.timestamp_column {
                continue;
            }
            let chunks = self
                .chunks
                .entry((name.to_string(), segment_start))
                .or_default();
            match chunks.last_mut() {
                Some(chunk) if chunk.len() < self.max_segment_size => chunk.push((time, *value)),
                _ => chunks.push(vec![(time, *value)]),
            }
            self.processed += 1;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.aborted {
            return Ok(());
        }
        let chunks = std::mem::take(&mut self.chunks);
        let mut written = 0usize;
        for ((column, segment_start), column_chunks) in chunks {
            for (index, chunk) in column_chunks.iter().enumerate() {
                let key = chunk_key(&column, segment_start, index as u32);
                self.store.put(key, encode_chunk(chunk)?)?;
                written += 1;
            }
        }
        debug!(window = %self.window, chunks = written, "segment writer flushed");
        Ok(())
    }

    fn processed(&self) -> u64 {
        self.processed
    }

    fn is_aborted(&self) -> bool {
        self.aborted
    }
}

/// Factory for [`ColumnarSegmentWriter`]s sharing one store.
#[derive(Clone)]
pub struct ColumnarWriterFactory {
    store: Arc<dyn SegmentStore>,
    clock: SegmentClock,
    timestamp_column: String,
}

impl ColumnarWriterFactory {
    /// Creates a factory writing to `store`.
    pub fn new(
        store: Arc<dyn SegmentStore>,
        clock: SegmentClock,
        timestamp_column: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            timestamp_column: timestamp_column.into(),
        }
    }
}

impl SegmentWriterFactory for ColumnarWriterFactory {
    fn create(
        &self,
        window: SegmentInterval,
        max_segment_size: usize,
    ) -> Result<Box<dyn SegmentWriter>> {
        Ok(Box::new(ColumnarSegmentWriter::new(
            self.store.clone(),
            self.clock,
            window,
            self.timestamp_column.clone(),
            max_segment_size,
        )))
    }
}
