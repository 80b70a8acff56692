//! Parchive - Alopex Parameter Archive Core
//!
//! This crate provides the building blocks of a time-partitioned columnar
//! archive of telemetry parameter values.
//!
//! # Components
//!
//! - [`SegmentClock`]: Fixed-width time segments of the archive
//! - [`ColumnValue`]: Order-preserving binary encoding of scalar columns
//! - [`MergeExpression`]: Sorted k-way merge of time-ordered tuple sources
//! - [`BackFiller`]: Scheduler rebuilding segments from replayed history
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_parchive::backfill::{BackFiller, BackFillerConfig, BackFillerDeps};
//!
//! let config = BackFillerConfig::load("backfiller.toml")?;
//! let mut backfiller = BackFiller::new(config, deps)?;
//! backfiller.start()?;
//!
//! // Rebuild the segments covering a range of mission time
//! let report = backfiller.schedule_filling_task(start, stop)?.wait().await?;
//! println!("{} samples in {}", report.processed, report.window);
//!
//! backfiller.stop()?;
//! ```

#![deny(missing_docs)]

pub mod backfill;
pub mod codec;
pub mod error;
pub mod merge;
pub mod segment;
pub mod time;
pub mod tuple;
pub mod writer;

pub use backfill::{BackFiller, BackFillerConfig, BackFillerDeps};
pub use codec::{ColumnType, ColumnValue, HresInstant};
pub use error::{ArchiveError, Result};
pub use merge::{MergeExpression, MergedStream};
pub use segment::{SegmentClock, SegmentInterval};
pub use tuple::{Tuple, TupleSource};
