//! Segments touched by live streams and waiting for a reactive fill.

use crate::backfill::provider::StreamSubscriber;
use crate::backfill::schedule::FillRequest;
use crate::segment::SegmentClock;
use crate::tuple::Tuple;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Concurrent set of segment start instants.
#[derive(Debug, Default)]
pub struct PendingSegments {
    segments: Mutex<HashSet<i64>>,
}

impl PendingSegments {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<i64>> {
        self.segments.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a segment start. Returns false if it was already pending.
    pub fn record(&self, segment_start: i64) -> bool {
        self.lock().insert(segment_start)
    }

    /// Removes and returns every pending segment start, sorted.
    ///
    /// Segments recorded while draining land in the next drain.
    pub fn drain(&self) -> Vec<i64> {
        let mut starts: Vec<i64> = {
            let mut segments = self.lock();
            segments.drain().collect()
        };
        starts.sort_unstable();
        starts
    }

    /// Number of pending segments.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Groups sorted segment starts into runs of adjacent segments.
///
/// Each run becomes one request from its first to its last segment start,
/// which fills `[first, last + duration)`.
///
/// # Examples
/// ```
/// use alopex_parchive::backfill::{coalesce, FillRequest};
/// use alopex_parchive::segment::SegmentClock;
///
/// let clock = SegmentClock::new(100).unwrap();
/// let runs = coalesce(&[100, 200, 300, 500], &clock);
/// assert_eq!(runs, vec![FillRequest::new(100, 300), FillRequest::new(500, 500)]);
/// ```
pub fn coalesce(starts: &[i64], clock: &SegmentClock) -> Vec<FillRequest> {
    let mut runs = Vec::new();
    let mut iter = starts.iter().copied();
    let Some(first) = iter.next() else {
        return runs;
    };
    let (mut run_start, mut run_end) = (first, first);
    for start in iter {
        if start == run_end {
            continue;
        }
        if run_end.checked_add(clock.duration()) == Some(start) {
            run_end = start;
        } else {
            runs.push(FillRequest::new(run_start, run_end));
            run_start = start;
            run_end = start;
        }
    }
    runs.push(FillRequest::new(run_start, run_end));
    runs
}

/// Records the segment of every tuple seen on a monitored stream.
pub struct StreamUpdateMonitor {
    pending: Arc<PendingSegments>,
    clock: SegmentClock,
    timestamp_column: String,
}

impl StreamUpdateMonitor {
    /// Creates a monitor feeding `pending`.
    pub fn new(
        pending: Arc<PendingSegments>,
        clock: SegmentClock,
        timestamp_column: impl Into<String>,
    ) -> Self {
        Self {
            pending,
            clock,
            timestamp_column: timestamp_column.into(),
        }
    }
}

impl StreamSubscriber for StreamUpdateMonitor {
    fn on_tuple(&self, stream: &str, tuple: &Tuple) {
        match tuple.timestamp(&self.timestamp_column) {
            Some(ts) => match self.clock.checked_interval_start(ts) {
                Some(start) => {
                    self.pending.record(start);
                }
                None => warn!(
                    stream,
                    timestamp = ts,
                    "ignoring tuple before the first representable segment"
                ),
            },
            None => warn!(
                stream,
                column = %self.timestamp_column,
                "ignoring tuple without a valid generation time"
            ),
        }
    }

    fn stream_closed(&self, stream: &str) {
        debug!(stream, "monitored stream closed");
    }
}
