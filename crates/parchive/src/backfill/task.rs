//! One backfill run over a segment-aligned window.
//!
//! A task replays `[window.start - warmup, window.end)`, merges the replay
//! sources on the timestamp column and feeds the result to a segment writer.
//! The writer ignores the warmup part and only stores samples inside the
//! window.
//!
//! ```text
//! Pending ──run──> Running ──> Completed
//!                          ├─> Aborted   (writer gave up)
//!                          └─> Failed    (any error)
//! ```

use crate::backfill::provider::{Replay, ReplayProvider, ReplayRequest};
use crate::backfill::schedule::FillRequest;
use crate::error::{ArchiveError, Result};
use crate::merge::MergeExpression;
use crate::segment::{SegmentClock, SegmentInterval};
use crate::tuple::TupleSource;
use crate::writer::{SegmentWriter, SegmentWriterFactory};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`FillTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Created, not started.
    Pending,
    /// Replay in progress.
    Running,
    /// Segments written.
    Completed,
    /// The writer aborted; nothing was flushed.
    Aborted,
    /// Replay, merge or writer failed.
    Failed,
}

impl TaskStatus {
    /// Returns true for `Completed`, `Aborted` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }
}

/// What triggered a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOrigin {
    /// A periodic schedule.
    Periodic,
    /// A segment-aligned schedule.
    SegmentAligned,
    /// The reactive fill of monitored stream updates.
    StreamUpdate,
    /// An explicit request.
    Manual,
}

impl fmt::Display for TaskOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Periodic => "periodic",
            Self::SegmentAligned => "segment-aligned",
            Self::StreamUpdate => "stream-update",
            Self::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Outcome of a finished task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillReport {
    /// Task id, unique per scheduler.
    pub id: u64,
    /// What triggered the task.
    pub origin: TaskOrigin,
    /// Window that was filled.
    pub window: SegmentInterval,
    /// Terminal status.
    pub status: TaskStatus,
    /// Samples accepted by the writer.
    pub processed: u64,
    /// Failure message for `Failed` tasks.
    pub error: Option<String>,
}

impl FillReport {
    /// Converts the report into an error unless the task completed.
    pub fn into_result(self) -> Result<Self> {
        match self.status {
            TaskStatus::Completed => Ok(self),
            TaskStatus::Aborted => Err(ArchiveError::Aborted),
            _ => Err(ArchiveError::TaskFailed(
                self.error.unwrap_or_else(|| format!("task {} did not complete", self.id)),
            )),
        }
    }
}

/// Everything a task needs besides its window.
#[derive(Clone)]
pub struct FillContext {
    /// Segment clock used to snap windows.
    pub clock: SegmentClock,
    /// Source of historical replays.
    pub replay: Arc<dyn ReplayProvider>,
    /// Creates the writer of each task.
    pub writers: Arc<dyn SegmentWriterFactory>,
    /// Replay lead time before the window, in ms.
    pub warmup_ms: i64,
    /// Cap on samples per segment chunk.
    pub max_segment_size: usize,
    /// Merge key of the replay sources.
    pub timestamp_column: String,
}

/// A single backfill.
#[derive(Debug)]
pub struct FillTask {
    id: u64,
    origin: TaskOrigin,
    request: FillRequest,
    window: SegmentInterval,
    in_range: bool,
    status: TaskStatus,
    processed: u64,
    aborted: bool,
}

impl FillTask {
    /// Creates a pending task over the snapped window of `request`.
    ///
    /// A request whose window does not fit in the time range keeps a clamped
    /// window for reporting and fails when run.
    pub fn new(id: u64, origin: TaskOrigin, request: FillRequest, clock: &SegmentClock) -> Self {
        let checked = request.checked_window(clock);
        Self {
            id,
            origin,
            request,
            window: checked.unwrap_or_else(|| request.window(clock)),
            in_range: checked.is_some(),
            status: TaskStatus::Pending,
            processed: 0,
            aborted: false,
        }
    }

    /// Task id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// What triggered the task.
    pub fn origin(&self) -> TaskOrigin {
        self.origin
    }

    /// Window filled by the task.
    pub fn window(&self) -> SegmentInterval {
        self.window
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Samples accepted so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Runs the task to a terminal status. Errors end up in the report.
    pub async fn run(mut self, ctx: &FillContext) -> FillReport {
        self.status = TaskStatus::Running;
        info!(
            task = self.id,
            origin = %self.origin,
            window = %self.window,
            "starting fill task"
        );

        let outcome = self.execute(ctx).await;
        let error = match outcome {
            Ok(()) if self.aborted => {
                self.status = TaskStatus::Aborted;
                warn!(task = self.id, window = %self.window, "fill task aborted by writer");
                None
            }
            Ok(()) => {
                self.status = TaskStatus::Completed;
                info!(
                    task = self.id,
                    window = %self.window,
                    processed = self.processed,
                    "fill task completed"
                );
                None
            }
            Err(err) => {
                self.status = TaskStatus::Failed;
                error!(task = self.id, window = %self.window, error = %err, "fill task failed");
                Some(err.to_string())
            }
        };

        FillReport {
            id: self.id,
            origin: self.origin,
            window: self.window,
            status: self.status,
            processed: self.processed,
            error,
        }
    }

    async fn execute(&mut self, ctx: &FillContext) -> Result<()> {
        if !self.in_range {
            return Err(ArchiveError::TaskFailed(format!(
                "request [{}, {}] is outside the representable segments",
                self.request.start, self.request.stop
            )));
        }
        let mut writer = ctx.writers.create(self.window, ctx.max_segment_size)?;
        let request = ReplayRequest {
            name: format!("backfill-{}", self.id),
            start: self.window.start.saturating_sub(ctx.warmup_ms),
            stop: self.window.end,
        };
        let mut replay = ctx.replay.create(request).await?;

        let fed = self.feed(replay.as_mut(), writer.as_mut(), ctx).await;
        if fed.is_err() || self.aborted {
            replay.abort();
        }
        let terminated = replay.await_terminated().await;
        fed?;
        terminated?;

        if !self.aborted {
            writer.flush()?;
        }
        Ok(())
    }

    async fn feed(
        &mut self,
        replay: &mut dyn Replay,
        writer: &mut dyn SegmentWriter,
        ctx: &FillContext,
    ) -> Result<()> {
        let sources = replay.start().await?;
        if sources.is_empty() {
            debug!(task = self.id, "replay produced no streams");
            return Ok(());
        }

        let mut merge = MergeExpression::new(ctx.timestamp_column.as_str());
        for source in sources {
            merge.add_source(source);
        }
        let mut merged = merge.execute()?;

        while let Some(tuple) = merged.next_tuple().await {
            writer.accept(&tuple?)?;
            self.processed = writer.processed();
            if writer.is_aborted() {
                self.aborted = true;
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ColumnValue;
    use crate::tuple::{BoxedSource, Tuple, VecSource};
    use crate::writer::{ColumnarWriterFactory, MemorySegmentStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct StaticReplay {
        streams: Vec<Vec<Tuple>>,
        aborted: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Replay for StaticReplay {
        async fn start(&mut self) -> Result<Vec<BoxedSource>> {
            Ok(self
                .streams
                .drain(..)
                .map(|tuples| Box::new(VecSource::new(tuples)) as BoxedSource)
                .collect())
        }

        fn abort(&mut self) {
            self.aborted.store(true, Ordering::SeqCst);
        }

        async fn await_terminated(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct StaticProvider {
        streams: Vec<Vec<Tuple>>,
        requests: Mutex<Vec<ReplayRequest>>,
        aborted: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ReplayProvider for StaticProvider {
        async fn create(&self, request: ReplayRequest) -> Result<Box<dyn Replay>> {
            self.requests.lock().unwrap().push(request);
            Ok(Box::new(StaticReplay {
                streams: self.streams.clone(),
                aborted: self.aborted.clone(),
            }))
        }
    }

    fn sample(t: i64) -> Tuple {
        Tuple::new()
            .with("gentime", ColumnValue::Long(t))
            .with("v", ColumnValue::Int(t as i32))
    }

    fn context(provider: Arc<StaticProvider>, store: Arc<MemorySegmentStore>) -> FillContext {
        let clock = SegmentClock::new(100).unwrap();
        FillContext {
            clock,
            replay: provider,
            writers: Arc::new(ColumnarWriterFactory::new(store, clock, "gentime")),
            warmup_ms: 50,
            max_segment_size: 10,
            timestamp_column: "gentime".to_string(),
        }
    }

    fn provider(streams: Vec<Vec<Tuple>>) -> Arc<StaticProvider> {
        Arc::new(StaticProvider {
            streams,
            requests: Mutex::new(Vec::new()),
            aborted: Arc::new(AtomicBool::new(false)),
        })
    }

    #[tokio::test]
    async fn test_replay_includes_warmup_and_window_is_snapped() {
        let provider = provider(vec![
            vec![sample(60), sample(110), sample(250)],
            vec![sample(120), sample(299), sample(300)],
        ]);
        let store = Arc::new(MemorySegmentStore::new());
        let ctx = context(provider.clone(), store.clone());

        let task = FillTask::new(7, TaskOrigin::Manual, FillRequest::new(130, 220), &ctx.clock);
        assert_eq!(task.window(), SegmentInterval::new(100, 300));
        assert_eq!(task.status(), TaskStatus::Pending);

        let report = task.run(&ctx).await;
        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.processed, 4);
        assert_eq!(
            provider.requests.lock().unwrap()[0],
            ReplayRequest {
                name: "backfill-7".to_string(),
                start: 50,
                stop: 300
            }
        );
        assert!(!store.is_empty());
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_writer_abort_stops_replay() {
        // Second source goes backwards in time inside the window.
        let provider = provider(vec![vec![sample(150), sample(120)]]);
        let store = Arc::new(MemorySegmentStore::new());
        let ctx = context(provider.clone(), store.clone());

        let report = FillTask::new(1, TaskOrigin::Periodic, FillRequest::new(100, 199), &ctx.clock)
            .run(&ctx)
            .await;
        assert_eq!(report.status, TaskStatus::Aborted);
        assert!(provider.aborted.load(Ordering::SeqCst));
        assert!(store.is_empty());
        assert!(matches!(report.into_result(), Err(ArchiveError::Aborted)));
    }

    #[tokio::test]
    async fn test_malformed_tuple_fails_task() {
        let bad = Tuple::new().with("v", ColumnValue::Int(1));
        let provider = provider(vec![vec![sample(110)], vec![bad]]);
        let store = Arc::new(MemorySegmentStore::new());
        let ctx = context(provider.clone(), store.clone());

        let report = FillTask::new(2, TaskOrigin::StreamUpdate, FillRequest::new(100, 100), &ctx.clock)
            .run(&ctx)
            .await;
        assert_eq!(report.status, TaskStatus::Failed);
        assert!(report.error.as_deref().unwrap().contains("gentime"));
        assert!(provider.aborted.load(Ordering::SeqCst));
        assert!(matches!(report.into_result(), Err(ArchiveError::TaskFailed(_))));
    }

    #[tokio::test]
    async fn test_unrepresentable_window_fails_without_replay() {
        let provider = provider(vec![vec![sample(110)]]);
        let store = Arc::new(MemorySegmentStore::new());
        let ctx = context(provider.clone(), store.clone());

        let task = FillTask::new(3, TaskOrigin::Manual, FillRequest::new(0, i64::MAX), &ctx.clock);
        assert_eq!(task.window(), SegmentInterval::new(0, i64::MAX));

        let report = task.run(&ctx).await;
        assert_eq!(report.status, TaskStatus::Failed);
        assert!(report.error.as_deref().unwrap().contains("outside"));
        assert!(provider.requests.lock().unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Aborted.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }
}
