//! The backfill scheduler.
//!
//! A [`BackFiller`] owns one worker task on the tokio runtime. The worker
//! holds every schedule timer and the queue of manual requests, and runs
//! fill tasks one at a time, to completion. Between tasks, queued manual
//! requests go first, then due timers in deadline order.
//! Stream callbacks only touch the shared [`PendingSegments`] set.
//!
//! ```text
//!  periodic timers ──┐
//!  aligned timer ────┤
//!  flush timer ──────┼──> worker ──> FillTask::run ──> replay ─> merge ─> writer
//!  manual requests ──┘     (one task at a time)
//! ```

use crate::backfill::config::BackFillerConfig;
use crate::backfill::pending::{coalesce, PendingSegments, StreamUpdateMonitor};
use crate::backfill::provider::{ReplayProvider, StreamKind, StreamRegistry, SubscriptionId};
use crate::backfill::schedule::{FillRequest, MissedTicks, Schedule, Trigger, TriggerTimers};
use crate::backfill::task::{FillContext, FillReport, FillTask, TaskOrigin, TaskStatus};
use crate::error::{ArchiveError, Result};
use crate::segment::SegmentClock;
use crate::time::TimeService;
use crate::writer::SegmentWriterFactory;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Injected collaborators of a [`BackFiller`].
#[derive(Clone)]
pub struct BackFillerDeps {
    /// Segment clock of the archive.
    pub clock: SegmentClock,
    /// Mission time source.
    pub time: Arc<dyn TimeService>,
    /// Source of historical replays.
    pub replay: Arc<dyn ReplayProvider>,
    /// Creates one writer per task.
    pub writers: Arc<dyn SegmentWriterFactory>,
    /// Live streams available for monitoring.
    pub streams: Arc<dyn StreamRegistry>,
}

/// Lifecycle state of a [`BackFiller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No worker running.
    Stopped,
    /// Worker running and streams subscribed.
    Started,
}

/// Task counters.
#[derive(Debug, Default)]
pub struct BackFillerStats {
    started: AtomicU64,
    completed: AtomicU64,
    aborted: AtomicU64,
    failed: AtomicU64,
}

impl BackFillerStats {
    /// Tasks started.
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Tasks completed.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Tasks aborted by their writer.
    pub fn aborted(&self) -> u64 {
        self.aborted.load(Ordering::Relaxed)
    }

    /// Tasks failed.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn record(&self, status: TaskStatus) {
        let counter = match status {
            TaskStatus::Completed => &self.completed,
            TaskStatus::Aborted => &self.aborted,
            TaskStatus::Failed => &self.failed,
            TaskStatus::Pending | TaskStatus::Running => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle to a manually scheduled task.
#[derive(Debug)]
pub struct FillTaskHandle {
    window_request: FillRequest,
    reply: oneshot::Receiver<FillReport>,
}

impl FillTaskHandle {
    /// The request as submitted.
    pub fn request(&self) -> FillRequest {
        self.window_request
    }

    /// Waits for the task to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::SchedulerStopped`] if the scheduler was stopped
    /// before the task finished.
    pub async fn wait(self) -> Result<FillReport> {
        self.reply.await.map_err(|_| ArchiveError::SchedulerStopped)
    }
}

struct ManualRequest {
    request: FillRequest,
    reply: oneshot::Sender<FillReport>,
}

struct Running {
    commands: mpsc::UnboundedSender<ManualRequest>,
    worker: JoinHandle<()>,
    subscriptions: Vec<(String, SubscriptionId)>,
}

/// Schedules and runs archive backfills.
///
/// # Example
///
/// ```rust,ignore
/// let mut backfiller = BackFiller::new(config, deps)?;
/// backfiller.start()?;
/// let report = backfiller.schedule_filling_task(start, stop)?.wait().await?;
/// backfiller.stop()?;
/// ```
pub struct BackFiller {
    config: BackFillerConfig,
    schedules: Vec<Schedule>,
    monitored: Vec<String>,
    deps: BackFillerDeps,
    pending: Arc<PendingSegments>,
    stats: Arc<BackFillerStats>,
    next_task_id: Arc<AtomicU64>,
    running: Option<Running>,
}

impl BackFiller {
    /// Validates `config` and resolves the monitored streams.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Configuration`] for an invalid option, a
    /// schedule that overflows the time range with the given segment clock,
    /// or a monitored stream that does not exist.
    pub fn new(config: BackFillerConfig, deps: BackFillerDeps) -> Result<Self> {
        let schedules = config.validate()?;
        for schedule in &schedules {
            schedule.check_clock(&deps.clock)?;
        }
        let monitored = match &config.monitor_streams {
            Some(names) => {
                if let Some(missing) = names.iter().find(|name| !deps.streams.exists(name)) {
                    return Err(ArchiveError::Configuration(format!(
                        "monitored stream '{}' does not exist",
                        missing
                    )));
                }
                names.clone()
            }
            None => {
                let mut names = deps.streams.streams_of_kind(StreamKind::Telemetry);
                names.extend(deps.streams.streams_of_kind(StreamKind::Parameter));
                names
            }
        };
        debug!(
            schedules = schedules.len(),
            monitored = ?monitored,
            "backfiller configured"
        );

        Ok(Self {
            config,
            schedules,
            monitored,
            deps,
            pending: Arc::new(PendingSegments::new()),
            stats: Arc::new(BackFillerStats::default()),
            next_task_id: Arc::new(AtomicU64::new(1)),
            running: None,
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &BackFillerConfig {
        &self.config
    }

    /// The validated schedules.
    pub fn schedules(&self) -> &[Schedule] {
        &self.schedules
    }

    /// Names of the monitored streams.
    pub fn monitored_streams(&self) -> &[String] {
        &self.monitored
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        match self.running {
            Some(_) => SchedulerState::Started,
            None => SchedulerState::Stopped,
        }
    }

    /// Segments waiting for the next reactive fill.
    pub fn pending_segments(&self) -> Arc<PendingSegments> {
        Arc::clone(&self.pending)
    }

    /// Task counters.
    pub fn stats(&self) -> &BackFillerStats {
        &self.stats
    }

    /// Subscribes to the monitored streams and spawns the worker.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::InvalidState`] if already started or called
    /// outside a runtime, or the registry error if a subscription fails.
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(ArchiveError::InvalidState(
                "backfiller already started".to_string(),
            ));
        }
        let runtime = Handle::try_current().map_err(|_| {
            ArchiveError::InvalidState("backfiller must be started inside a tokio runtime".to_string())
        })?;

        let subscriptions = self.subscribe()?;

        let clock = self.deps.clock;
        let mission_now = self.deps.time.mission_time();
        let t0 = clock.interval_start(mission_now);
        let timers = self.build_timers(Instant::now(), mission_now.saturating_sub(t0));

        let worker = Worker {
            ctx: FillContext {
                clock,
                replay: Arc::clone(&self.deps.replay),
                writers: Arc::clone(&self.deps.writers),
                warmup_ms: self.config.warmup_millis(),
                max_segment_size: self.config.max_segment_size,
                timestamp_column: self.config.timestamp_column.clone(),
            },
            schedules: self.schedules.clone(),
            time: Arc::clone(&self.deps.time),
            pending: Arc::clone(&self.pending),
            stats: Arc::clone(&self.stats),
            next_task_id: Arc::clone(&self.next_task_id),
            timers,
            t0,
            aligned_runs: 0,
        };
        let (commands, receiver) = mpsc::unbounded_channel();
        let worker = runtime.spawn(worker.run(receiver));

        info!(
            t0,
            schedules = self.schedules.len(),
            streams = subscriptions.len(),
            "backfiller started"
        );
        self.running = Some(Running {
            commands,
            worker,
            subscriptions,
        });
        Ok(())
    }

    /// Unsubscribes from every stream and cancels the worker.
    ///
    /// A task in progress is abandoned where it stands; handles of unfinished
    /// tasks resolve to [`ArchiveError::SchedulerStopped`].
    pub fn stop(&mut self) -> Result<()> {
        let running = self
            .running
            .take()
            .ok_or_else(|| ArchiveError::InvalidState("backfiller not started".to_string()))?;
        self.shutdown(running);
        info!("backfiller stopped");
        Ok(())
    }

    /// Queues a fill of `[interval_start(start), interval_end(stop) + 1)`.
    ///
    /// The task waits for the task currently running, then runs ahead of any
    /// schedule timer that is due. A window outside the representable
    /// segments resolves to a `Failed` report.
    pub fn schedule_filling_task(&self, start: i64, stop: i64) -> Result<FillTaskHandle> {
        let running = self
            .running
            .as_ref()
            .ok_or_else(|| ArchiveError::InvalidState("backfiller not started".to_string()))?;
        let request = FillRequest::new(start, stop);
        let (reply, receiver) = oneshot::channel();
        running
            .commands
            .send(ManualRequest { request, reply })
            .map_err(|_| ArchiveError::SchedulerStopped)?;
        debug!(start, stop, "manual fill queued");
        Ok(FillTaskHandle {
            window_request: request,
            reply: receiver,
        })
    }

    fn subscribe(&self) -> Result<Vec<(String, SubscriptionId)>> {
        let monitor = Arc::new(StreamUpdateMonitor::new(
            Arc::clone(&self.pending),
            self.deps.clock,
            self.config.timestamp_column.clone(),
        ));
        let mut subscriptions = Vec::with_capacity(self.monitored.len());
        for name in &self.monitored {
            match self.deps.streams.subscribe(name, monitor.clone()) {
                Ok(id) => subscriptions.push((name.clone(), id)),
                Err(err) => {
                    for (name, id) in subscriptions {
                        self.deps.streams.unsubscribe(&name, id);
                    }
                    return Err(err);
                }
            }
        }
        Ok(subscriptions)
    }

    /// `offset_ms` is how far mission time is past the current segment start.
    fn build_timers(&self, now: Instant, offset_ms: i64) -> TriggerTimers {
        let mut timers = TriggerTimers::new();
        for (idx, schedule) in self.schedules.iter().enumerate() {
            if let Schedule::Periodic { interval, .. } = schedule {
                timers.add(Trigger::Periodic(idx), now, *interval, 0, MissedTicks::Skip);
            }
        }
        if self.schedules.iter().any(Schedule::is_segment_aligned) {
            // Tick k is the k-th segment boundary after t0; tick 0 is due now.
            let since_t0 = Duration::from_millis(offset_ms.max(0) as u64);
            let anchor = now.checked_sub(since_t0).unwrap_or(now);
            let period = Duration::from_millis(self.deps.clock.duration() as u64);
            timers.add(Trigger::SegmentAligned, anchor, period, 0, MissedTicks::CatchUp);
        }
        timers.add(
            Trigger::StreamFlush,
            now,
            self.config.fill_frequency(),
            1,
            MissedTicks::Skip,
        );
        timers
    }

    fn shutdown(&self, running: Running) {
        for (name, id) in &running.subscriptions {
            self.deps.streams.unsubscribe(name, *id);
        }
        drop(running.commands);
        running.worker.abort();
    }
}

impl Drop for BackFiller {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            warn!("backfiller dropped while started, stopping");
            self.shutdown(running);
        }
    }
}

struct Worker {
    ctx: FillContext,
    schedules: Vec<Schedule>,
    time: Arc<dyn TimeService>,
    pending: Arc<PendingSegments>,
    stats: Arc<BackFillerStats>,
    next_task_id: Arc<AtomicU64>,
    timers: TriggerTimers,
    t0: i64,
    aligned_runs: i64,
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ManualRequest>) {
        loop {
            let next = self.timers.next_deadline();
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(ManualRequest { request, reply }) => {
                        let report = self.run_task(TaskOrigin::Manual, request).await;
                        if reply.send(report).is_err() {
                            debug!("manual fill handle dropped before completion");
                        }
                    }
                    None => break,
                },
                _ = wait_for(next.map(|(_, deadline)| deadline)) => {
                    if let Some((idx, _)) = next {
                        if let Some(trigger) = self.timers.fire(idx, Instant::now()) {
                            self.on_trigger(trigger).await;
                        }
                    }
                }
            }
        }
        debug!("backfill worker exiting");
    }

    async fn on_trigger(&mut self, trigger: Trigger) {
        match trigger {
            Trigger::Periodic(idx) => {
                let Some(schedule) = self.schedules.get(idx).copied() else {
                    return;
                };
                let now = self.time.mission_time();
                match schedule.request(&self.ctx.clock, now, self.t0, 0) {
                    Some(request) => {
                        self.run_task(TaskOrigin::Periodic, request).await;
                    }
                    None => warn!(schedule = idx, now, "periodic window out of range, skipping"),
                }
            }
            Trigger::SegmentAligned => {
                let run_count = self.aligned_runs;
                self.aligned_runs = self.aligned_runs.saturating_add(1);
                let aligned: Vec<Schedule> = self
                    .schedules
                    .iter()
                    .copied()
                    .filter(Schedule::is_segment_aligned)
                    .collect();
                for schedule in aligned {
                    match schedule.request(&self.ctx.clock, 0, self.t0, run_count) {
                        Some(request) => {
                            self.run_task(TaskOrigin::SegmentAligned, request).await;
                        }
                        None => warn!(run_count, "segment-aligned window out of range, skipping"),
                    }
                }
            }
            Trigger::StreamFlush => {
                let starts = self.pending.drain();
                if starts.is_empty() {
                    return;
                }
                let requests = coalesce(&starts, &self.ctx.clock);
                debug!(
                    segments = starts.len(),
                    tasks = requests.len(),
                    "filling segments updated by monitored streams"
                );
                for request in requests {
                    self.run_task(TaskOrigin::StreamUpdate, request).await;
                }
            }
        }
    }

    async fn run_task(&mut self, origin: TaskOrigin, request: FillRequest) -> FillReport {
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        self.stats.started.fetch_add(1, Ordering::Relaxed);
        let report = FillTask::new(id, origin, request, &self.ctx.clock)
            .run(&self.ctx)
            .await;
        self.stats.record(report.status);
        report
    }
}
