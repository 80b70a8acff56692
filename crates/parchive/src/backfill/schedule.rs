//! Backfill schedules and the timers that fire them.

use crate::backfill::config::{
    ScheduleConfig, MAX_PERIOD_SECS, MAX_SCHEDULE_SEGMENTS, SEGMENT_ALIGNED_INTERVAL,
};
use crate::error::{ArchiveError, Result};
use crate::segment::{SegmentClock, SegmentInterval};
use std::time::Duration;
use tokio::time::Instant;

/// A requested backfill range.
///
/// `start` and `stop` are both covered: execution widens the request to
/// `[interval_start(start), interval_end(stop) + 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillRequest {
    /// First instant to cover, in ms.
    pub start: i64,
    /// Last instant to cover, in ms.
    pub stop: i64,
}

impl FillRequest {
    /// Creates a request.
    pub fn new(start: i64, stop: i64) -> Self {
        Self { start, stop }
    }

    /// Returns the segment-aligned, half-open window of this request.
    pub fn window(&self, clock: &SegmentClock) -> SegmentInterval {
        clock.fill_window(self.start, self.stop)
    }

    /// Returns the window, or `None` if it does not fit in the time range.
    pub fn checked_window(&self, clock: &SegmentClock) -> Option<SegmentInterval> {
        clock.checked_fill_window(self.start, self.stop)
    }
}

/// A validated backfill schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Rolling revalidation every `interval`, relative to the current mission time.
    Periodic {
        /// Time between runs.
        interval: Duration,
        /// Segments between the window start and now.
        start_segment: i64,
        /// Segments per window.
        num_segments: i64,
    },
    /// One run per segment tick, relative to the reference time captured at start.
    SegmentAligned {
        /// Segments between the window start and the current tick.
        start_segment: i64,
        /// Segments per window.
        num_segments: i64,
    },
}

impl Schedule {
    /// Validates a schedule entry.
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        if config.num_segments <= 0 || config.num_segments > MAX_SCHEDULE_SEGMENTS {
            return Err(ArchiveError::Configuration(format!(
                "schedule numSegments must be in [1, {}], got {}",
                MAX_SCHEDULE_SEGMENTS, config.num_segments
            )));
        }
        if config.start_segment.unsigned_abs() > MAX_SCHEDULE_SEGMENTS as u64 {
            return Err(ArchiveError::Configuration(format!(
                "schedule startSegment must be in [-{0}, {0}], got {1}",
                MAX_SCHEDULE_SEGMENTS, config.start_segment
            )));
        }
        match config.interval {
            SEGMENT_ALIGNED_INTERVAL => Ok(Self::SegmentAligned {
                start_segment: config.start_segment,
                num_segments: config.num_segments,
            }),
            secs if secs > 0 && secs as u64 <= MAX_PERIOD_SECS => Ok(Self::Periodic {
                interval: Duration::from_secs(secs as u64),
                start_segment: config.start_segment,
                num_segments: config.num_segments,
            }),
            other => Err(ArchiveError::Configuration(format!(
                "schedule interval must be in [1, {}] or {}, got {}",
                MAX_PERIOD_SECS, SEGMENT_ALIGNED_INTERVAL, other
            ))),
        }
    }

    /// Returns true for a segment-aligned schedule.
    pub fn is_segment_aligned(&self) -> bool {
        matches!(self, Self::SegmentAligned { .. })
    }

    /// Checks that the span of this schedule is representable with `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Configuration`] if `startSegment` or
    /// `numSegments` segments of `clock` overflow the time range.
    pub fn check_clock(&self, clock: &SegmentClock) -> Result<()> {
        let (start_segment, num_segments) = self.segments();
        let duration = clock.duration();
        if start_segment.checked_mul(duration).is_none()
            || num_segments.checked_mul(duration).is_none()
        {
            return Err(ArchiveError::Configuration(format!(
                "schedule of {} segments starting {} segments back overflows with {} ms segments",
                num_segments, start_segment, duration
            )));
        }
        Ok(())
    }

    fn segments(&self) -> (i64, i64) {
        match *self {
            Self::Periodic {
                start_segment,
                num_segments,
                ..
            }
            | Self::SegmentAligned {
                start_segment,
                num_segments,
            } => (start_segment, num_segments),
        }
    }

    /// Computes the range due for this schedule.
    ///
    /// * `now` - current mission time (periodic schedules)
    /// * `t0` - segment start captured when the scheduler started
    /// * `run_count` - number of segment ticks already run (aligned schedules)
    ///
    /// Returns `None` if the range falls outside the representable time range.
    pub fn request(
        &self,
        clock: &SegmentClock,
        now: i64,
        t0: i64,
        run_count: i64,
    ) -> Option<FillRequest> {
        let duration = clock.duration();
        let (start_segment, num_segments) = self.segments();
        let start = match self {
            Self::Periodic { .. } => now.checked_sub(start_segment.checked_mul(duration)?)?,
            Self::SegmentAligned { .. } => {
                t0.checked_add(run_count.checked_sub(start_segment)?.checked_mul(duration)?)?
            }
        };
        let stop = start.checked_add(num_segments.checked_mul(duration)? - 1)?;
        Some(FillRequest::new(start, stop))
    }

    /// Returns the segment-aligned window of [`Schedule::request`].
    pub fn window(
        &self,
        clock: &SegmentClock,
        now: i64,
        t0: i64,
        run_count: i64,
    ) -> Option<SegmentInterval> {
        self.request(clock, now, t0, run_count)?.checked_window(clock)
    }
}

/// What a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The periodic schedule at this index.
    Periodic(usize),
    /// All segment-aligned schedules.
    SegmentAligned,
    /// Drain the pending segment set.
    StreamFlush,
}

/// How a timer treats ticks missed while the worker was busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissedTicks {
    /// Fire once for the latest missed tick and keep the grid.
    Skip,
    /// Fire once for every missed tick.
    CatchUp,
}

#[derive(Debug)]
struct TimerEntry {
    trigger: Trigger,
    anchor: Instant,
    period: Duration,
    tick: u32,
    missed: MissedTicks,
}

impl TimerEntry {
    /// `None` once the deadline is past what `Instant` can hold.
    fn deadline(&self) -> Option<Instant> {
        self.anchor.checked_add(self.period.checked_mul(self.tick)?)
    }
}

/// Deadline bookkeeping for every trigger of one scheduler.
///
/// Tick `n` of a timer is due at `anchor + n * period`.
#[derive(Debug, Default)]
pub struct TriggerTimers {
    entries: Vec<TimerEntry>,
}

impl TriggerTimers {
    /// Creates an empty timer set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a timer whose first tick is `first_tick` periods after `anchor`.
    pub fn add(
        &mut self,
        trigger: Trigger,
        anchor: Instant,
        period: Duration,
        first_tick: u32,
        missed: MissedTicks,
    ) {
        self.entries.push(TimerEntry {
            trigger,
            anchor,
            period,
            tick: first_tick,
            missed,
        });
    }

    /// Returns true if no timer is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the index and deadline of the earliest due timer.
    ///
    /// Ties go to the timer added first. Timers whose next deadline cannot be
    /// represented never fire again.
    pub fn next_deadline(&self) -> Option<(usize, Instant)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| Some((idx, entry.deadline()?)))
            .min_by_key(|&(idx, deadline)| (deadline, idx))
    }

    /// Consumes the current tick of timer `idx` and schedules the next one.
    pub fn fire(&mut self, idx: usize, now: Instant) -> Option<Trigger> {
        let entry = self.entries.get_mut(idx)?;
        entry.tick = entry.tick.saturating_add(1);
        if entry.missed == MissedTicks::Skip {
            while entry.tick < u32::MAX && entry.deadline().is_some_and(|d| d <= now) {
                entry.tick += 1;
            }
        }
        Some(entry.trigger)
    }
}
