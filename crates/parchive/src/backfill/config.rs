//! Backfiller configuration.
//!
//! ```toml
//! warmupTime = 60
//! maxSegmentSize = 5000
//! streamUpdateFillFrequency = 600
//! monitorStreams = ["tm_realtime", "pp_realtime"]
//!
//! [[schedule]]
//! startSegment = 10
//! numSegments = 3
//! interval = 3600
//!
//! [[schedule]]
//! startSegment = 1
//! numSegments = 1
//! ```

use crate::backfill::schedule::Schedule;
use crate::error::{ArchiveError, Result};
use crate::tuple::GENTIME_COLUMN;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default warmup before each backfill window: 60 seconds.
pub const DEFAULT_WARMUP_TIME_SECS: u64 = 60;

/// Default cap on samples per archive segment chunk.
pub const DEFAULT_MAX_SEGMENT_SIZE: usize = 5000;

/// Default cadence of the reactive fill: 600 seconds.
pub const DEFAULT_STREAM_UPDATE_FILL_FREQUENCY_SECS: u64 = 600;

/// Interval value that marks a segment-aligned schedule.
pub const SEGMENT_ALIGNED_INTERVAL: i64 = -1;

/// Upper bound of schedule intervals and the reactive fill cadence: ten years.
pub const MAX_PERIOD_SECS: u64 = 10 * 366 * 24 * 3600;

/// Upper bound of `startSegment` (in absolute value) and `numSegments`.
pub const MAX_SCHEDULE_SEGMENTS: i64 = 1 << 20;

/// One `schedule` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScheduleConfig {
    /// How many segments back from the reference time the window starts.
    pub start_segment: i64,
    /// Number of segments covered by each run.
    pub num_segments: i64,
    /// Seconds between runs, or -1 to run once per segment.
    #[serde(default = "default_interval")]
    pub interval: i64,
}

impl ScheduleConfig {
    /// Creates a periodic schedule entry.
    pub fn periodic(start_segment: i64, num_segments: i64, interval_secs: i64) -> Self {
        Self {
            start_segment,
            num_segments,
            interval: interval_secs,
        }
    }

    /// Creates a segment-aligned schedule entry.
    pub fn segment_aligned(start_segment: i64, num_segments: i64) -> Self {
        Self {
            start_segment,
            num_segments,
            interval: SEGMENT_ALIGNED_INTERVAL,
        }
    }
}

fn default_interval() -> i64 {
    SEGMENT_ALIGNED_INTERVAL
}

fn default_warmup_time() -> u64 {
    DEFAULT_WARMUP_TIME_SECS
}

fn default_max_segment_size() -> usize {
    DEFAULT_MAX_SEGMENT_SIZE
}

fn default_stream_update_fill_frequency() -> u64 {
    DEFAULT_STREAM_UPDATE_FILL_FREQUENCY_SECS
}

fn default_timestamp_column() -> String {
    GENTIME_COLUMN.to_string()
}

/// Configuration of the [`BackFiller`](crate::backfill::BackFiller).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BackFillerConfig {
    /// Lead time in seconds replayed before each window.
    #[serde(default = "default_warmup_time")]
    pub warmup_time: u64,

    /// Cap on samples per segment chunk.
    #[serde(default = "default_max_segment_size")]
    pub max_segment_size: usize,

    /// Periodic and segment-aligned schedules.
    #[serde(default)]
    pub schedule: Vec<ScheduleConfig>,

    /// Seconds between reactive fills of monitored segments.
    #[serde(default = "default_stream_update_fill_frequency")]
    pub stream_update_fill_frequency: u64,

    /// Streams to monitor. `None` monitors every telemetry and parameter stream.
    #[serde(default)]
    pub monitor_streams: Option<Vec<String>>,

    /// Column holding the generation time of monitored and replayed tuples.
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
}

impl Default for BackFillerConfig {
    fn default() -> Self {
        Self {
            warmup_time: DEFAULT_WARMUP_TIME_SECS,
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            schedule: Vec::new(),
            stream_update_fill_frequency: DEFAULT_STREAM_UPDATE_FILL_FREQUENCY_SECS,
            monitor_streams: None,
            timestamp_column: default_timestamp_column(),
        }
    }
}

impl BackFillerConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Loads a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Sets the warmup time in seconds.
    pub fn with_warmup_time(mut self, secs: u64) -> Self {
        self.warmup_time = secs;
        self
    }

    /// Sets the segment chunk cap.
    pub fn with_max_segment_size(mut self, size: usize) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Adds a schedule entry.
    pub fn with_schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule.push(schedule);
        self
    }

    /// Sets the reactive fill cadence in seconds.
    pub fn with_stream_update_fill_frequency(mut self, secs: u64) -> Self {
        self.stream_update_fill_frequency = secs;
        self
    }

    /// Sets the streams to monitor explicitly.
    pub fn with_monitor_streams<I, S>(mut self, streams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.monitor_streams = Some(streams.into_iter().map(Into::into).collect());
        self
    }

    /// Warmup time in milliseconds.
    pub fn warmup_millis(&self) -> i64 {
        self.warmup_time.saturating_mul(1000).min(i64::MAX as u64) as i64
    }

    /// Reactive fill cadence.
    pub fn fill_frequency(&self) -> Duration {
        Duration::from_secs(self.stream_update_fill_frequency)
    }

    /// Checks every option and converts the schedule entries.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Configuration`] for the first invalid option.
    pub fn validate(&self) -> Result<Vec<Schedule>> {
        if self.max_segment_size == 0 {
            return Err(ArchiveError::Configuration(
                "maxSegmentSize must be greater than 0".to_string(),
            ));
        }
        if self.stream_update_fill_frequency == 0
            || self.stream_update_fill_frequency > MAX_PERIOD_SECS
        {
            return Err(ArchiveError::Configuration(format!(
                "streamUpdateFillFrequency must be in [1, {}], got {}",
                MAX_PERIOD_SECS, self.stream_update_fill_frequency
            )));
        }
        if self.timestamp_column.is_empty() {
            return Err(ArchiveError::Configuration(
                "timestampColumn must not be empty".to_string(),
            ));
        }
        if let Some(streams) = &self.monitor_streams {
            if let Some(blank) = streams.iter().find(|name| name.trim().is_empty()) {
                return Err(ArchiveError::Configuration(format!(
                    "invalid stream name '{}' in monitorStreams",
                    blank
                )));
            }
        }
        self.schedule.iter().map(Schedule::from_config).collect()
    }
}
