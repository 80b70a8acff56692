//! Segment clock: fixed-duration time partitioning of the archive.
//!
//! All timestamps are mission time in milliseconds. Every segment covers the
//! half-open range `[start, start + duration)` where `start` is an exact
//! multiple of the segment duration. The duration is fixed when the archive is
//! initialized and shared read-only afterwards.

use crate::error::{ArchiveError, Result};
use std::fmt;

/// Default segment duration: 2^23 ms (about 2 hours 20 minutes).
pub const DEFAULT_SEGMENT_DURATION_MS: i64 = 1 << 23;

/// A half-open time range `[start, end)` aligned to segment boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentInterval {
    /// Inclusive start, in milliseconds.
    pub start: i64,
    /// Exclusive end, in milliseconds.
    pub end: i64,
}

impl SegmentInterval {
    /// Creates an interval from its bounds.
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Returns the length of the interval in milliseconds.
    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    /// Returns true if `ts` lies within `[start, end)`.
    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Returns true if the interval holds no instant.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl fmt::Display for SegmentInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{})", self.start, self.end)
    }
}

/// Maps timestamps to the segment that contains them.
///
/// # Examples
/// ```
/// use alopex_parchive::segment::SegmentClock;
///
/// let clock = SegmentClock::new(100).unwrap();
/// assert_eq!(clock.interval_start(250), 200);
/// assert_eq!(clock.interval_end(250), 299);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentClock {
    duration: i64,
}

impl Default for SegmentClock {
    fn default() -> Self {
        Self {
            duration: DEFAULT_SEGMENT_DURATION_MS,
        }
    }
}

impl SegmentClock {
    /// Creates a clock with the given segment duration in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Configuration`] if the duration is not positive.
    pub fn new(duration_ms: i64) -> Result<Self> {
        if duration_ms <= 0 {
            return Err(ArchiveError::Configuration(format!(
                "segment duration must be positive, got {} ms",
                duration_ms
            )));
        }
        Ok(Self {
            duration: duration_ms,
        })
    }

    /// Returns the segment duration in milliseconds.
    pub fn duration(&self) -> i64 {
        self.duration
    }

    /// Returns the greatest multiple of the segment duration that is `<= ts`.
    ///
    /// Uses floor division, so pre-epoch timestamps map to the segment below.
    /// A timestamp in the partial segment below the first representable
    /// segment start is clamped to that start; see
    /// [`SegmentClock::checked_interval_start`].
    pub fn interval_start(&self, ts: i64) -> i64 {
        self.checked_interval_start(ts)
            .unwrap_or_else(|| self.first_segment_start())
    }

    /// Returns the segment start of `ts`, or `None` if it is below `i64::MIN`.
    pub fn checked_interval_start(&self, ts: i64) -> Option<i64> {
        ts.div_euclid(self.duration).checked_mul(self.duration)
    }

    /// Returns the last millisecond of the segment containing `ts`.
    ///
    /// Saturates at `i64::MAX` for the partial segment at the top of the range.
    pub fn interval_end(&self, ts: i64) -> i64 {
        self.interval_start(ts).saturating_add(self.duration - 1)
    }

    /// Returns the last millisecond of the segment containing `ts`, or `None`
    /// if the segment is not representable.
    pub fn checked_interval_end(&self, ts: i64) -> Option<i64> {
        self.checked_interval_start(ts)?
            .checked_add(self.duration - 1)
    }

    /// Returns the segment containing `ts`.
    pub fn interval(&self, ts: i64) -> SegmentInterval {
        let start = self.interval_start(ts);
        SegmentInterval::new(start, start.saturating_add(self.duration))
    }

    /// Returns the segment following `interval`'s last segment.
    pub fn next(&self, interval: &SegmentInterval) -> SegmentInterval {
        let start = self.interval_start(interval.end);
        SegmentInterval::new(start, start.saturating_add(self.duration))
    }

    /// Widens `[start, stop]` to whole segments.
    ///
    /// `start` snaps down to its segment start and `stop` snaps up to the end
    /// of its segment plus one, giving a half-open, segment-aligned window.
    /// Bounds outside the representable segments are clamped.
    pub fn fill_window(&self, start: i64, stop: i64) -> SegmentInterval {
        SegmentInterval::new(
            self.interval_start(start),
            self.interval_end(stop).saturating_add(1),
        )
    }

    /// Like [`SegmentClock::fill_window`], but returns `None` instead of
    /// clamping when either bound falls outside the representable segments.
    pub fn checked_fill_window(&self, start: i64, stop: i64) -> Option<SegmentInterval> {
        let start = self.checked_interval_start(start)?;
        let end = self.checked_interval_end(stop)?.checked_add(1)?;
        Some(SegmentInterval::new(start, end))
    }

    fn first_segment_start(&self) -> i64 {
        let below = i64::MIN.div_euclid(self.duration);
        below
            .checked_mul(self.duration)
            .unwrap_or((below + 1) * self.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_duration() {
        let clock = SegmentClock::default();
        assert_eq!(clock.duration(), 8_388_608);
    }

    #[test]
    fn test_rejects_non_positive_duration() {
        assert!(matches!(
            SegmentClock::new(0),
            Err(ArchiveError::Configuration(_))
        ));
        assert!(SegmentClock::new(-5).is_err());
    }

    #[test]
    fn test_interval_start_and_end() {
        let clock = SegmentClock::new(100).unwrap();
        assert_eq!(clock.interval_start(0), 0);
        assert_eq!(clock.interval_start(99), 0);
        assert_eq!(clock.interval_start(100), 100);
        assert_eq!(clock.interval_end(100), 199);
        assert_eq!(clock.interval_end(199), 199);
    }

    #[test]
    fn test_negative_timestamps_floor() {
        let clock = SegmentClock::new(100).unwrap();
        assert_eq!(clock.interval_start(-1), -100);
        assert_eq!(clock.interval_start(-100), -100);
        assert_eq!(clock.interval_start(-101), -200);
        assert_eq!(clock.interval_end(-1), -1);
    }

    #[test]
    fn test_interval_idempotent_and_width() {
        let clock = SegmentClock::default();
        for ts in [
            i64::MIN / 2,
            -8_388_609,
            -1,
            0,
            1,
            8_388_607,
            8_388_608,
            1_700_000_000_000,
        ] {
            let start = clock.interval_start(ts);
            assert_eq!(clock.interval_start(start), start);
            assert_eq!(start % clock.duration(), 0);
            assert_eq!(clock.interval_end(ts) - start + 1, clock.duration());
            assert!(clock.interval(ts).contains(ts));
        }
    }

    #[test]
    fn test_fill_window_snaps_outward() {
        let clock = SegmentClock::new(100).unwrap();
        assert_eq!(clock.fill_window(150, 250), SegmentInterval::new(100, 300));
        assert_eq!(clock.fill_window(100, 300), SegmentInterval::new(100, 400));
        assert_eq!(clock.fill_window(500, 500), SegmentInterval::new(500, 600));
    }

    #[test]
    fn test_next_segment() {
        let clock = SegmentClock::new(100).unwrap();
        let first = clock.interval(120);
        assert_eq!(clock.next(&first), SegmentInterval::new(200, 300));
        assert_eq!(first.to_string(), "[100-200)");
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let clock = SegmentClock::new(100).unwrap();
        assert_eq!(clock.checked_interval_start(i64::MIN + 1), None);
        assert_eq!(clock.interval_start(i64::MIN + 1), -9_223_372_036_854_775_800);
        assert_eq!(clock.interval_start(i64::MIN + 1) % 100, 0);

        assert_eq!(clock.checked_interval_start(i64::MAX), Some(9_223_372_036_854_775_800));
        assert_eq!(clock.checked_interval_end(i64::MAX), None);
        assert_eq!(clock.interval_end(i64::MAX), i64::MAX);
        assert_eq!(clock.interval(i64::MAX).end, i64::MAX);

        assert_eq!(clock.checked_fill_window(0, i64::MAX), None);
        assert_eq!(clock.checked_fill_window(i64::MIN, 0), None);
        assert_eq!(
            clock.fill_window(0, i64::MAX),
            SegmentInterval::new(0, i64::MAX)
        );
        assert_eq!(
            clock.checked_fill_window(150, 250),
            Some(SegmentInterval::new(100, 300))
        );
    }

    #[test]
    fn test_power_of_two_duration_covers_i64_min() {
        let clock = SegmentClock::default();
        assert_eq!(clock.checked_interval_start(i64::MIN), Some(i64::MIN));
        assert_eq!(clock.interval_start(i64::MIN + 1), i64::MIN);
    }
}
