//! Mission time sources.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current mission time, in milliseconds.
pub trait TimeService: Send + Sync {
    /// Returns the current mission time.
    fn mission_time(&self) -> i64;
}

/// Mission time taken from the host wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeService;

impl TimeService for SystemTimeService {
    fn mission_time(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since) => since.as_millis() as i64,
            Err(before) => -(before.duration().as_millis() as i64),
        }
    }
}

/// Mission time that only moves when told to.
///
/// # Examples
/// ```
/// use alopex_parchive::time::{SimulationTimeService, TimeService};
///
/// let time = SimulationTimeService::new(1_000);
/// time.advance(500);
/// assert_eq!(time.mission_time(), 1_500);
/// ```
#[derive(Debug, Default)]
pub struct SimulationTimeService {
    now: AtomicI64,
}

impl SimulationTimeService {
    /// Creates a simulated clock starting at `start` ms.
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    /// Sets the mission time.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Moves the mission time forward by `millis`.
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeService for SimulationTimeService {
    fn mission_time(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_is_after_2020() {
        assert!(SystemTimeService.mission_time() > 1_577_836_800_000);
    }

    #[test]
    fn test_simulation_set_and_advance() {
        let time = SimulationTimeService::default();
        assert_eq!(time.mission_time(), 0);
        time.set(-50);
        time.advance(75);
        assert_eq!(time.mission_time(), 25);
    }
}
