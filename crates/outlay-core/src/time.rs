//! Clock abstraction shared by signature verification and the retry worker.
//!
//! Webhook timestamps are checked against `Clock::now_system` and the retry
//! worker sleeps through `Clock::sleep`, so tests can pin wall-clock time
//! and skip poll intervals without waiting.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};

/// Source of wall-clock time and sleeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current system time.
    fn now_system(&self) -> SystemTime;

    /// Sleeps for the specified duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Current time as a UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }

    /// Current time as whole seconds since the Unix epoch.
    fn unix_seconds(&self) -> i64 {
        match self.now_system().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
            Err(before) => -i64::try_from(before.duration().as_secs()).unwrap_or(i64::MAX),
        }
    }
}

/// Production clock backed by the OS and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually driven clock for tests.
///
/// Clones share the same time, so a clock handed to the router and the
/// retry worker can be advanced from the test body.
#[derive(Debug, Clone)]
pub struct TestClock {
    system_ns: Arc<AtomicU64>,
}

impl TestClock {
    /// Creates a test clock starting at the current system time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a test clock starting at a specific time.
    pub fn with_start_time(start: SystemTime) -> Self {
        let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self { system_ns: Arc::new(AtomicU64::new(saturating_nanos(since_epoch))) }
    }

    /// Creates a test clock at the given Unix timestamp (seconds).
    pub fn at_unix(seconds: u64) -> Self {
        Self::with_start_time(UNIX_EPOCH + Duration::from_secs(seconds))
    }

    /// Moves time forward.
    pub fn advance(&self, duration: Duration) {
        self.system_ns.fetch_add(saturating_nanos(duration), Ordering::AcqRel);
    }

    /// Sets the clock to a specific time, forwards or backwards.
    pub fn jump_to(&self, time: SystemTime) {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        self.system_ns.store(saturating_nanos(since_epoch), Ordering::Release);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_system(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.system_ns.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        // Sleeping only advances virtual time, then yields.
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_reports_start_time() {
        let clock = TestClock::at_unix(1_700_000_000);

        assert_eq!(clock.unix_seconds(), 1_700_000_000);
        assert_eq!(clock.now_utc().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_clock_advances_and_jumps() {
        let clock = TestClock::at_unix(1_000);

        clock.advance(Duration::from_secs(60));
        assert_eq!(clock.unix_seconds(), 1_060);

        clock.jump_to(UNIX_EPOCH + Duration::from_secs(500));
        assert_eq!(clock.unix_seconds(), 500);
    }

    #[test]
    fn clones_share_time() {
        let clock = TestClock::at_unix(1_000);
        let handle = clock.clone();

        handle.advance(Duration::from_secs(5));
        assert_eq!(clock.unix_seconds(), 1_005);
    }

    #[tokio::test]
    async fn test_clock_sleep_advances_time() {
        let clock = TestClock::at_unix(1_000);

        clock.sleep(Duration::from_secs(5)).await;

        assert_eq!(clock.unix_seconds(), 1_005);
    }

    #[test]
    fn real_clock_is_after_epoch() {
        assert!(RealClock::new().unix_seconds() > 0);
    }
}
