//! Clock abstraction for testable time-dependent logic
//!
//! Production code uses `SystemClock`, which reads `chrono::Utc::now()` and
//! sleeps on the tokio timer. Tests use `MockClock` so polling loops and the
//! version-switch buffer finish instantly.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Current time and timed waits
///
/// Injected via `Context` so tests control time.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by `chrono::Utc::now()` and `tokio::time::sleep`
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Mock clock: sleeping advances time immediately and is recorded
#[cfg(test)]
#[allow(clippy::expect_used)]
pub struct MockClock {
    now: std::sync::Mutex<DateTime<Utc>>,
    sleeps: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
#[allow(clippy::expect_used)]
impl MockClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
            sleeps: std::sync::Mutex::new(Vec::new()),
        }
    }

    #[allow(dead_code)]
    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.lock().expect("MockClock lock poisoned");
        *now += duration;
    }

    /// Every duration passed to `sleep`, in call order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("MockClock lock poisoned").clone()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
#[async_trait]
impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("MockClock lock poisoned")
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .expect("MockClock lock poisoned")
            .push(duration);
        if let Ok(elapsed) = chrono::Duration::from_std(duration) {
            self.advance(elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_returns_time() {
        let clock = SystemClock;
        let now = clock.now();
        // After 2020
        assert!(now.timestamp() > 1_577_836_800);
    }

    #[test]
    fn test_mock_clock_returns_fixed_time() {
        let fixed = Utc::now();
        let clock = MockClock::new(fixed);
        assert_eq!(clock.now(), fixed);
    }

    #[tokio::test]
    async fn test_mock_clock_sleep_advances_and_records() {
        let fixed = Utc::now();
        let clock = MockClock::new(fixed);

        clock.sleep(Duration::from_secs(10)).await;
        clock.sleep(Duration::from_secs(5)).await;

        assert_eq!(clock.now(), fixed + chrono::Duration::seconds(15));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(10), Duration::from_secs(5)]
        );
    }

    #[tokio::test]
    async fn test_system_clock_zero_sleep_returns() {
        SystemClock.sleep(Duration::ZERO).await;
    }
}
