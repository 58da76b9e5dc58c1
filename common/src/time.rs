use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch. The estimator only ever needs
/// second-granularity timestamps (block times, prediction horizons), so
/// this avoids pulling `chrono`'s `DateTime` into every call site.
pub type UnixTime = u64;

/// Clock abstraction, so the orchestrator workers and the prediction
/// tracker can be driven by a fake clock in tests instead of actually
/// sleeping through wait-time horizons measured in hours.
pub trait Clock: Send + Sync {
    fn now(&self) -> UnixTime;
}

#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixTime {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_secs()
    }
}

/// A shared, cloneable handle to a [`Clock`], analogous to the teacher
/// workspace's `TimeGetter`: passed down by value rather than by
/// reference so every worker can hold its own copy.
#[derive(Clone)]
pub struct TimeGetter(Arc<dyn Clock>);

impl TimeGetter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        TimeGetter(clock)
    }

    pub fn system() -> Self {
        TimeGetter(Arc::new(SystemClock))
    }

    pub fn now(&self) -> UnixTime {
        self.0.now()
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A clock a test can advance explicitly, for deterministic
    /// prediction-tracker and transient-stats tests.
    pub struct MockClock(AtomicU64);

    impl MockClock {
        pub fn new(start: UnixTime) -> Arc<Self> {
            Arc::new(MockClock(AtomicU64::new(start)))
        }

        pub fn advance(&self, secs: u64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> UnixTime {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn mock_clock_advances() {
        let clock = MockClock::new(1000);
        let getter = TimeGetter::new(clock.clone());
        assert_eq!(getter.now(), 1000);
        clock.advance(60);
        assert_eq!(getter.now(), 1060);
    }
}
