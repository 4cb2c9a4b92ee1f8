use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, RwLock};

/// Source of wall-clock time for expiry decisions.
///
/// Services take an `Arc<dyn Clock>` so tests can move time forward without
/// sleeping. Production wiring uses [`SystemClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_ts(&self) -> i64 {
        self.now().timestamp()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock. Cloning shares the same underlying instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(RwLock::new(start)),
        }
    }

    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn shared_system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Converts a stored unix timestamp back into a `DateTime`.
pub fn from_timestamp(ts: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_shared_instant() {
        let clock = ManualClock::starting_now();
        let handle = clock.clone();
        let before = clock.now();

        handle.advance(Duration::days(8));

        assert_eq!(clock.now() - before, Duration::days(8));
    }

    #[test]
    fn timestamps_round_trip_at_second_precision() {
        let clock = ManualClock::new(from_timestamp(1_700_000_000));
        assert_eq!(clock.now_ts(), 1_700_000_000);
    }
}
