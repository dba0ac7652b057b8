use chrono::{DateTime, Utc};
use std::sync::Arc;

/// The engine's single time source. The scheduler owns one instance and
/// everything downstream (risk day-roll, paper fills, tests) reads the same
/// clock instead of the wall directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type SharedClock = Arc<dyn Clock>;

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and the offline backtest driver.
pub struct ManualClock {
    now: std::sync::RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::RwLock::new(now),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.write().expect("clock lock poisoned");
        *now += duration;
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut now = self.now.write().expect("clock lock poisoned");
        *now = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().expect("clock lock poisoned")
    }
}
