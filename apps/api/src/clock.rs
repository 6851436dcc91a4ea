use chrono::{DateTime, Utc};

/// Wall-clock source for document and save timestamps.
///
/// Timers never read this; they run on `tokio::time::Instant` so tests can pause them.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
