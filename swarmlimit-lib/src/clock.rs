use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall clock with nanosecond resolution, injectable so tests can drive the
/// window deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;

    fn since(&self, earlier: SystemTime) -> Duration {
        self.now().duration_since(earlier).unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Nanoseconds since the unix epoch; the unit the buckets store.
pub fn unix_nanos(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i64,
        Err(e) => -(e.duration().as_nanos() as i64),
    }
}
