//! Shared test doubles: an in-memory stand-in for the redis ring, a manual
//! clock and a recording metrics sink.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use swarmlimit_lib::{CallContext, Clock, LimitError, Metrics, PoolStats, Result, RingCommands};

/// Wall clock advanced by hand so tests can walk through the window without
/// sleeping. Starts well past the epoch so an empty bucket reads as ancient.
pub struct ManualClock(Mutex<SystemTime>);

impl ManualClock {
    pub fn new() -> Self {
        Self(Mutex::new(base_time()))
    }

    pub fn advance(&self, d: Duration) {
        *self.0.lock().unwrap() += d;
    }

    pub fn set(&self, t: SystemTime) {
        *self.0.lock().unwrap() = t;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.0.lock().unwrap()
    }
}

pub fn base_time() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_000_000)
}

/// Metrics sink that records everything for assertions.
#[derive(Default)]
pub struct RecordingMetrics {
    counters: Mutex<HashMap<String, u64>>,
    gauges: Mutex<HashMap<String, Vec<f64>>>,
    timers: Mutex<HashMap<String, u64>>,
}

impl RecordingMetrics {
    pub fn counter(&self, key: &str) -> u64 {
        self.counters.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn timer_count(&self, key: &str) -> u64 {
        self.timers.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn gauge_values(&self, key: &str) -> Vec<f64> {
        self.gauges
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn gauge_write_count(&self) -> usize {
        self.gauges.lock().unwrap().values().map(Vec::len).sum()
    }
}

impl Metrics for RecordingMetrics {
    fn inc_counter(&self, key: &str) {
        *self.counters.lock().unwrap().entry(key.to_owned()).or_insert(0) += 1;
    }

    fn update_gauge(&self, key: &str, value: f64) {
        self.gauges
            .lock()
            .unwrap()
            .entry(key.to_owned())
            .or_default()
            .push(value);
    }

    fn measure_since(&self, key: &str, _start: Instant) {
        *self.timers.lock().unwrap().entry(key.to_owned()).or_insert(0) += 1;
    }
}

/// In-memory rendition of the ring: one sorted set per key, a recorded ttl,
/// and switches to make individual operations fail the way a flaky transport
/// would.
#[derive(Default)]
pub struct InMemoryRing {
    sets: Mutex<HashMap<String, Vec<(String, f64)>>>,
    ttls: Mutex<HashMap<String, Duration>>,
    failing: Mutex<HashSet<&'static str>>,
    remaining_ping_failures: AtomicU32,
    closed: AtomicBool,
    stats: Mutex<PoolStats>,
}

impl InMemoryRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named op ("zadd", "zcard", "zremrangebyscore",
    /// "zrangebyscore", "expire", "ping") fail from now on.
    pub fn fail_on(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn fail_all(&self) {
        for op in ["zadd", "zcard", "zremrangebyscore", "zrangebyscore", "expire", "ping"] {
            self.fail_on(op);
        }
    }

    /// Fail only the next `n` pings, then recover.
    pub fn fail_ping_times(&self, n: u32) {
        self.remaining_ping_failures.store(n, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        self.sets.lock().unwrap().keys().cloned().collect()
    }

    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.ttls.lock().unwrap().get(key).copied()
    }

    /// Plant a raw member, e.g. garbage that does not parse as a timestamp.
    pub fn insert_raw(&self, key: &str, member: &str, score: f64) {
        let mut sets = self.sets.lock().unwrap();
        let set = sets.entry(key.to_owned()).or_default();
        set.push((member.to_owned(), score));
        sort_set(set);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_stats(&self, stats: PoolStats) {
        *self.stats.lock().unwrap() = stats;
    }

    fn check(&self, cx: &CallContext, op: &'static str) -> Result<()> {
        if cx.is_cancelled() {
            return Err(LimitError::Canceled);
        }
        if self.failing.lock().unwrap().contains(op) {
            return Err(LimitError::Timeout);
        }
        Ok(())
    }
}

fn sort_set(set: &mut [(String, f64)]) {
    set.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
}

#[async_trait]
impl RingCommands for InMemoryRing {
    async fn zadd(&self, cx: &CallContext, key: &str, score: f64, member: &str) -> Result<()> {
        self.check(cx, "zadd")?;
        let mut sets = self.sets.lock().unwrap();
        let set = sets.entry(key.to_owned()).or_default();
        if let Some(entry) = set.iter_mut().find(|(m, _)| m == member) {
            entry.1 = score;
        } else {
            set.push((member.to_owned(), score));
        }
        sort_set(set);
        Ok(())
    }

    async fn zcard(&self, cx: &CallContext, key: &str) -> Result<i64> {
        self.check(cx, "zcard")?;
        Ok(self
            .sets
            .lock()
            .unwrap()
            .get(key)
            .map(|s| s.len() as i64)
            .unwrap_or(0))
    }

    async fn zrem_range_by_score(
        &self,
        cx: &CallContext,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<()> {
        self.check(cx, "zremrangebyscore")?;
        if let Some(set) = self.sets.lock().unwrap().get_mut(key) {
            set.retain(|(_, score)| *score < min || *score > max);
        }
        Ok(())
    }

    async fn zrange_by_score_with_scores(
        &self,
        cx: &CallContext,
        key: &str,
        min: f64,
        max: f64,
        offset: isize,
        count: isize,
    ) -> Result<Vec<(String, f64)>> {
        self.check(cx, "zrangebyscore")?;
        let sets = self.sets.lock().unwrap();
        let Some(set) = sets.get(key) else {
            return Ok(Vec::new());
        };
        let take = if count < 0 { usize::MAX } else { count as usize };
        Ok(set
            .iter()
            .filter(|(_, score)| *score >= min && *score <= max)
            .skip(offset.max(0) as usize)
            .take(take)
            .cloned()
            .collect())
    }

    async fn expire(&self, cx: &CallContext, key: &str, ttl: Duration) -> Result<()> {
        self.check(cx, "expire")?;
        self.ttls.lock().unwrap().insert(key.to_owned(), ttl);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        if self.failing.lock().unwrap().contains("ping") {
            return Err(LimitError::Timeout);
        }
        let remaining = self.remaining_ping_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_ping_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(LimitError::Timeout);
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn pool_stats(&self) -> PoolStats {
        let stats = *self.stats.lock().unwrap();
        if self.is_closed() {
            PoolStats {
                idle_conns: 0,
                total_conns: 0,
                ..stats
            }
        } else {
            stats
        }
    }
}
