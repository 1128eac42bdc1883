//! The sharded redis ring the limiters coordinate through.
//!
//! [`RingCommands`] is the seam the limiter consumes: the handful of sorted
//! set operations plus liveness and pool introspection. [`RedisRing`] is the
//! production implementation; tests substitute an in-memory ring.

mod redis;
mod supervisor;

use std::time::Duration;

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::Result;

pub use redis::RedisRing;
pub use supervisor::RingSupervisor;

/// Connection pool counters, exported periodically as gauges.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub idle_conns: u64,
    pub stale_conns: u64,
    pub timeouts: u64,
    pub total_conns: u64,
}

/// Sorted-set operations the limiter issues, sharded by key. Every operation
/// may fail with a transport error; failures are surfaced verbatim and the
/// limiter decides how to degrade.
#[async_trait]
pub trait RingCommands: Send + Sync {
    /// Add `(member, score)` to the set; a duplicate member has its score
    /// updated in place.
    async fn zadd(&self, cx: &CallContext, key: &str, score: f64, member: &str) -> Result<()>;

    /// Current cardinality of the set.
    async fn zcard(&self, cx: &CallContext, key: &str) -> Result<i64>;

    /// Remove all members whose score lies in the closed range `[min, max]`.
    async fn zrem_range_by_score(
        &self,
        cx: &CallContext,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<()>;

    /// Slice of `(member, score)` pairs with scores in `[min, max]`, ordered
    /// by ascending score. A negative `count` returns the whole range.
    async fn zrange_by_score_with_scores(
        &self,
        cx: &CallContext,
        key: &str,
        min: f64,
        max: f64,
        offset: isize,
        count: isize,
    ) -> Result<Vec<(String, f64)>>;

    /// Set or refresh the key's ttl, creating the key's expiry if absent.
    async fn expire(&self, cx: &CallContext, key: &str, ttl: Duration) -> Result<()>;

    /// Liveness check against every shard.
    async fn ping(&self) -> Result<()>;

    /// Tear down the shard pools. Idempotent.
    async fn close(&self);

    fn pool_stats(&self) -> PoolStats;
}
