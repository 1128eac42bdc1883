//! The cluster rate limiting algorithm.
//!
//! Each (group, client key) pair owns one sorted set in redis whose members
//! are admission timestamps in nanoseconds. A call prunes entries that slid
//! out of the window, counts what is left and compares the count against the
//! ceiling. Counting this way is eventually consistent across the proxy
//! fleet: concurrent callers race between the count and their own `ZADD`, so
//! the cluster can over-admit by up to the concurrent fan-in on one key.
//! That is the price of lock-free coordination and is compensated on the
//! retry-after side, which always rounds up and never reports less than one
//! second.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::TimeDelta;
use tracing::{debug, error};

use crate::clock::{unix_nanos, Clock, SystemClock};
use crate::config::LimitSettings;
use crate::context::CallContext;
use crate::error::{LimitError, Result};
use crate::hash::hashed_key;
use crate::ring::RingCommands;
use crate::telemetry::{Metrics, QuerySpans, REDIS_METRICS_PREFIX};

const ALLOW_ADD_SPAN: &str = "redis_allow_add_card";
const ALLOW_EXPIRE_SPAN: &str = "redis_allow_expire";
const ALLOW_CHECK_SPAN: &str = "redis_allow_check_card";
const ALLOW_CHECK_REM_RANGE_SPAN: &str = "redis_allow_check_rem_range";
const OLDEST_SCORE_SPAN: &str = "redis_oldest_score";

const ALLOW_QUERY: &str = "allow";
const RETRY_AFTER_QUERY: &str = "retryafter";

/// Per-rule settings, immutable once the limiter is built. `group` has to be
/// identical on every proxy instance sharing the rule, since it is part of
/// the bucket key.
#[derive(Debug, Clone)]
pub struct Settings {
    pub group: String,
    pub max_hits: i64,
    pub window: Duration,
}

impl From<&LimitSettings> for Settings {
    fn from(s: &LimitSettings) -> Self {
        Self {
            group: s.group.clone(),
            max_hits: s.max_hits,
            window: s.window(),
        }
    }
}

/// Sliding-window rate limiter coordinated through the shared redis ring.
///
/// The limiter holds no per-call state of its own; the bucket in redis is the
/// only state, and it is shared with every other proxy instance configured
/// with the same group. All failure handling is fail-open: when redis cannot
/// be queried the request is admitted and the failure shows up in metrics,
/// because a limiter that throws under partial infrastructure failure would
/// take the data plane down with it.
pub struct ClusterLimiter {
    group: String,
    max_hits: i64,
    window: Duration,
    ring: Arc<dyn RingCommands>,
    metrics: Arc<dyn Metrics>,
    clock: Arc<dyn Clock>,
    spans: QuerySpans,
}

impl ClusterLimiter {
    pub fn new(settings: Settings, ring: Arc<dyn RingCommands>, metrics: Arc<dyn Metrics>) -> Self {
        let spans = QuerySpans::new(&settings.group, settings.max_hits, settings.window);
        Self {
            group: settings.group,
            max_hits: settings.max_hits,
            window: settings.window,
            ring,
            metrics,
            clock: Arc::new(SystemClock),
            spans,
        }
    }

    /// Replace the wall clock; lets tests move through the window without
    /// sleeping.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn max_hits(&self) -> i64 {
        self.max_hits
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Like [`allow_with_context`], with a fresh background context.
    ///
    /// [`allow_with_context`]: ClusterLimiter::allow_with_context
    pub async fn allow(&self, clear_text: &str) -> bool {
        self.allow_with_context(&CallContext::background(), clear_text)
            .await
    }

    /// Whether one more hit for `clear_text` is admitted cluster-wide.
    ///
    /// A denied request costs a `ZREMRANGEBYSCORE` and a `ZCARD` round trip;
    /// an admitted one additionally pays `ZADD` and `EXPIRE`. The ops within
    /// one call are serial but not atomic as a group, which is where the
    /// eventual consistency comes from.
    pub async fn allow_with_context(&self, cx: &CallContext, clear_text: &str) -> bool {
        let start = Instant::now();
        let (allowed, failed) = self.check_and_record(cx, clear_text).await;
        self.measure_query(ALLOW_QUERY, failed, start);
        allowed
    }

    async fn check_and_record(&self, cx: &CallContext, clear_text: &str) -> (bool, bool) {
        self.metrics
            .inc_counter(&format!("{REDIS_METRICS_PREFIX}total"));
        let key = self.prefix_key(clear_text);

        let now = self.clock.now();
        let now_nanos = unix_nanos(now);
        let clear_before = now_nanos - self.window.as_nanos() as i64;

        let mut query_failure = false;
        let count = match self.allow_check_card(cx, &key, clear_before).await {
            Ok(count) => Some(count),
            Err(e) => {
                error!(error = %e, group = %self.group, "failed to get bucket cardinality");
                query_failure = true;
                // still record the hit below; serve rather than deny on
                // infrastructure faults
                None
            }
        };

        if let Some(count) = count {
            if count >= self.max_hits {
                self.metrics
                    .inc_counter(&format!("{REDIS_METRICS_PREFIX}forbids"));
                debug!(
                    count,
                    max_hits = self.max_hits,
                    group = %self.group,
                    "denying request above the window ceiling"
                );
                return (false, query_failure);
            }
        }

        let span = self.spans.start(cx, ALLOW_ADD_SPAN);
        let added = self
            .ring
            .zadd(cx, &key, now_nanos as f64, &now_nanos.to_string())
            .await;
        span.finish(added.is_err());
        if let Err(e) = added {
            error!(error = %e, group = %self.group, "failed to record the hit, proceeding to refresh the ttl");
            query_failure = true;
        }

        let span = self.spans.start(cx, ALLOW_EXPIRE_SPAN);
        let expired = self
            .ring
            .expire(cx, &key, self.window + Duration::from_secs(1))
            .await;
        span.finish(expired.is_err());
        if let Err(e) = expired {
            error!(error = %e, group = %self.group, "failed to refresh the bucket ttl");
            return (true, true);
        }

        self.metrics
            .inc_counter(&format!("{REDIS_METRICS_PREFIX}allows"));
        (true, query_failure)
    }

    async fn allow_check_card(&self, cx: &CallContext, key: &str, clear_before: i64) -> Result<i64> {
        // drop everything that slid out of the window before counting
        let span = self.spans.start(cx, ALLOW_CHECK_REM_RANGE_SPAN);
        let pruned = self
            .ring
            .zrem_range_by_score(cx, key, 0.0, clear_before as f64)
            .await;
        span.finish(pruned.is_err());
        pruned?;

        let span = self.spans.start(cx, ALLOW_CHECK_SPAN);
        let counted = self.ring.zcard(cx, key).await;
        span.finish(counted.is_err());
        counted
    }

    /// Like [`oldest_with_context`], with a fresh background context.
    ///
    /// [`oldest_with_context`]: ClusterLimiter::oldest_with_context
    pub async fn oldest(&self, clear_text: &str) -> Option<SystemTime> {
        self.oldest_with_context(&CallContext::background(), clear_text)
            .await
    }

    /// Timestamp of the earliest retained hit for `clear_text`, or `None`
    /// when the bucket is empty or cannot be read. Costs one
    /// `ZRANGEBYSCORE` limited to a single entry.
    pub async fn oldest_with_context(
        &self,
        cx: &CallContext,
        clear_text: &str,
    ) -> Option<SystemTime> {
        match self.oldest_entry(cx, clear_text).await {
            Ok(t) => t,
            Err(e) => {
                error!(error = %e, group = %self.group, "failed to get the oldest known request time");
                None
            }
        }
    }

    async fn oldest_entry(&self, cx: &CallContext, clear_text: &str) -> Result<Option<SystemTime>> {
        let key = self.prefix_key(clear_text);
        let now_nanos = unix_nanos(self.clock.now());

        let span = self.spans.start(cx, OLDEST_SCORE_SPAN);
        let entries = match self
            .ring
            .zrange_by_score_with_scores(cx, &key, 0.0, now_nanos as f64, 0, 1)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                span.finish(true);
                return Err(e);
            }
        };

        let Some((member, _score)) = entries.into_iter().next() else {
            span.finish(false);
            return Ok(None);
        };

        match member.parse::<i64>() {
            Ok(nanos) if nanos >= 0 => {
                span.finish(false);
                Ok(Some(UNIX_EPOCH + Duration::from_nanos(nanos as u64)))
            }
            _ => {
                span.finish(true);
                Err(LimitError::MalformedEntry(member))
            }
        }
    }

    async fn delta_from(
        &self,
        cx: &CallContext,
        clear_text: &str,
        from: SystemTime,
    ) -> Result<TimeDelta> {
        let oldest = self
            .oldest_entry(cx, clear_text)
            .await?
            .unwrap_or(UNIX_EPOCH);

        let gap = signed_since(from, oldest);
        let window = TimeDelta::from_std(self.window).unwrap_or(TimeDelta::MAX);
        Ok(window - gap)
    }

    /// Like [`delta_with_context`], with a fresh background context.
    ///
    /// [`delta_with_context`]: ClusterLimiter::delta_with_context
    pub async fn delta(&self, clear_text: &str) -> TimeDelta {
        self.delta_with_context(&CallContext::background(), clear_text)
            .await
    }

    /// Signed duration until the next call is allowed; zero or negative means
    /// immediately. Query failures map to zero, which is the gentler answer
    /// for client applications.
    pub async fn delta_with_context(&self, cx: &CallContext, clear_text: &str) -> TimeDelta {
        let now = self.clock.now();
        match self.delta_from(cx, clear_text, now).await {
            Ok(delta) => delta,
            Err(e) => {
                error!(error = %e, group = %self.group, "failed to get the duration until the next call is allowed");
                TimeDelta::zero()
            }
        }
    }

    /// Like [`retry_after_with_context`], with a fresh background context.
    ///
    /// [`retry_after_with_context`]: ClusterLimiter::retry_after_with_context
    pub async fn retry_after(&self, clear_text: &str) -> u64 {
        self.retry_after_with_context(&CallContext::background(), clear_text)
            .await
    }

    /// Seconds a denied client should wait before retrying. Never less than
    /// one, and one more than the remaining window would suggest: the
    /// cluster-wide count is eventually consistent, and a client that comes
    /// back exactly when its own math says the window closes tends to get
    /// denied again by an instance that has not observed the pruning yet.
    pub async fn retry_after_with_context(&self, cx: &CallContext, clear_text: &str) -> u64 {
        const MIN_WAIT_SECS: u64 = 1;

        let start = Instant::now();
        let now = self.clock.now();
        match self.delta_from(cx, clear_text, now).await {
            Ok(delta) => {
                self.measure_query(RETRY_AFTER_QUERY, false, start);
                let secs = delta.num_seconds();
                if secs > 0 {
                    secs as u64 + 1
                } else {
                    MIN_WAIT_SECS
                }
            }
            Err(e) => {
                error!(error = %e, group = %self.group, "failed to get the duration to wait for the next request");
                self.measure_query(RETRY_AFTER_QUERY, true, start);
                MIN_WAIT_SECS
            }
        }
    }

    /// No-op, present for interface uniformity with the in-process limiters.
    /// The window is materialized through bucket ttls and the ceiling is
    /// fixed per instance; resizing would invalidate every in-flight bucket.
    pub fn resize(&self, _max_hits: i64) {}

    /// No-op: the limiter shares the ring with every other limiter and does
    /// not own it. Teardown belongs to the ring supervisor.
    pub fn close(&self) {}

    fn prefix_key(&self, clear_text: &str) -> String {
        format!("ratelimit-{}-{}", self.group, hashed_key(clear_text))
    }

    fn measure_query(&self, query: &str, failed: bool, start: Instant) {
        let result = if failed { "failure" } else { "success" };
        let key = if self.group.is_empty() {
            format!("{REDIS_METRICS_PREFIX}query.{query}.{result}")
        } else {
            format!("{REDIS_METRICS_PREFIX}query.{query}.{result}.{}", self.group)
        };
        self.metrics.measure_since(&key, start);
    }
}

fn signed_since(later: SystemTime, earlier: SystemTime) -> TimeDelta {
    match later.duration_since(earlier) {
        Ok(d) => TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX),
        Err(e) => TimeDelta::from_std(e.duration())
            .map(|d| -d)
            .unwrap_or(TimeDelta::MIN),
    }
}
