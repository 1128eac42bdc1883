use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{cmd, RedisError};
use deadpool_redis::{Connection, Pool, PoolConfig, PoolError, Runtime};
use tracing::{debug, warn};

use super::{PoolStats, RingCommands};
use crate::config::RedisOptions;
use crate::context::CallContext;
use crate::error::{LimitError, Result};
use crate::hash::fingerprint64;

/// Upper bound on establishing a fresh shard connection. Socket reads and
/// writes are bounded separately by the configured op timeouts.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

struct Shard {
    name: String,
    pool: Pool,
}

/// Sharded redis client. Each key maps to exactly one shard; shards are
/// named `redis0, redis1, …` in configuration order and each one is backed
/// by its own connection pool.
pub struct RedisRing {
    shards: Vec<Shard>,
    read_timeout: Duration,
    write_timeout: Duration,
    closed: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    timeouts: AtomicU64,
    stale_conns: AtomicU64,
}

impl RedisRing {
    /// Build the shard pools and pre-warm `min_idle_conns` connections per
    /// shard. Does not verify reachability; callers probe with [`ping`]
    /// (the supervisor does so under backoff).
    ///
    /// [`ping`]: RingCommands::ping
    pub async fn connect(options: &RedisOptions) -> Result<Self> {
        if options.addrs.is_empty() {
            return Err(LimitError::Config(
                "At least one redis shard address is required".to_string(),
            ));
        }

        let mut shards = Vec::with_capacity(options.addrs.len());
        for (idx, addr) in options.addrs.iter().enumerate() {
            let name = format!("redis{idx}");
            let url = if addr.contains("://") {
                addr.clone()
            } else {
                format!("redis://{addr}")
            };

            let mut cfg = deadpool_redis::Config::from_url(url);
            let mut pool_cfg = PoolConfig::new(options.max_idle_conns.max(1));
            pool_cfg.timeouts.wait = Some(options.pool_timeout());
            pool_cfg.timeouts.create = Some(CONNECT_TIMEOUT);
            pool_cfg.timeouts.recycle = Some(options.pool_timeout());
            cfg.pool = Some(pool_cfg);

            let pool = cfg
                .create_pool(Some(Runtime::Tokio1))
                .map_err(|e| LimitError::Config(format!("Failed to build pool for {name}: {e}")))?;

            debug!(shard = %name, %addr, "configured redis shard");
            shards.push(Shard { name, pool });
        }

        let ring = Self {
            shards,
            read_timeout: options.read_timeout(),
            write_timeout: options.write_timeout(),
            closed: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            stale_conns: AtomicU64::new(0),
        };
        ring.prewarm(options.min_idle_conns).await;

        Ok(ring)
    }

    async fn prewarm(&self, min_idle: usize) {
        for shard in &self.shards {
            let mut held = Vec::with_capacity(min_idle);
            for _ in 0..min_idle {
                match shard.pool.get().await {
                    Ok(conn) => held.push(conn),
                    Err(e) => {
                        debug!(shard = %shard.name, error = %e, "pre-warming stopped early");
                        break;
                    }
                }
            }
            // dropping the guards returns the connections to the pool
        }
    }

    fn shard_for(&self, key: &str) -> &Shard {
        let idx = (fingerprint64(key) % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    async fn checkout(&self, shard: &Shard) -> Result<Connection> {
        let available = shard.pool.status().available;
        match shard.pool.get().await {
            Ok(conn) => {
                if available > 0 {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                }
                Ok(conn)
            }
            Err(PoolError::Timeout(_)) => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(shard = %shard.name, "timed out waiting for a redis connection");
                Err(LimitError::Timeout)
            }
            Err(e) => Err(LimitError::Pool(e.to_string())),
        }
    }

    /// Run one command under the per-op timeout, aborting early when the
    /// caller cancels. A timed-out op counts against the ring's timeout
    /// stat and surfaces as a transport failure.
    async fn run<T>(
        &self,
        cx: &CallContext,
        op_timeout: Duration,
        fut: impl Future<Output = std::result::Result<T, RedisError>>,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = cx.cancelled() => Err(LimitError::Canceled),
            res = tokio::time::timeout(op_timeout, fut) => match res {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(LimitError::Redis(e)),
                Err(_) => {
                    self.timeouts.fetch_add(1, Ordering::Relaxed);
                    Err(LimitError::Timeout)
                }
            },
        }
    }

    /// A connection that timed out, was canceled mid-command or hit an i/o
    /// error may hold half-written protocol state; take it out of the pool
    /// instead of returning it.
    fn retire<T>(&self, res: &Result<T>, conn: Connection) {
        let broken = match res {
            Err(LimitError::Timeout) | Err(LimitError::Canceled) => true,
            Err(LimitError::Redis(e)) => e.is_io_error(),
            _ => false,
        };
        if broken {
            self.stale_conns.fetch_add(1, Ordering::Relaxed);
            drop(Connection::take(conn));
        }
    }
}

#[async_trait]
impl RingCommands for RedisRing {
    async fn zadd(&self, cx: &CallContext, key: &str, score: f64, member: &str) -> Result<()> {
        let shard = self.shard_for(key);
        let mut conn = self.checkout(shard).await?;
        let res: Result<()> = self
            .run(cx, self.write_timeout, async {
                cmd("ZADD")
                    .arg(key)
                    .arg(score)
                    .arg(member)
                    .query_async(&mut conn)
                    .await
            })
            .await;
        self.retire(&res, conn);
        res
    }

    async fn zcard(&self, cx: &CallContext, key: &str) -> Result<i64> {
        let shard = self.shard_for(key);
        let mut conn = self.checkout(shard).await?;
        let res: Result<i64> = self
            .run(cx, self.read_timeout, async {
                cmd("ZCARD").arg(key).query_async(&mut conn).await
            })
            .await;
        self.retire(&res, conn);
        res
    }

    async fn zrem_range_by_score(
        &self,
        cx: &CallContext,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<()> {
        let shard = self.shard_for(key);
        let mut conn = self.checkout(shard).await?;
        let res: Result<()> = self
            .run(cx, self.write_timeout, async {
                cmd("ZREMRANGEBYSCORE")
                    .arg(key)
                    .arg(min)
                    .arg(max)
                    .query_async(&mut conn)
                    .await
            })
            .await;
        self.retire(&res, conn);
        res
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
        let shard = self.shard_for(key);
        let mut conn = self.checkout(shard).await?;
        let res: Result<Vec<(String, f64)>> = self
            .run(cx, self.read_timeout, async {
                cmd("ZRANGEBYSCORE")
                    .arg(key)
                    .arg(min)
                    .arg(max)
                    .arg("WITHSCORES")
                    .arg("LIMIT")
                    .arg(offset)
                    .arg(count)
                    .query_async(&mut conn)
                    .await
            })
            .await;
        self.retire(&res, conn);
        res
    }

    async fn expire(&self, cx: &CallContext, key: &str, ttl: Duration) -> Result<()> {
        let shard = self.shard_for(key);
        let mut conn = self.checkout(shard).await?;
        let res: Result<()> = self
            .run(cx, self.write_timeout, async {
                cmd("EXPIRE")
                    .arg(key)
                    .arg(ttl.as_secs() as i64)
                    .query_async(&mut conn)
                    .await
            })
            .await;
        self.retire(&res, conn);
        res
    }

    async fn ping(&self) -> Result<()> {
        let cx = CallContext::background();
        for shard in &self.shards {
            let mut conn = self.checkout(shard).await?;
            let res: Result<String> = self
                .run(&cx, self.read_timeout, async {
                    cmd("PING").query_async(&mut conn).await
                })
                .await;
            self.retire(&res, conn);
            res?;
        }
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for shard in &self.shards {
            shard.pool.close();
        }
        debug!("redis ring closed");
    }

    fn pool_stats(&self) -> PoolStats {
        let mut total_conns = 0u64;
        let mut idle_conns = 0u64;
        if !self.closed.load(Ordering::SeqCst) {
            for shard in &self.shards {
                let status = shard.pool.status();
                total_conns += u64::try_from(status.size).unwrap_or(0);
                idle_conns += u64::try_from(status.available).unwrap_or(0);
            }
        }

        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            idle_conns,
            stale_conns: self.stale_conns.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            total_conns,
        }
    }
}
