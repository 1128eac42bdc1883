use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{RedisRing, RingCommands};
use crate::config::RedisOptions;
use crate::telemetry::{Metrics, REDIS_METRICS_PREFIX};

const PING_MAX_RETRIES: u32 = 7;
const PING_BACKOFF_START: Duration = Duration::from_millis(500);
const PING_BACKOFF_CAP: Duration = Duration::from_secs(8);

/// Exclusive owner of the redis ring.
///
/// Construction probes connectivity and refuses to hand out a supervisor for
/// an unreachable ring; callers must treat `None` as "no limiter available"
/// and degrade accordingly. While running, one background task periodically
/// exports the ring's pool statistics as gauges. Raising shutdown stops the
/// exporter and closes the ring, after which in-flight limiter calls observe
/// transport errors and fail open.
pub struct RingSupervisor {
    ring: Arc<dyn RingCommands>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RingSupervisor {
    /// Build the ring from `options` and start supervising it.
    pub async fn connect(options: &RedisOptions, metrics: Arc<dyn Metrics>) -> Option<Self> {
        let ring: Arc<dyn RingCommands> = match RedisRing::connect(options).await {
            Ok(ring) => Arc::new(ring),
            Err(e) => {
                error!(error = %e, "failed to configure redis ring");
                return None;
            }
        };
        Self::start(ring, options.conn_metrics_interval(), metrics).await
    }

    /// Probe the ring with `PING` under exponential backoff and, once it is
    /// reachable, spawn the pool-stats exporter. Yields `None` when the ring
    /// stays unreachable, closing it on the way out.
    pub async fn start(
        ring: Arc<dyn RingCommands>,
        conn_metrics_interval: Duration,
        metrics: Arc<dyn Metrics>,
    ) -> Option<Self> {
        let mut delay = PING_BACKOFF_START;
        let mut attempt = 0u32;
        loop {
            match ring.ping().await {
                Ok(()) => break,
                Err(e) if attempt < PING_MAX_RETRIES => {
                    info!(error = %e, attempt, "failed to ping redis, retrying with backoff");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(PING_BACKOFF_CAP);
                    attempt += 1;
                }
                Err(e) => {
                    error!(error = %e, "failed to connect to redis");
                    ring.close().await;
                    return None;
                }
            }
        }
        debug!("redis ring is reachable");

        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(export_conn_metrics(
            ring.clone(),
            conn_metrics_interval,
            metrics,
            shutdown.clone(),
        ));

        Some(Self {
            ring,
            shutdown,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Shared non-owning handle for building limiters.
    pub fn ring(&self) -> Arc<dyn RingCommands> {
        self.ring.clone()
    }

    /// Stop the stats exporter and close the ring. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for RingSupervisor {
    fn drop(&mut self) {
        // the exporter observes the cancellation and closes the ring
        self.shutdown.cancel();
    }
}

async fn export_conn_metrics(
    ring: Arc<dyn RingCommands>,
    interval: Duration,
    metrics: Arc<dyn Metrics>,
    shutdown: CancellationToken,
) {
    let interval = if interval.is_zero() {
        Duration::from_secs(60)
    } else {
        interval
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately; consume it so the first export
    // happens one full interval after startup
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                ring.close().await;
                return;
            }
            _ = ticker.tick() => {
                if shutdown.is_cancelled() {
                    // raced with shutdown; never publish stats for a closed ring
                    continue;
                }
                let stats = ring.pool_stats();
                metrics.update_gauge(&format!("{REDIS_METRICS_PREFIX}hits"), stats.hits as f64);
                metrics.update_gauge(&format!("{REDIS_METRICS_PREFIX}idleconns"), stats.idle_conns as f64);
                metrics.update_gauge(&format!("{REDIS_METRICS_PREFIX}misses"), stats.misses as f64);
                metrics.update_gauge(&format!("{REDIS_METRICS_PREFIX}staleconns"), stats.stale_conns as f64);
                metrics.update_gauge(&format!("{REDIS_METRICS_PREFIX}timeouts"), stats.timeouts as f64);
                metrics.update_gauge(&format!("{REDIS_METRICS_PREFIX}totalconns"), stats.total_conns as f64);
            }
        }
    }
}
