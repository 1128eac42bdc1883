#![forbid(unsafe_code)]

//! Cluster-wide sliding-window rate limiting backed by a sharded redis ring.
//!
//! Many stateless proxy instances consult the same limiter state; coordination
//! happens entirely inside redis through per-key sorted sets, so no instance
//! holds authoritative state and no process-local locks are taken. The
//! [`RingSupervisor`] owns the ring for the whole process, while any number of
//! [`ClusterLimiter`] instances (one per configured rule) share non-owning
//! handles to it.

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod hash;
pub mod limiter;
pub mod ring;
pub mod telemetry;

pub use clock::{Clock, SystemClock};
pub use context::CallContext;
pub use error::{LimitError, Result};
pub use limiter::{ClusterLimiter, Settings};
pub use ring::{PoolStats, RedisRing, RingCommands, RingSupervisor};
pub use telemetry::{init_metrics, Metrics, NoopMetrics, OtelMetrics};
