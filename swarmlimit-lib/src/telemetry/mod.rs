pub mod metrics;
mod trace;

pub use metrics::{init_metrics, Metrics, NoopMetrics, OtelMetrics, REDIS_METRICS_PREFIX};
pub(crate) use trace::QuerySpans;
