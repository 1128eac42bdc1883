use std::time::Instant;

use dashmap::DashMap;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;

pub const REDIS_METRICS_PREFIX: &str = "swarm.redis.";

/// Sink for the limiter's counters, gauges and timers, addressed by dotted
/// string keys. Implementations must be thread-safe and must not block the
/// request path.
pub trait Metrics: Send + Sync {
    fn inc_counter(&self, key: &str);
    fn update_gauge(&self, key: &str, value: f64);
    fn measure_since(&self, key: &str, start: Instant);
}

/// [`Metrics`] over an OpenTelemetry meter. Instruments are created on first
/// use and cached, since the limiter addresses them by dynamically built
/// names (the group lands in the key).
pub struct OtelMetrics {
    meter: Meter,
    counters: DashMap<String, Counter<u64>>,
    gauges: DashMap<String, Gauge<f64>>,
    timers: DashMap<String, Histogram<f64>>,
}

impl OtelMetrics {
    pub fn new(meter: Meter) -> Self {
        Self {
            meter,
            counters: DashMap::new(),
            gauges: DashMap::new(),
            timers: DashMap::new(),
        }
    }
}

impl Metrics for OtelMetrics {
    fn inc_counter(&self, key: &str) {
        self.counters
            .entry(key.to_owned())
            .or_insert_with(|| self.meter.u64_counter(key.to_owned()).build())
            .add(1, &[]);
    }

    fn update_gauge(&self, key: &str, value: f64) {
        self.gauges
            .entry(key.to_owned())
            .or_insert_with(|| self.meter.f64_gauge(key.to_owned()).build())
            .record(value, &[]);
    }

    fn measure_since(&self, key: &str, start: Instant) {
        self.timers
            .entry(key.to_owned())
            .or_insert_with(|| {
                self.meter
                    .f64_histogram(key.to_owned())
                    .with_unit("s")
                    .build()
            })
            .record(start.elapsed().as_secs_f64(), &[]);
    }
}

/// [`Metrics`] that drops everything, for callers that opt out of metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn inc_counter(&self, _key: &str) {}
    fn update_gauge(&self, _key: &str, _value: f64) {}
    fn measure_since(&self, _key: &str, _start: Instant) {}
}

/// Initialize the process-wide meter provider with a prometheus exporter and
/// return a sink backed by it together with the registry to scrape.
pub fn init_metrics() -> Result<(OtelMetrics, Registry), Box<dyn std::error::Error + Send + Sync>> {
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;

    let meter_provider = SdkMeterProvider::builder()
        .with_reader(exporter)
        .build();

    global::set_meter_provider(meter_provider);

    let meter = global::meter("swarmlimit");

    Ok((OtelMetrics::new(meter), registry))
}
