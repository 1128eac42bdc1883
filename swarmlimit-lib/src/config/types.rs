use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub redis: RedisOptions,
    /// Rate limit rules, one per group. The empty group is legal and selects
    /// the ungrouped metric names.
    #[serde(default)]
    pub limits: Vec<LimitSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), show_target: false }
    }
}

/// Configuration for the sharded redis ring.
#[derive(Debug, Deserialize, Clone)]
pub struct RedisOptions {
    /// Redis shard addresses; shards are named `redis0, redis1, …` in input
    /// order. One shard is fine, more spread the buckets.
    pub addrs: Vec<String>,
    /// Timeout for redis reads in milliseconds
    /// Default: 25
    #[serde(default = "default_op_timeout")]
    pub read_timeout_ms: u64,
    /// Timeout for redis writes in milliseconds
    /// Default: 25
    #[serde(default = "default_op_timeout")]
    pub write_timeout_ms: u64,
    /// Max time to wait for a connection from the pool in milliseconds
    /// Default: 25
    #[serde(default = "default_op_timeout")]
    pub pool_timeout_ms: u64,
    /// Connections opened per shard ahead of traffic
    /// Default: 100
    #[serde(default = "default_idle_conns")]
    pub min_idle_conns: usize,
    /// Upper bound on connections per shard
    /// Default: 100
    #[serde(default = "default_idle_conns")]
    pub max_idle_conns: usize,
    /// How often pool statistics are exported as gauges, in seconds
    /// Default: 60 (also used when set to 0)
    #[serde(default = "default_conn_metrics_interval")]
    pub conn_metrics_interval_secs: u64,
}

impl RedisOptions {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_timeout_ms)
    }

    pub fn conn_metrics_interval(&self) -> Duration {
        if self.conn_metrics_interval_secs == 0 {
            Duration::from_secs(default_conn_metrics_interval())
        } else {
            Duration::from_secs(self.conn_metrics_interval_secs)
        }
    }
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            addrs: Vec::new(),
            read_timeout_ms: default_op_timeout(),
            write_timeout_ms: default_op_timeout(),
            pool_timeout_ms: default_op_timeout(),
            min_idle_conns: default_idle_conns(),
            max_idle_conns: default_idle_conns(),
            conn_metrics_interval_secs: default_conn_metrics_interval(),
        }
    }
}

/// One rate limit rule. `group` has to be the same on every proxy instance
/// sharing the rule, otherwise the instances count against separate buckets.
#[derive(Debug, Deserialize, Clone)]
pub struct LimitSettings {
    #[serde(default)]
    pub group: String,
    /// Admissions allowed within one window
    pub max_hits: i64,
    /// Sliding window length in seconds
    pub window_secs: u64,
}

impl LimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_op_timeout() -> u64 {
    25
}

fn default_idle_conns() -> usize {
    100
}

fn default_conn_metrics_interval() -> u64 {
    60
}
