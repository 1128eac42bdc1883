#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use swarmlimit_lib::config::load_from_path;
use swarmlimit_lib::{
    init_metrics, ClusterLimiter, Metrics, NoopMetrics, RingSupervisor, Settings,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Query the cluster rate limiter on a sharded redis ring")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", default_value = "swarmlimit.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether one more hit for the key would be admitted right now
    Allow {
        /// Rate limit group the key is checked against
        #[arg(short, long, default_value = "")]
        group: String,
        key: String,
    },
    /// Seconds a denied client should wait before retrying
    RetryAfter {
        #[arg(short, long, default_value = "")]
        group: String,
        key: String,
    },
    /// Timestamp of the earliest retained hit for the key
    Oldest {
        #[arg(short, long, default_value = "")]
        group: String,
        key: String,
    },
}

impl Command {
    fn group_and_key(&self) -> (&str, &str) {
        match self {
            Command::Allow { group, key }
            | Command::RetryAfter { group, key }
            | Command::Oldest { group, key } => (group, key),
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let cfg = match load_from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    info!(
        shards = cfg.redis.addrs.len(),
        limits = cfg.limits.len(),
        "configuration loaded"
    );

    let metrics: Arc<dyn Metrics> = match init_metrics() {
        Ok((metrics, _registry)) => Arc::new(metrics),
        Err(err) => {
            warn!(%err, "metrics exporter unavailable, continuing without");
            Arc::new(NoopMetrics)
        }
    };

    let Some(supervisor) = RingSupervisor::connect(&cfg.redis, metrics.clone()).await else {
        error!("redis ring is unreachable, no rate limiting available");
        std::process::exit(1);
    };

    let (group, key) = cli.command.group_and_key();
    let Some(settings) = cfg.limits.iter().find(|l| l.group == group) else {
        error!(group, "no rate limit rule configured for group");
        supervisor.shutdown().await;
        std::process::exit(1);
    };

    let limiter = ClusterLimiter::new(Settings::from(settings), supervisor.ring(), metrics);

    match &cli.command {
        Command::Allow { .. } => println!("{}", limiter.allow(key).await),
        Command::RetryAfter { .. } => println!("{}", limiter.retry_after(key).await),
        Command::Oldest { .. } => match limiter.oldest(key).await {
            Some(t) => println!("{}", chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339()),
            None => println!("none"),
        },
    }

    supervisor.shutdown().await;
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
