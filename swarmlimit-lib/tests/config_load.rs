use std::io::Write;
use std::time::Duration;

use swarmlimit_lib::config::load_from_path;
use tempfile::NamedTempFile;

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[test]
fn loads_valid_file_with_defaults() -> TestResult {
    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        r#"
[redis]
addrs = ["127.0.0.1:6379", "127.0.0.1:6380"]

[[limits]]
group = "login"
max_hits = 10
window_secs = 60
"#
    )?;

    let cfg = load_from_path(file.path())?;

    assert_eq!(cfg.redis.addrs.len(), 2);
    assert_eq!(cfg.redis.read_timeout(), Duration::from_millis(25));
    assert_eq!(cfg.redis.write_timeout(), Duration::from_millis(25));
    assert_eq!(cfg.redis.pool_timeout(), Duration::from_millis(25));
    assert_eq!(cfg.redis.min_idle_conns, 100);
    assert_eq!(cfg.redis.max_idle_conns, 100);
    assert_eq!(cfg.redis.conn_metrics_interval(), Duration::from_secs(60));

    assert_eq!(cfg.limits.len(), 1);
    assert_eq!(cfg.limits[0].group, "login");
    assert_eq!(cfg.limits[0].max_hits, 10);
    assert_eq!(cfg.limits[0].window(), Duration::from_secs(60));

    assert_eq!(cfg.logging.level, "info");
    assert!(!cfg.logging.show_target);

    Ok(())
}

#[test]
fn explicit_values_override_defaults() -> TestResult {
    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        r#"
[logging]
level = "debug"
show_target = true

[redis]
addrs = ["redis-0.internal:6379"]
read_timeout_ms = 50
write_timeout_ms = 75
pool_timeout_ms = 100
min_idle_conns = 10
max_idle_conns = 20
conn_metrics_interval_secs = 5
"#
    )?;

    let cfg = load_from_path(file.path())?;

    assert_eq!(cfg.logging.level, "debug");
    assert!(cfg.logging.show_target);
    assert_eq!(cfg.redis.read_timeout(), Duration::from_millis(50));
    assert_eq!(cfg.redis.write_timeout(), Duration::from_millis(75));
    assert_eq!(cfg.redis.pool_timeout(), Duration::from_millis(100));
    assert_eq!(cfg.redis.min_idle_conns, 10);
    assert_eq!(cfg.redis.max_idle_conns, 20);
    assert_eq!(cfg.redis.conn_metrics_interval(), Duration::from_secs(5));

    Ok(())
}

#[test]
fn zero_metrics_interval_falls_back_to_default() -> TestResult {
    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        r#"
[redis]
addrs = ["127.0.0.1:6379"]
conn_metrics_interval_secs = 0
"#
    )?;

    let cfg = load_from_path(file.path())?;
    assert_eq!(cfg.redis.conn_metrics_interval(), Duration::from_secs(60));

    Ok(())
}

#[test]
fn rejects_missing_shard_addresses() -> TestResult {
    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        r#"
[redis]
addrs = []
"#
    )?;

    let err = load_from_path(file.path()).expect_err("empty addrs must not validate");
    assert!(err.to_string().contains("redis shard address"));

    Ok(())
}

#[test]
fn rejects_non_positive_ceiling() -> TestResult {
    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        r#"
[redis]
addrs = ["127.0.0.1:6379"]

[[limits]]
group = "api"
max_hits = 0
window_secs = 10
"#
    )?;

    let err = load_from_path(file.path()).expect_err("zero ceiling must not validate");
    assert!(err.to_string().contains("api"));

    Ok(())
}

#[test]
fn rejects_zero_window() -> TestResult {
    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        r#"
[redis]
addrs = ["127.0.0.1:6379"]

[[limits]]
group = "api"
max_hits = 5
window_secs = 0
"#
    )?;

    let err = load_from_path(file.path()).expect_err("zero window must not validate");
    assert!(err.to_string().contains("window"));

    Ok(())
}

#[test]
fn rejects_unreadable_file() {
    let err = load_from_path("/definitely/not/here.toml").expect_err("missing file must error");
    assert!(err.to_string().contains("Failed to read config file"));
}
