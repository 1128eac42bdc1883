use thiserror::Error;

/// Errors surfaced by the ring and the limiter internals.
///
/// None of these escape the limiter's public query surface: every failure is
/// converted into a conservative answer (admit, or a one second retry-after)
/// plus a failure-labeled metric.
#[derive(Error, Debug)]
pub enum LimitError {
    #[error("redis command failed: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("redis pool error: {0}")]
    Pool(String),

    #[error("redis operation timed out")]
    Timeout,

    #[error("operation canceled")]
    Canceled,

    #[error("malformed bucket entry: {0:?}")]
    MalformedEntry(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LimitError>;
