use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::error::{LimitError, Result};

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| LimitError::Config(format!("Failed to read config file: {e}")))?;
    let cfg: Config = toml::from_str(&txt)
        .map_err(|e| LimitError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.redis.addrs.is_empty() {
        return Err(LimitError::Config(
            "At least one redis shard address is required".to_string(),
        ));
    }

    if cfg.redis.max_idle_conns == 0 {
        return Err(LimitError::Config(
            "max_idle_conns must be at least 1".to_string(),
        ));
    }

    for limit in &cfg.limits {
        if limit.max_hits <= 0 {
            return Err(LimitError::Config(format!(
                "Rate limit group {:?} must allow at least one hit",
                limit.group
            )));
        }
        if limit.window_secs == 0 {
            return Err(LimitError::Config(format!(
                "Rate limit group {:?} needs a non-zero window",
                limit.group
            )));
        }
    }

    Ok(())
}
