use std::path::PathBuf;

use anyhow::{Context as _, Result};
use validator::Validate;

/// Service-level configuration, sourced from the environment at startup.
/// Per-run resource limits live in [`crate::limits`] and are re-read per
/// request so operators can tune them without a restart.
#[derive(Debug, Clone, Validate)]
pub struct Config {
    pub bind: String,

    #[validate(length(min = 1))]
    pub database_url: String,

    #[validate(range(min = 1, max = 64))]
    pub workers: usize,

    #[validate(range(min = 1, max = 1024))]
    pub queue_size: usize,

    /// Budget for one whole evaluation (compile + all tests).
    #[validate(range(min = 100, max = 600_000))]
    pub global_timeout_ms: u64,

    /// Per-test wall-clock deadline.
    #[validate(range(min = 100, max = 60_000))]
    pub exec_limit_ms: u64,

    #[validate(range(min = 1))]
    pub max_code_bytes: usize,

    pub go_helper_path: PathBuf,
}

pub const DEFAULT_EXEC_LIMIT_MS: u64 = 1000;

impl Config {
    pub fn from_env() -> Result<Config> {
        let workers = env_usize("RUNNER_WORKERS", 4).max(1);
        let config = Config {
            bind: env_string("RUNNER_BIND", "0.0.0.0:9000"),
            database_url: std::env::var("DATABASE_URL").unwrap_or_default(),
            workers,
            queue_size: env_usize("RUNNER_QUEUE_SIZE", workers * 4).max(1),
            global_timeout_ms: env_u64("RUNNER_GLOBAL_TIMEOUT_MS", 5000),
            exec_limit_ms: DEFAULT_EXEC_LIMIT_MS,
            max_code_bytes: env_usize("MAX_CODE_BYTES", 131_072),
            go_helper_path: PathBuf::from(env_string(
                "GO_HELPER_PATH",
                "/usr/local/bin/go-helper",
            )),
        };
        config.validate().context("invalid runner configuration")?;
        Ok(config)
    }
}

pub(crate) fn env_string(key: &str, fallback: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_owned(),
        _ => fallback.to_owned(),
    }
}

pub(crate) fn env_u64(key: &str, fallback: u64) -> u64 {
    match std::env::var(key) {
        Ok(v) => v.trim().parse().ok().filter(|&n| n > 0).unwrap_or(fallback),
        _ => fallback,
    }
}

pub(crate) fn env_usize(key: &str, fallback: usize) -> usize {
    match std::env::var(key) {
        Ok(v) => v.trim().parse().ok().filter(|&n| n > 0).unwrap_or(fallback),
        _ => fallback,
    }
}
