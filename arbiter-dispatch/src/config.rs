use anyhow::{Context as _, Result};
use validator::Validate;

#[derive(Debug, Clone, Validate)]
pub struct Config {
    #[validate(length(min = 1))]
    pub database_url: String,

    #[validate(length(min = 1))]
    pub runner_url: String,

    #[validate(range(min = 1000, max = 600_000))]
    pub http_timeout_ms: u64,

    #[validate(range(min = 1, max = 64))]
    pub concurrency: usize,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        let config = Config {
            database_url: std::env::var("DATABASE_URL").unwrap_or_default(),
            runner_url: env_string("RUNNER_URL", "http://runner:9000"),
            http_timeout_ms: env_u64("RUNNER_HTTP_TIMEOUT_MS", 40_000),
            concurrency: worker_concurrency(),
        };
        config.validate().context("invalid dispatcher configuration")?;
        Ok(config)
    }
}

fn worker_concurrency() -> usize {
    if let Ok(v) = std::env::var("WORKER_CONCURRENCY") {
        if let Ok(n) = v.trim().parse::<usize>() {
            if n > 0 {
                return n;
            }
        }
    }
    let ncpu = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    default_concurrency(ncpu)
}

/// Light parallelism by default; the sandbox behind the runner is the
/// bottleneck.
pub fn default_concurrency(ncpu: usize) -> usize {
    ncpu.clamp(1, 2)
}

fn env_string(key: &str, fallback: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_owned(),
        _ => fallback.to_owned(),
    }
}

fn env_u64(key: &str, fallback: u64) -> u64 {
    match std::env::var(key) {
        Ok(v) => v.trim().parse().ok().filter(|&n| n > 0).unwrap_or(fallback),
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::default_concurrency;

    #[test]
    fn concurrency_is_capped_at_two() {
        assert_eq!(default_concurrency(1), 1);
        assert_eq!(default_concurrency(2), 2);
        assert_eq!(default_concurrency(16), 2);
        assert_eq!(default_concurrency(0), 1);
    }
}
