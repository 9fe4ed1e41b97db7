use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Mirror configuration loaded from environment variables.
/// Fails at startup if `API_BASE_URL` is missing or a value does not parse.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub mirror_dir: PathBuf,
    pub remote_timeout_secs: u64,
    pub mutation_max_retries: u32,
    pub mutation_retry_base_ms: u64,
    pub notify_on_total_failure: bool,
    pub reject_on_validation_error: bool,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            api_base_url: require_env("API_BASE_URL")?,
            api_token: std::env::var("API_TOKEN").ok().filter(|t| !t.is_empty()),
            mirror_dir: PathBuf::from(
                std::env::var("MIRROR_DIR").unwrap_or_else(|_| ".mirror".to_string()),
            ),
            remote_timeout_secs: parse_env("REMOTE_TIMEOUT_SECS", 30)?,
            mutation_max_retries: parse_env("MUTATION_MAX_RETRIES", 0)?,
            mutation_retry_base_ms: parse_env("MUTATION_RETRY_BASE_MS", 500)?,
            notify_on_total_failure: parse_env("NOTIFY_ON_TOTAL_FAILURE", false)?,
            reject_on_validation_error: parse_env("REJECT_ON_VALIDATION_ERROR", false)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.mutation_retry_base_ms)
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("{key} has invalid value '{raw}'"))
}
