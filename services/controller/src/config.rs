use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use metal_reconcile::{BackoffPolicy, DEFAULT_POLL_INTERVAL, DEFAULT_TRANSITION_INTERVAL};

/// Environment variable holding the provider API token.
pub const AUTH_TOKEN_VAR: &str = "METAL_AUTH_TOKEN";

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub provider: ProviderConfig,
    pub controller: ControllerConfig,
    /// JSON array of records to seed the store with.
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_url: String,
    pub project_id: String,
    pub timeout: Duration,
}

/// Tuning for the reconcile loop.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub workers: usize,
    /// Requeue delay after a converged turn.
    pub poll_interval: Duration,
    /// Requeue delay while the external resource is mid-transition.
    pub transition_interval: Duration,
    pub backoff: BackoffPolicy,
    /// Upper bound on any single provider call.
    pub provider_timeout: Duration,
    /// After a successful create, a NotFound from the provider within this
    /// window is treated as read lag rather than loss.
    pub create_grace: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: DEFAULT_POLL_INTERVAL,
            transition_interval: DEFAULT_TRANSITION_INTERVAL,
            backoff: BackoffPolicy::default(),
            provider_timeout: Duration::from_secs(30),
            create_grace: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let log_level = std::env::var("METAL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let api_url = std::env::var("METAL_API_URL")
            .unwrap_or_else(|_| "https://api.equinix.com/metal/v1".to_string());
        let project_id =
            std::env::var("METAL_PROJECT_ID").context("METAL_PROJECT_ID must be set")?;

        let defaults = ControllerConfig::default();
        let provider_timeout = secs("METAL_PROVIDER_TIMEOUT_SECS", defaults.provider_timeout)?;

        let controller = ControllerConfig {
            workers: parse_var("METAL_WORKERS")?.unwrap_or(defaults.workers).max(1),
            poll_interval: secs("METAL_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            transition_interval: secs(
                "METAL_TRANSITION_INTERVAL_SECS",
                defaults.transition_interval,
            )?,
            backoff: BackoffPolicy {
                base: parse_var("METAL_BACKOFF_BASE_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.backoff.base),
                max: secs("METAL_BACKOFF_MAX_SECS", defaults.backoff.max)?,
                ..defaults.backoff
            },
            provider_timeout,
            create_grace: secs("METAL_CREATE_GRACE_SECS", defaults.create_grace)?,
        };

        let manifest = std::env::var("METAL_MANIFEST").ok().map(PathBuf::from);

        Ok(Self {
            log_level,
            provider: ProviderConfig {
                api_url,
                project_id,
                timeout: provider_timeout,
            },
            controller,
            manifest,
        })
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => Ok(Some(
            raw.trim()
                .parse()
                .with_context(|| format!("invalid value for {name}: {raw:?}"))?,
        )),
        Err(_) => Ok(None),
    }
}

fn secs(name: &str, default: Duration) -> Result<Duration> {
    Ok(parse_var(name)?.map(Duration::from_secs).unwrap_or(default))
}
