use std::time::Duration;

use crate::error::{AppError, Result};
use crate::types::PoolVariant;

pub const DUNE_API_URL: &str = "https://api.dune.com/api/v1";

/// Header carrying the static Dune API key on every request.
pub const API_KEY_HEADER: &str = "x-dune-api-key";

/// Pools created by an owner address ("Creator Address" parameter).
pub const OWNER_QUERY_ID: u64 = 1362901;

/// Pools trading a given NFT collection ("NFT Contract Address" parameter).
pub const COLLECTION_QUERY_ID: u64 = 1393519;

/// Daily fee earnings for a single pool ("Pool Address" parameter).
pub const EARNINGS_QUERY_ID: u64 = 1392569;

/// Delay between two status polls of the same execution (milliseconds).
pub const POLL_INTERVAL_MS: u64 = 1000;

/// Upper bound on status calls for a single execution.
pub const POLL_MAX_ATTEMPTS: u32 = 300;

/// Wall-clock bound on waiting for a single execution (seconds, 0 = none).
pub const POLL_TIMEOUT_SECS: u64 = 600;

/// Per-request HTTP timeout against the Dune API (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Longest `Retry-After` we are willing to honor on a throttled poll.
pub const MAX_RETRY_AFTER_SECS: u64 = 30;

/// Query parameter names expected by the Dune queries above.
pub mod params {
    pub const CREATOR_ADDRESS: &str = "Creator Address";
    pub const NFT_CONTRACT_ADDRESS: &str = "NFT Contract Address";
    pub const POOL_ADDRESS: &str = "Pool Address";
}

/// How long and how often to wait on a submitted execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Maximum number of status calls before giving up.
    pub max_attempts: u32,
    /// Optional wall-clock deadline for the whole wait.
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(POLL_INTERVAL_MS),
            max_attempts: POLL_MAX_ATTEMPTS,
            timeout: Some(Duration::from_secs(POLL_TIMEOUT_SECS)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    /// Dune API key (DUNE_API_KEY). The only required setting.
    pub api_key: String,
    pub log_level: String,
    pub api_port: u16,
    pub http_timeout: Duration,
    pub poll: PollPolicy,
    pub owner_query_id: u64,
    pub collection_query_id: u64,
    pub earnings_query_id: u64,
    /// Formula set used when a request does not name one (METRICS_VARIANT).
    pub default_variant: PoolVariant,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source. `from_env` passes the
    /// process environment.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = var("DUNE_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::Config("DUNE_API_KEY must be set".to_string()))?;

        let poll_timeout_secs: u64 = parse_or(&var, "POLL_TIMEOUT_SECS", POLL_TIMEOUT_SECS)?;
        let max_attempts: u32 = parse_or(&var, "POLL_MAX_ATTEMPTS", POLL_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(AppError::Config(
                "POLL_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let default_variant = match var("METRICS_VARIANT") {
            Some(v) => v.parse::<PoolVariant>().map_err(AppError::Config)?,
            None => PoolVariant::default(),
        };

        Ok(Self {
            api_url: var("DUNE_API_URL")
                .unwrap_or_else(|| DUNE_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            api_port: parse_or(&var, "API_PORT", 3000u16)?,
            http_timeout: Duration::from_secs(parse_or(&var, "HTTP_TIMEOUT_SECS", HTTP_TIMEOUT_SECS)?),
            poll: PollPolicy {
                interval: Duration::from_millis(parse_or(&var, "POLL_INTERVAL_MS", POLL_INTERVAL_MS)?),
                max_attempts,
                timeout: (poll_timeout_secs > 0).then(|| Duration::from_secs(poll_timeout_secs)),
            },
            owner_query_id: parse_or(&var, "OWNER_QUERY_ID", OWNER_QUERY_ID)?,
            collection_query_id: parse_or(&var, "COLLECTION_QUERY_ID", COLLECTION_QUERY_ID)?,
            earnings_query_id: parse_or(&var, "EARNINGS_QUERY_ID", EARNINGS_QUERY_ID)?,
            default_variant,
        })
    }
}

fn parse_or<F, T>(var: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw:?}"))),
        None => Ok(default),
    }
}
