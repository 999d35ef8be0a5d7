use crate::error::{Error, Result};
use crate::services::ai_service::ModelTiers;
use crate::services::query_cache::CacheConfig;
use crate::services::retry_service::RetryPolicy;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_models: ModelTiers,
    pub rate_limit_rps: u32,
    pub trust_forwarded_for: bool,
    pub cors_origins: Vec<String>,
    pub cache: CacheConfig,
    pub cache_sweep_interval: Duration,
    pub retry: RetryPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any name-to-value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = &lookup;

        let defaults = CacheConfig::default();
        let cache = CacheConfig {
            max_entries: get_or(lookup, "CACHE_MAX_ENTRIES", defaults.max_entries)?,
            default_ttl: secs(get_or(lookup, "CACHE_TTL_DEFAULT_SECS", defaults.default_ttl.as_secs())?),
            test_history_ttl: secs(get_or(
                lookup,
                "CACHE_TTL_TEST_HISTORY_SECS",
                defaults.test_history_ttl.as_secs(),
            )?),
            folders_ttl: secs(get_or(lookup, "CACHE_TTL_FOLDERS_SECS", defaults.folders_ttl.as_secs())?),
            profile_ttl: secs(get_or(lookup, "CACHE_TTL_PROFILE_SECS", defaults.profile_ttl.as_secs())?),
            ..defaults
        };

        let policy = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: get_or(lookup, "RETRY_MAX_ATTEMPTS", policy.max_attempts)?,
            initial_delay: millis(get_or(
                lookup,
                "RETRY_INITIAL_DELAY_MS",
                policy.initial_delay.as_millis() as u64,
            )?),
            max_delay: millis(get_or(lookup, "RETRY_MAX_DELAY_MS", policy.max_delay.as_millis() as u64)?),
            timeout: millis(get_or(lookup, "RETRY_TIMEOUT_MS", policy.timeout.as_millis() as u64)?),
            ..policy
        };
        if retry.max_attempts == 0 {
            return Err(Error::Config("RETRY_MAX_ATTEMPTS must be at least 1".to_string()));
        }

        let cache_sweep_secs: u64 = get_or(lookup, "CACHE_SWEEP_SECS", 60)?;
        if cache_sweep_secs == 0 {
            return Err(Error::Config("CACHE_SWEEP_SECS must be at least 1".to_string()));
        }

        let model_defaults = ModelTiers::default();
        let openai_models = ModelTiers {
            free: get_or(lookup, "OPENAI_MODEL_FREE", model_defaults.free)?,
            student: get_or(lookup, "OPENAI_MODEL_STUDENT", model_defaults.student)?,
            pro: get_or(lookup, "OPENAI_MODEL_PRO", model_defaults.pro)?,
        };

        let cors_origins = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            server_address: require(lookup, "SERVER_ADDRESS")?,
            database_url: lookup("DATABASE_URL").filter(|s| !s.is_empty()),
            jwt_secret: require(lookup, "JWT_SECRET")?,
            token_ttl_hours: get_or(lookup, "TOKEN_TTL_HOURS", 24)?,
            openai_api_key: lookup("OPENAI_API_KEY").filter(|s| !s.is_empty()),
            openai_base_url: lookup("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            openai_models,
            rate_limit_rps: get_or(lookup, "RATE_LIMIT_RPS", 20)?,
            trust_forwarded_for: get_or(lookup, "TRUST_FORWARDED_FOR", false)?,
            cors_origins,
            cache,
            cache_sweep_interval: secs(cache_sweep_secs),
            retry,
        })
    }

    /// Settings for tests and local experiments: in-memory store, no LLM key.
    pub fn for_tests() -> Self {
        Self {
            server_address: "127.0.0.1:0".to_string(),
            database_url: None,
            jwt_secret: "test_secret_key".to_string(),
            token_ttl_hours: 1,
            openai_api_key: None,
            openai_base_url: "http://127.0.0.1:9".to_string(),
            openai_models: ModelTiers::default(),
            rate_limit_rps: 1000,
            trust_forwarded_for: false,
            cors_origins: vec!["*".to_string()],
            cache: CacheConfig::default(),
            cache_sweep_interval: Duration::from_secs(60),
            retry: RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: false,
                ..RetryPolicy::default()
            },
        }
    }
}

fn secs(v: u64) -> Duration {
    Duration::from_secs(v)
}

fn millis(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn require(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    lookup(name).ok_or_else(|| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        None => Ok(default),
    }
}
