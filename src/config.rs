use crate::application::orchestrator::OrchestratorConfig;
use crate::application::resolver::ResolverConfig;
use crate::domain::types::BarInterval;
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Companion,
    Redis,
    Broker,
    Mock,
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "companion" => Ok(SourceKind::Companion),
            "redis" => Ok(SourceKind::Redis),
            "broker" => Ok(SourceKind::Broker),
            "mock" => Ok(SourceKind::Mock),
            _ => anyhow::bail!(
                "Invalid source '{}'. Must be companion, redis, broker or mock",
                s
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompanionConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_ms: u64,
    pub retry_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub enabled: bool,
    pub url: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
    pub retry_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Fallback order. The deterministic mock tier is always the implicit
    /// last resort even when not listed.
    pub source_order: Vec<SourceKind>,
    pub companion: CompanionConfig,
    pub redis: RedisConfig,
    pub broker: BrokerConfig,
    pub fetch_timeout_ms: u64,
    pub retry_attempts: u32,
    pub source_cooldown_secs: u64,
    pub quote_ttl_secs: u64,
    pub bars_ttl_secs: u64,
    pub prediction_ttl_secs: u64,
    pub prediction_cache_max: usize,
    pub min_win_probability: f64,
    pub model_dir: PathBuf,
    pub feature_schema_path: PathBuf,
    pub bar_count: usize,
    pub bar_interval: BarInterval,
    pub batch_budget_ms: u64,
    pub skip_on_error: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());

        let sources_str =
            env::var("SOURCES").unwrap_or_else(|_| "companion,redis,broker".to_string());
        let source_order = sources_str
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(SourceKind::from_str)
            .collect::<Result<Vec<_>>>()?;

        let fetch_timeout_ms: u64 = parse_env("FETCH_TIMEOUT_MS", 1500)?;

        let companion = CompanionConfig {
            enabled: parse_env("COMPANION_ENABLED", true)?,
            base_url: env::var("COMPANION_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8042".to_string()),
            timeout_ms: parse_env("COMPANION_TIMEOUT_MS", fetch_timeout_ms)?,
            retry_attempts: parse_env("COMPANION_RETRY_ATTEMPTS", 2)?,
        };

        let redis = RedisConfig {
            enabled: parse_env("REDIS_ENABLED", false)?,
            url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            key_prefix: env::var("REDIS_KEY_PREFIX").unwrap_or_else(|_| "md".to_string()),
        };

        let broker = BrokerConfig {
            enabled: parse_env("BROKER_ENABLED", false)?,
            host: env::var("BROKER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_env("BROKER_PORT", 5000u16)?,
            timeout_ms: parse_env("BROKER_TIMEOUT_MS", fetch_timeout_ms)?,
            retry_attempts: parse_env("BROKER_RETRY_ATTEMPTS", 2)?,
        };

        let bar_interval_str = env::var("BAR_INTERVAL").unwrap_or_else(|_| "5m".to_string());
        let bar_interval = bar_interval_str.parse::<BarInterval>()?;

        let min_win_probability: f64 = parse_env("MIN_WIN_PROBABILITY", 0.55)?;
        if !(0.0..=1.0).contains(&min_win_probability) {
            anyhow::bail!(
                "MIN_WIN_PROBABILITY must be within [0, 1], got {}",
                min_win_probability
            );
        }

        Ok(Self {
            bind_addr,
            source_order,
            companion,
            redis,
            broker,
            fetch_timeout_ms,
            retry_attempts: parse_env("RETRY_ATTEMPTS", 2)?,
            source_cooldown_secs: parse_env("SOURCE_COOLDOWN_SECS", 300)?,
            quote_ttl_secs: parse_env("QUOTE_TTL_SECS", 30)?,
            bars_ttl_secs: parse_env("BARS_TTL_SECS", 300)?,
            prediction_ttl_secs: parse_env("PREDICTION_TTL_SECS", 300)?,
            prediction_cache_max: parse_env("PREDICTION_CACHE_MAX", 1000)?,
            min_win_probability,
            model_dir: PathBuf::from(env::var("MODEL_DIR").unwrap_or_else(|_| "models".to_string())),
            feature_schema_path: PathBuf::from(
                env::var("FEATURE_SCHEMA_PATH")
                    .unwrap_or_else(|_| "models/feature_schema.json".to_string()),
            ),
            bar_count: parse_env("BAR_COUNT", 40)?,
            bar_interval,
            batch_budget_ms: parse_env("BATCH_BUDGET_MS", 10_000)?,
            skip_on_error: parse_env("SKIP_ON_ERROR", true)?,
        })
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            quote_ttl: Duration::from_secs(self.quote_ttl_secs),
            bars_ttl: Duration::from_secs(self.bars_ttl_secs),
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            retry_attempts: self.retry_attempts,
            source_cooldown: Duration::from_secs(self.source_cooldown_secs),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            min_win_probability: self.min_win_probability,
            prediction_ttl: Duration::from_secs(self.prediction_ttl_secs),
            prediction_cache_max: self.prediction_cache_max,
            bar_count: self.bar_count,
            bar_interval: self.bar_interval,
            batch_budget: Duration::from_millis(self.batch_budget_ms),
            skip_on_error: self.skip_on_error,
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr + std::fmt::Display,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Failed to parse {}={}", name, raw)),
        Err(_) => Ok(default),
    }
}
