//! Winprob server - headless prediction service
//!
//! Serves win-probability predictions for options trades over HTTP,
//! resolving market data through the configured fallback chain.
//!
//! # Usage
//! ```sh
//! SOURCES=companion,broker MODEL_DIR=models cargo run
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::prelude::*;
use winprob::application::cascade::ModelCascade;
use winprob::application::orchestrator::PredictionOrchestrator;
use winprob::application::resolver::CachingResolver;
use winprob::config::{Config, SourceKind};
use winprob::domain::ports::MarketDataSource;
use winprob::domain::schema::FeatureSchema;
use winprob::infrastructure::broker::BrokerSource;
use winprob::infrastructure::companion::CompanionSource;
use winprob::infrastructure::mock::MockSource;
use winprob::infrastructure::redis_source::RedisSource;
use winprob::interfaces::api::ApiServer;

#[derive(Parser, Debug)]
#[command(version, about = "Options trade win-probability service")]
struct Args {
    /// Override BIND_ADDR from the environment.
    #[arg(long)]
    bind: Option<String>,

    /// Override MODEL_DIR from the environment.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Override FEATURE_SCHEMA_PATH from the environment.
    #[arg(long)]
    schema: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Winprob server {} starting...", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(model_dir) = args.model_dir {
        config.model_dir = model_dir;
    }
    if let Some(schema) = args.schema {
        config.feature_schema_path = schema;
    }

    info!(
        "Configuration loaded: sources={:?}, models={:?}, threshold={}",
        config.source_order, config.model_dir, config.min_win_probability
    );

    let schema = Arc::new(
        FeatureSchema::load(&config.feature_schema_path)
            .context("Feature schema is the training/serving contract and must be present")?,
    );
    info!(
        "Feature schema loaded: {} features, {} tracked symbols",
        schema.n_features,
        schema.tracked_symbols().len()
    );

    let cascade = Arc::new(ModelCascade::load_dir(&config.model_dir, schema.n_features)?);
    if cascade.is_empty() {
        warn!("Running without models; every prediction will fail with NoModelAvailable");
    } else {
        info!("Model cascade ready: {:?}", cascade.inventory());
    }

    let sources = build_sources(&config);
    let resolver = Arc::new(CachingResolver::new(sources, config.resolver_config()));
    resolver.connect_all().await;

    let orchestrator = Arc::new(PredictionOrchestrator::new(
        resolver,
        cascade,
        schema,
        config.orchestrator_config(),
    ));

    ApiServer::new(orchestrator).serve(&config.bind_addr).await
}

/// The fallback chain, in configured order. Disabled providers are
/// skipped; the resolver itself carries the terminal mock tier.
fn build_sources(config: &Config) -> Vec<Arc<dyn MarketDataSource>> {
    let mut sources: Vec<Arc<dyn MarketDataSource>> = Vec::new();

    for kind in &config.source_order {
        match kind {
            SourceKind::Companion if config.companion.enabled => {
                sources.push(Arc::new(CompanionSource::new(
                    config.companion.base_url.clone(),
                    std::time::Duration::from_millis(config.companion.timeout_ms),
                    config.companion.retry_attempts,
                )));
            }
            SourceKind::Redis if config.redis.enabled => {
                sources.push(Arc::new(RedisSource::new(
                    config.redis.url.clone(),
                    config.redis.key_prefix.clone(),
                )));
            }
            SourceKind::Broker if config.broker.enabled => {
                sources.push(Arc::new(BrokerSource::new(
                    &config.broker.host,
                    config.broker.port,
                    std::time::Duration::from_millis(config.broker.timeout_ms),
                    config.broker.retry_attempts,
                )));
            }
            SourceKind::Mock => {
                sources.push(Arc::new(MockSource::new()));
            }
            disabled => {
                info!("Source {:?} is listed but disabled, skipping", disabled);
            }
        }
    }

    sources
}
