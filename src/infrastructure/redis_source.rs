//! Redis snapshot source.
//!
//! A feed writer process publishes its latest market view as JSON blobs
//! under `md:quote:{SYMBOL}`, `md:bars:{SYMBOL}:{interval}` and `md:vix`.
//! This source only ever reads; staleness is judged by the resolver's TTL
//! against the embedded timestamps.

use crate::domain::errors::SourceError;
use crate::domain::ports::{MarketDataSource, SourceResult};
use crate::domain::types::{Bar, BarInterval, Quote, VixSnapshot};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::RwLock;

pub struct RedisSource {
    url: String,
    key_prefix: String,
    manager: RwLock<Option<ConnectionManager>>,
}

impl RedisSource {
    pub fn new(url: String, key_prefix: String) -> Self {
        Self {
            url,
            key_prefix,
            manager: RwLock::new(None),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.key_prefix, suffix)
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> SourceResult<T> {
        let mut manager = {
            let guard = self.manager.read().await;
            guard.clone().ok_or_else(|| SourceError::Unavailable {
                reason: "redis connection not established".to_string(),
            })?
        };

        let raw: Option<String> =
            manager
                .get(key)
                .await
                .map_err(|e| SourceError::Unavailable {
                    reason: format!("redis GET {} failed: {}", key, e),
                })?;

        let raw = raw.ok_or_else(|| SourceError::Unavailable {
            reason: format!("no value at {}", key),
        })?;

        serde_json::from_str(&raw).map_err(|e| SourceError::InvalidData {
            reason: format!("bad JSON at {}: {}", key, e),
        })
    }
}

#[async_trait]
impl MarketDataSource for RedisSource {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> SourceResult<()> {
        let client = redis::Client::open(self.url.as_str()).map_err(|e| {
            SourceError::Unavailable {
                reason: format!("invalid redis url: {}", e),
            }
        })?;
        let manager =
            client
                .get_connection_manager()
                .await
                .map_err(|e| SourceError::Unavailable {
                    reason: format!("redis connect failed: {}", e),
                })?;

        *self.manager.write().await = Some(manager);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.manager.read().await.is_some()
    }

    async fn get_quote(&self, symbol: &str) -> SourceResult<Quote> {
        let key = self.key(&format!("quote:{}", symbol.to_uppercase()));
        let quote: Quote = self.fetch_json(&key).await?;

        if quote.last <= 0.0 {
            return Err(SourceError::InvalidData {
                reason: format!("non-positive last price {} for {}", quote.last, symbol),
            });
        }
        Ok(quote)
    }

    async fn get_bars(
        &self,
        symbol: &str,
        count: usize,
        interval: BarInterval,
    ) -> SourceResult<Vec<Bar>> {
        let key = self.key(&format!("bars:{}:{}", symbol.to_uppercase(), interval));
        let mut bars: Vec<Bar> = self.fetch_json(&key).await?;

        bars.sort_by_key(|b| b.time);
        if bars.len() > count {
            bars.drain(..bars.len() - count);
        }
        Ok(bars)
    }

    async fn get_vix(&self) -> SourceResult<VixSnapshot> {
        self.fetch_json(&self.key("vix")).await
    }
}
