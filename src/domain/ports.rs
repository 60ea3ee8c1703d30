use crate::domain::errors::SourceError;
use crate::domain::types::{Bar, BarInterval, Quote, VixSnapshot};
use async_trait::async_trait;

pub type SourceResult<T> = Result<T, SourceError>;

/// Capability interface over the market data providers. A closed set of
/// implementations lives under `infrastructure/`; the resolver owns them
/// as an ordered fallback chain built from configuration.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Short stable identifier, used in logs and diagnostics.
    fn name(&self) -> &'static str;

    async fn connect(&self) -> SourceResult<()>;

    async fn is_connected(&self) -> bool;

    async fn get_quote(&self, symbol: &str) -> SourceResult<Quote>;

    /// Historical bars, oldest first.
    async fn get_bars(
        &self,
        symbol: &str,
        count: usize,
        interval: BarInterval,
    ) -> SourceResult<Vec<Bar>>;

    async fn get_vix(&self) -> SourceResult<VixSnapshot>;
}
