//! Market data resolution.
//!
//! One resolver instance owns the fallback chain and both caches. All
//! upstream flakiness is absorbed here: the caller always gets data back,
//! in the worst case from the deterministic mock tier.

use crate::domain::ports::MarketDataSource;
use crate::domain::types::{Bar, BarInterval, Quote, VixSnapshot};
use crate::infrastructure::core::source_health::SourceHealth;
use crate::infrastructure::mock::MockSource;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const VIX_BARS_COUNT: usize = 10;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub quote_ttl: Duration,
    pub bars_ttl: Duration,
    pub fetch_timeout: Duration,
    pub retry_attempts: u32,
    pub source_cooldown: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            quote_ttl: Duration::from_secs(30),
            bars_ttl: Duration::from_secs(300),
            fetch_timeout: Duration::from_millis(1500),
            retry_attempts: 2,
            source_cooldown: Duration::from_secs(300),
        }
    }
}

struct CacheEntry<T> {
    value: T,
    fetched_at: Instant,
    source: String,
}

impl<T: Clone> CacheEntry<T> {
    fn new(value: T, source: String) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
            source,
        }
    }

    fn fresh(&self, ttl: Duration) -> Option<(T, String)> {
        (self.fetched_at.elapsed() < ttl).then(|| (self.value.clone(), self.source.clone()))
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Everything one prediction episode needs, resolved in a single joined
/// fetch. Feature building never starts before this exists.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub quotes: HashMap<String, Quote>,
    pub bars: HashMap<String, Vec<Bar>>,
    pub vix: Option<VixSnapshot>,
    pub vix_bars: Vec<Bar>,
    pub sources: HashMap<String, String>,
}

impl MarketSnapshot {
    pub fn source_for(&self, symbol: &str) -> &str {
        self.sources
            .get(&symbol.to_uppercase())
            .map(String::as_str)
            .unwrap_or("unknown")
    }
}

pub struct CachingResolver {
    sources: Vec<Arc<dyn MarketDataSource>>,
    terminal: MockSource,
    cfg: ResolverConfig,
    quotes: RwLock<HashMap<String, CacheEntry<Quote>>>,
    bars: RwLock<HashMap<String, CacheEntry<Vec<Bar>>>>,
    vix: RwLock<Option<CacheEntry<VixSnapshot>>>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    health: SourceHealth,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachingResolver {
    pub fn new(sources: Vec<Arc<dyn MarketDataSource>>, cfg: ResolverConfig) -> Self {
        let health = SourceHealth::new(cfg.source_cooldown);
        Self {
            sources,
            terminal: MockSource::new(),
            cfg,
            quotes: RwLock::new(HashMap::new()),
            bars: RwLock::new(HashMap::new()),
            vix: RwLock::new(None),
            key_locks: Mutex::new(HashMap::new()),
            health,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Connect every configured source. Failures are logged, not fatal:
    /// an unreachable source is just the first rung of the fallback chain
    /// failing.
    pub async fn connect_all(&self) {
        for source in &self.sources {
            match source.connect().await {
                Ok(()) => info!("Connected source '{}'", source.name()),
                Err(e) => warn!("Source '{}' failed to connect: {}", source.name(), e),
            }
        }
    }

    pub async fn get_quote(&self, symbol: &str) -> Quote {
        let symbol = symbol.to_uppercase();
        if let Some((quote, _)) = self.cached_quote(&symbol) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return quote;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let lock = self.key_lock(format!("quote:{}", symbol)).await;
        let _guard = lock.lock().await;

        // A coalesced caller finds the leader's entry here and issues no
        // upstream call of its own.
        if let Some((quote, _)) = self.cached_quote(&symbol) {
            return quote;
        }

        let (quote, source) = {
            let sym = symbol.clone();
            match self
                .fetch_chain(&symbol, move |s| {
                    let sym = sym.clone();
                    Box::pin(async move { s.get_quote(&sym).await })
                })
                .await
            {
                Some(found) => found,
                None => {
                    warn!("All sources exhausted for {} quote, degrading to mock", symbol);
                    (self.terminal.baseline_quote(&symbol), "mock".to_string())
                }
            }
        };

        Self::write(&self.quotes).insert(symbol, CacheEntry::new(quote.clone(), source));
        quote
    }

    pub async fn get_bars(&self, symbol: &str, count: usize, interval: BarInterval) -> Vec<Bar> {
        let symbol = symbol.to_uppercase();
        let cache_key = format!("{}:{}:{}", symbol, count, interval);

        if let Some((bars, _)) = self.cached_bars(&cache_key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return bars;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let lock = self.key_lock(format!("bars:{}", cache_key)).await;
        let _guard = lock.lock().await;

        if let Some((bars, _)) = self.cached_bars(&cache_key) {
            return bars;
        }

        let (bars, source) = {
            let sym = symbol.clone();
            match self
                .fetch_chain(&symbol, move |s| {
                    let sym = sym.clone();
                    Box::pin(async move { s.get_bars(&sym, count, interval).await })
                })
                .await
            {
                Some(found) => found,
                None => {
                    warn!("All sources exhausted for {} bars, degrading to mock", symbol);
                    (
                        self.terminal.baseline_bars(&symbol, count, interval),
                        "mock".to_string(),
                    )
                }
            }
        };

        Self::write(&self.bars).insert(cache_key, CacheEntry::new(bars.clone(), source));
        bars
    }

    pub async fn get_vix(&self) -> VixSnapshot {
        if let Some((vix, _)) = self.cached_vix() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return vix;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let lock = self.key_lock("vix".to_string()).await;
        let _guard = lock.lock().await;

        if let Some((vix, _)) = self.cached_vix() {
            return vix;
        }

        let (vix, source) = match self
            .fetch_chain("VIX", move |s| Box::pin(async move { s.get_vix().await }))
            .await
        {
            Some(found) => found,
            None => {
                warn!("All sources exhausted for VIX, degrading to mock");
                (self.terminal.baseline_vix(), "mock".to_string())
            }
        };

        *Self::write_opt(&self.vix) = Some(CacheEntry::new(vix.clone(), source));
        vix
    }

    /// Resolve quotes and bars for a symbol set plus the VIX in one
    /// episode. Per-symbol fetches run concurrently, so wall clock is the
    /// slowest symbol, not the sum.
    pub async fn snapshot(
        &self,
        symbols: &[String],
        bar_count: usize,
        interval: BarInterval,
    ) -> MarketSnapshot {
        let mut unique: Vec<String> = Vec::new();
        for symbol in symbols {
            let upper = symbol.to_uppercase();
            if upper != "VIX" && !unique.contains(&upper) {
                unique.push(upper);
            }
        }

        let per_symbol = futures::future::join_all(unique.iter().map(|symbol| async {
            let (quote, bars) = tokio::join!(
                self.get_quote(symbol),
                self.get_bars(symbol, bar_count, interval)
            );
            (symbol.clone(), quote, bars)
        }));

        let vix_pair = async {
            tokio::join!(
                self.get_vix(),
                self.get_bars("VIX", VIX_BARS_COUNT, BarInterval::OneDay)
            )
        };

        let (symbol_results, (vix, vix_bars)) = tokio::join!(per_symbol, vix_pair);

        let mut snapshot = MarketSnapshot {
            vix: Some(vix),
            vix_bars,
            ..Default::default()
        };
        for (symbol, quote, bars) in symbol_results {
            if let Some(source) = self.last_source(&symbol) {
                snapshot.sources.insert(symbol.clone(), source);
            }
            snapshot.quotes.insert(symbol.clone(), quote);
            snapshot.bars.insert(symbol, bars);
        }
        snapshot
    }

    /// The source that last served a quote for this symbol.
    pub fn last_source(&self, symbol: &str) -> Option<String> {
        Self::read(&self.quotes)
            .get(&symbol.to_uppercase())
            .map(|entry| entry.source.clone())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub async fn sources_status(&self) -> Vec<(String, bool)> {
        let mut status = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            status.push((source.name().to_string(), source.is_connected().await));
        }
        status
    }

    pub fn demoted_pairs(&self) -> Vec<(String, String)> {
        self.health.demoted_pairs()
    }

    pub fn clear(&self) {
        Self::write(&self.quotes).clear();
        Self::write(&self.bars).clear();
        *Self::write_opt(&self.vix) = None;
    }

    /// Walk the fallback chain for one piece of data. Transient failures
    /// retry within the source up to the configured bound; terminal
    /// failures demote the (source, symbol) pair and move on immediately.
    async fn fetch_chain<T>(
        &self,
        symbol: &str,
        op: impl Fn(Arc<dyn MarketDataSource>) -> BoxFuture<'static, crate::domain::ports::SourceResult<T>>,
    ) -> Option<(T, String)> {
        for source in &self.sources {
            let name = source.name();
            if self.health.is_demoted(name, symbol) {
                debug!("Skipping demoted source '{}' for {}", name, symbol);
                continue;
            }

            let mut attempt = 0u32;
            loop {
                match tokio::time::timeout(self.cfg.fetch_timeout, op(source.clone())).await {
                    Ok(Ok(value)) => {
                        self.health.restore(name, symbol);
                        return Some((value, name.to_string()));
                    }
                    Ok(Err(e)) if e.is_terminal() => {
                        self.health.demote(name, symbol);
                        break;
                    }
                    Ok(Err(e)) => {
                        warn!(
                            "Source '{}' failed for {} (attempt {}): {}",
                            name,
                            symbol,
                            attempt + 1,
                            e
                        );
                    }
                    Err(_) => {
                        warn!(
                            "Source '{}' timed out for {} after {:?} (attempt {})",
                            name,
                            symbol,
                            self.cfg.fetch_timeout,
                            attempt + 1
                        );
                    }
                }

                attempt += 1;
                if attempt > self.cfg.retry_attempts {
                    break;
                }
            }
        }
        None
    }

    fn cached_quote(&self, symbol: &str) -> Option<(Quote, String)> {
        Self::read(&self.quotes)
            .get(symbol)
            .and_then(|entry| entry.fresh(self.cfg.quote_ttl))
    }

    fn cached_bars(&self, cache_key: &str) -> Option<(Vec<Bar>, String)> {
        Self::read(&self.bars)
            .get(cache_key)
            .and_then(|entry| entry.fresh(self.cfg.bars_ttl))
    }

    fn cached_vix(&self) -> Option<(VixSnapshot, String)> {
        Self::read_opt(&self.vix)
            .as_ref()
            .and_then(|entry| entry.fresh(self.cfg.quote_ttl))
    }

    async fn key_lock(&self, key: String) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn read<T>(lock: &RwLock<HashMap<String, T>>) -> std::sync::RwLockReadGuard<'_, HashMap<String, T>> {
        match lock.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write<T>(lock: &RwLock<HashMap<String, T>>) -> std::sync::RwLockWriteGuard<'_, HashMap<String, T>> {
        match lock.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read_opt<T>(lock: &RwLock<Option<T>>) -> std::sync::RwLockReadGuard<'_, Option<T>> {
        match lock.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_opt<T>(lock: &RwLock<Option<T>>) -> std::sync::RwLockWriteGuard<'_, Option<T>> {
        match lock.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
