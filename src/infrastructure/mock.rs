use crate::domain::errors::SourceError;
use crate::domain::ports::{MarketDataSource, SourceResult};
use crate::domain::types::{Bar, BarInterval, Quote, VixSnapshot};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// Deterministic market data used as the terminal fallback tier and in
/// tests. Prices are fixed per-symbol baselines with a seeded wiggle, so
/// two processes asking the same question get the same answer.
pub struct MockSource {
    baselines: HashMap<String, f64>,
    vix_level: f64,
    latency: Duration,
    fail_transient: RwLock<HashMap<String, usize>>,
    quote_counts: RwLock<HashMap<String, usize>>,
    bars_counts: RwLock<HashMap<String, usize>>,
    vix_count: RwLock<usize>,
}

impl MockSource {
    pub fn new() -> Self {
        let mut baselines = HashMap::new();
        baselines.insert("SPX".to_string(), 5800.0);
        baselines.insert("SPY".to_string(), 580.0);
        baselines.insert("NDX".to_string(), 20500.0);
        baselines.insert("QQQ".to_string(), 500.0);
        baselines.insert("RUT".to_string(), 2300.0);
        baselines.insert("IWM".to_string(), 230.0);
        baselines.insert("VIX".to_string(), 15.0);

        Self {
            baselines,
            vix_level: 15.0,
            latency: Duration::ZERO,
            fail_transient: RwLock::new(HashMap::new()),
            quote_counts: RwLock::new(HashMap::new()),
            bars_counts: RwLock::new(HashMap::new()),
            vix_count: RwLock::new(0),
        }
    }

    /// Simulate a slow upstream. Used by tests asserting that batch
    /// fetches run in parallel rather than sequentially.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_vix(mut self, level: f64) -> Self {
        self.vix_level = level;
        self
    }

    pub fn with_baseline(mut self, symbol: &str, price: f64) -> Self {
        self.baselines.insert(symbol.to_uppercase(), price);
        self
    }

    /// Make the next `count` quote fetches for `symbol` fail with a
    /// transient error.
    pub fn fail_next_quotes(&self, symbol: &str, count: usize) {
        Self::write(&self.fail_transient).insert(symbol.to_uppercase(), count);
    }

    pub fn quote_calls(&self) -> usize {
        Self::read(&self.quote_counts).values().sum()
    }

    pub fn quote_calls_for(&self, symbol: &str) -> usize {
        Self::read(&self.quote_counts)
            .get(&symbol.to_uppercase())
            .copied()
            .unwrap_or(0)
    }

    pub fn bars_calls(&self) -> usize {
        Self::read(&self.bars_counts).values().sum()
    }

    pub fn bars_calls_for(&self, symbol: &str) -> usize {
        Self::read(&self.bars_counts)
            .get(&symbol.to_uppercase())
            .copied()
            .unwrap_or(0)
    }

    pub fn vix_calls(&self) -> usize {
        *Self::read(&self.vix_count)
    }

    pub fn baseline(&self, symbol: &str) -> f64 {
        self.baselines
            .get(&symbol.to_uppercase())
            .copied()
            .unwrap_or(100.0)
    }

    /// Deterministic quote without going through the trait (and without
    /// counting). The resolver uses this as its last-resort tier.
    pub fn baseline_quote(&self, symbol: &str) -> Quote {
        let last = self.baseline(symbol);
        let spread = (last * 0.0001).max(0.01);
        Quote {
            symbol: symbol.to_uppercase(),
            last,
            bid: last - spread,
            ask: last + spread,
            bid_size: 10.0,
            ask_size: 10.0,
            timestamp: Utc::now(),
        }
    }

    pub fn baseline_bars(&self, symbol: &str, count: usize, interval: BarInterval) -> Vec<Bar> {
        let base = self.baseline(symbol);
        let seed = Self::symbol_seed(symbol);
        let now = Utc::now();
        let step = ChronoDuration::seconds(interval.seconds());

        (0..count)
            .map(|i| {
                // 0.5% band around the baseline, converging on it for the
                // newest bar so quotes and bars agree.
                let change = if i + 1 == count {
                    0.0
                } else {
                    Self::wiggle(seed.wrapping_add(i as u64)) * 0.01
                };
                let close = base * (1.0 + change);
                let open = base * (1.0 + Self::wiggle(seed.wrapping_add(i as u64 + 7)) * 0.01);
                Bar {
                    time: now - step * (count - i) as i32,
                    open,
                    high: close.max(open) * 1.001,
                    low: close.min(open) * 0.999,
                    close,
                    volume: 1000.0 + (i as f64) * 10.0,
                }
            })
            .collect()
    }

    pub fn baseline_vix(&self) -> VixSnapshot {
        VixSnapshot {
            last: self.vix_level,
            change: 0.0,
            change_pct: 0.0,
            high: self.vix_level,
            low: self.vix_level,
            timestamp: Utc::now(),
        }
    }

    fn take_planned_failure(&self, symbol: &str) -> bool {
        match Self::write(&self.fail_transient).get_mut(&symbol.to_uppercase()) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    /// Seeded pseudo-random in [-0.5, 0.5), same arithmetic for every run.
    fn wiggle(seed: u64) -> f64 {
        let mixed = seed.wrapping_mul(1103515245).wrapping_add(12345);
        ((mixed / 65536) % 1000) as f64 / 1000.0 - 0.5
    }

    fn symbol_seed(symbol: &str) -> u64 {
        symbol
            .to_uppercase()
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
    }

    fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
        match lock.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
        match lock.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn count(map: &RwLock<HashMap<String, usize>>, symbol: &str) {
        *Self::write(map).entry(symbol.to_uppercase()).or_insert(0) += 1;
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataSource for MockSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self) -> SourceResult<()> {
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        true
    }

    async fn get_quote(&self, symbol: &str) -> SourceResult<Quote> {
        Self::count(&self.quote_counts, symbol);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.take_planned_failure(symbol) {
            return Err(SourceError::Unavailable {
                reason: "mock planned failure".to_string(),
            });
        }
        Ok(self.baseline_quote(symbol))
    }

    async fn get_bars(
        &self,
        symbol: &str,
        count: usize,
        interval: BarInterval,
    ) -> SourceResult<Vec<Bar>> {
        Self::count(&self.bars_counts, symbol);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.baseline_bars(symbol, count, interval))
    }

    async fn get_vix(&self) -> SourceResult<VixSnapshot> {
        *Self::write(&self.vix_count) += 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.baseline_vix())
    }
}
