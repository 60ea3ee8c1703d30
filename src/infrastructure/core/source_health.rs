use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Sticky per-(source, symbol) demotion with a cool-down re-probe.
///
/// A terminal failure (missing subscription) marks the pair demoted; the
/// resolver skips it until the cool-down elapses, then probes it once.
/// A successful fetch clears the mark, a repeated terminal failure
/// re-arms the cool-down.
pub struct SourceHealth {
    demoted: RwLock<HashMap<(String, String), Instant>>,
    cooldown: Duration,
}

impl SourceHealth {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            demoted: RwLock::new(HashMap::new()),
            cooldown,
        }
    }

    pub fn is_demoted(&self, source: &str, symbol: &str) -> bool {
        let guard = match self.demoted.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.get(&(source.to_string(), symbol.to_string())) {
            Some(since) => {
                if since.elapsed() >= self.cooldown {
                    info!(
                        "SourceHealth: cool-down elapsed for {}/{}, allowing probe",
                        source, symbol
                    );
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }

    pub fn demote(&self, source: &str, symbol: &str) {
        warn!(
            "SourceHealth: demoting {}/{} for {:?}",
            source, symbol, self.cooldown
        );
        let mut guard = match self.demoted.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert((source.to_string(), symbol.to_string()), Instant::now());
    }

    pub fn restore(&self, source: &str, symbol: &str) {
        let mut guard = match self.demoted.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard
            .remove(&(source.to_string(), symbol.to_string()))
            .is_some()
        {
            info!("SourceHealth: {}/{} recovered", source, symbol);
        }
    }

    pub fn demoted_pairs(&self) -> Vec<(String, String)> {
        let guard = match self.demoted.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.keys().cloned().collect()
    }
}
