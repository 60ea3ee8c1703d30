use crate::config::{Config, SourceKind};
use std::env;
use std::sync::Mutex;
use std::sync::OnceLock;

// Global lock to prevent race conditions when modifying environment
// variables in tests.
static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn get_env_lock() -> &'static Mutex<()> {
    ENV_LOCK.get_or_init(|| Mutex::new(()))
}

fn set_var(name: &str, value: &str) {
    unsafe { env::set_var(name, value) };
}

fn remove_var(name: &str) {
    unsafe { env::remove_var(name) };
}

#[test]
fn test_defaults() {
    let _guard = get_env_lock().lock().unwrap();
    for name in [
        "SOURCES",
        "MIN_WIN_PROBABILITY",
        "QUOTE_TTL_SECS",
        "BAR_INTERVAL",
        "FETCH_TIMEOUT_MS",
    ] {
        remove_var(name);
    }

    let config = Config::from_env().unwrap();

    assert_eq!(
        config.source_order,
        vec![SourceKind::Companion, SourceKind::Redis, SourceKind::Broker]
    );
    assert!((config.min_win_probability - 0.55).abs() < 1e-12);
    assert_eq!(config.quote_ttl_secs, 30);
    assert_eq!(config.bars_ttl_secs, 300);
    assert_eq!(config.prediction_ttl_secs, 300);
    assert_eq!(config.fetch_timeout_ms, 1500);
}

#[test]
fn test_source_order_override() {
    let _guard = get_env_lock().lock().unwrap();
    set_var("SOURCES", "broker, mock");

    let config = Config::from_env().unwrap();
    assert_eq!(
        config.source_order,
        vec![SourceKind::Broker, SourceKind::Mock]
    );

    remove_var("SOURCES");
}

#[test]
fn test_invalid_source_rejected() {
    let _guard = get_env_lock().lock().unwrap();
    set_var("SOURCES", "companion,telepathy");

    assert!(Config::from_env().is_err());

    remove_var("SOURCES");
}

#[test]
fn test_threshold_bounds_checked() {
    let _guard = get_env_lock().lock().unwrap();
    set_var("MIN_WIN_PROBABILITY", "1.5");

    assert!(Config::from_env().is_err());

    remove_var("MIN_WIN_PROBABILITY");
}

#[test]
fn test_resolver_config_conversion() {
    let _guard = get_env_lock().lock().unwrap();
    set_var("QUOTE_TTL_SECS", "12");
    set_var("FETCH_TIMEOUT_MS", "750");

    let config = Config::from_env().unwrap();
    let resolver = config.resolver_config();
    assert_eq!(resolver.quote_ttl.as_secs(), 12);
    assert_eq!(resolver.fetch_timeout.as_millis(), 750);

    remove_var("QUOTE_TTL_SECS");
    remove_var("FETCH_TIMEOUT_MS");
}
