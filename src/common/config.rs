//! Runtime configuration loaded from the process environment.
//!
//! These are host-level knobs; everything about proxying lives in the
//! per-instance profile (`crate::profile`).

use std::env;
use std::sync::OnceLock;
use std::time::Duration;

use log::LevelFilter;

/// Snapshot of configuration values consumed by the core.
#[derive(Clone, Debug)]
pub struct AppCfg {
    pub log_level: LevelFilter,
    pub worker_threads: usize,
    pub stop_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for AppCfg {
    fn default() -> Self {
        Self {
            log_level: LevelFilter::Info,
            worker_threads: 2,
            stop_timeout: Duration::from_millis(3000),
            connect_timeout: Duration::from_millis(10_000),
        }
    }
}

impl AppCfg {
    /// Create a configuration snapshot from the process environment.
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let log_level = lookup("SINGBOX_LOG_LEVEL")
            .and_then(|v| crate::common::log::parse_level(&v))
            .unwrap_or(defaults.log_level);
        let worker_threads = lookup("SINGBOX_WORKER_THREADS")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.worker_threads);
        let stop_timeout = lookup("SINGBOX_STOP_TIMEOUT_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.stop_timeout);
        let connect_timeout = lookup("SINGBOX_CONNECT_TIMEOUT_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.connect_timeout);

        Self {
            log_level,
            worker_threads,
            stop_timeout,
            connect_timeout,
        }
    }
}

/// Process-wide configuration, read from the environment on first use.
pub fn app_cfg() -> &'static AppCfg {
    static CFG: OnceLock<AppCfg> = OnceLock::new();
    CFG.get_or_init(AppCfg::load)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = AppCfg::from_lookup(|_| None);
        assert_eq!(cfg.log_level, LevelFilter::Info);
        assert_eq!(cfg.worker_threads, 2);
        assert_eq!(cfg.stop_timeout, Duration::from_millis(3000));
        assert_eq!(cfg.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn environment_overrides_are_applied() {
        let cfg = AppCfg::from_lookup(lookup_from(&[
            ("SINGBOX_LOG_LEVEL", "debug"),
            ("SINGBOX_WORKER_THREADS", "4"),
            ("SINGBOX_STOP_TIMEOUT_MS", "250"),
            ("SINGBOX_CONNECT_TIMEOUT_MS", "1500"),
        ]));
        assert_eq!(cfg.log_level, LevelFilter::Debug);
        assert_eq!(cfg.worker_threads, 4);
        assert_eq!(cfg.stop_timeout, Duration::from_millis(250));
        assert_eq!(cfg.connect_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn malformed_values_fall_back() {
        let cfg = AppCfg::from_lookup(lookup_from(&[
            ("SINGBOX_LOG_LEVEL", "loud"),
            ("SINGBOX_WORKER_THREADS", "0"),
            ("SINGBOX_STOP_TIMEOUT_MS", "soon"),
        ]));
        assert_eq!(cfg.log_level, LevelFilter::Info);
        assert_eq!(cfg.worker_threads, 2);
        assert_eq!(cfg.stop_timeout, Duration::from_millis(3000));
    }
}
