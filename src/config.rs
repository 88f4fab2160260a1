// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use std::time::Duration;

use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::backoffer::COMMIT_MAX_BACKOFF_MS;
use crate::backoffer::PREWRITE_MAX_BACKOFF_MS;
use crate::backoffer::SCANNER_NEXT_MAX_BACKOFF_MS;
use crate::backoffer::TSO_MAX_BACKOFF_MS;

/// The configuration of a [`TxnKvClient`](crate::TxnKvClient).
///
/// The managed lock TTL of the [`TtlManager`](crate::TtlManager) is fixed and not part of
/// the configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// How many pairs a scan asks one region for at a time.
    pub scan_batch_size: u32,
    /// Total backoff budget of one timestamp fetch.
    pub tso_max_backoff: Duration,
    /// Total backoff budget of loading one scan batch.
    pub scanner_max_backoff: Duration,
    pub prewrite_max_backoff: Duration,
    pub commit_max_backoff: Duration,
    /// Region cache TTL base (see `region_cache_ttl_jitter`).
    pub region_cache_ttl: Duration,
    /// The real TTL is in range `[region_cache_ttl, region_cache_ttl + region_cache_ttl_jitter)`.
    pub region_cache_ttl_jitter: Duration,
    /// Whether committers keep the primary lock alive while committing.
    pub enable_ttl_manager: bool,
}

const DEFAULT_SCAN_BATCH_SIZE: u32 = 10240;
const DEFAULT_REGION_CACHE_TTL: Duration = Duration::from_secs(600);
const DEFAULT_REGION_CACHE_TTL_JITTER: Duration = Duration::from_secs(60);

impl Default for Config {
    fn default() -> Self {
        Config {
            scan_batch_size: DEFAULT_SCAN_BATCH_SIZE,
            tso_max_backoff: Duration::from_millis(TSO_MAX_BACKOFF_MS),
            scanner_max_backoff: Duration::from_millis(SCANNER_NEXT_MAX_BACKOFF_MS),
            prewrite_max_backoff: Duration::from_millis(PREWRITE_MAX_BACKOFF_MS),
            commit_max_backoff: Duration::from_millis(COMMIT_MAX_BACKOFF_MS),
            region_cache_ttl: DEFAULT_REGION_CACHE_TTL,
            region_cache_ttl_jitter: DEFAULT_REGION_CACHE_TTL_JITTER,
            enable_ttl_manager: true,
        }
    }
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Set the number of pairs fetched per scan RPC.
    ///
    /// # Examples
    /// ```rust
    /// # use tikv_txn_client::Config;
    /// let config = Config::default().with_scan_batch_size(256);
    /// assert_eq!(config.scan_batch_size, 256);
    /// ```
    #[must_use]
    pub fn with_scan_batch_size(mut self, scan_batch_size: u32) -> Self {
        self.scan_batch_size = scan_batch_size;
        self
    }

    #[must_use]
    pub fn with_tso_max_backoff(mut self, budget: Duration) -> Self {
        self.tso_max_backoff = budget;
        self
    }

    #[must_use]
    pub fn with_scanner_max_backoff(mut self, budget: Duration) -> Self {
        self.scanner_max_backoff = budget;
        self
    }

    /// Set the backoff budgets of the prewrite and commit legs.
    #[must_use]
    pub fn with_commit_backoff(mut self, prewrite: Duration, commit: Duration) -> Self {
        self.prewrite_max_backoff = prewrite;
        self.commit_max_backoff = commit;
        self
    }

    /// Configure the region cache TTL base and jitter.
    ///
    /// The cache is best-effort. A shorter TTL reduces staleness but increases PD load.
    ///
    /// # Examples
    /// ```rust
    /// # use tikv_txn_client::Config;
    /// # use std::time::Duration;
    /// let config = Config::default()
    ///     .with_region_cache_ttl(Duration::from_secs(300), Duration::from_secs(30));
    /// ```
    #[must_use]
    pub fn with_region_cache_ttl(mut self, base: Duration, jitter: Duration) -> Self {
        self.region_cache_ttl = base;
        self.region_cache_ttl_jitter = jitter;
        self
    }

    #[must_use]
    pub fn with_ttl_manager(mut self, enabled: bool) -> Self {
        self.enable_ttl_manager = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backoff_budgets() {
        let config = Config::default();
        assert_eq!(config.scan_batch_size, 10240);
        assert_eq!(duration_ms(config.tso_max_backoff), 5_000);
        assert_eq!(duration_ms(config.scanner_max_backoff), 40_000);
        assert_eq!(duration_ms(config.prewrite_max_backoff), 20_000);
        assert_eq!(duration_ms(config.commit_max_backoff), 41_000);
        assert!(config.enable_ttl_manager);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"scan-batch-size": 16, "enable-ttl-manager": false}"#)
                .unwrap();
        assert_eq!(config.scan_batch_size, 16);
        assert!(!config.enable_ttl_manager);
        assert_eq!(config.region_cache_ttl, Duration::from_secs(600));

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("region-cache-ttl-jitter"), "{json}");
    }

    #[test]
    fn builders_override_fields() {
        let config = Config::default()
            .with_tso_max_backoff(Duration::from_millis(100))
            .with_commit_backoff(Duration::from_secs(1), Duration::from_secs(2))
            .with_ttl_manager(false);
        assert_eq!(config.tso_max_backoff, Duration::from_millis(100));
        assert_eq!(config.prewrite_max_backoff, Duration::from_secs(1));
        assert_eq!(config.commit_max_backoff, Duration::from_secs(2));
        assert!(!config.enable_ttl_manager);
    }
}
