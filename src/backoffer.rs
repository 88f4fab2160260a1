// Copyright 2026 TiKV Project Authors. Licensed under Apache-2.0.

//! Per-call-tree retry budget.
//!
//! A [`Backoffer`] is created at the top of an operation (one heartbeat tick, one timestamp
//! fetch, one scan batch) and passed down by `&mut`. Every retry consumes one backoff of a
//! category ([`BackoffConfig`]): the category's exponential delay is slept on the tokio timer
//! and added to the total. Once the total sleep reaches the budget, further backoffs fail with
//! [`BackofferError::MaxSleepExceeded`] naming the category that slept the longest.

use std::collections::HashMap;
use std::time::Duration;

use log::debug;
use rand::thread_rng;
use rand::Rng;
use thiserror::Error;

use crate::stats::observe_backoff_sleep;

/// Budget of one TSO fetch.
pub const TSO_MAX_BACKOFF_MS: u64 = 5_000;
/// Budget of loading one scan batch.
pub const SCANNER_NEXT_MAX_BACKOFF_MS: u64 = 40_000;
pub const PREWRITE_MAX_BACKOFF_MS: u64 = 20_000;
pub const COMMIT_MAX_BACKOFF_MS: u64 = 41_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Jitter {
    NoJitter,
    EqualJitter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BackoffFnCfg {
    base_ms: u64,
    cap_ms: u64,
    jitter: Jitter,
}

impl BackoffFnCfg {
    pub(crate) const fn new(base_ms: u64, cap_ms: u64, jitter: Jitter) -> Self {
        Self {
            base_ms,
            cap_ms,
            jitter,
        }
    }
}

/// The category reported when a backoff budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffErrorKind {
    TiKVServerTimeout,
    PdServerTimeout,
    RegionUnavailable,
}

impl std::fmt::Display for BackoffErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackoffErrorKind::TiKVServerTimeout => "tikv server timeout",
            BackoffErrorKind::PdServerTimeout => "pd server timeout",
            BackoffErrorKind::RegionUnavailable => "region unavailable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackofferError {
    /// Max sleep budget exceeded; `kind` is the category that slept the longest.
    #[error("{kind}")]
    MaxSleepExceeded { kind: BackoffErrorKind },

    /// The backoffer refuses every retry (see [`Backoffer::new_noop`]) or no category slept yet.
    #[error("{message}")]
    Other { message: String },
}

impl BackofferError {
    pub fn kind(&self) -> Option<BackoffErrorKind> {
        match self {
            BackofferError::MaxSleepExceeded { kind } => Some(*kind),
            _ => None,
        }
    }
}

/// One backoff category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    name: &'static str,
    fn_cfg: BackoffFnCfg,
    err_kind: BackoffErrorKind,
}

impl BackoffConfig {
    pub(crate) const fn new(
        name: &'static str,
        fn_cfg: BackoffFnCfg,
        err_kind: BackoffErrorKind,
    ) -> Self {
        Self {
            name,
            fn_cfg,
            err_kind,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

pub const BO_TIKV_RPC: BackoffConfig = BackoffConfig::new(
    "tikvRPC",
    BackoffFnCfg::new(100, 2000, Jitter::EqualJitter),
    BackoffErrorKind::TiKVServerTimeout,
);

pub const BO_REGION_MISS: BackoffConfig = BackoffConfig::new(
    "regionMiss",
    BackoffFnCfg::new(2, 500, Jitter::NoJitter),
    BackoffErrorKind::RegionUnavailable,
);

pub const BO_PD_RPC: BackoffConfig = BackoffConfig::new(
    "pdRPC",
    BackoffFnCfg::new(500, 3000, Jitter::EqualJitter),
    BackoffErrorKind::PdServerTimeout,
);

#[derive(Debug)]
struct BackoffFnState {
    base_ms: u64,
    cap_ms: u64,
    jitter: Jitter,
    attempts: u32,
}

impl BackoffFnState {
    fn new(base_ms: u64, cap_ms: u64, jitter: Jitter) -> Self {
        // Keep jitter ranges non-empty.
        let base_ms = base_ms.max(2);
        let cap_ms = cap_ms.max(base_ms);
        Self {
            base_ms,
            cap_ms,
            jitter,
            attempts: 0,
        }
    }

    fn backoff_ms(&mut self) -> u64 {
        let v = expo(self.base_ms, self.cap_ms, self.attempts);
        let sleep_ms = match self.jitter {
            Jitter::NoJitter => v,
            Jitter::EqualJitter => {
                let half = v / 2;
                half + thread_rng().gen_range(0..half)
            }
        };
        self.attempts += 1;
        sleep_ms
    }
}

fn expo(base_ms: u64, cap_ms: u64, attempts: u32) -> u64 {
    let mul = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
    base_ms.saturating_mul(mul).min(cap_ms)
}

/// A backoff budget with a cap on the total time slept across all categories.
#[derive(Debug)]
pub struct Backoffer {
    max_sleep_ms: u64,
    total_sleep_ms: u64,
    noop: bool,

    errors: Vec<String>,
    configs: Vec<BackoffConfig>,
    backoff_sleep_ms: HashMap<&'static str, u64>,
    backoff_times: HashMap<&'static str, u64>,

    fns: HashMap<&'static str, BackoffFnState>,
}

impl Backoffer {
    pub fn new(max_sleep_ms: u64) -> Self {
        Self {
            max_sleep_ms,
            total_sleep_ms: 0,
            noop: false,
            errors: Vec::new(),
            configs: Vec::new(),
            backoff_sleep_ms: HashMap::new(),
            backoff_times: HashMap::new(),
            fns: HashMap::new(),
        }
    }

    /// A budget bounded by an arbitrary duration, e.g. a lock TTL.
    pub fn new_custom(max_sleep_ms: u64) -> Self {
        Self::new(max_sleep_ms)
    }

    /// A backoffer that refuses every retry without sleeping.
    pub fn new_noop() -> Self {
        Self {
            noop: true,
            ..Self::new(0)
        }
    }

    pub fn total_sleep_ms(&self) -> u64 {
        self.total_sleep_ms
    }

    /// How many times `cfg` has been backed off by this backoffer.
    pub fn backoff_times(&self, cfg: &BackoffConfig) -> u64 {
        self.backoff_times.get(cfg.name).copied().unwrap_or(0)
    }

    /// Messages of every error that triggered a backoff, oldest first.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    fn longest_sleep_cfg(&self) -> Option<(BackoffConfig, u64)> {
        let (candidate_name, sleep_ms) = self
            .backoff_sleep_ms
            .iter()
            .max_by_key(|(_, sleep_ms)| **sleep_ms)
            .map(|(name, sleep_ms)| (*name, *sleep_ms))?;
        let cfg = self
            .configs
            .iter()
            .copied()
            .find(|cfg| cfg.name == candidate_name)?;
        Some((cfg, sleep_ms))
    }

    /// Consume one retry of `cfg`: sleep for its current delay, or fail if the budget is spent.
    pub async fn backoff(
        &mut self,
        cfg: &BackoffConfig,
        err_message: impl Into<String>,
    ) -> Result<(), BackofferError> {
        let sleep_ms = self.next_sleep_ms(cfg, err_message.into())?;
        let sleep = Duration::from_millis(sleep_ms);
        observe_backoff_sleep(cfg.name, sleep);
        tokio::time::sleep(sleep).await;
        Ok(())
    }

    fn next_sleep_ms(
        &mut self,
        cfg: &BackoffConfig,
        err_message: String,
    ) -> Result<u64, BackofferError> {
        if self.noop {
            return Err(BackofferError::Other {
                message: err_message,
            });
        }

        if self.max_sleep_ms > 0 && self.total_sleep_ms >= self.max_sleep_ms {
            return match self.longest_sleep_cfg() {
                Some((cfg, _)) => Err(BackofferError::MaxSleepExceeded { kind: cfg.err_kind }),
                None => Err(BackofferError::Other {
                    message: err_message,
                }),
            };
        }

        debug!(
            "backoff {} (total {}ms of {}ms): {}",
            cfg.name, self.total_sleep_ms, self.max_sleep_ms, err_message
        );
        self.errors.push(err_message);
        self.configs.push(*cfg);

        let state = self.fns.entry(cfg.name).or_insert_with(|| {
            BackoffFnState::new(cfg.fn_cfg.base_ms, cfg.fn_cfg.cap_ms, cfg.fn_cfg.jitter)
        });
        let sleep_ms = state.backoff_ms();

        self.total_sleep_ms += sleep_ms;
        *self.backoff_sleep_ms.entry(cfg.name).or_default() += sleep_ms;
        *self.backoff_times.entry(cfg.name).or_default() += 1;

        Ok(sleep_ms)
    }
}
