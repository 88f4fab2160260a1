// Copyright 2018 TiKV Project Authors. Licensed under Apache-2.0.

//! Internal request metrics.
//!
//! `RequestStats` wraps one RPC leg or PD call; the free functions record backoff sleeps and
//! heartbeat outcomes. The Prometheus integration is optional (feature `prometheus`). When
//! disabled, this module compiles to a no-op implementation.

#[cfg(feature = "prometheus")]
mod imp {
    use std::sync::OnceLock;
    use std::time::Duration;
    use std::time::Instant;

    use log::warn;
    use prometheus::register_histogram_vec;
    use prometheus::register_int_counter_vec;
    use prometheus::HistogramVec;
    use prometheus::IntCounterVec;

    struct Metrics {
        txn_rpc_duration: Option<HistogramVec>,
        txn_rpc_total: Option<IntCounterVec>,
        txn_rpc_failed_total: Option<IntCounterVec>,
        backoff_sleep_duration: Option<HistogramVec>,
        heartbeat_total: Option<IntCounterVec>,

        pd_request_duration: Option<HistogramVec>,
        pd_request_total: Option<IntCounterVec>,
        pd_failed_request_total: Option<IntCounterVec>,
    }

    static METRICS: OnceLock<Metrics> = OnceLock::new();

    fn metrics() -> &'static Metrics {
        METRICS.get_or_init(Metrics::register)
    }

    impl Metrics {
        fn register_histogram_vec(
            name: &'static str,
            help: &'static str,
            labels: &'static [&'static str],
        ) -> Option<HistogramVec> {
            match register_histogram_vec!(name, help, labels) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("failed to register prometheus histogram vec {name}: {e:?}");
                    None
                }
            }
        }

        fn register_int_counter_vec(
            name: &'static str,
            help: &'static str,
            labels: &'static [&'static str],
        ) -> Option<IntCounterVec> {
            match register_int_counter_vec!(name, help, labels) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("failed to register prometheus counter vec {name}: {e:?}");
                    None
                }
            }
        }

        fn register() -> Metrics {
            Metrics {
                txn_rpc_duration: Self::register_histogram_vec(
                    "txn_rpc_duration_seconds",
                    "Bucketed histogram of transactional RPC duration",
                    &["type"],
                ),
                txn_rpc_total: Self::register_int_counter_vec(
                    "txn_rpc_total",
                    "Total number of transactional RPCs sent to TiKV",
                    &["type"],
                ),
                txn_rpc_failed_total: Self::register_int_counter_vec(
                    "txn_rpc_failed_total",
                    "Total number of failed transactional RPCs, by retry class",
                    &["type", "class"],
                ),
                backoff_sleep_duration: Self::register_histogram_vec(
                    "txn_backoff_sleep_duration_seconds",
                    "Bucketed histogram of client backoff sleep duration",
                    &["type"],
                ),
                heartbeat_total: Self::register_int_counter_vec(
                    "txn_ttl_manager_heartbeat_total",
                    "Total number of lock TTL heartbeat ticks, by outcome",
                    &["result"],
                ),
                pd_request_duration: Self::register_histogram_vec(
                    "txn_pd_request_duration_seconds",
                    "Bucketed histogram of PD requests duration",
                    &["type"],
                ),
                pd_request_total: Self::register_int_counter_vec(
                    "txn_pd_request_total",
                    "Total number of requests sent to PD",
                    &["type"],
                ),
                pd_failed_request_total: Self::register_int_counter_vec(
                    "txn_pd_failed_request_total",
                    "Total number of failed requests sent to PD",
                    &["type"],
                ),
            }
        }
    }

    pub struct RequestStats {
        start: Instant,
        cmd: &'static str,
        duration: Option<&'static HistogramVec>,
    }

    impl RequestStats {
        fn new(
            cmd: &'static str,
            duration: Option<&'static HistogramVec>,
            counter: Option<&'static IntCounterVec>,
        ) -> Self {
            if let Some(counter) = counter {
                counter.with_label_values(&[cmd]).inc();
            }
            Self {
                start: Instant::now(),
                cmd,
                duration,
            }
        }

        fn observe(&self) {
            if let Some(duration) = self.duration {
                duration
                    .with_label_values(&[self.cmd])
                    .observe(duration_to_sec(self.start.elapsed()));
            }
        }

        /// Record a finished transactional leg. `class` is `None` on success.
        pub fn done_rpc(&self, class: Option<&'static str>) {
            self.observe();
            if let Some(class) = class {
                if let Some(failed) = metrics().txn_rpc_failed_total.as_ref() {
                    failed.with_label_values(&[self.cmd, class]).inc();
                }
            }
        }

        pub fn done<R>(&self, r: crate::Result<R>) -> crate::Result<R> {
            self.observe();
            if r.is_err() {
                if let Some(failed) = metrics().pd_failed_request_total.as_ref() {
                    failed.with_label_values(&[self.cmd]).inc();
                }
            }
            r
        }
    }

    pub fn txn_stats(cmd: &'static str) -> RequestStats {
        let metrics = metrics();
        RequestStats::new(
            cmd,
            metrics.txn_rpc_duration.as_ref(),
            metrics.txn_rpc_total.as_ref(),
        )
    }

    pub fn pd_stats(cmd: &'static str) -> RequestStats {
        let metrics = metrics();
        RequestStats::new(
            cmd,
            metrics.pd_request_duration.as_ref(),
            metrics.pd_request_total.as_ref(),
        )
    }

    pub(crate) fn ensure_metrics_registered() {
        let _ = metrics();
    }

    pub(crate) fn observe_backoff_sleep(kind: &'static str, duration: Duration) {
        if let Some(h) = metrics().backoff_sleep_duration.as_ref() {
            h.with_label_values(&[kind])
                .observe(duration_to_sec(duration));
        }
    }

    pub(crate) fn observe_heartbeat(result: &'static str) {
        if let Some(c) = metrics().heartbeat_total.as_ref() {
            c.with_label_values(&[result]).inc();
        }
    }

    #[inline]
    fn duration_to_sec(d: Duration) -> f64 {
        let nanos = f64::from(d.subsec_nanos());
        d.as_secs() as f64 + (nanos / 1_000_000_000.0)
    }
}

#[cfg(not(feature = "prometheus"))]
mod imp {
    use crate::Result;

    #[derive(Debug, Default)]
    pub struct RequestStats;

    impl RequestStats {
        pub fn done_rpc(&self, _class: Option<&'static str>) {}

        pub fn done<R>(&self, r: Result<R>) -> Result<R> {
            r
        }
    }

    pub fn txn_stats(_cmd: &'static str) -> RequestStats {
        RequestStats
    }

    pub fn pd_stats(_cmd: &'static str) -> RequestStats {
        RequestStats
    }

    pub(crate) fn observe_backoff_sleep(_kind: &'static str, _duration: std::time::Duration) {}

    pub(crate) fn observe_heartbeat(_result: &'static str) {}

    #[allow(dead_code)]
    pub(crate) fn ensure_metrics_registered() {}
}

pub use imp::*;
