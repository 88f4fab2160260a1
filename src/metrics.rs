// Copyright 2025 TiKV Project Authors. Licensed under Apache-2.0.

//! Prometheus metrics integration.
//!
//! The client records transactional RPC counters and duration histograms, PD call stats,
//! backoff sleeps and lock heartbeat outcomes. When the `prometheus` feature is disabled,
//! metrics collection is compiled out.

/// Returns `true` if the crate is compiled with Prometheus metrics enabled.
pub const fn is_enabled() -> bool {
    cfg!(feature = "prometheus")
}

/// Ensure all metrics are registered with the default registry.
///
/// Returns `false` if the crate is built without the `prometheus` feature.
pub fn register() -> bool {
    #[cfg(feature = "prometheus")]
    {
        crate::stats::ensure_metrics_registered();
        true
    }

    #[cfg(not(feature = "prometheus"))]
    {
        false
    }
}

/// Gather all registered Prometheus metrics in the text exposition format.
///
/// Returns `None` if the crate is built without the `prometheus` feature.
pub fn gather_as_text() -> Option<String> {
    #[cfg(feature = "prometheus")]
    {
        use prometheus::Encoder as _;

        register();
        let metric_families = prometheus::gather();

        let mut buf = Vec::new();
        let encoder = prometheus::TextEncoder::new();
        encoder.encode(&metric_families, &mut buf).ok()?;
        String::from_utf8(buf).ok()
    }

    #[cfg(not(feature = "prometheus"))]
    {
        None
    }
}
