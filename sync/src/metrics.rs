//! Prometheus metrics for the synchronizers.
//!
//! [`SyncMetrics`] owns a dedicated [`Registry`] that the read API's
//! `/metrics` endpoint encodes into the Prometheus text exposition format.

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Opts, Registry, TextEncoder,
};

/// Central collection of ingestion metrics.
pub struct SyncMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Live poll steps attempted, including the one `start` runs.
    pub live_polls: IntCounter,
    /// Live poll steps that failed (fetch or insert).
    pub live_poll_failures: IntCounter,
    /// Backfill batches that completed.
    pub history_batches: IntCounter,
    /// Delegations received from upstream.
    pub delegations_fetched: IntCounter,
    /// Delegations newly written to the store.
    pub delegations_inserted: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Unix time of the last successful live fetch.
    pub live_last_sync_seconds: IntGauge,
}

impl SyncMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        let live_polls = register_int_counter_with_registry!(
            Opts::new("tezdel_live_polls_total", "Live poll steps attempted"),
            registry
        )
        .expect("failed to register live_polls counter");

        let live_poll_failures = register_int_counter_with_registry!(
            Opts::new(
                "tezdel_live_poll_failures_total",
                "Live poll steps that failed"
            ),
            registry
        )
        .expect("failed to register live_poll_failures counter");

        let history_batches = register_int_counter_with_registry!(
            Opts::new(
                "tezdel_history_batches_total",
                "Backfill batches completed"
            ),
            registry
        )
        .expect("failed to register history_batches counter");

        let delegations_fetched = register_int_counter_with_registry!(
            Opts::new(
                "tezdel_delegations_fetched_total",
                "Delegations received from upstream"
            ),
            registry
        )
        .expect("failed to register delegations_fetched counter");

        let delegations_inserted = register_int_counter_with_registry!(
            Opts::new(
                "tezdel_delegations_inserted_total",
                "Delegations newly written to the store"
            ),
            registry
        )
        .expect("failed to register delegations_inserted counter");

        let live_last_sync_seconds = register_int_gauge_with_registry!(
            Opts::new(
                "tezdel_live_last_sync_seconds",
                "Unix time of the last successful live fetch"
            ),
            registry
        )
        .expect("failed to register live_last_sync_seconds gauge");

        Self {
            registry,
            live_polls,
            live_poll_failures,
            history_batches,
            delegations_fetched,
            delegations_inserted,
            live_last_sync_seconds,
        }
    }

    /// Render every metric in the text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}
