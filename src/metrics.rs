//! Prometheus metrics collection for meshircd.
//!
//! Tracks link lifecycle, burst merges, collision outcomes and netsplits.
//! Served on `/metrics` by [`crate::http`] when `server.metrics_port` is set.
//!
//! - `mesh_links_established_total` - Links that completed the handshake
//! - `mesh_links_active` - Links currently attached
//! - `mesh_link_errors_total{code}` - Link errors by error code
//! - `mesh_bursts_merged_total` - Bursts merged into the directory
//! - `mesh_burst_merge_seconds` - Time spent merging one burst
//! - `mesh_collisions_total{resolution}` - Nickname collisions by outcome
//! - `mesh_netsplits_total` - Netsplits handled
//! - `mesh_split_users_removed_total` - Users removed by netsplits
//! - `mesh_relayed_messages_total{kind}` - Messages relayed to adjacent links

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Link lifecycle
// ========================================================================

/// Links that completed the handshake.
pub static LINKS_ESTABLISHED: OnceLock<IntCounter> = OnceLock::new();

/// Links currently attached to the coordinator.
pub static LINKS_ACTIVE: OnceLock<IntGauge> = OnceLock::new();

/// Link errors by error code.
pub static LINK_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Synchronization
// ========================================================================

/// Bursts merged.
pub static BURSTS_MERGED: OnceLock<IntCounter> = OnceLock::new();

/// Burst merge latency.
pub static BURST_MERGE_LATENCY: OnceLock<Histogram> = OnceLock::new();

/// Nickname collisions by resolution (`local_won`, `incoming_won`, `tie`).
pub static COLLISIONS: OnceLock<IntCounterVec> = OnceLock::new();

/// Netsplits handled.
pub static NETSPLITS: OnceLock<IntCounter> = OnceLock::new();

/// Users removed because their server split away.
pub static SPLIT_USERS_REMOVED: OnceLock<IntCounter> = OnceLock::new();

/// Messages relayed to adjacent links, by message kind.
pub static RELAYED_MESSAGES: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            if $metric.get().is_none() {
                match $init {
                    Ok(m) => {
                        if let Err(e) = r.register(Box::new(m.clone())) {
                            tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                        }
                        let _ = $metric.set(m);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                    }
                }
            }
        };
    }

    register!(LINKS_ESTABLISHED, IntCounter::new("mesh_links_established_total", "Links that completed the handshake"));
    register!(LINKS_ACTIVE, IntGauge::new("mesh_links_active", "Links currently attached"));
    register!(LINK_ERRORS, IntCounterVec::new(Opts::new("mesh_link_errors_total", "Link errors by code"), &["code"]));
    register!(BURSTS_MERGED, IntCounter::new("mesh_bursts_merged_total", "Bursts merged into the directory"));
    register!(BURST_MERGE_LATENCY, Histogram::with_opts(
        HistogramOpts::new("mesh_burst_merge_seconds", "Time spent merging one burst")
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0])));
    register!(COLLISIONS, IntCounterVec::new(Opts::new("mesh_collisions_total", "Nickname collisions by resolution"), &["resolution"]));
    register!(NETSPLITS, IntCounter::new("mesh_netsplits_total", "Netsplits handled"));
    register!(SPLIT_USERS_REMOVED, IntCounter::new("mesh_split_users_removed_total", "Users removed by netsplits"));
    register!(RELAYED_MESSAGES, IntCounterVec::new(Opts::new("mesh_relayed_messages_total", "Messages relayed to adjacent links"), &["kind"]));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Helper functions for metric updates
// ============================================================================

#[inline]
pub fn link_established() {
    if let Some(c) = LINKS_ESTABLISHED.get() {
        c.inc();
    }
    if let Some(g) = LINKS_ACTIVE.get() {
        g.inc();
    }
}

#[inline]
pub fn link_closed() {
    if let Some(g) = LINKS_ACTIVE.get() {
        g.dec();
    }
}

/// Record a link error by its code.
#[inline]
pub fn record_link_error(code: &str) {
    if let Some(c) = LINK_ERRORS.get() {
        c.with_label_values(&[code]).inc();
    }
}

/// Record a merged burst and how long the merge took.
#[inline]
pub fn record_burst_merged(duration_secs: f64) {
    if let Some(c) = BURSTS_MERGED.get() {
        c.inc();
    }
    if let Some(h) = BURST_MERGE_LATENCY.get() {
        h.observe(duration_secs);
    }
}

#[inline]
pub fn record_collision(resolution: &str) {
    if let Some(c) = COLLISIONS.get() {
        c.with_label_values(&[resolution]).inc();
    }
}

/// Record a netsplit and the number of users it removed.
#[inline]
pub fn record_netsplit(users_removed: usize) {
    if let Some(c) = NETSPLITS.get() {
        c.inc();
    }
    if let Some(c) = SPLIT_USERS_REMOVED.get() {
        c.inc_by(users_removed as u64);
    }
}

#[inline]
pub fn record_relay(kind: &str, fanout: usize) {
    if let Some(c) = RELAYED_MESSAGES.get() {
        c.with_label_values(&[kind]).inc_by(fanout as u64);
    }
}
