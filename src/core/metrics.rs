// src/core/metrics.rs

//! Defines and registers Prometheus metrics for relay monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use crate::core::notice::ServerNotice;
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, TextEncoder, register_counter, register_counter_vec,
    register_gauge,
};
use strum::IntoEnumIterator;

lazy_static! {
    // --- Gauges ---
    /// The number of clients currently connected to the server.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("pairlink_connected_clients", "Number of currently connected clients.").unwrap();
    /// The number of clients waiting for a partner (0 or 1).
    pub static ref WAITING_CLIENTS: Gauge =
        register_gauge!("pairlink_waiting_clients", "Number of clients waiting for a pair.").unwrap();
    /// The number of active pairs.
    pub static ref ACTIVE_PAIRS: Gauge =
        register_gauge!("pairlink_active_pairs", "Number of currently paired client couples.").unwrap();

    // --- Counters ---
    /// The total number of connections accepted by the server since startup.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("pairlink_connections_received_total", "Total number of connections received.").unwrap();
    /// Connections closed at accept time because `max_clients` was reached.
    pub static ref CONNECTIONS_REJECTED_TOTAL: Counter =
        register_counter!("pairlink_connections_rejected_total", "Total number of connections rejected by the client limit.").unwrap();
    pub static ref PAIRS_FORMED_TOTAL: Counter =
        register_counter!("pairlink_pairs_formed_total", "Total number of pairs formed.").unwrap();
    pub static ref MESSAGES_RELAYED_TOTAL: Counter =
        register_counter!("pairlink_messages_relayed_total", "Total number of messages handed to a partner.").unwrap();
    /// Messages that were not relayed, labeled by reason.
    pub static ref MESSAGES_DROPPED_TOTAL: CounterVec =
        register_counter_vec!("pairlink_messages_dropped_total", "Total number of dropped messages, labeled by reason.", &["reason"]).unwrap();
    /// Status notices written to clients, labeled by status code.
    pub static ref NOTICES_SENT_TOTAL: CounterVec =
        register_counter_vec!("pairlink_notices_sent_total", "Total number of status notices sent, labeled by status.", &["status"]).unwrap();
    pub static ref WAIT_TIMEOUTS_TOTAL: Counter =
        register_counter!("pairlink_wait_timeouts_total", "Total number of clients closed after waiting too long.").unwrap();
    pub static ref INVARIANT_VIOLATIONS_TOTAL: Counter =
        register_counter!("pairlink_invariant_violations_total", "Total number of pairing table inconsistencies detected.").unwrap();
}

/// Creates a `pairlink_notices_sent_total` series for every status so each is exported from zero.
pub fn register_notice_statuses() {
    for notice in ServerNotice::iter() {
        NOTICES_SENT_TOTAL.with_label_values(&[notice.status()]);
    }
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
}
