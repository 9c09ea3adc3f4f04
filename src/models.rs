//! Data model shared between the monitoring engine, the store and the
//! websocket fan-out. Every type serializes with camelCase field names and
//! ISO-8601 timestamps, matching the on-disk document and the wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A device produced by the discovery collaborator. The engine only ever
/// refreshes `is_active` / `last_seen`; everything else is read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub ip_address: String,
    pub mac_address: String,
    /// "unknown" when reverse lookup failed during discovery.
    pub hostname: String,
    pub vendor: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
}

/// Latest liveness reading for one monitored device.
///
/// `response_time` is milliseconds and is exactly `-1.0` whenever
/// `is_online` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub ip_address: String,
    pub is_online: bool,
    pub last_checked: DateTime<Utc>,
    pub response_time: f64,
}

/// Quality-of-connection statistics for one measurement cycle.
///
/// Latency fields are milliseconds, `-1.0` when the cycle had no successful
/// probes. `jitter` is the population standard deviation of the successful
/// latencies, `0.0` with fewer than two successes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
    pub ip_address: String,
    pub latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    /// Percentage in [0, 100].
    pub packet_loss: f64,
    pub jitter: f64,
    pub last_updated: DateTime<Utc>,
    pub is_degraded: bool,
}

/// One traffic reading: cumulative interface counters plus the rates
/// derived from the previous reading. Rates are never negative; a counter
/// reset between samples reports as `0.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficSample {
    pub timestamp: DateTime<Utc>,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub bytes_received_per_sec: f64,
    pub bytes_sent_per_sec: f64,
    pub packets_received: u64,
    pub packets_sent: u64,
}

/// Aggregate over a selected slice of traffic history. All zeros when the
/// selection is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficSummary {
    pub avg_received_per_sec: f64,
    pub avg_sent_per_sec: f64,
    pub min_received_per_sec: f64,
    pub min_sent_per_sec: f64,
    pub max_received_per_sec: f64,
    pub max_sent_per_sec: f64,
    pub sample_count: usize,
}
