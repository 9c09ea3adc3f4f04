//! lanpulse — always-on LAN telemetry engine.
//!
//! Tracks per-device reachability with adaptive backoff, samples
//! latency/jitter/packet-loss, aggregates host interface traffic rates,
//! persists everything to a crash-safe JSON document and fans updates out
//! to websocket subscribers by channel.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod monitor;
pub mod probe;
pub mod store;
pub mod traffic;
pub mod ws;

pub use config::AppConfig;
pub use engine::MonitoringEngine;
pub use error::{ConfigError, ProbeError, StoreError};
pub use events::{Channel, Event, EventBus};
pub use models::{Device, DeviceStatus, HealthMetrics, TrafficSample, TrafficSummary};
pub use monitor::{HealthSampler, LivenessMonitor};
pub use probe::{IcmpPinger, Pinger};
pub use store::DataStore;
pub use traffic::TrafficMonitor;
