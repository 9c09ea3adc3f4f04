//! Event bus between the monitoring producers and the fan-out layer.
//!
//! Producers publish typed events onto one broadcast channel; every
//! websocket connection holds its own receiver and filters against its
//! subscription set. Liveness events are edge-triggered, health and
//! traffic events fire every cycle.

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::{Device, DeviceStatus, HealthMetrics, TrafficSample};

/// Subscription channels clients can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Devices,
    Traffic,
    Health,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Devices => "devices",
            Channel::Traffic => "traffic",
            Channel::Health => "health",
        }
    }

    pub fn parse(name: &str) -> Option<Channel> {
        match name {
            "devices" => Some(Channel::Devices),
            "traffic" => Some(Channel::Traffic),
            "health" => Some(Channel::Health),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    DeviceDiscovered(Device),
    DeviceStatusChanged(DeviceStatus),
    TrafficUpdated(TrafficSample),
    HealthUpdated(HealthMetrics),
    ScanCompleted { devices_found: usize },
}

impl Event {
    pub fn channel(&self) -> Channel {
        match self {
            Event::DeviceDiscovered(_) | Event::DeviceStatusChanged(_) | Event::ScanCompleted { .. } => {
                Channel::Devices
            }
            Event::TrafficUpdated(_) => Channel::Traffic,
            Event::HealthUpdated(_) => Channel::Health,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::DeviceDiscovered(_) => "device:discovered",
            Event::DeviceStatusChanged(_) => "device:status",
            Event::TrafficUpdated(_) => "traffic:update",
            Event::HealthUpdated(_) => "health:update",
            Event::ScanCompleted { .. } => "scan:complete",
        }
    }

    /// Wire form delivered to subscribed clients.
    pub fn to_message(&self) -> serde_json::Value {
        let payload = match self {
            Event::DeviceDiscovered(device) => json!(device),
            Event::DeviceStatusChanged(status) => json!(status),
            Event::TrafficUpdated(sample) => json!(sample),
            Event::HealthUpdated(metrics) => json!(metrics),
            Event::ScanCompleted { devices_found } => json!({ "devicesFound": devices_found }),
        };
        json!({
            "type": self.kind(),
            "timestamp": Utc::now(),
            "payload": payload,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire-and-forget broadcast. Having no subscribers is not an error.
    pub fn publish(&self, event: Event) {
        if self.tx.receiver_count() == 0 {
            debug!(kind = event.kind(), "No event subscribers, skipping broadcast.");
            return;
        }
        if let Err(e) = self.tx.send(event) {
            debug!(error = %e, "All event receivers dropped mid-send.");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
