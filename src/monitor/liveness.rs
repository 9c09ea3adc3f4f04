//! Adaptive liveness scheduler.
//!
//! One task per device probes reachability on an interval that backs off
//! exponentially under consecutive failures and snaps back to the default
//! on the first success. Status-change events are edge-triggered: listeners
//! hear only the online/offline flips, never repeat readings.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, error, info};

use crate::config::LivenessConfig;
use crate::error::ProbeError;
use crate::events::{Event, EventBus};
use crate::models::{Device, DeviceStatus};
use crate::monitor::MonitorTask;
use crate::probe::Pinger;
use crate::store::DataStore;

/// Backoff saturates at `default * 2^5` before the hard cap applies.
const MAX_BACKOFF_EXPONENT: u32 = 5;

#[derive(Debug, Clone)]
pub struct LivenessSettings {
    pub default_interval: Duration,
    pub max_backoff: Duration,
    pub probe_timeout: Duration,
    pub max_concurrent_probes: usize,
}

impl From<&LivenessConfig> for LivenessSettings {
    fn from(config: &LivenessConfig) -> Self {
        Self {
            default_interval: Duration::from_secs(config.interval_seconds.max(1)),
            max_backoff: Duration::from_secs(config.max_backoff_seconds.max(1)),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms.max(1)),
            max_concurrent_probes: config.max_concurrent_probes.max(1),
        }
    }
}

pub struct LivenessMonitor {
    settings: LivenessSettings,
    pinger: Arc<dyn Pinger>,
    store: Arc<DataStore>,
    bus: EventBus,
    statuses: Arc<DashMap<String, DeviceStatus>>,
    tasks: Mutex<HashMap<String, MonitorTask>>,
    probe_permits: Arc<Semaphore>,
}

impl LivenessMonitor {
    pub fn new(
        settings: LivenessSettings,
        pinger: Arc<dyn Pinger>,
        store: Arc<DataStore>,
        bus: EventBus,
    ) -> Self {
        let probe_permits = Arc::new(Semaphore::new(settings.max_concurrent_probes));
        Self {
            settings,
            pinger,
            store,
            bus,
            statuses: Arc::new(DashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            probe_permits,
        }
    }

    /// Begins monitoring a device. No-op when a schedule already exists
    /// for that IP.
    pub fn start_monitoring(&self, device: &Device) {
        let ip = device.ip_address.clone();
        let mut tasks = self.tasks.lock().unwrap();
        if tasks.contains_key(&ip) {
            debug!(ip = %ip, "Liveness monitoring already running for device.");
            return;
        }

        self.statuses.insert(
            ip.clone(),
            DeviceStatus {
                ip_address: ip.clone(),
                is_online: device.is_active,
                last_checked: Utc::now(),
                response_time: if device.is_active { 0.0 } else { -1.0 },
            },
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let ctx = LivenessContext {
            ip: ip.clone(),
            settings: self.settings.clone(),
            pinger: Arc::clone(&self.pinger),
            store: Arc::clone(&self.store),
            bus: self.bus.clone(),
            statuses: Arc::clone(&self.statuses),
            probe_permits: Arc::clone(&self.probe_permits),
        };
        let handle = tokio::spawn(run_liveness_loop(ctx, shutdown_rx));
        tasks.insert(
            ip.clone(),
            MonitorTask {
                handle,
                shutdown: shutdown_tx,
            },
        );
        info!(ip = %ip, "Started liveness monitoring.");
    }

    /// Cancels the pending tick and removes all state for the IP.
    /// Idempotent.
    pub async fn stop_monitoring(&self, ip: &str) {
        let task = self.tasks.lock().unwrap().remove(ip);
        if let Some(task) = task {
            task.stop().await;
            info!(ip = %ip, "Stopped liveness monitoring.");
        }
        self.statuses.remove(ip);
    }

    pub async fn stop_all(&self) {
        let tasks: Vec<MonitorTask> = {
            let mut guard = self.tasks.lock().unwrap();
            guard.drain().map(|(_, task)| task).collect()
        };
        for task in tasks {
            task.stop().await;
        }
        self.statuses.clear();
    }

    /// Point-in-time copy of every current status.
    pub fn device_statuses(&self) -> Vec<DeviceStatus> {
        self.statuses.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn device_status(&self, ip: &str) -> Option<DeviceStatus> {
        self.statuses.get(ip).map(|entry| entry.value().clone())
    }
}

struct LivenessContext {
    ip: String,
    settings: LivenessSettings,
    pinger: Arc<dyn Pinger>,
    store: Arc<DataStore>,
    bus: EventBus,
    statuses: Arc<DashMap<String, DeviceStatus>>,
    probe_permits: Arc<Semaphore>,
}

async fn run_liveness_loop(ctx: LivenessContext, mut shutdown_rx: oneshot::Receiver<()>) {
    let addr: Option<IpAddr> = ctx.ip.parse().ok();
    let mut interval = ctx.settings.default_interval;
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_rx => {
                debug!(ip = %ctx.ip, "Liveness task received shutdown signal.");
                break;
            }

            outcome = probe_once(&ctx, addr) => {
                let succeeded = outcome.is_ok();
                record_reading(&ctx, outcome).await;

                if succeeded {
                    failures = 0;
                    interval = ctx.settings.default_interval;
                } else {
                    failures += 1;
                    interval = backoff_interval(
                        ctx.settings.default_interval,
                        ctx.settings.max_backoff,
                        failures,
                    );
                    debug!(ip = %ctx.ip, failures, next_interval = ?interval, "Liveness probe failed, backing off.");
                }
            }
        }

        tokio::select! {
            biased;

            _ = &mut shutdown_rx => {
                debug!(ip = %ctx.ip, "Liveness task received shutdown signal.");
                break;
            }

            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// One bounded probe, gated by the global in-flight cap. A device whose
/// turn arrives while the cap is saturated waits here without holding up
/// any other device's timer.
async fn probe_once(ctx: &LivenessContext, addr: Option<IpAddr>) -> Result<Duration, ProbeError> {
    let _permit = ctx
        .probe_permits
        .acquire()
        .await
        .map_err(|_| ProbeError::Transport("probe limiter closed".to_string()))?;
    let addr = addr.ok_or_else(|| ProbeError::InvalidTarget(ctx.ip.clone()))?;
    ctx.pinger.probe(addr, ctx.settings.probe_timeout).await
}

/// Applies the reading to the owned status map, persisting and notifying
/// only when the online flag actually flipped.
async fn record_reading(ctx: &LivenessContext, outcome: Result<Duration, ProbeError>) {
    let now = Utc::now();
    let (is_online, response_time) = match outcome {
        Ok(rtt) => (true, rtt.as_secs_f64() * 1000.0),
        Err(err) => {
            debug!(ip = %ctx.ip, error = %err, "Treating probe failure as offline reading.");
            (false, -1.0)
        }
    };

    let previous_online = ctx.statuses.get(&ctx.ip).map(|entry| entry.value().is_online);
    let status = DeviceStatus {
        ip_address: ctx.ip.clone(),
        is_online,
        last_checked: now,
        response_time,
    };
    ctx.statuses.insert(ctx.ip.clone(), status.clone());

    if previous_online == Some(is_online) {
        return;
    }

    info!(ip = %ctx.ip, online = is_online, "Device status changed.");
    if let Err(e) = ctx.store.touch_device(&ctx.ip, is_online, now).await {
        error!(ip = %ctx.ip, error = %e, "Failed to persist device status change.");
    }
    ctx.bus.publish(Event::DeviceStatusChanged(status));
}

/// `min(default * 2^min(failures - 1, 5), max_backoff)`.
fn backoff_interval(default: Duration, max_backoff: Duration, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    let scaled = default.saturating_mul(1u32 << exponent);
    scaled.min(max_backoff)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: Duration = Duration::from_secs(30);
    const MAX: Duration = Duration::from_secs(300);

    #[test]
    fn backoff_doubles_per_failure() {
        assert_eq!(backoff_interval(DEFAULT, MAX, 1), Duration::from_secs(30));
        assert_eq!(backoff_interval(DEFAULT, MAX, 2), Duration::from_secs(60));
        assert_eq!(backoff_interval(DEFAULT, MAX, 3), Duration::from_secs(120));
        assert_eq!(backoff_interval(DEFAULT, MAX, 4), Duration::from_secs(240));
    }

    #[test]
    fn backoff_caps_at_max_interval() {
        assert_eq!(backoff_interval(DEFAULT, MAX, 5), MAX);
        assert_eq!(backoff_interval(DEFAULT, MAX, 6), MAX);
        assert_eq!(backoff_interval(DEFAULT, MAX, 100), MAX);
    }

    #[test]
    fn backoff_exponent_saturates_below_a_generous_cap() {
        let max = Duration::from_secs(100_000);
        // 2^min(n-1, 5) stops growing past six consecutive failures.
        assert_eq!(backoff_interval(DEFAULT, max, 6), Duration::from_secs(30 * 32));
        assert_eq!(backoff_interval(DEFAULT, max, 7), Duration::from_secs(30 * 32));
    }
}
