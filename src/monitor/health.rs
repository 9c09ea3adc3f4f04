//! Health sampler: a fixed-interval probe burst per device, reduced to
//! latency / loss / jitter statistics. Unlike the liveness scheduler,
//! every completed cycle notifies listeners, whether or not anything
//! changed, and cycles across devices run without a shared concurrency
//! cap.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::config::HealthConfig;
use crate::events::{Event, EventBus};
use crate::models::HealthMetrics;
use crate::monitor::MonitorTask;
use crate::probe::Pinger;
use crate::store::DataStore;

#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub interval: Duration,
    pub probes_per_cycle: usize,
    pub probe_timeout: Duration,
    pub degraded_latency_ms: f64,
    pub degraded_loss_percent: f64,
}

impl From<&HealthConfig> for HealthSettings {
    fn from(config: &HealthConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_seconds.max(1)),
            probes_per_cycle: config.probes_per_cycle.max(1),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms.max(1)),
            degraded_latency_ms: config.degraded_latency_ms,
            degraded_loss_percent: config.degraded_loss_percent,
        }
    }
}

pub struct HealthSampler {
    settings: HealthSettings,
    pinger: Arc<dyn Pinger>,
    store: Arc<DataStore>,
    bus: EventBus,
    metrics: Arc<DashMap<String, HealthMetrics>>,
    tasks: Mutex<HashMap<String, MonitorTask>>,
}

impl HealthSampler {
    pub fn new(
        settings: HealthSettings,
        pinger: Arc<dyn Pinger>,
        store: Arc<DataStore>,
        bus: EventBus,
    ) -> Self {
        Self {
            settings,
            pinger,
            store,
            bus,
            metrics: Arc::new(DashMap::new()),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Begins sampling a device. No-op when a cycle already exists for
    /// that IP.
    pub fn start_monitoring(&self, ip: &str) {
        let mut tasks = self.tasks.lock().unwrap();
        if tasks.contains_key(ip) {
            debug!(ip = %ip, "Health sampling already running for device.");
            return;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let ctx = HealthContext {
            ip: ip.to_string(),
            settings: self.settings.clone(),
            pinger: Arc::clone(&self.pinger),
            store: Arc::clone(&self.store),
            bus: self.bus.clone(),
            metrics: Arc::clone(&self.metrics),
        };
        let handle = tokio::spawn(run_health_loop(ctx, shutdown_rx));
        tasks.insert(
            ip.to_string(),
            MonitorTask {
                handle,
                shutdown: shutdown_tx,
            },
        );
        info!(ip = %ip, "Started health sampling.");
    }

    /// Cancels the pending cycle and removes the metrics for the IP.
    /// Idempotent.
    pub async fn stop_monitoring(&self, ip: &str) {
        let task = self.tasks.lock().unwrap().remove(ip);
        if let Some(task) = task {
            task.stop().await;
            info!(ip = %ip, "Stopped health sampling.");
        }
        self.metrics.remove(ip);
    }

    pub async fn stop_all(&self) {
        let tasks: Vec<MonitorTask> = {
            let mut guard = self.tasks.lock().unwrap();
            guard.drain().map(|(_, task)| task).collect()
        };
        for task in tasks {
            task.stop().await;
        }
        self.metrics.clear();
    }

    pub fn health_metrics(&self, ip: &str) -> Option<HealthMetrics> {
        self.metrics.get(ip).map(|entry| entry.value().clone())
    }

    /// Point-in-time copy of every device's latest metrics.
    pub fn all_health_metrics(&self) -> Vec<HealthMetrics> {
        self.metrics.iter().map(|entry| entry.value().clone()).collect()
    }
}

struct HealthContext {
    ip: String,
    settings: HealthSettings,
    pinger: Arc<dyn Pinger>,
    store: Arc<DataStore>,
    bus: EventBus,
    metrics: Arc<DashMap<String, HealthMetrics>>,
}

async fn run_health_loop(ctx: HealthContext, mut shutdown_rx: oneshot::Receiver<()>) {
    let addr: Option<IpAddr> = ctx.ip.parse().ok();
    let mut ticker = tokio::time::interval(ctx.settings.interval);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_rx => {
                debug!(ip = %ctx.ip, "Health task received shutdown signal.");
                break;
            }

            _ = ticker.tick() => {}
        }

        tokio::select! {
            biased;

            _ = &mut shutdown_rx => {
                debug!(ip = %ctx.ip, "Health task received shutdown signal.");
                break;
            }

            metrics = run_probe_cycle(&ctx, addr) => {
                ctx.metrics.insert(ctx.ip.clone(), metrics.clone());
                if let Err(e) = ctx.store.save_health_metrics(metrics.clone()).await {
                    error!(ip = %ctx.ip, error = %e, "Failed to persist health metrics.");
                }
                // Health updates are not edge-triggered: every cycle goes out.
                ctx.bus.publish(Event::HealthUpdated(metrics));
            }
        }
    }
}

/// Sends the probe burst sequentially and reduces it to metrics. Probe
/// failures of any kind count as lost packets; the cycle itself never
/// fails, so the next one is always armed.
async fn run_probe_cycle(ctx: &HealthContext, addr: Option<IpAddr>) -> HealthMetrics {
    let total = ctx.settings.probes_per_cycle;
    let mut latencies = Vec::with_capacity(total);

    match addr {
        Some(addr) => {
            for sequence in 0..total {
                match ctx.pinger.probe(addr, ctx.settings.probe_timeout).await {
                    Ok(rtt) => latencies.push(rtt.as_secs_f64() * 1000.0),
                    Err(err) => {
                        debug!(ip = %ctx.ip, sequence, error = %err, "Health probe lost.");
                    }
                }
            }
        }
        None => {
            debug!(ip = %ctx.ip, "Unparseable address, counting entire cycle as lost.");
        }
    }

    compute_metrics(&ctx.ip, &latencies, total, &ctx.settings)
}

/// Pure statistics reduction over one cycle's successful latencies.
fn compute_metrics(
    ip: &str,
    latencies: &[f64],
    total_probes: usize,
    settings: &HealthSettings,
) -> HealthMetrics {
    let total = total_probes.max(1);
    let packet_loss = (total - latencies.len()) as f64 / total as f64 * 100.0;

    let (latency, min_latency, max_latency, jitter) = if latencies.is_empty() {
        (-1.0, -1.0, -1.0, 0.0)
    } else {
        let mean = latencies.iter().sum::<f64>() / latencies.len() as f64;
        let min = latencies.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = latencies.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let jitter = if latencies.len() >= 2 {
            population_stddev(latencies, mean)
        } else {
            0.0
        };
        (mean, min, max, jitter)
    };

    let is_degraded = (latency > settings.degraded_latency_ms && latency != -1.0)
        || packet_loss > settings.degraded_loss_percent;

    HealthMetrics {
        ip_address: ip.to_string(),
        latency,
        min_latency,
        max_latency,
        packet_loss,
        jitter,
        last_updated: Utc::now(),
        is_degraded,
    }
}

fn population_stddev(samples: &[f64], mean: f64) -> f64 {
    let variance =
        samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64;
    variance.sqrt()
}
