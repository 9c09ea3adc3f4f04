//! Wires the store, the two per-device schedulers, the traffic sampler and
//! the event bus together, and owns process-level lifecycle: device
//! registration, retention cleanup and ordered shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::StoreError;
use crate::events::{Event, EventBus};
use crate::models::{Device, DeviceStatus, HealthMetrics, TrafficSample, TrafficSummary};
use crate::monitor::{HealthSampler, LivenessMonitor, MonitorTask};
use crate::probe::Pinger;
use crate::store::DataStore;
use crate::traffic::{self, TrafficMonitor};

pub struct MonitoringEngine {
    config: AppConfig,
    store: Arc<DataStore>,
    bus: EventBus,
    liveness: LivenessMonitor,
    health: HealthSampler,
    traffic: TrafficMonitor,
    retention_task: Mutex<Option<MonitorTask>>,
}

impl MonitoringEngine {
    pub fn new(config: AppConfig, store: Arc<DataStore>, pinger: Arc<dyn Pinger>) -> Self {
        let bus = EventBus::default();
        let liveness = LivenessMonitor::new(
            (&config.liveness).into(),
            Arc::clone(&pinger),
            Arc::clone(&store),
            bus.clone(),
        );
        let health = HealthSampler::new(
            (&config.health).into(),
            pinger,
            Arc::clone(&store),
            bus.clone(),
        );
        let traffic = TrafficMonitor::new((&config.traffic).into(), Arc::clone(&store), bus.clone());
        Self {
            config,
            store,
            bus,
            liveness,
            health,
            traffic,
            retention_task: Mutex::new(None),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    /// Brings the engine up: resumes monitoring for every persisted
    /// device, starts the traffic sampler and arms retention cleanup.
    pub fn start(&self) {
        let known = self.store.get_all_devices();
        if !known.is_empty() {
            info!(devices = known.len(), "Resuming monitoring for persisted devices.");
        }
        for device in known {
            self.liveness.start_monitoring(&device);
            self.health.start_monitoring(&device.ip_address);
        }

        match self
            .config
            .interface
            .clone()
            .or_else(traffic::default_interface)
        {
            Some(interface) => self.traffic.start_monitoring(&interface),
            None => warn!("No network interface with a gateway found, traffic monitoring disabled."),
        }

        self.start_retention_task();
    }

    /// Registers a freshly discovered device: persists it, starts both
    /// schedulers for it and announces it to subscribers.
    pub async fn register_device(&self, device: Device) -> Result<(), StoreError> {
        self.store.save_device(device.clone()).await?;
        self.liveness.start_monitoring(&device);
        self.health.start_monitoring(&device.ip_address);
        self.bus.publish(Event::DeviceDiscovered(device));
        Ok(())
    }

    /// Stops both schedulers for the IP and deletes the stored record.
    pub async fn unregister_device(&self, ip: &str) -> Result<(), StoreError> {
        self.liveness.stop_monitoring(ip).await;
        self.health.stop_monitoring(ip).await;
        self.store.delete_device(ip).await
    }

    /// Called by the discovery collaborator when a sweep finishes.
    pub fn scan_completed(&self, devices_found: usize) {
        self.bus.publish(Event::ScanCompleted { devices_found });
    }

    pub fn device_statuses(&self) -> Vec<DeviceStatus> {
        self.liveness.device_statuses()
    }

    pub fn device_status(&self, ip: &str) -> Option<DeviceStatus> {
        self.liveness.device_status(ip)
    }

    pub fn health_metrics(&self, ip: &str) -> Option<HealthMetrics> {
        self.health.health_metrics(ip)
    }

    pub fn all_health_metrics(&self) -> Vec<HealthMetrics> {
        self.health.all_health_metrics()
    }

    pub fn current_traffic_stats(&self) -> Option<TrafficSample> {
        self.traffic.current_stats()
    }

    pub fn historical_traffic_stats(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<TrafficSample> {
        self.traffic.historical_stats(start, end)
    }

    pub fn traffic_summary(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> TrafficSummary {
        self.traffic.stats_summary(start, end)
    }

    pub fn all_devices(&self) -> Vec<Device> {
        self.store.get_all_devices()
    }

    /// Stops every schedule, then closes the store so all accepted writes
    /// reach disk before this returns.
    pub async fn shutdown(&self) {
        info!("Shutting down monitoring engine.");
        let retention = self.retention_task.lock().unwrap().take();
        if let Some(task) = retention {
            task.stop().await;
        }
        self.liveness.stop_all().await;
        self.health.stop_all().await;
        self.traffic.stop_monitoring().await;
        if let Err(e) = self.store.close().await {
            error!(error = %e, "Store did not close cleanly.");
        }
        info!("Monitoring engine stopped.");
    }

    fn start_retention_task(&self) {
        let retention = chrono::Duration::hours(self.config.retention.retention_hours.max(1) as i64);
        let cadence = Duration::from_secs(self.config.retention.cleanup_interval_seconds.max(1));
        let store = Arc::clone(&self.store);

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            // interval() fires immediately; the first real pass is one
            // cadence out.
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;

                    _ = &mut shutdown_rx => break,

                    _ = ticker.tick() => {
                        let cutoff = Utc::now() - retention;
                        match store.cleanup_old_data(cutoff).await {
                            Ok(0) => debug!(cutoff = %cutoff, "Retention pass found nothing to purge."),
                            Ok(removed) => info!(removed, cutoff = %cutoff, "Purged expired history."),
                            Err(e) => error!(error = %e, "Retention cleanup failed."),
                        }
                    }
                }
            }
        });
        *self.retention_task.lock().unwrap() = Some(MonitorTask {
            handle,
            shutdown: shutdown_tx,
        });
    }
}
