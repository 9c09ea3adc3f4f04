use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lanpulse::config::AppConfig;
use lanpulse::engine::MonitoringEngine;
use lanpulse::error::ProbeError;
use lanpulse::events::{Event, EventBus};
use lanpulse::models::Device;
use lanpulse::monitor::health::{HealthSampler, HealthSettings};
use lanpulse::monitor::liveness::{LivenessMonitor, LivenessSettings};
use lanpulse::probe::Pinger;
use lanpulse::store::DataStore;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Prober that replays a scripted run of outcomes, then repeats the
/// fallback outcome forever.
struct ScriptedPinger {
    script: Mutex<VecDeque<bool>>,
    fallback: bool,
    rtt: Duration,
    calls: AtomicUsize,
}

impl ScriptedPinger {
    fn new(script: Vec<bool>, fallback: bool) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            rtt: Duration::from_millis(5),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Pinger for ScriptedPinger {
    async fn probe(&self, _addr: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let success = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);
        if success {
            Ok(self.rtt)
        } else {
            Err(ProbeError::Timeout(timeout))
        }
    }
}

fn device(ip: &str, is_active: bool) -> Device {
    Device {
        ip_address: ip.to_string(),
        mac_address: "aa:bb:cc:dd:ee:01".to_string(),
        hostname: "unknown".to_string(),
        vendor: "Unknown".to_string(),
        first_seen: Utc::now(),
        last_seen: Utc::now(),
        is_active,
    }
}

fn liveness_settings() -> LivenessSettings {
    LivenessSettings {
        default_interval: Duration::from_millis(30),
        max_backoff: Duration::from_millis(200),
        probe_timeout: Duration::from_millis(10),
        max_concurrent_probes: 10,
    }
}

fn open_store(dir: &tempfile::TempDir) -> Arc<DataStore> {
    Arc::new(DataStore::open(dir.path().join("lanpulse.json")).unwrap())
}

async fn next_status(events: &mut tokio::sync::broadcast::Receiver<Event>) -> lanpulse::models::DeviceStatus {
    loop {
        let event = timeout(RECV_TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("bus closed");
        if let Event::DeviceStatusChanged(status) = event {
            return status;
        }
    }
}

#[tokio::test]
async fn status_events_fire_only_on_online_edges() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();

    // Two failures, then success forever: seeded online, so we expect
    // exactly one offline flip followed by one online flip.
    let pinger = Arc::new(ScriptedPinger::new(vec![false, false, true], true));
    let monitor = LivenessMonitor::new(liveness_settings(), pinger, store.clone(), bus.clone());
    monitor.start_monitoring(&device("192.168.1.50", true));

    let offline = next_status(&mut events).await;
    assert!(!offline.is_online);
    assert_eq!(offline.response_time, -1.0);
    assert!(offline.last_checked <= Utc::now());

    // The second failed probe must not produce an event; the next one we
    // see is the recovery edge.
    let online = next_status(&mut events).await;
    assert!(online.is_online);
    assert!(online.response_time >= 0.0);

    let statuses = monitor.device_statuses();
    assert_eq!(statuses.len(), 1);
    assert!(statuses[0].is_online);

    monitor.stop_all().await;
    store.close().await.unwrap();
}

#[tokio::test]
async fn start_monitoring_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let bus = EventBus::new(64);

    let pinger = Arc::new(ScriptedPinger::new(vec![], true));
    let monitor = LivenessMonitor::new(liveness_settings(), pinger, store.clone(), bus);

    let target = device("192.168.1.51", true);
    monitor.start_monitoring(&target);
    monitor.start_monitoring(&target);

    assert_eq!(monitor.device_statuses().len(), 1);

    monitor.stop_all().await;
    store.close().await.unwrap();
}

#[tokio::test]
async fn stopped_device_never_ticks_again() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let bus = EventBus::new(64);

    let pinger = Arc::new(ScriptedPinger::new(vec![], true));
    let monitor = LivenessMonitor::new(
        liveness_settings(),
        Arc::clone(&pinger) as Arc<dyn Pinger>,
        store.clone(),
        bus,
    );

    monitor.start_monitoring(&device("192.168.1.52", false));
    tokio::time::sleep(Duration::from_millis(100)).await;
    monitor.stop_monitoring("192.168.1.52").await;

    let calls_at_stop = pinger.calls();
    assert!(calls_at_stop > 0);
    assert!(monitor.device_statuses().is_empty());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(pinger.calls(), calls_at_stop);

    // Stopping again is harmless.
    monitor.stop_monitoring("192.168.1.52").await;
    store.close().await.unwrap();
}

#[tokio::test]
async fn health_cycle_reports_loss_and_fires_every_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();

    // First cycle: 8 of 10 probes answer. Later cycles: all answer.
    let mut script = vec![true; 8];
    script.extend([false, false]);
    let pinger = Arc::new(ScriptedPinger::new(script, true));

    let settings = HealthSettings {
        interval: Duration::from_millis(50),
        probes_per_cycle: 10,
        probe_timeout: Duration::from_millis(10),
        degraded_latency_ms: 100.0,
        degraded_loss_percent: 5.0,
    };
    let sampler = HealthSampler::new(settings, pinger, store.clone(), bus.clone());
    sampler.start_monitoring("192.168.1.53");

    let first = loop {
        let event = timeout(RECV_TIMEOUT, events.recv()).await.unwrap().unwrap();
        if let Event::HealthUpdated(metrics) = event {
            break metrics;
        }
    };
    assert_eq!(first.packet_loss, 20.0);
    assert!(first.is_degraded);
    assert_eq!(first.latency, 5.0);
    assert_eq!(first.min_latency, 5.0);
    assert_eq!(first.max_latency, 5.0);
    assert_eq!(first.jitter, 0.0);
    assert!(first.min_latency <= first.latency && first.latency <= first.max_latency);

    // Not edge-triggered: a clean cycle still notifies.
    let second = loop {
        let event = timeout(RECV_TIMEOUT, events.recv()).await.unwrap().unwrap();
        if let Event::HealthUpdated(metrics) = event {
            break metrics;
        }
    };
    assert_eq!(second.packet_loss, 0.0);
    assert!(!second.is_degraded);

    // Every cycle was persisted as history.
    let since = Utc::now() - chrono::Duration::hours(1);
    let persisted = store.get_health_metrics("192.168.1.53", since, Utc::now());
    assert!(persisted.len() >= 2);

    sampler.stop_all().await;
    store.close().await.unwrap();
}

#[tokio::test]
async fn engine_registration_starts_and_stops_both_schedules() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let pinger = Arc::new(ScriptedPinger::new(vec![], true));

    // Default config: intervals are long enough that no probe interferes
    // with the assertions below.
    let engine = MonitoringEngine::new(AppConfig::default(), store, pinger);
    let mut events = engine.bus().subscribe();

    let target = device("192.168.1.54", true);
    engine.register_device(target.clone()).await.unwrap();

    let discovered = loop {
        let event = timeout(RECV_TIMEOUT, events.recv()).await.unwrap().unwrap();
        if let Event::DeviceDiscovered(device) = event {
            break device;
        }
    };
    assert_eq!(discovered.ip_address, target.ip_address);
    assert_eq!(engine.device_statuses().len(), 1);
    assert_eq!(engine.all_devices().len(), 1);

    engine.unregister_device("192.168.1.54").await.unwrap();
    assert!(engine.device_statuses().is_empty());
    assert!(engine.all_devices().is_empty());

    engine.shutdown().await;
}
