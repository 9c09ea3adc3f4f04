//! Traffic aggregator: one global periodic sampler that turns the host
//! interface's cumulative counters into per-second rates, keeps a bounded
//! FIFO history, and snapshots history appends to the store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sysinfo::Networks;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::TrafficConfig;
use crate::events::{Event, EventBus};
use crate::models::{TrafficSample, TrafficSummary};
use crate::monitor::MonitorTask;
use crate::store::DataStore;

#[derive(Debug, Clone)]
pub struct TrafficSettings {
    pub sample_interval: Duration,
    pub history_granularity: Duration,
    pub history_duration: Duration,
}

impl TrafficSettings {
    /// FIFO history bound: `floor(history_duration / history_granularity)`.
    pub fn history_capacity(&self) -> usize {
        let granularity = self.history_granularity.as_secs().max(1);
        ((self.history_duration.as_secs() / granularity) as usize).max(1)
    }
}

impl From<&TrafficConfig> for TrafficSettings {
    fn from(config: &TrafficConfig) -> Self {
        Self {
            sample_interval: Duration::from_secs(config.sample_interval_seconds.max(1)),
            history_granularity: Duration::from_secs(config.history_granularity_seconds.max(1)),
            history_duration: Duration::from_secs(config.history_duration_seconds.max(1)),
        }
    }
}

/// One reading of an interface's cumulative counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
}

/// Where counters come from. Production reads sysinfo; tests script it.
pub trait CounterSource: Send + 'static {
    /// `None` when the interface is missing or the read failed; the
    /// sampler logs, keeps the previous stats and tries again next tick.
    fn read(&mut self, interface: &str) -> Option<InterfaceCounters>;
}

pub struct SysinfoCounters {
    networks: Networks,
}

impl SysinfoCounters {
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
        }
    }
}

impl Default for SysinfoCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSource for SysinfoCounters {
    fn read(&mut self, interface: &str) -> Option<InterfaceCounters> {
        self.networks.refresh(false);
        for (name, data) in self.networks.iter() {
            if name == interface {
                return Some(InterfaceCounters {
                    bytes_received: data.total_received(),
                    bytes_sent: data.total_transmitted(),
                    packets_received: data.total_packets_received(),
                    packets_sent: data.total_packets_transmitted(),
                });
            }
        }
        None
    }
}

/// Picks the interface that carries the default route: first one with an
/// address and a gateway.
pub fn default_interface() -> Option<String> {
    netdev::get_interfaces()
        .into_iter()
        .find(|iface| {
            (!iface.ipv4.is_empty() || !iface.ipv6.is_empty()) && iface.gateway.is_some()
        })
        .map(|iface| iface.friendly_name.unwrap_or(iface.name))
}

pub struct TrafficMonitor {
    settings: TrafficSettings,
    store: Arc<DataStore>,
    bus: EventBus,
    state: Arc<TrafficState>,
    task: Mutex<Option<MonitorTask>>,
    running: AtomicBool,
}

struct TrafficState {
    current: RwLock<Option<TrafficSample>>,
    history: RwLock<VecDeque<TrafficSample>>,
}

impl TrafficMonitor {
    pub fn new(settings: TrafficSettings, store: Arc<DataStore>, bus: EventBus) -> Self {
        Self {
            settings,
            store,
            bus,
            state: Arc::new(TrafficState {
                current: RwLock::new(None),
                history: RwLock::new(VecDeque::new()),
            }),
            task: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Starts the single global sampler on the named interface, reading
    /// counters from sysinfo.
    pub fn start_monitoring(&self, interface: &str) {
        self.start_with_source(interface, SysinfoCounters::new());
    }

    /// Same, with an explicit counter source. No-op with a warning when
    /// the sampler is already running.
    pub fn start_with_source<S: CounterSource>(&self, interface: &str, source: S) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Traffic monitoring already running, ignoring start request.");
            return;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let ctx = TrafficContext {
            interface: interface.to_string(),
            settings: self.settings.clone(),
            store: Arc::clone(&self.store),
            bus: self.bus.clone(),
            state: Arc::clone(&self.state),
        };
        let handle = tokio::spawn(run_traffic_loop(ctx, source, shutdown_rx));
        *self.task.lock().unwrap() = Some(MonitorTask {
            handle,
            shutdown: shutdown_tx,
        });
        info!(interface = %interface, "Started traffic monitoring.");
    }

    /// Stops the sampler. Idempotent.
    pub async fn stop_monitoring(&self) {
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            task.stop().await;
            info!("Stopped traffic monitoring.");
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Latest sample, if at least one tick has completed.
    pub fn current_stats(&self) -> Option<TrafficSample> {
        self.state.current.read().unwrap().clone()
    }

    /// Inclusive range filter over the in-memory history.
    pub fn historical_stats(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<TrafficSample> {
        self.state
            .history
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .cloned()
            .collect()
    }

    /// Avg/min/max rates over the optionally bounded range; all zeros when
    /// nothing falls inside it.
    pub fn stats_summary(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> TrafficSummary {
        let history = self.state.history.read().unwrap();
        let selected: Vec<&TrafficSample> = history
            .iter()
            .filter(|s| start.is_none_or(|t| s.timestamp >= t))
            .filter(|s| end.is_none_or(|t| s.timestamp <= t))
            .collect();
        summarize(&selected)
    }
}

struct TrafficContext {
    interface: String,
    settings: TrafficSettings,
    store: Arc<DataStore>,
    bus: EventBus,
    state: Arc<TrafficState>,
}

async fn run_traffic_loop<S: CounterSource>(
    ctx: TrafficContext,
    mut source: S,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let capacity = ctx.settings.history_capacity();
    let mut ticker = tokio::time::interval(ctx.settings.sample_interval);
    let mut previous: Option<(InterfaceCounters, Instant)> = None;
    let mut last_history_append: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_rx => {
                debug!("Traffic task received shutdown signal.");
                break;
            }

            _ = ticker.tick() => {}
        }

        let now = Instant::now();
        let Some(counters) = source.read(&ctx.interface) else {
            warn!(interface = %ctx.interface, "Interface counters unavailable, keeping previous stats.");
            continue;
        };

        let sample = match previous {
            Some((prev, prev_at)) => {
                build_sample(&prev, &counters, now.duration_since(prev_at).as_secs_f64())
            }
            // First reading has nothing to diff against.
            None => build_sample(&counters, &counters, 0.0),
        };
        previous = Some((counters, now));

        *ctx.state.current.write().unwrap() = Some(sample.clone());

        let due = last_history_append
            .is_none_or(|at| now.duration_since(at) >= ctx.settings.history_granularity);
        if due {
            last_history_append = Some(now);
            push_history(&mut ctx.state.history.write().unwrap(), sample.clone(), capacity);
            if let Err(e) = ctx.store.save_traffic_stats(sample.clone()).await {
                error!(error = %e, "Failed to persist traffic snapshot.");
            }
        }

        ctx.bus.publish(Event::TrafficUpdated(sample));
    }
}

/// Turns two cumulative readings into a rated sample. Rates clamp at zero
/// so a counter reset never reports negative.
fn build_sample(
    previous: &InterfaceCounters,
    current: &InterfaceCounters,
    elapsed_secs: f64,
) -> TrafficSample {
    TrafficSample {
        timestamp: Utc::now(),
        bytes_received: current.bytes_received,
        bytes_sent: current.bytes_sent,
        bytes_received_per_sec: counter_rate(
            previous.bytes_received,
            current.bytes_received,
            elapsed_secs,
        ),
        bytes_sent_per_sec: counter_rate(previous.bytes_sent, current.bytes_sent, elapsed_secs),
        packets_received: current.packets_received,
        packets_sent: current.packets_sent,
    }
}

fn counter_rate(previous: u64, current: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 || current < previous {
        return 0.0;
    }
    (current - previous) as f64 / elapsed_secs
}

/// FIFO append with a strict capacity bound.
fn push_history(history: &mut VecDeque<TrafficSample>, sample: TrafficSample, capacity: usize) {
    history.push_back(sample);
    while history.len() > capacity {
        history.pop_front();
    }
}

fn summarize(samples: &[&TrafficSample]) -> TrafficSummary {
    if samples.is_empty() {
        return TrafficSummary::default();
    }

    let mut summary = TrafficSummary {
        min_received_per_sec: f64::INFINITY,
        min_sent_per_sec: f64::INFINITY,
        sample_count: samples.len(),
        ..TrafficSummary::default()
    };
    for sample in samples {
        summary.avg_received_per_sec += sample.bytes_received_per_sec;
        summary.avg_sent_per_sec += sample.bytes_sent_per_sec;
        summary.min_received_per_sec = summary.min_received_per_sec.min(sample.bytes_received_per_sec);
        summary.min_sent_per_sec = summary.min_sent_per_sec.min(sample.bytes_sent_per_sec);
        summary.max_received_per_sec = summary.max_received_per_sec.max(sample.bytes_received_per_sec);
        summary.max_sent_per_sec = summary.max_sent_per_sec.max(sample.bytes_sent_per_sec);
    }
    summary.avg_received_per_sec /= samples.len() as f64;
    summary.avg_sent_per_sec /= samples.len() as f64;
    summary
}
