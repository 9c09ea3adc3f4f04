//! Durable store for devices and time-series history.
//!
//! The full dataset lives in memory and mirrors a single JSON document on
//! disk. All mutation flows through a dedicated writer thread draining an
//! mpsc queue, so writes are totally ordered and two saves can never
//! interleave. Each write serializes the whole document to a temp file and
//! renames it over the real path; the on-disk file is always a complete
//! snapshot. Reads copy out of the in-memory document directly.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::models::{Device, HealthMetrics, TrafficSample};

/// The complete persisted dataset. Serialized wholesale on every write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Document {
    devices: Vec<Device>,
    traffic_stats: Vec<TrafficSample>,
    health_metrics: Vec<HealthMetrics>,
}

enum WriteOp {
    SaveDevice(Device),
    DeleteDevice(String),
    /// Refresh `is_active` (and `last_seen` when active) on a known device.
    TouchDevice {
        ip: String,
        is_active: bool,
        seen_at: DateTime<Utc>,
    },
    AppendTraffic(TrafficSample),
    AppendHealth(HealthMetrics),
    /// Drop traffic and health entries strictly older than the cutoff.
    Cleanup(DateTime<Utc>),
    Flush,
}

struct WriteRequest {
    op: WriteOp,
    reply: oneshot::Sender<Result<u64, StoreError>>,
}

pub struct DataStore {
    document: Arc<RwLock<Document>>,
    tx: Mutex<Option<mpsc::Sender<WriteRequest>>>,
    writer: Mutex<Option<thread::JoinHandle<()>>>,
    path: PathBuf,
}

impl DataStore {
    /// Opens the store at `path`, spawning the writer thread. A missing
    /// file yields an empty dataset; an unparseable file is logged and
    /// treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let document = Arc::new(RwLock::new(load_document(&path)));
        let (tx, rx) = mpsc::channel();

        let writer_doc = Arc::clone(&document);
        let writer_path = path.clone();
        let writer = thread::Builder::new()
            .name("lanpulse-store-writer".to_string())
            .spawn(move || writer_task(writer_path, writer_doc, rx))?;

        Ok(Self {
            document,
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Upsert by IP address.
    pub async fn save_device(&self, device: Device) -> Result<(), StoreError> {
        self.submit(WriteOp::SaveDevice(device)).await.map(|_| ())
    }

    pub async fn delete_device(&self, ip: &str) -> Result<(), StoreError> {
        self.submit(WriteOp::DeleteDevice(ip.to_string())).await.map(|_| ())
    }

    pub async fn touch_device(
        &self,
        ip: &str,
        is_active: bool,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.submit(WriteOp::TouchDevice {
            ip: ip.to_string(),
            is_active,
            seen_at,
        })
        .await
        .map(|_| ())
    }

    pub async fn save_traffic_stats(&self, sample: TrafficSample) -> Result<(), StoreError> {
        self.submit(WriteOp::AppendTraffic(sample)).await.map(|_| ())
    }

    pub async fn save_health_metrics(&self, metrics: HealthMetrics) -> Result<(), StoreError> {
        self.submit(WriteOp::AppendHealth(metrics)).await.map(|_| ())
    }

    /// Removes history strictly older than `cutoff`. Entries at or after
    /// the cutoff stay. Returns the number of entries removed; when that
    /// is zero the disk write is skipped entirely.
    pub async fn cleanup_old_data(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.submit(WriteOp::Cleanup(cutoff)).await
    }

    /// Forces a full snapshot to disk even without a pending mutation.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.submit(WriteOp::Flush).await.map(|_| ())
    }

    pub fn get_device(&self, ip: &str) -> Option<Device> {
        let doc = self.document.read().unwrap();
        doc.devices.iter().find(|d| d.ip_address == ip).cloned()
    }

    pub fn get_all_devices(&self) -> Vec<Device> {
        self.document.read().unwrap().devices.clone()
    }

    /// Inclusive range filter over the traffic log.
    pub fn get_traffic_stats(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<TrafficSample> {
        let doc = self.document.read().unwrap();
        doc.traffic_stats
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .cloned()
            .collect()
    }

    /// Inclusive range filter over one device's health history.
    pub fn get_health_metrics(
        &self,
        ip: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<HealthMetrics> {
        let doc = self.document.read().unwrap();
        doc.health_metrics
            .iter()
            .filter(|m| m.ip_address == ip && m.last_updated >= start && m.last_updated <= end)
            .cloned()
            .collect()
    }

    /// Shuts the writer down after draining every accepted write. Safe to
    /// call more than once.
    pub async fn close(&self) -> Result<(), StoreError> {
        // Dropping the sender lets the writer drain its queue and exit.
        self.tx.lock().unwrap().take();
        let handle = self.writer.lock().unwrap().take();
        if let Some(handle) = handle {
            let joined = tokio::task::spawn_blocking(move || handle.join()).await;
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(_)) => error!("Store writer thread panicked during shutdown."),
                Err(e) => error!(error = %e, "Failed to join store writer thread."),
            }
        }
        Ok(())
    }

    async fn submit(&self, op: WriteOp) -> Result<u64, StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sender = {
            let guard = self.tx.lock().unwrap();
            guard.clone().ok_or(StoreError::WriterGone)?
        };
        sender
            .send(WriteRequest {
                op,
                reply: reply_tx,
            })
            .map_err(|_| StoreError::WriterGone)?;
        reply_rx.await.map_err(|_| StoreError::WriterGone)?
    }
}

fn load_document(path: &Path) -> Document {
    if !path.exists() {
        info!(path = ?path, "No data file yet, starting with an empty dataset.");
        return Document::default();
    }
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(doc) => doc,
            Err(e) => {
                error!(path = ?path, error = %e, "Data file is corrupt, starting with an empty dataset.");
                Document::default()
            }
        },
        Err(e) => {
            error!(path = ?path, error = %e, "Failed to read data file, starting with an empty dataset.");
            Document::default()
        }
    }
}

/// Runs on a dedicated OS thread. Applies each queued op to the in-memory
/// document, then snapshots the document to disk before replying, so a
/// caller's await completes only once its write is durable. Exits when the
/// last sender is dropped, after draining the queue.
fn writer_task(path: PathBuf, document: Arc<RwLock<Document>>, rx: mpsc::Receiver<WriteRequest>) {
    info!(path = ?path, "Store writer thread started.");

    while let Ok(request) = rx.recv() {
        let (mutated, removed) = apply_op(&document, &request.op);

        let result = if mutated {
            persist_document(&path, &document).map(|_| removed)
        } else {
            Ok(removed)
        };

        if let Err(e) = &result {
            error!(path = ?path, error = %e, "Failed to persist data document.");
        }
        // The caller may have given up waiting; that is not our problem.
        let _ = request.reply.send(result);
    }

    info!("Store queue closed, writer thread finished.");
}

/// Returns (whether the document changed and needs a disk write, entries
/// removed for cleanup ops).
fn apply_op(document: &Arc<RwLock<Document>>, op: &WriteOp) -> (bool, u64) {
    let mut doc = document.write().unwrap();
    match op {
        WriteOp::SaveDevice(device) => {
            match doc.devices.iter_mut().find(|d| d.ip_address == device.ip_address) {
                Some(existing) => *existing = device.clone(),
                None => doc.devices.push(device.clone()),
            }
            (true, 0)
        }
        WriteOp::DeleteDevice(ip) => {
            let before = doc.devices.len();
            doc.devices.retain(|d| d.ip_address != *ip);
            (doc.devices.len() != before, 0)
        }
        WriteOp::TouchDevice {
            ip,
            is_active,
            seen_at,
        } => match doc.devices.iter_mut().find(|d| d.ip_address == *ip) {
            Some(device) => {
                device.is_active = *is_active;
                if *is_active {
                    device.last_seen = *seen_at;
                }
                (true, 0)
            }
            None => {
                warn!(ip = %ip, "Status change for a device the store does not know.");
                (false, 0)
            }
        },
        WriteOp::AppendTraffic(sample) => {
            doc.traffic_stats.push(sample.clone());
            (true, 0)
        }
        WriteOp::AppendHealth(metrics) => {
            doc.health_metrics.push(metrics.clone());
            (true, 0)
        }
        WriteOp::Cleanup(cutoff) => {
            let before = doc.traffic_stats.len() + doc.health_metrics.len();
            doc.traffic_stats.retain(|s| s.timestamp >= *cutoff);
            doc.health_metrics.retain(|m| m.last_updated >= *cutoff);
            let removed = (before - doc.traffic_stats.len() - doc.health_metrics.len()) as u64;
            if removed > 0 {
                debug!(removed, cutoff = %cutoff, "Purged expired history entries.");
            }
            (removed > 0, removed)
        }
        WriteOp::Flush => (true, 0),
    }
}

/// Atomic replace: serialize, write a sibling temp file, rename over the
/// real path. Readers of the file never observe a partial document.
fn persist_document(path: &Path, document: &Arc<RwLock<Document>>) -> Result<(), StoreError> {
    let bytes = {
        let doc = document.read().unwrap();
        serde_json::to_vec_pretty(&*doc)?
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}
