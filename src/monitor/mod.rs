//! Per-device monitoring schedulers. Each monitored device owns an
//! independent tokio task per scheduler, so one device's slow probe never
//! delays another's tick.

pub mod health;
pub mod liveness;

pub use health::HealthSampler;
pub use liveness::LivenessMonitor;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle to one running schedule: the task plus its shutdown trigger.
pub(crate) struct MonitorTask {
    pub(crate) handle: JoinHandle<()>,
    pub(crate) shutdown: oneshot::Sender<()>,
}

impl MonitorTask {
    /// Signals the task to stop and waits for it to wind down, so no tick
    /// can fire after this returns.
    pub(crate) async fn stop(self) {
        if self.shutdown.send(()).is_err() {
            debug!("Monitor task had already finished before shutdown signal.");
        }
        let _ = self.handle.await;
    }
}
