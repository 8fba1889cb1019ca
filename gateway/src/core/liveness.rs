//! Connection liveness monitoring.
//!
//! Two timers run on the same cadence: one emits a probe, the other checks how long ago the
//! last acknowledgment arrived. Silence for longer than twice the interval is reported as a
//! connection loss. The check runs at `interval`, `2 × interval`, ..., so with the last
//! acknowledgment at `t0` the loss is reported by the check at `t0 + 3 × interval`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, warn};

/// Default probe interval
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Invoked every probe tick
pub type ProbeCallback = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Invoked on every check that finds the connection silent
pub type ConnectionLossCallback =
    Arc<dyn Fn(Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct LivenessMonitor {
    interval: Duration,
    last_ack: Arc<Mutex<Instant>>,
    probe_task: Option<JoinHandle<()>>,
    check_task: Option<JoinHandle<()>>,
}

impl LivenessMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            last_ack: Arc::new(Mutex::new(Instant::now())),
            probe_task: None,
            check_task: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start probing. Restarting an active monitor replaces its timers.
    pub fn start(&mut self, probe: ProbeCallback, on_loss: ConnectionLossCallback) {
        self.stop();
        *self.last_ack.lock() = Instant::now();

        let period = self.interval;
        let first_tick = Instant::now() + period;

        self.probe_task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(first_tick, period);
            loop {
                ticker.tick().await;
                probe().await;
            }
        }));

        let last_ack = self.last_ack.clone();
        let threshold = period * 2;
        self.check_task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(first_tick, period);
            loop {
                ticker.tick().await;
                let silent_for = { last_ack.lock().elapsed() };
                if silent_for > threshold {
                    warn!(
                        silent_ms = silent_for.as_millis() as u64,
                        "No heartbeat acknowledgment, reporting connection loss"
                    );
                    on_loss(silent_for).await;
                }
            }
        }));

        debug!(interval_ms = period.as_millis() as u64, "Liveness monitor started");
    }

    /// Record an acknowledgment from the peer
    pub fn acknowledge(&self) {
        *self.last_ack.lock() = Instant::now();
    }

    /// Cancel both timers. Safe to call repeatedly or before `start`.
    pub fn stop(&mut self) {
        let mut stopped = false;
        if let Some(task) = self.probe_task.take() {
            task.abort();
            stopped = true;
        }
        if let Some(task) = self.check_task.take() {
            task.abort();
            stopped = true;
        }
        if stopped {
            debug!("Liveness monitor stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.probe_task.is_some()
    }

    pub fn time_since_last_ack(&self) -> Duration {
        self.last_ack.lock().elapsed()
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
