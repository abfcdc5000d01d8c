//! Background liveness signaling.
//!
//! A [`HeartbeatSender`] runs one spawned task that invokes a
//! [`HeartbeatProbe`] on a fixed interval, the first time right after
//! starting. A missed beat is tried again on the next tick. A rejection is
//! final: the task ends and raises the rejection flag, which whoever owns
//! the session watches.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Result of one liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The coordinator acknowledged the node.
    Alive,
    /// No usable answer; try again next interval.
    Unreachable,
    /// The coordinator no longer recognizes the node.
    Rejected,
}

/// One liveness check. Never retried.
#[async_trait]
pub trait HeartbeatProbe: Send + Sync {
    async fn probe(&self) -> ProbeOutcome;
}

struct Running {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the heartbeat task.
pub struct HeartbeatSender {
    probe: Arc<dyn HeartbeatProbe>,
    interval: Duration,
    rejected: Arc<watch::Sender<bool>>,
    running: Option<Running>,
}

impl HeartbeatSender {
    pub fn new(probe: Arc<dyn HeartbeatProbe>, interval: Duration) -> Self {
        let (rejected, _) = watch::channel(false);
        Self {
            probe,
            interval: interval.max(Duration::from_millis(1)),
            rejected: Arc::new(rejected),
            running: None,
        }
    }

    /// Start the task. No-op if it is already running.
    ///
    /// Clears the rejection flag: a rejection belongs to the session that
    /// received it.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        // Reap a task that ended on its own
        self.running = None;
        self.rejected.send_replace(false);

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(beat(
            Arc::clone(&self.probe),
            self.interval,
            Arc::clone(&self.rejected),
            shutdown_rx,
        ));
        self.running = Some(Running { shutdown, handle });
        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "heartbeat started");
    }

    /// Stop the task and wait until it has terminated.
    ///
    /// No probe is issued after this returns.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        // The task may already be gone after a rejection
        let _ = running.shutdown.send(());
        if let Err(e) = running.handle.await {
            if e.is_panic() {
                tracing::error!(error = %e, "heartbeat task panicked");
            }
        }
        tracing::debug!("heartbeat stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|running| !running.handle.is_finished())
            .unwrap_or(false)
    }

    /// Whether the coordinator has rejected a heartbeat.
    pub fn is_rejected(&self) -> bool {
        *self.rejected.borrow()
    }

    /// Subscribe to the rejection flag.
    pub fn rejection(&self) -> watch::Receiver<bool> {
        self.rejected.subscribe()
    }
}

impl Drop for HeartbeatSender {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.handle.abort();
        }
    }
}

impl std::fmt::Debug for HeartbeatSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatSender")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .field("rejected", &self.is_rejected())
            .finish()
    }
}

async fn beat(
    probe: Arc<dyn HeartbeatProbe>,
    interval: Duration,
    rejected: Arc<watch::Sender<bool>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        let outcome = tokio::select! {
            _ = &mut shutdown => break,
            outcome = probe.probe() => outcome,
        };

        match outcome {
            ProbeOutcome::Alive => tracing::trace!("heartbeat acknowledged"),
            ProbeOutcome::Unreachable => {
                tracing::debug!("heartbeat got no response, retrying next interval")
            }
            ProbeOutcome::Rejected => {
                tracing::error!(
                    "Heartbeat failed unexpectedly. The coordinator does not recognize this node."
                );
                rejected.send_replace(true);
                break;
            }
        }
    }
}
