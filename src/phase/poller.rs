use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::store::TaskStore;

/// Process-local view of a task's cancellation, raised by the poller.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Background task that periodically reads the persisted cancel flag while
/// a phase runs.
///
/// Each tick awaits its store read to completion before the next `select!`,
/// so [`CancellationPoller::stop`] joining the task also waits out any read
/// that was in flight when the phase returned.
pub struct CancellationPoller {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
    flag: CancellationFlag,
}

impl CancellationPoller {
    pub fn start(
        store: Arc<dyn TaskStore>,
        task_id: &str,
        interval: Duration,
        flag: CancellationFlag,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task_id = task_id.to_string();
        let poll_flag = flag.clone();
        let interval = interval.max(MIN_POLL_INTERVAL);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately; the pre-flight check already covered it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        match store.is_cancel_requested(&task_id).await {
                            Ok(true) => {
                                tracing::info!(task_id = %task_id, "Cancellation requested, stopping phase");
                                poll_flag.cancel();
                                break;
                            }
                            Ok(false) => {}
                            Err(e) => {
                                tracing::warn!(task_id = %task_id, error = %e, "Cancellation poll failed");
                            }
                        }
                    }
                }
            }
        });

        Self {
            stop_tx: Some(stop_tx),
            handle,
            flag,
        }
    }

    /// Stop polling and wait for the poll task to finish. Returns whether
    /// cancellation was observed.
    pub async fn stop(mut self) -> bool {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            tracing::warn!(error = %e, "Cancellation poller task failed");
        }
        self.flag.is_cancelled()
    }
}
