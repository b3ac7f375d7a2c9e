//! Periodic reconciliation with manual triggers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast;

use super::reconciler::{Reconciler, SyncOutcome};

/// Drives [`Reconciler::sync_now`] on a fixed interval.
pub struct SyncScheduler {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl SyncScheduler {
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the loop on a background thread driving `runtime`.
    ///
    /// The first run happens right away. Every message on `trigger_rx` starts
    /// an extra run.
    pub fn start(&self, runtime: Handle, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let reconciler = Arc::clone(&self.reconciler);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        std::thread::spawn(move || {
            runtime.block_on(async {
                let mut interval_timer = tokio::time::interval(interval);
                interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                loop {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    tokio::select! {
                        _ = interval_timer.tick() => {},
                        Ok(()) = trigger_rx.recv() => {
                            log::info!("Manual sync triggered");
                        },
                    }

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    match reconciler.sync_now().await {
                        Ok(SyncOutcome::Completed(report)) => {
                            if report.applied + report.deleted + report.pushed_changes > 0 {
                                log::info!(
                                    "Sync: {} applied, {} deleted, {} pushed in {}ms",
                                    report.applied,
                                    report.deleted,
                                    report.pushed_changes,
                                    report.duration_ms
                                );
                            }
                        }
                        Ok(SyncOutcome::Busy) => log::debug!("Sync skipped, loop busy"),
                        Err(e) => log::debug!("Sync run ended with error: {}", e),
                    }
                }

                log::info!("Sync scheduler stopped");
            });
        })
    }

    /// Signals the scheduler to stop after the current run.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}
