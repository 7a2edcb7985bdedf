//! Periodic expired-ticket sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::controller::AdmissionController;

/// Sweep expired tickets now and then every `interval` until `shutdown` fires.
pub fn spawn_cleanup(
    controller: Arc<AdmissionController>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::debug!(interval = ?interval, "Expired-ticket sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = controller.delete_expired_tickets().await;
                    if removed > 0 {
                        tracing::info!(removed, "Swept expired tickets");
                    }
                }
            }
        }

        tracing::debug!("Expired-ticket sweeper stopped");
    })
}
