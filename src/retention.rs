//! Retention sweeper (§4.10): deletes aged alerts and their send records,
//! on a `start(cancel)` ticker loop with a one-minute warmup delay before
//! the first run.

use crate::store::Store;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WARMUP_DELAY: Duration = Duration::from_secs(60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct RetentionSweeper {
    store: Store,
}

impl RetentionSweeper {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn start(self, cancel: CancellationToken) {
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(WARMUP_DELAY) => {}
            }

            loop {
                self.sweep_once().await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
                }
            }
        });
    }

    async fn sweep_once(&self) {
        let retention_days = match self.store.retention_days().await {
            Ok(days) => days,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load retention setting, using default");
                90
            }
        };

        match self.store.sweep_expired(retention_days).await {
            Ok(deleted) => tracing::info!(deleted, retention_days, "retention sweep complete"),
            Err(err) => tracing::error!(error = %err, "retention sweep failed"),
        }
    }
}
