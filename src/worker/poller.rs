//! Tick polling.
//!
//! Unlike a generic task queue, a tick carries no payload the poller needs
//! to backoff over: an idle poll just means no instance is ready yet, not
//! that the system is under load. So polling here is a flat configurable
//! delay rather than adaptive backoff.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, instrument};

use crate::persistence::{PendingTick, StoreError, TickScheduler};

/// Polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Delay between polls that found no ready ticks.
    #[serde(with = "duration_millis")]
    pub idle_delay: Duration,

    /// Maximum ticks to claim per poll.
    pub batch_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            idle_delay: Duration::from_millis(200),
            batch_size: 10,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = delay;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// Claims batches of [`PendingTick`]s on behalf of one worker.
pub struct TickPoller {
    scheduler: Arc<dyn TickScheduler>,
    worker_id: String,
    config: PollerConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl TickPoller {
    pub fn new(
        scheduler: Arc<dyn TickScheduler>,
        worker_id: String,
        config: PollerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            scheduler,
            worker_id,
            config,
            shutdown_rx,
        }
    }

    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn poll(&self, max_ticks: usize) -> Result<Vec<PendingTick>, PollerError> {
        if *self.shutdown_rx.borrow() {
            debug!("poller shutdown requested");
            return Ok(vec![]);
        }

        let batch_size = max_ticks.min(self.config.batch_size);
        let ticks = self
            .scheduler
            .claim_batch(&self.worker_id, batch_size)
            .await
            .map_err(PollerError::Store)?;

        if ticks.is_empty() {
            debug!("no ready ticks");
        } else {
            debug!(count = ticks.len(), "claimed ticks");
        }
        Ok(ticks)
    }

    /// Sleep for the idle delay, waking early on shutdown. Returns `true`
    /// if shutdown was signaled.
    pub async fn wait(&self) -> bool {
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.config.idle_delay) => false,
            _ = shutdown_rx.changed() => {
                debug!("shutdown signal received during wait");
                true
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}

/// Poller-level errors.
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = PollerConfig::default();
        assert_eq!(config.idle_delay, Duration::from_millis(200));
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn config_builder() {
        let config = PollerConfig::new()
            .with_idle_delay(Duration::from_millis(50))
            .with_batch_size(20);
        assert_eq!(config.idle_delay, Duration::from_millis(50));
        assert_eq!(config.batch_size, 20);
    }
}
