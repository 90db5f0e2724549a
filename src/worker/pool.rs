//! Worker pool: claims batches of ticks and dispatches each to the engine
//! with bounded concurrency.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::poller::{PollerConfig, PollerError, TickPoller};
use crate::engine::Engine;
use crate::persistence::{StoreError, TickScheduler};

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Unique worker id (generated if not provided).
    pub worker_id: String,

    /// Maximum concurrent tick dispatches.
    pub max_concurrency: usize,

    /// Poller configuration.
    pub poller: PollerConfig,

    /// Graceful shutdown timeout.
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            max_concurrency: 4,
            poller: PollerConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Worker pool lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    Running,
    Draining,
    Stopped,
}

/// Worker pool errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("poller error: {0}")]
    Poller(#[from] PollerError),

    #[error("worker pool is already running")]
    AlreadyRunning,

    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

/// Claims and dispatches ticks for every flow registered with an [`Engine`].
///
/// No heartbeat and no stale-tick reclamation: a tick that is never
/// acknowledged just sits `Running` until an operator retries it, exactly
/// as the engine's "no internal timeout" contract promises.
pub struct WorkerPool {
    engine: Engine,
    tick_scheduler: Arc<dyn TickScheduler>,
    config: WorkerPoolConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    status: std::sync::RwLock<WorkerPoolStatus>,
    active_ticks: Arc<Semaphore>,
    poll_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(engine: Engine, tick_scheduler: Arc<dyn TickScheduler>, config: WorkerPoolConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            engine,
            tick_scheduler,
            config: config.clone(),
            shutdown_tx,
            shutdown_rx,
            status: std::sync::RwLock::new(WorkerPoolStatus::Stopped),
            active_ticks: Arc::new(Semaphore::new(config.max_concurrency)),
            poll_handle: std::sync::Mutex::new(None),
        }
    }

    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub fn start(&self) -> Result<(), WorkerPoolError> {
        {
            let status = *self.status.read().unwrap();
            if status == WorkerPoolStatus::Running {
                return Err(WorkerPoolError::AlreadyRunning);
            }
        }

        info!(
            worker_id = %self.config.worker_id,
            max_concurrency = self.config.max_concurrency,
            "starting worker pool"
        );

        *self.status.write().unwrap() = WorkerPoolStatus::Running;
        self.start_poll_loop();
        Ok(())
    }

    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        {
            let status = *self.status.read().unwrap();
            if status == WorkerPoolStatus::Stopped {
                return Ok(());
            }
        }

        info!(worker_id = %self.config.worker_id, "initiating graceful shutdown");
        *self.status.write().unwrap() = WorkerPoolStatus::Draining;
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            let available = self.active_ticks.available_permits();
            if available == self.config.max_concurrency {
                debug!("all dispatches completed");
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.config.max_concurrency - available,
                    "shutdown timeout reached"
                );
                return Err(WorkerPoolError::ShutdownTimeout);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        *self.status.write().unwrap() = WorkerPoolStatus::Stopped;
        info!(worker_id = %self.config.worker_id, "worker pool stopped");
        Ok(())
    }

    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.read().unwrap()
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    fn start_poll_loop(&self) {
        let engine = self.engine.clone();
        let tick_scheduler = Arc::clone(&self.tick_scheduler);
        let config = self.config.clone();
        let active_ticks = Arc::clone(&self.active_ticks);
        let shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            let poller = TickPoller::new(
                tick_scheduler,
                config.worker_id.clone(),
                config.poller.clone(),
                shutdown_rx,
            );

            loop {
                if poller.is_shutdown() {
                    debug!("poll loop: shutdown requested");
                    break;
                }

                let available_slots = active_ticks.available_permits();
                if available_slots == 0 {
                    if poller.wait().await {
                        break;
                    }
                    continue;
                }

                match poller.poll(available_slots).await {
                    Ok(ticks) => {
                        for tick in ticks {
                            let permit = match active_ticks.clone().try_acquire_owned() {
                                Ok(p) => p,
                                Err(_) => {
                                    debug!("no permits available");
                                    break;
                                }
                            };

                            let engine = engine.clone();
                            tokio::spawn(async move {
                                let flow_instance_id = tick.flow_instance_id;
                                if let Err(err) = engine.dispatch_tick(&tick.flow_id, flow_instance_id).await {
                                    error!(%err, flow_id = %tick.flow_id, %flow_instance_id, "tick dispatch failed");
                                }
                                drop(permit);
                            });
                        }
                    }
                    Err(err) => {
                        error!(%err, "poll error");
                    }
                }

                if poller.wait().await {
                    break;
                }
            }

            debug!("poll loop exited");
        });

        *self.poll_handle.lock().unwrap() = Some(handle);
    }
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
        let config = WorkerPoolConfig::default();
        assert!(!config.worker_id.is_empty());
        assert_eq!(config.max_concurrency, 4);
    }

    #[test]
    fn config_builder() {
        let config = WorkerPoolConfig::new()
            .with_worker_id("test-worker")
            .with_max_concurrency(20)
            .with_shutdown_timeout(Duration::from_secs(5));
        assert_eq!(config.worker_id, "test-worker");
        assert_eq!(config.max_concurrency, 20);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }
}
