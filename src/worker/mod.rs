//! Tick polling and dispatch, with bounded concurrency and graceful
//! shutdown.

mod poller;
mod pool;

pub use poller::{PollerConfig, PollerError, TickPoller};
pub use pool::{WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus};
