//! Pluggable persistence contracts and an in-memory reference
//! implementation of each.

mod memory;
mod traits;

pub use memory::{
    InMemoryBackend, InMemoryEventStore, InMemoryHistoryStore, InMemoryStatePersister,
    InMemoryTickScheduler,
};
pub use traits::{
    EventStore, HistoryStore, PendingTick, StatePersister, StoreError, StoredEvent, TickScheduler,
};
