//! Domain layer: log records and the in-memory key-value store.

pub mod event;
pub mod store;

pub use event::{Event, EventKind, Mutation};
pub use store::{KvStore, StoreLimits};
