//! Persistence layer: the transaction log.
//!
//! Every applied mutation is handed to a [`TransactionLogger`], which
//! persists it in the background through one of two backends: an
//! append-only file ([`FileBackend`]) or a PostgreSQL table
//! ([`PostgresBackend`]). At startup [`init_logger`] replays the log into
//! the store before switching the logger to live mode.

pub mod file;
pub mod logger;
pub mod postgres;
pub mod replay;

pub use file::FileBackend;
pub use logger::{
    DEFAULT_QUEUE_CAPACITY, EventSource, LogBackend, TransactionLog, TransactionLogger,
};
pub use postgres::PostgresBackend;
pub use replay::{ReplayStream, ReplaySummary, ReplayTarget, init_logger, open_logger, restore};
