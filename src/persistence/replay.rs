//! Startup recovery: the checked replay stream and the driver that feeds
//! it into the store before the logger goes live.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, ready};

use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};

use super::file::FileBackend;
use super::logger::{EventSource, TransactionLog, TransactionLogger};
use super::postgres::PostgresBackend;
use crate::config::{LogBackendConfig, LogConfig};
use crate::domain::{Event, EventKind};
use crate::error::{LogError, RecoveryError, StoreError};

/// Receiver of replayed events: the in-memory store, seen only through
/// its two apply operations.
#[async_trait]
pub trait ReplayTarget: Send + Sync {
    /// Sets `key` to `value`.
    ///
    /// # Errors
    ///
    /// Whatever validation the store applies to live writes.
    async fn apply_put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError>;

    /// Removes `key`.
    ///
    /// # Errors
    ///
    /// Whatever validation the store applies to live deletes.
    async fn apply_delete(&self, key: Vec<u8>) -> Result<(), StoreError>;
}

/// Persisted events in increasing sequence order.
///
/// Yields at most one error, as its last item: a read or decode failure
/// from the backend, or [`LogError::OutOfSequence`] when a record's
/// sequence number does not exceed the one before it. Nothing past a bad
/// record is emitted.
pub struct ReplayStream {
    source: EventSource,
    last_sequence: u64,
    finished: bool,
    completion: Arc<OnceLock<u64>>,
}

impl ReplayStream {
    pub(crate) fn new(source: EventSource, completion: Arc<OnceLock<u64>>) -> Self {
        Self {
            source,
            last_sequence: 0,
            finished: false,
            completion,
        }
    }

    /// Sequence number of the last event yielded so far, `0` before the first.
    #[must_use]
    pub const fn last_sequence(&self) -> u64 {
        self.last_sequence
    }
}

impl fmt::Debug for ReplayStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayStream")
            .field("last_sequence", &self.last_sequence)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Stream for ReplayStream {
    type Item = Result<Event, LogError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        let item = ready!(this.source.poll_next_unpin(cx));
        let item = match item {
            Some(Ok(event)) if event.sequence <= this.last_sequence => {
                this.finished = true;
                Some(Err(LogError::OutOfSequence {
                    previous: this.last_sequence,
                    found: event.sequence,
                }))
            }
            Some(Ok(event)) => {
                this.last_sequence = event.sequence;
                Some(Ok(event))
            }
            Some(Err(err)) => {
                this.finished = true;
                Some(Err(err))
            }
            None => {
                this.finished = true;
                // Only a clean end unlocks `start`.
                let _ = this.completion.set(this.last_sequence);
                None
            }
        };
        Poll::Ready(item)
    }
}

/// Totals from a completed replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Events applied.
    pub events: u64,
    /// Of which puts.
    pub puts: u64,
    /// Of which deletes.
    pub deletes: u64,
    /// Highest sequence number seen, `0` for an empty log.
    pub last_sequence: u64,
}

/// Replays the whole log into `target`, in order.
///
/// Does not start the logger.
///
/// # Errors
///
/// The first log failure ([`RecoveryError::Log`]) or store rejection
/// ([`RecoveryError::Apply`]); replay stops there.
pub async fn restore(
    logger: &dyn TransactionLogger,
    target: &dyn ReplayTarget,
) -> Result<ReplaySummary, RecoveryError> {
    let mut events = logger.replay().await?;
    let mut summary = ReplaySummary::default();

    while let Some(item) = events.next().await {
        let event = item?;
        let sequence = event.sequence;
        let applied = match event.kind {
            EventKind::Put => {
                summary.puts += 1;
                target.apply_put(event.key, event.value).await
            }
            EventKind::Delete => {
                summary.deletes += 1;
                target.apply_delete(event.key).await
            }
        };
        applied.map_err(|source| RecoveryError::Apply { sequence, source })?;
        summary.events += 1;
    }
    summary.last_sequence = events.last_sequence();

    tracing::info!(
        backend = logger.backend_name(),
        events = summary.events,
        puts = summary.puts,
        deletes = summary.deletes,
        last_sequence = summary.last_sequence,
        "transaction log replayed"
    );
    Ok(summary)
}

/// Opens the backend selected by `config`.
///
/// # Errors
///
/// [`LogError::Open`] if the log file cannot be opened,
/// [`LogError::Connect`] or [`LogError::Schema`] for the database.
pub async fn open_logger(config: &LogConfig) -> Result<Box<dyn TransactionLogger>, LogError> {
    let logger: Box<dyn TransactionLogger> = match &config.backend {
        LogBackendConfig::File(file) => Box::new(TransactionLog::new(
            FileBackend::open(file).await?,
            config.queue_capacity,
        )),
        LogBackendConfig::Postgres(postgres) => Box::new(TransactionLog::new(
            PostgresBackend::connect(postgres).await?,
            config.queue_capacity,
        )),
    };
    Ok(logger)
}

/// Opens the configured logger, replays it into `target`, then starts it.
///
/// On failure the logger is closed before the error is returned, so no
/// backend resource outlives a failed startup.
///
/// # Errors
///
/// Any construction, replay or apply failure.
pub async fn init_logger(
    config: &LogConfig,
    target: &dyn ReplayTarget,
) -> Result<(Arc<dyn TransactionLogger>, ReplaySummary), RecoveryError> {
    let logger = open_logger(config).await?;

    let recovered = match restore(logger.as_ref(), target).await {
        Ok(summary) => logger
            .start()
            .await
            .map(|()| summary)
            .map_err(RecoveryError::from),
        Err(err) => Err(err),
    };

    match recovered {
        Ok(summary) => Ok((Arc::from(logger), summary)),
        Err(err) => {
            if let Err(close_err) = logger.close().await {
                tracing::warn!(
                    error = %close_err,
                    "failed to close transaction logger after aborted startup"
                );
            }
            Err(err)
        }
    }
}
