//! The transaction logger contract and its queue-plus-writer core.
//!
//! [`TransactionLogger`] is the capability set the rest of the server sees.
//! [`TransactionLog`] implements it once, generically over a
//! [`LogBackend`], so both storage media share the same lifecycle, queue
//! and sequencing rules:
//!
//! ```text
//! handlers ──record_put/record_delete──► bounded mpsc ──► writer task ──► backend
//!                                                            │
//!                                          errors() ◄────────┘ (first failure, then stop)
//! ```
//!
//! Only the writer task touches the backend while live, so sequence
//! numbers are assigned without any lock around the counter.

use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;

use super::replay::ReplayStream;
use crate::domain::{Event, Mutation};
use crate::error::LogError;

/// Default capacity of the producer queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Persisted events in storage order, as read by a backend. Sequence
/// checking happens one layer up, in [`ReplayStream`].
pub type EventSource = BoxStream<'static, Result<Event, LogError>>;

/// Durable, ordered record of every store mutation.
///
/// Expected call order: [`replay`](Self::replay) (drained to the end),
/// then [`start`](Self::start), then any number of `record_*` calls, then
/// [`close`](Self::close).
#[async_trait]
pub trait TransactionLogger: Send + Sync + fmt::Debug {
    /// Enqueues a put for asynchronous persistence.
    ///
    /// Waits only while the queue is full. Persistence failures are not
    /// reported here; they arrive on [`errors`](Self::errors).
    ///
    /// # Errors
    ///
    /// [`LogError::NotStarted`], [`LogError::Closed`] or
    /// [`LogError::WriterStopped`] when the logger is not accepting events.
    async fn record_put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), LogError>;

    /// Enqueues a delete for asynchronous persistence.
    ///
    /// # Errors
    ///
    /// Same conditions as [`record_put`](Self::record_put).
    async fn record_delete(&self, key: Vec<u8>) -> Result<(), LogError>;

    /// Takes the receiving end of the asynchronous error channel.
    ///
    /// Returns `None` once the receiver has been handed out. The channel
    /// closes when the writer exits.
    async fn errors(&self) -> Option<mpsc::Receiver<LogError>>;

    /// Streams previously persisted events in increasing sequence order.
    ///
    /// Read and decode failures are delivered as the final item of the
    /// stream.
    ///
    /// # Errors
    ///
    /// [`LogError::ReplayAlreadyTaken`] if replay was already requested or
    /// the logger is live, [`LogError::Closed`] after `close`.
    async fn replay(&self) -> Result<ReplayStream, LogError>;

    /// Switches to live mode by spawning the writer task.
    ///
    /// # Errors
    ///
    /// [`LogError::ReplayIncomplete`] unless a replay stream ran to its
    /// clean end, [`LogError::AlreadyStarted`] on a second call,
    /// [`LogError::Closed`] after `close`.
    async fn start(&self) -> Result<(), LogError>;

    /// Stops accepting events, waits for the writer to persist everything
    /// already queued, then releases the backend. Safe to call repeatedly
    /// and in any phase.
    ///
    /// # Errors
    ///
    /// Returns the backend's failure to release its resource, or
    /// [`LogError::WriterTask`] if the writer task panicked.
    async fn close(&self) -> Result<(), LogError>;

    /// Short name of the storage medium, e.g. `"file"`.
    fn backend_name(&self) -> &'static str;
}

/// A storage medium for the transaction log.
///
/// Implementations do not need to be thread-safe for writes: while the log
/// is live a backend is owned by exactly one writer task.
#[async_trait]
pub trait LogBackend: Send + Sync + 'static {
    /// Short name used in logs and health output.
    fn name(&self) -> &'static str;

    /// Persists one mutation and returns it with its assigned sequence number.
    ///
    /// # Errors
    ///
    /// Any I/O or query failure. The writer treats it as fatal.
    async fn append(&mut self, mutation: Mutation) -> Result<Event, LogError>;

    /// Opens an independent reader over everything persisted so far.
    ///
    /// # Errors
    ///
    /// Failure to open the underlying reader.
    async fn open_replay(&self) -> Result<EventSource, LogError>;

    /// Called once before going live with the last replayed sequence number.
    /// Backends that let the database number rows can ignore it.
    fn resume_after(&mut self, _sequence: u64) {}

    /// Releases the underlying resource. Must tolerate repeated calls.
    ///
    /// # Errors
    ///
    /// Failure to flush or release the resource.
    async fn close(&mut self) -> Result<(), LogError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Opened,
    Replaying,
    Live,
    Closed,
}

struct LogState<B> {
    phase: Phase,
    /// Held here until `start` moves it into the writer task.
    backend: Option<B>,
    writer: Option<JoinHandle<B>>,
    errors_tx: Option<mpsc::Sender<LogError>>,
    errors_rx: Option<mpsc::Receiver<LogError>>,
}

/// [`TransactionLogger`] over any [`LogBackend`].
pub struct TransactionLog<B: LogBackend> {
    name: &'static str,
    capacity: usize,
    sender: RwLock<Option<mpsc::Sender<Mutation>>>,
    state: Mutex<LogState<B>>,
    /// Set by the replay stream when it reaches a clean end.
    replayed: Arc<OnceLock<u64>>,
}

impl<B: LogBackend> TransactionLog<B> {
    /// Wraps an opened backend. `capacity` bounds the producer queue and is
    /// raised to at least 1.
    #[must_use]
    pub fn new(backend: B, capacity: usize) -> Self {
        let (errors_tx, errors_rx) = mpsc::channel(1);
        Self {
            name: backend.name(),
            capacity: capacity.max(1),
            sender: RwLock::new(None),
            state: Mutex::new(LogState {
                phase: Phase::Opened,
                backend: Some(backend),
                writer: None,
                errors_tx: Some(errors_tx),
                errors_rx: Some(errors_rx),
            }),
            replayed: Arc::new(OnceLock::new()),
        }
    }

    /// Capacity of the producer queue.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    async fn enqueue(&self, mutation: Mutation) -> Result<(), LogError> {
        let sender = self.sender.read().await.clone();
        let Some(sender) = sender else {
            return Err(match self.state.lock().await.phase {
                Phase::Closed => LogError::Closed,
                Phase::Opened | Phase::Replaying | Phase::Live => LogError::NotStarted,
            });
        };
        sender
            .send(mutation)
            .await
            .map_err(|_| LogError::WriterStopped)
    }
}

impl<B: LogBackend> fmt::Debug for TransactionLog<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionLog")
            .field("backend", &self.name)
            .field("capacity", &self.capacity)
            .field("replayed", &self.replayed.get())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<B: LogBackend> TransactionLogger for TransactionLog<B> {
    async fn record_put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), LogError> {
        self.enqueue(Mutation::put(key, value)).await
    }

    async fn record_delete(&self, key: Vec<u8>) -> Result<(), LogError> {
        self.enqueue(Mutation::delete(key)).await
    }

    async fn errors(&self) -> Option<mpsc::Receiver<LogError>> {
        self.state.lock().await.errors_rx.take()
    }

    async fn replay(&self) -> Result<ReplayStream, LogError> {
        let mut state = self.state.lock().await;
        match state.phase {
            Phase::Opened => {}
            Phase::Replaying | Phase::Live => return Err(LogError::ReplayAlreadyTaken),
            Phase::Closed => return Err(LogError::Closed),
        }
        let backend = state.backend.as_ref().ok_or(LogError::Closed)?;
        let source = match backend.open_replay().await {
            Ok(source) => source,
            Err(err) => stream::iter([Err(err)]).boxed(),
        };
        state.phase = Phase::Replaying;
        tracing::debug!(backend = self.name, "transaction log replay started");
        Ok(ReplayStream::new(source, Arc::clone(&self.replayed)))
    }

    async fn start(&self) -> Result<(), LogError> {
        let mut state = self.state.lock().await;
        match state.phase {
            Phase::Replaying => {}
            Phase::Opened => return Err(LogError::ReplayIncomplete),
            Phase::Live => return Err(LogError::AlreadyStarted),
            Phase::Closed => return Err(LogError::Closed),
        }
        let last_sequence = *self.replayed.get().ok_or(LogError::ReplayIncomplete)?;
        let errors = state.errors_tx.take().ok_or(LogError::Closed)?;
        let mut backend = state.backend.take().ok_or(LogError::Closed)?;
        backend.resume_after(last_sequence);

        let (tx, rx) = mpsc::channel(self.capacity);
        state.writer = Some(tokio::spawn(run_writer(backend, rx, errors)));
        *self.sender.write().await = Some(tx);
        state.phase = Phase::Live;

        tracing::info!(
            backend = self.name,
            last_sequence,
            capacity = self.capacity,
            "transaction logger started"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), LogError> {
        let mut state = self.state.lock().await;
        if state.phase == Phase::Closed {
            return Ok(());
        }
        state.phase = Phase::Closed;
        state.errors_tx = None;
        // Dropping the last owned sender lets the writer drain and exit.
        drop(self.sender.write().await.take());

        let backend = match state.writer.take() {
            Some(writer) => Some(
                writer
                    .await
                    .map_err(|e| LogError::WriterTask(e.to_string()))?,
            ),
            None => state.backend.take(),
        };
        if let Some(mut backend) = backend {
            backend.close().await?;
        }
        tracing::info!(backend = self.name, "transaction logger closed");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        self.name
    }
}

/// Single consumer of the queue. Persists mutations in arrival order and
/// stops at the first failure, reporting it once on the error channel.
async fn run_writer<B: LogBackend>(
    mut backend: B,
    mut queue: mpsc::Receiver<Mutation>,
    errors: mpsc::Sender<LogError>,
) -> B {
    while let Some(mutation) = queue.recv().await {
        match backend.append(mutation).await {
            Ok(event) => {
                tracing::trace!(sequence = event.sequence, kind = %event.kind, "event persisted");
            }
            Err(err) => {
                tracing::error!(
                    backend = backend.name(),
                    error = %err,
                    "transaction log write failed, writer stopped"
                );
                let _ = errors.try_send(err);
                break;
            }
        }
    }
    backend
}
