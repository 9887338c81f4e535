//! PostgreSQL backend: one row per event in a fixed `transactions` table.
//!
//! The table's `BIGSERIAL` identity is the sequence number, so the writer
//! keeps no counter of its own. Replay orders by that identity.

use async_trait::async_trait;
use futures_util::stream::StreamExt;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::logger::{EventSource, LogBackend};
use crate::config::PostgresLogConfig;
use crate::domain::{Event, EventKind, Mutation};
use crate::error::LogError;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS transactions (\
     id BIGSERIAL PRIMARY KEY, \
     event_type SMALLINT NOT NULL CHECK (event_type IN (1, 2)), \
     key BYTEA NOT NULL, \
     value BYTEA NOT NULL)";

const INSERT_EVENT: &str =
    "INSERT INTO transactions (event_type, key, value) VALUES ($1, $2, $3) RETURNING id";

const SELECT_EVENTS: &str = "SELECT id, event_type, key, value FROM transactions ORDER BY id";

/// Rows buffered between the replay query and its consumer.
const REPLAY_BUFFER: usize = 64;

/// A raw `transactions` row: `(id, event_type, key, value)`.
type EventRow = (i64, i16, Vec<u8>, Vec<u8>);

/// PostgreSQL-backed transaction log using a single-connection `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Connects to the database and creates the `transactions` table if it
    /// does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Connect`] if the database cannot be reached
    /// within the configured timeout, or [`LogError::Schema`] if the table
    /// cannot be created. Nothing is left open in either case.
    pub async fn connect(config: &PostgresLogConfig) -> Result<Self, LogError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(config.connect_timeout)
            .connect_with(options)
            .await
            .map_err(LogError::Connect)?;

        let backend = Self::from_pool(pool).await?;
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "transactions table ready"
        );
        Ok(backend)
    }

    /// Wraps an existing pool, creating the `transactions` table if needed.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Schema`] if the table cannot be created. The pool
    /// is closed in that case.
    pub async fn from_pool(pool: PgPool) -> Result<Self, LogError> {
        if let Err(err) = sqlx::query(CREATE_TABLE).execute(&pool).await {
            pool.close().await;
            return Err(LogError::Schema(err));
        }
        Ok(Self { pool })
    }
}

#[async_trait]
impl LogBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn append(&mut self, mutation: Mutation) -> Result<Event, LogError> {
        let id = sqlx::query_scalar::<_, i64>(INSERT_EVENT)
            .bind(i16::from(mutation.kind))
            .bind(mutation.key.as_slice())
            .bind(mutation.value.as_slice())
            .fetch_one(&self.pool)
            .await
            .map_err(LogError::Query)?;

        Ok(mutation.into_event(sequence_from_id(id)?))
    }

    async fn open_replay(&self) -> Result<EventSource, LogError> {
        let pool = self.pool.clone();
        let (tx, rx) = mpsc::channel(REPLAY_BUFFER);

        tokio::spawn(async move {
            let mut rows = sqlx::query_as::<_, EventRow>(SELECT_EVENTS).fetch(&pool);
            let mut record = 0u64;
            while let Some(row) = rows.next().await {
                record += 1;
                let item = row
                    .map_err(LogError::Query)
                    .and_then(|row| decode_row(row, record));
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn close(&mut self) -> Result<(), LogError> {
        if !self.pool.is_closed() {
            self.pool.close().await;
            tracing::debug!("transaction database connection closed");
        }
        Ok(())
    }
}

fn sequence_from_id(id: i64) -> Result<u64, LogError> {
    u64::try_from(id)
        .ok()
        .filter(|sequence| *sequence > 0)
        .ok_or(LogError::InvalidSequence(id))
}

/// Converts a row into an event. Delete rows carry no value.
fn decode_row((id, event_type, key, value): EventRow, record: u64) -> Result<Event, LogError> {
    let kind = EventKind::try_from(event_type).map_err(|e| LogError::Parse {
        record,
        reason: e.to_string(),
    })?;
    let value = match kind {
        EventKind::Put => value,
        EventKind::Delete => Vec::new(),
    };
    Ok(Event {
        sequence: sequence_from_id(id)?,
        kind,
        key,
        value,
    })
}
