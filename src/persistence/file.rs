//! Flat-file backend: one JSON record per line.
//!
//! Each line looks like
//!
//! ```text
//! {"Sequence":1,"EventType":2,"Key":"YQ==","Value":"MQ=="}
//! ```
//!
//! Keys and values are standard base64 so that arbitrary bytes, including
//! newlines, survive the line framing. The file is only ever appended to.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};

use super::logger::{EventSource, LogBackend};
use crate::config::FileLogConfig;
use crate::domain::{Event, EventKind, Mutation};
use crate::error::LogError;

/// On-disk shape of one line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileRecord {
    sequence: u64,
    event_type: EventKind,
    key: String,
    #[serde(default)]
    value: String,
}

/// Encodes an event as one log line, without the trailing newline.
///
/// # Errors
///
/// Returns [`LogError::Write`] if serialization fails.
pub fn encode_line(event: &Event) -> Result<String, LogError> {
    let record = FileRecord {
        sequence: event.sequence,
        event_type: event.kind,
        key: STANDARD.encode(&event.key),
        value: STANDARD.encode(&event.value),
    };
    serde_json::to_string(&record).map_err(|e| LogError::Write(e.into()))
}

/// Decodes one log line. `record` is its 1-based position, used in errors.
///
/// # Errors
///
/// Returns [`LogError::Parse`] for malformed JSON, an unknown event type
/// or invalid base64.
pub fn decode_line(line: &str, record: u64) -> Result<Event, LogError> {
    let parse_error = |reason: String| LogError::Parse { record, reason };

    let raw: FileRecord = serde_json::from_str(line).map_err(|e| parse_error(e.to_string()))?;
    let key = STANDARD
        .decode(raw.key.as_bytes())
        .map_err(|e| parse_error(format!("key is not valid base64: {e}")))?;
    let value = match raw.event_type {
        EventKind::Put => STANDARD
            .decode(raw.value.as_bytes())
            .map_err(|e| parse_error(format!("value is not valid base64: {e}")))?,
        EventKind::Delete => Vec::new(),
    };

    Ok(Event {
        sequence: raw.sequence,
        kind: raw.event_type,
        key,
        value,
    })
}

/// Reads and decodes the line after record number `record`.
async fn next_record(
    mut lines: Lines<BufReader<File>>,
    record: u64,
) -> Result<Option<(Event, (Lines<BufReader<File>>, u64))>, LogError> {
    let Some(line) = lines.next_line().await.map_err(LogError::Read)? else {
        return Ok(None);
    };
    let record = record + 1;
    let event = decode_line(&line, record)?;
    Ok(Some((event, (lines, record))))
}

/// Append-only log file.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    /// `None` once closed.
    file: Option<File>,
    sync_on_write: bool,
    last_sequence: u64,
}

impl FileBackend {
    /// Opens `config.path` for reading and appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Open`] if the file cannot be opened or created.
    pub async fn open(config: &FileLogConfig) -> Result<Self, LogError> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&config.path)
            .await
            .map_err(|source| LogError::Open {
                path: config.path.clone(),
                source,
            })?;

        tracing::info!(
            path = %config.path.display(),
            sync_on_write = config.sync_on_write,
            "transaction log file opened"
        );
        Ok(Self {
            path: config.path.clone(),
            file: Some(file),
            sync_on_write: config.sync_on_write,
            last_sequence: 0,
        })
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LogBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn append(&mut self, mutation: Mutation) -> Result<Event, LogError> {
        let file = self.file.as_mut().ok_or(LogError::Closed)?;
        let event = mutation.into_event(self.last_sequence + 1);

        let mut line = encode_line(&event)?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .await
            .map_err(LogError::Write)?;
        file.flush().await.map_err(LogError::Write)?;
        if self.sync_on_write {
            file.sync_data().await.map_err(LogError::Write)?;
        }

        self.last_sequence = event.sequence;
        Ok(event)
    }

    async fn open_replay(&self) -> Result<EventSource, LogError> {
        let file = File::open(&self.path)
            .await
            .map_err(|source| LogError::Open {
                path: self.path.clone(),
                source,
            })?;
        let lines = BufReader::new(file).lines();
        let events =
            stream::try_unfold((lines, 0u64), |(lines, record)| next_record(lines, record));
        Ok(events.boxed())
    }

    fn resume_after(&mut self, sequence: u64) {
        self.last_sequence = sequence;
    }

    async fn close(&mut self) -> Result<(), LogError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(LogError::Write)?;
            file.sync_all().await.map_err(LogError::Write)?;
            tracing::debug!(path = %self.path.display(), "transaction log file closed");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::KvStore;
    use crate::persistence::logger::{TransactionLog, TransactionLogger};
    use crate::persistence::replay::{ReplayStream, restore};

    async fn open_log(path: &Path) -> TransactionLog<FileBackend> {
        let Ok(backend) = FileBackend::open(&FileLogConfig::new(path)).await else {
            panic!("cannot open {}", path.display());
        };
        assert_eq!(backend.path(), path);
        TransactionLog::new(backend, 4)
    }

    async fn collect(mut replay: ReplayStream) -> Vec<Result<Event, LogError>> {
        let mut items = Vec::new();
        while let Some(item) = replay.next().await {
            items.push(item);
        }
        items
    }

    async fn replay_all(path: &Path) -> Vec<Result<Event, LogError>> {
        let log = open_log(path).await;
        let Ok(replay) = log.replay().await else {
            panic!("replay refused");
        };
        let items = collect(replay).await;
        let _ = log.close().await;
        items
    }

    async fn go_live(log: &TransactionLog<FileBackend>) {
        let Ok(replay) = log.replay().await else {
            panic!("replay refused");
        };
        for item in collect(replay).await {
            assert!(item.is_ok());
        }
        assert!(log.start().await.is_ok());
    }

    #[tokio::test]
    async fn put_put_delete_replays_in_order() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let path = dir.path().join("tx.log");

        let log = open_log(&path).await;
        go_live(&log).await;
        let _ = log.record_put(b"a".to_vec(), b"1".to_vec()).await;
        let _ = log.record_put(b"a".to_vec(), b"2".to_vec()).await;
        let _ = log.record_delete(b"a".to_vec()).await;
        assert!(log.close().await.is_ok());

        let events: Vec<Event> = replay_all(&path)
            .await
            .into_iter()
            .filter_map(Result::ok)
            .collect();
        assert_eq!(
            events,
            vec![
                Mutation::put("a", "1").into_event(1),
                Mutation::put("a", "2").into_event(2),
                Mutation::delete("a").into_event(3),
            ]
        );

        let store = KvStore::default();
        let log = open_log(&path).await;
        let Ok(summary) = restore(&log, &store).await else {
            panic!("restore failed");
        };
        assert_eq!(summary.events, 3);
        assert!(store.get(b"a").await.is_err());
        let _ = log.close().await;
    }

    #[tokio::test]
    async fn arbitrary_bytes_round_trip() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let path = dir.path().join("tx.log");
        let key = b"tab\there\nnew,line\0\xff".to_vec();
        let value: Vec<u8> = (0..=255u8).chain(b"\r\n\t,\"{}".iter().copied()).collect();

        let log = open_log(&path).await;
        go_live(&log).await;
        let _ = log.record_put(key.clone(), value.clone()).await;
        let _ = log.record_put(b"empty".to_vec(), Vec::new()).await;
        let _ = log.close().await;

        let items = replay_all(&path).await;
        assert_eq!(items.len(), 2);
        let Some(Ok(first)) = items.first() else {
            panic!("first record missing");
        };
        assert_eq!(first.key, key);
        assert_eq!(first.value, value);
        let Some(Ok(second)) = items.get(1) else {
            panic!("second record missing");
        };
        assert!(second.value.is_empty());
    }

    #[tokio::test]
    async fn numbering_continues_across_restarts() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let path = dir.path().join("tx.log");

        for round in 0..3u8 {
            let log = open_log(&path).await;
            go_live(&log).await;
            let _ = log.record_put(vec![round], vec![round]).await;
            let _ = log.record_put(vec![round], vec![round, round]).await;
            let _ = log.close().await;
        }

        let sequences: Vec<u64> = replay_all(&path)
            .await
            .into_iter()
            .filter_map(Result::ok)
            .map(|e| e.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn malformed_line_stops_replay() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let path = dir.path().join("tx.log");
        let good = encode_line(&Mutation::put("a", "1").into_event(1)).unwrap_or_default();
        let later = encode_line(&Mutation::put("c", "3").into_event(3)).unwrap_or_default();
        let contents = format!("{good}\nnot json at all\n{later}\n");
        assert!(tokio::fs::write(&path, contents).await.is_ok());

        let items = replay_all(&path).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items.first(), Some(Ok(_))));
        assert!(matches!(
            items.get(1),
            Some(Err(LogError::Parse { record: 2, .. }))
        ));
    }

    #[tokio::test]
    async fn repeated_sequence_is_reported() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let path = dir.path().join("tx.log");
        let first = encode_line(&Mutation::put("a", "1").into_event(1)).unwrap_or_default();
        let dup = encode_line(&Mutation::put("b", "2").into_event(1)).unwrap_or_default();
        let tail = encode_line(&Mutation::put("c", "3").into_event(2)).unwrap_or_default();
        assert!(
            tokio::fs::write(&path, format!("{first}\n{dup}\n{tail}\n"))
                .await
                .is_ok()
        );

        let log = open_log(&path).await;
        let Ok(replay) = log.replay().await else {
            panic!("replay refused");
        };
        let items = collect(replay).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(
            items.get(1),
            Some(Err(LogError::OutOfSequence {
                previous: 1,
                found: 1
            }))
        ));
        assert!(matches!(log.start().await, Err(LogError::ReplayIncomplete)));
        let _ = log.close().await;
    }

    #[test]
    fn decodes_legacy_line_format() {
        let line = r#"{"Sequence":7,"EventType":2,"Key":"YQ==","Value":"MQ=="}"#;
        let Ok(event) = decode_line(line, 1) else {
            panic!("legacy line rejected");
        };
        assert_eq!(event, Mutation::put("a", "1").into_event(7));

        let delete = r#"{"Sequence":8,"EventType":1,"Key":"YQ==","Value":""}"#;
        let Ok(event) = decode_line(delete, 2) else {
            panic!("legacy delete rejected");
        };
        assert_eq!(event.kind, EventKind::Delete);
    }

    #[test]
    fn zero_event_type_is_a_parse_error() {
        let line = r#"{"Sequence":1,"EventType":0,"Key":"YQ==","Value":""}"#;
        assert!(matches!(
            decode_line(line, 4),
            Err(LogError::Parse { record: 4, .. })
        ));
    }

    #[test]
    fn bad_base64_is_a_parse_error() {
        let line = r#"{"Sequence":1,"EventType":2,"Key":"!!!","Value":""}"#;
        assert!(matches!(
            decode_line(line, 1),
            Err(LogError::Parse { .. })
        ));
    }

    #[test]
    fn encoded_line_has_no_raw_newlines() {
        let event = Mutation::put("k\n", "v\nv").into_event(1);
        let line = encode_line(&event).unwrap_or_default();
        assert!(!line.contains('\n'));
        assert!(line.starts_with(r#"{"Sequence":1,"EventType":2,"#));
    }

    #[tokio::test]
    async fn open_fails_for_missing_directory() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let path = dir.path().join("missing").join("tx.log");
        let result = FileBackend::open(&FileLogConfig::new(&path)).await;
        assert!(matches!(result, Err(LogError::Open { .. })));
    }

    #[tokio::test]
    async fn close_twice_is_harmless() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let log = open_log(&dir.path().join("tx.log")).await;
        go_live(&log).await;
        assert!(log.close().await.is_ok());
        assert!(log.close().await.is_ok());
    }

    #[tokio::test]
    async fn synced_writes_are_replayable() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let path = dir.path().join("tx.log");
        let config = FileLogConfig {
            path: path.clone(),
            sync_on_write: true,
        };
        let Ok(backend) = FileBackend::open(&config).await else {
            panic!("open failed");
        };
        let log: Arc<dyn TransactionLogger> = Arc::new(TransactionLog::new(backend, 1));
        let Ok(replay) = log.replay().await else {
            panic!("replay refused");
        };
        assert!(collect(replay).await.is_empty());
        assert!(log.start().await.is_ok());

        let mut producers = Vec::new();
        for i in 0..8u8 {
            let log = Arc::clone(&log);
            producers.push(tokio::spawn(async move {
                log.record_put(vec![i], vec![i]).await
            }));
        }
        for producer in producers {
            assert!(matches!(producer.await, Ok(Ok(()))));
        }
        assert!(log.close().await.is_ok());

        let items = replay_all(&path).await;
        assert_eq!(items.len(), 8);
        assert!(items.iter().all(Result::is_ok));
    }
}
