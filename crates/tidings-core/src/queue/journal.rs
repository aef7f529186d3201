//! Journal: durability for the broker.
//!
//! Every state change is appended as the full post-change record, one JSON
//! document per line. Replaying the file and keeping the last line per task
//! rebuilds the broker. The broker appends *before* it applies a change in
//! memory, so a failed write leaves both sides untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{BrokerError, TaskRecord};
use crate::domain::TaskId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub at: DateTime<Utc>,
    pub record: TaskRecord,
}

#[async_trait]
pub trait Journal: Send + Sync {
    /// Persist one entry. Must not return Ok before the entry is durable.
    async fn append(&self, entry: &JournalEntry) -> Result<(), BrokerError>;

    /// Replace the journal with just `live`.
    async fn compact(&self, live: &[TaskRecord], at: DateTime<Utc>) -> Result<(), BrokerError>;
}

/// Memory-only broker: nothing survives a restart. The recovery scanner
/// rebuilds entity-driven tasks on startup.
#[derive(Debug, Default)]
pub struct NoopJournal;

#[async_trait]
impl Journal for NoopJournal {
    async fn append(&self, _entry: &JournalEntry) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn compact(&self, _live: &[TaskRecord], _at: DateTime<Utc>) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// JSON-lines journal on the local filesystem.
pub struct FileJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileJournal {
    /// Open (or create) the journal and return the records it holds.
    pub async fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<TaskRecord>), BrokerError> {
        let path = path.as_ref().to_path_buf();
        let records = replay(&path).await?;
        let file = open_append(&path).await?;
        debug!(path = %path.display(), records = records.len(), "journal replayed");
        Ok((
            Self {
                path,
                file: Mutex::new(file),
            },
            records,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Journal for FileJournal {
    async fn append(&self, entry: &JournalEntry) -> Result<(), BrokerError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await.map_err(io_unavailable)?;
        file.sync_data().await.map_err(io_unavailable)?;
        Ok(())
    }

    async fn compact(&self, live: &[TaskRecord], at: DateTime<Utc>) -> Result<(), BrokerError> {
        let mut buf = Vec::new();
        for record in live {
            serde_json::to_writer(
                &mut buf,
                &JournalEntry {
                    at,
                    record: record.clone(),
                },
            )?;
            buf.push(b'\n');
        }

        let tmp = self.path.with_extension("compact");
        let mut file = self.file.lock().await;
        {
            let mut out = File::create(&tmp).await.map_err(io_unavailable)?;
            out.write_all(&buf).await.map_err(io_unavailable)?;
            out.sync_all().await.map_err(io_unavailable)?;
        }
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(io_unavailable)?;
        *file = open_append(&self.path).await?;
        debug!(path = %self.path.display(), live = live.len(), "journal compacted");
        Ok(())
    }
}

async fn open_append(path: &Path) -> Result<File, BrokerError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(io_unavailable)
}

async fn replay(path: &Path) -> Result<Vec<TaskRecord>, BrokerError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_unavailable(e)),
    };

    let mut latest: HashMap<TaskId, TaskRecord> = HashMap::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(line) {
            Ok(entry) => {
                latest.insert(entry.record.task_id, entry.record);
            }
            Err(e) => {
                // torn tail from a crash mid-write; everything before it is intact
                warn!(path = %path.display(), line = line_no + 1, error = %e, "skipping unreadable journal line");
            }
        }
    }

    let mut records: Vec<TaskRecord> = latest.into_values().collect();
    records.sort_by_key(|r| r.seq);
    Ok(records)
}

fn io_unavailable(e: std::io::Error) -> BrokerError {
    BrokerError::Unavailable(format!("journal io: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskEnvelope, TaskKind};
    use crate::queue::{RetryPolicy, TaskState};
    use ulid::Ulid;

    fn record(seq: u64) -> TaskRecord {
        let now = Utc::now();
        let envelope = TaskEnvelope::new(
            TaskId::from_ulid(Ulid::new()),
            TaskKind::Publish,
            serde_json::json!({"postId": format!("p-{seq}")}),
            now,
        );
        TaskRecord::new(envelope, RetryPolicy::default(), None, seq, now)
    }

    #[tokio::test]
    async fn last_entry_per_task_wins_on_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.jsonl");

        let (journal, existing) = FileJournal::open(&path).await.unwrap();
        assert!(existing.is_empty());

        let mut r = record(1);
        journal
            .append(&JournalEntry { at: Utc::now(), record: r.clone() })
            .await
            .unwrap();
        r.mark_cancelled(Utc::now());
        journal
            .append(&JournalEntry { at: Utc::now(), record: r.clone() })
            .await
            .unwrap();
        drop(journal);

        let (_journal, replayed) = FileJournal::open(&path).await.unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].state, TaskState::Cancelled);
    }

    #[tokio::test]
    async fn torn_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.jsonl");

        let (journal, _) = FileJournal::open(&path).await.unwrap();
        journal
            .append(&JournalEntry { at: Utc::now(), record: record(1) })
            .await
            .unwrap();
        drop(journal);

        let mut text = tokio::fs::read_to_string(&path).await.unwrap();
        text.push_str("{\"at\":\"2024-01-01T00:00:00Z\",\"rec");
        tokio::fs::write(&path, text).await.unwrap();

        let (_journal, replayed) = FileJournal::open(&path).await.unwrap();
        assert_eq!(replayed.len(), 1);
    }

    #[tokio::test]
    async fn compact_keeps_only_live_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.jsonl");

        let (journal, _) = FileJournal::open(&path).await.unwrap();
        for seq in 1..=3 {
            journal
                .append(&JournalEntry { at: Utc::now(), record: record(seq) })
                .await
                .unwrap();
        }
        let keep = record(9);
        journal.compact(&[keep.clone()], Utc::now()).await.unwrap();
        journal
            .append(&JournalEntry { at: Utc::now(), record: record(10) })
            .await
            .unwrap();
        drop(journal);

        let (_journal, replayed) = FileJournal::open(&path).await.unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].task_id, keep.task_id);
    }
}
