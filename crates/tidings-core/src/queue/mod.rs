//! Queue module: the task broker port, task state, retry logic, and the
//! in-memory (optionally journaled) implementation.

mod journal;
mod memory;
mod record;
mod retry;
mod state;

pub use journal::{FileJournal, Journal, JournalEntry, NoopJournal};
pub use memory::{BrokerSettings, InMemoryBroker};
pub use record::{LeaseInfo, TaskRecord};
pub use retry::RetryPolicy;
pub use state::TaskState;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{AttemptId, DeadTask, HandlerError, TaskEnvelope, TaskId, TaskKind};

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The backing store cannot be reached (or the broker was closed);
    /// nothing was persisted.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The broker has been closed; consumers should stop.
    #[error("broker closed")]
    Closed,

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The lease expired and the task was handed to someone else (or already
    /// finished). The caller's result is discarded.
    #[error("lease lost for {task_id} ({attempt_id})")]
    LeaseLost {
        task_id: TaskId,
        attempt_id: AttemptId,
    },

    #[error("payload encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Everything the broker needs to accept one task.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    /// Zero (or a due time in the past) means "due now".
    pub delay: Duration,
    /// Absolute due time. Takes precedence over `delay`.
    pub not_before: Option<DateTime<Utc>>,
    pub retry: RetryPolicy,
    pub dedupe_key: Option<String>,
    /// On a dedupe hit, move the Pending task to this request's due time and
    /// payload. Off means the existing task is kept as it is.
    pub move_pending: bool,
}

impl ScheduleRequest {
    pub fn new(kind: TaskKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            delay: Duration::ZERO,
            not_before: None,
            retry: RetryPolicy::default(),
            dedupe_key: None,
            move_pending: true,
        }
    }

    /// Build a request from a typed payload.
    pub fn typed<T: crate::typed::Task>(task: &T) -> Result<Self, BrokerError> {
        Ok(Self::new(T::KIND, serde_json::to_value(task)?))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Due at `at`; a time in the past means "due now".
    pub fn with_not_before(mut self, at: DateTime<Utc>) -> Self {
        self.not_before = Some(at);
        self
    }

    /// Coalesce with a Pending task of the same key without touching it.
    pub fn keep_existing(mut self) -> Self {
        self.move_pending = false;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }
}

/// A leased task for processing.
///
/// The consumer owns this lease and must report it back with `ack` or
/// `fail`. The attempt id is the lease token; a report carrying a stale
/// token is rejected.
#[derive(Debug, Clone)]
pub struct Lease {
    envelope: TaskEnvelope,
    attempt_id: AttemptId,
    expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(envelope: TaskEnvelope, attempt_id: AttemptId, expires_at: DateTime<Utc>) -> Self {
        Self {
            envelope,
            attempt_id,
            expires_at,
        }
    }

    pub fn envelope(&self) -> &TaskEnvelope {
        &self.envelope
    }

    pub fn task_id(&self) -> TaskId {
        self.envelope.task_id()
    }

    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// What `fail` did with the task.
#[derive(Debug, Clone, PartialEq)]
pub enum FailDisposition {
    Retrying { next_run_at: DateTime<Utc> },
    Dead(DeadTask),
}

/// Counts by state, for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub done: usize,
    pub dead: usize,
    pub cancelled: usize,
}

/// Broker port (interface).
///
/// A persistent, at-least-once delayed-delivery primitive. Implementations
/// must persist every mutation before returning success, so a crash between
/// dispatch and ack results in redelivery rather than loss.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Accept a task; it becomes deliverable at `not_before`, or at
    /// `now + delay` when no absolute time is given.
    ///
    /// A Pending task holding the same dedupe key is reused. Unless the
    /// request says `keep_existing`, that task is moved to the new due time
    /// and payload.
    async fn schedule(&self, request: ScheduleRequest) -> Result<TaskId, BrokerError>;

    /// Lease the earliest-due task of `kind`, waiting up to `wait` for one.
    /// `Ok(None)` means nothing became due in time.
    async fn consume(&self, kind: TaskKind, wait: Duration) -> Result<Option<Lease>, BrokerError>;

    /// Mark success.
    async fn ack(&self, lease: &Lease) -> Result<(), BrokerError>;

    /// Mark failure; the broker decides retry or dead.
    async fn fail(&self, lease: &Lease, error: &HandlerError)
    -> Result<FailDisposition, BrokerError>;

    /// Remove a task that has not been leased yet. Returns whether it was
    /// removed.
    async fn cancel(&self, task_id: TaskId) -> Result<bool, BrokerError>;

    /// Cancel the Pending task carrying `dedupe_key`, if any.
    async fn cancel_key(&self, dedupe_key: &str) -> Result<bool, BrokerError>;

    async fn get(&self, task_id: TaskId) -> Result<Option<TaskRecord>, BrokerError>;

    async fn counts_by_state(&self) -> Result<QueueCounts, BrokerError>;

    async fn dead_tasks(&self) -> Result<Vec<DeadTask>, BrokerError>;

    /// Stop accepting work. Pending tasks stay persisted.
    async fn close(&self) -> Result<(), BrokerError>;
}
