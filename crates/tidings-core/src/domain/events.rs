//! Events - ドメインイベント
//!
//! broker の状態遷移ごとに 1 つ発行され、`EventSink` に送られる。
//! 運用者が見るべきなのは `TaskDead` だけで、残りはトレース用。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::task::TaskKind;

/// A task that used up its attempts (or failed permanently).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadTask {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub error: String,
    pub attempts: u32,
    pub died_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    TaskScheduled {
        task_id: TaskId,
        kind: TaskKind,
        not_before: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: TaskId,
        kind: TaskKind,
        attempts: u32,
    },
    RetryScheduled {
        task_id: TaskId,
        kind: TaskKind,
        attempt: u32,
        next_run_at: DateTime<Utc>,
        error: String,
    },
    LeaseExpired {
        task_id: TaskId,
        kind: TaskKind,
        attempt: u32,
    },
    TaskCancelled {
        task_id: TaskId,
        kind: TaskKind,
    },
    TaskDead(DeadTask),
}

impl DomainEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            DomainEvent::TaskScheduled { task_id, .. }
            | DomainEvent::TaskCompleted { task_id, .. }
            | DomainEvent::RetryScheduled { task_id, .. }
            | DomainEvent::LeaseExpired { task_id, .. }
            | DomainEvent::TaskCancelled { task_id, .. } => *task_id,
            DomainEvent::TaskDead(dead) => dead.task_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::TaskScheduled { .. } => "task_scheduled",
            DomainEvent::TaskCompleted { .. } => "task_completed",
            DomainEvent::RetryScheduled { .. } => "retry_scheduled",
            DomainEvent::LeaseExpired { .. } => "lease_expired",
            DomainEvent::TaskCancelled { .. } => "task_cancelled",
            DomainEvent::TaskDead(_) => "task_dead",
        }
    }
}
