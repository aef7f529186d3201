//! Task record: metadata + payload + attempt history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{RetryPolicy, TaskState};
use crate::domain::{
    AttemptId, AttemptRecord, AttemptResult, DeadTask, TaskEnvelope, TaskId, TaskKind,
};

/// Who currently holds the task and until when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseInfo {
    pub attempt_id: AttemptId,
    pub expires_at: DateTime<Utc>,
}

/// Metadata + payload for a task in the broker.
///
/// Design:
/// - This is the "single source of truth" for task state.
/// - Broker indexes (ready/dedupe) hold TaskId only.
/// - All state transitions happen here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub state: TaskState,

    /// Earliest execution time. Moves forward on every retry.
    pub not_before: DateTime<Utc>,

    /// Number of deliveries so far (including the current one if InFlight).
    pub attempt: u32,

    pub retry: RetryPolicy,

    /// Tasks sharing a key coalesce while one of them is still Pending.
    pub dedupe_key: Option<String>,

    pub lease: Option<LeaseInfo>,

    pub last_error: Option<String>,

    /// Tie-breaker for tasks due at the same instant: schedule order.
    pub seq: u64,

    #[serde(default)]
    pub history: Vec<AttemptRecord>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(
        envelope: TaskEnvelope,
        retry: RetryPolicy,
        dedupe_key: Option<String>,
        seq: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: envelope.task_id(),
            kind: envelope.kind(),
            payload: envelope.payload().clone(),
            state: TaskState::Pending,
            not_before: envelope.not_before(),
            attempt: 0,
            retry,
            dedupe_key,
            lease: None,
            last_error: None,
            seq,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The view handed to a handler.
    pub fn envelope(&self) -> TaskEnvelope {
        TaskEnvelope::new(self.task_id, self.kind, self.payload.clone(), self.not_before)
            .with_attempts(self.attempt, self.retry.max_attempts)
    }

    /// Operator view of this task. Meaningful once the task is Dead.
    pub fn to_dead_task(&self) -> DeadTask {
        DeadTask {
            task_id: self.task_id,
            kind: self.kind,
            payload: self.payload.clone(),
            error: self.last_error.clone().unwrap_or_default(),
            attempts: self.attempt,
            died_at: self.updated_at,
        }
    }

    /// Whether `attempt_id` is the lease currently holding this task.
    pub fn is_leased_by(&self, attempt_id: AttemptId) -> bool {
        self.state == TaskState::InFlight
            && self.lease.is_some_and(|lease| lease.attempt_id == attempt_id)
    }

    /// Mark as in flight (increment attempt).
    pub fn start_attempt(&mut self, lease: LeaseInfo, now: DateTime<Utc>) {
        self.state = TaskState::InFlight;
        self.attempt += 1;
        self.lease = Some(lease);
        self.history
            .push(AttemptRecord::started(lease.attempt_id, self.attempt, now));
        self.updated_at = now;
    }

    pub fn mark_done(&mut self, now: DateTime<Utc>) {
        self.finish_current(AttemptResult::Succeeded, now);
        self.state = TaskState::Done;
        self.lease = None;
        self.updated_at = now;
    }

    /// Back to Pending after a failed attempt.
    pub fn schedule_retry(&mut self, next_run_at: DateTime<Utc>, error: String, now: DateTime<Utc>) {
        self.finish_current(AttemptResult::Failed(error.clone()), now);
        self.state = TaskState::Pending;
        self.not_before = next_run_at;
        self.lease = None;
        self.last_error = Some(error);
        self.updated_at = now;
    }

    /// Mark as dead (attempts exhausted or permanent failure).
    pub fn mark_dead(&mut self, error: String, now: DateTime<Utc>) {
        self.finish_current(AttemptResult::Failed(error.clone()), now);
        self.state = TaskState::Dead;
        self.lease = None;
        self.last_error = Some(error);
        self.updated_at = now;
    }

    /// Move a Pending task to a new due time (the entity was rescheduled).
    pub fn reschedule(&mut self, not_before: DateTime<Utc>, payload: serde_json::Value, now: DateTime<Utc>) {
        self.not_before = not_before;
        self.payload = payload;
        self.updated_at = now;
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.state = TaskState::Cancelled;
        self.updated_at = now;
    }

    /// Record that the current lease lapsed. The caller decides what state
    /// follows (retry or dead).
    pub fn expire_lease(&mut self, now: DateTime<Utc>) {
        self.finish_current(AttemptResult::LeaseExpired, now);
    }

    /// Restore a task that was InFlight when the process stopped. The
    /// delivery already counted as an attempt.
    pub fn restore_after_restart(&mut self, now: DateTime<Utc>) {
        if self.state == TaskState::InFlight {
            self.finish_current(AttemptResult::LeaseExpired, now);
            self.state = TaskState::Pending;
            self.lease = None;
            self.updated_at = now;
        }
    }

    fn finish_current(&mut self, result: AttemptResult, now: DateTime<Utc>) {
        if let Some(current) = self.history.last_mut()
            && current.finished_at.is_none()
        {
            current.finish(result, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ulid::Ulid;

    fn record() -> TaskRecord {
        let now = Utc::now();
        let envelope = TaskEnvelope::new(
            TaskId::from_ulid(Ulid::new()),
            TaskKind::PollExpire,
            serde_json::json!({"pollId": "q-1"}),
            now,
        );
        TaskRecord::new(envelope, RetryPolicy::default(), None, 1, now)
    }

    #[test]
    fn attempts_are_recorded_in_history() {
        let mut r = record();
        let now = Utc::now();
        let lease = LeaseInfo {
            attempt_id: AttemptId::from_ulid(Ulid::new()),
            expires_at: now + Duration::seconds(30),
        };

        r.start_attempt(lease, now);
        assert_eq!(r.attempt, 1);
        assert!(r.is_leased_by(lease.attempt_id));

        r.schedule_retry(now + Duration::seconds(3), "boom".to_string(), now);
        assert_eq!(r.state, TaskState::Pending);
        assert!(!r.is_leased_by(lease.attempt_id));
        assert_eq!(r.history.len(), 1);
        assert_eq!(r.history[0].result, AttemptResult::Failed("boom".to_string()));
    }

    #[test]
    fn restart_turns_in_flight_back_into_pending() {
        let mut r = record();
        let now = Utc::now();
        r.start_attempt(
            LeaseInfo {
                attempt_id: AttemptId::from_ulid(Ulid::new()),
                expires_at: now,
            },
            now,
        );
        r.restore_after_restart(now);
        assert_eq!(r.state, TaskState::Pending);
        assert_eq!(r.attempt, 1);
        assert_eq!(r.history[0].result, AttemptResult::LeaseExpired);
    }

    #[test]
    fn envelope_reports_attempt_and_ceiling() {
        let mut r = record();
        let now = Utc::now();
        r.start_attempt(
            LeaseInfo {
                attempt_id: AttemptId::from_ulid(Ulid::new()),
                expires_at: now,
            },
            now,
        );
        let env = r.envelope();
        assert_eq!(env.attempt(), 1);
        assert_eq!(env.max_attempts(), 3);
        assert_eq!(env.kind(), TaskKind::PollExpire);
    }
}
