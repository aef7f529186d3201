//! Decision model: what happens to a task after a failed attempt.
//!
//! The broker asks a [`Decider`] and then applies the answer; the decider
//! itself never touches queue state.

use std::time::Duration;

use super::HandlerError;
use crate::queue::TaskRecord;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Put the task back to Pending after a delay.
    Retry { delay: Duration, reason: String },

    /// Give up and surface the task as dead.
    MarkDead { reason: String },
}

/// Deciders are pure functions: given the record (attempt count, retry
/// policy) and the error of the attempt that just ended, return the next
/// action.
pub trait Decider: Send + Sync {
    fn decide(&self, task: &TaskRecord, error: &HandlerError) -> Decision;
}

/// Attempt-based retry with the record's own exponential backoff:
/// - Permanent errors die immediately
/// - Retry while attempt < max_attempts
/// - Dead once attempt >= max_attempts
#[derive(Debug, Clone, Default)]
pub struct DefaultDecider;

impl DefaultDecider {
    pub fn new() -> Self {
        Self
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, task: &TaskRecord, error: &HandlerError) -> Decision {
        if error.is_permanent() {
            return Decision::MarkDead {
                reason: format!("Permanent failure on attempt {}", task.attempt),
            };
        }
        if task.attempt >= task.retry.max_attempts {
            Decision::MarkDead {
                reason: format!(
                    "Max attempts reached: {}/{}",
                    task.attempt, task.retry.max_attempts
                ),
            }
        } else {
            let delay = task.retry.next_delay(task.attempt);
            Decision::Retry {
                delay,
                reason: format!(
                    "Retry attempt {}/{} after {:?}",
                    task.attempt + 1,
                    task.retry.max_attempts,
                    delay
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskEnvelope, TaskId, TaskKind};
    use crate::queue::RetryPolicy;
    use chrono::Utc;
    use rstest::rstest;
    use ulid::Ulid;

    fn record_at_attempt(attempt: u32) -> TaskRecord {
        let envelope = TaskEnvelope::new(
            TaskId::from_ulid(Ulid::new()),
            TaskKind::Publish,
            serde_json::json!({}),
            Utc::now(),
        );
        let mut record = TaskRecord::new(envelope, RetryPolicy::default(), None, 1, Utc::now());
        record.attempt = attempt;
        record
    }

    #[rstest]
    #[case::first_failure(1, Duration::from_millis(3000))]
    #[case::second_failure(2, Duration::from_millis(6000))]
    fn transient_failures_retry_with_backoff(#[case] attempt: u32, #[case] expected: Duration) {
        let decision =
            DefaultDecider::new().decide(&record_at_attempt(attempt), &HandlerError::transient("x"));
        match decision {
            Decision::Retry { delay, .. } => assert_eq!(delay, expected),
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn exhausted_attempts_mark_dead() {
        let decision =
            DefaultDecider::new().decide(&record_at_attempt(3), &HandlerError::transient("x"));
        assert!(matches!(decision, Decision::MarkDead { .. }));
    }

    #[test]
    fn permanent_error_marks_dead_on_first_attempt() {
        let decision =
            DefaultDecider::new().decide(&record_at_attempt(1), &HandlerError::permanent("bad"));
        assert!(matches!(decision, Decision::MarkDead { .. }));
    }
}
