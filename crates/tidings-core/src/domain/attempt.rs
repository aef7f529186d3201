//! Attempt history for execution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::AttemptId;

/// How one delivery ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum AttemptResult {
    /// Still leased.
    InFlight,
    Succeeded,
    Failed(String),
    LeaseExpired,
}

/// A single delivery of a task.
///
/// Kept on the task record so a dead task can explain itself: which attempt
/// failed, when, and with what.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_id: AttemptId,
    /// 1-based attempt number.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: AttemptResult,
}

impl AttemptRecord {
    pub fn started(attempt_id: AttemptId, attempt: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            attempt_id,
            attempt,
            started_at,
            finished_at: None,
            result: AttemptResult::InFlight,
        }
    }

    pub fn finish(&mut self, result: AttemptResult, at: DateTime<Utc>) {
        self.result = result;
        self.finished_at = Some(at);
    }
}
