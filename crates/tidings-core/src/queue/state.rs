//! Task state machine for the broker.

use serde::{Deserialize, Serialize};

/// Task state.
///
/// State transitions:
/// - Pending -> InFlight -> Done
/// - Pending -> InFlight -> Pending (retry with backoff, loop until max_attempts)
/// - Pending -> InFlight -> Dead (attempts exhausted or permanent failure)
/// - Pending -> Cancelled (only before a lease is handed out)
///
/// InFlight -> Pending also happens when a lease expires without ack/fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for `not_before`, or due and waiting for a consumer.
    Pending,

    /// Leased to one consumer; invisible to others until ack/fail or expiry.
    InFlight,

    /// Handler succeeded.
    Done,

    /// Failed permanently; kept for operator review.
    Dead,

    /// Removed before it was delivered.
    Cancelled,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Dead | TaskState::Cancelled)
    }
}
