//! Outcome model: what a handler reports when it returns successfully.
//!
//! Failures are not outcomes; they travel as [`HandlerError`](super::HandlerError)
//! so the broker can tell retryable from permanent.

use serde::{Deserialize, Serialize};

/// We serialize as SCREAMING_SNAKE_CASE to keep the log lines greppable:
/// SUCCESS / SKIPPED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    /// The handler did its work.
    Success,
    /// Nothing to do: the entity was already in its target state, or is gone.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Number of follow-up tasks this run scheduled (fan-out, reschedules).
    #[serde(default)]
    pub spawned: usize,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            kind: OutcomeKind::Success,
            reason: None,
            spawned: 0,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Skipped,
            reason: Some(reason.into()),
            spawned: 0,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_spawned(mut self, spawned: usize) -> Self {
        self.spawned = spawned;
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.kind == OutcomeKind::Skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_kind_serializes_as_upper_case() {
        let s = serde_json::to_string(&OutcomeKind::Success).unwrap();
        assert_eq!(s, "\"SUCCESS\"");

        let s = serde_json::to_string(&OutcomeKind::Skipped).unwrap();
        assert_eq!(s, "\"SKIPPED\"");
    }

    #[test]
    fn skipped_carries_reason() {
        let o = Outcome::skipped("already published");
        assert!(o.is_skipped());
        assert_eq!(o.reason.as_deref(), Some("already published"));
        assert_eq!(o.spawned, 0);
    }
}
