use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{PollId, PostId, StoryId, TaskId, UserId};

/// The closed set of deferred work this engine knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Flip a scheduled post to published and fan out notifications.
    Publish,
    /// Remove a story and its media once its horizon passes.
    StoryExpire,
    /// Remove a poll once its horizon passes.
    PollExpire,
    /// Repeating trim of chat history.
    ChatPrune,
    /// Notify one follower about one post.
    NotifyFanout,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::Publish,
        TaskKind::StoryExpire,
        TaskKind::PollExpire,
        TaskKind::ChatPrune,
        TaskKind::NotifyFanout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Publish => "publish",
            TaskKind::StoryExpire => "story_expire",
            TaskKind::PollExpire => "poll_expire",
            TaskKind::ChatPrune => "chat_prune",
            TaskKind::NotifyFanout => "notify_fanout",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dedupe keys for tasks the engine schedules. A schedule carrying a key
/// coalesces with a Pending task holding the same key.
pub struct DedupeKeys;

impl DedupeKeys {
    pub const CHAT_PRUNE: &'static str = "chat-prune";

    pub fn publish(post: &PostId) -> String {
        format!("publish:{post}")
    }

    pub fn story_expire(story: &StoryId) -> String {
        format!("story_expire:{story}")
    }

    pub fn poll_expire(poll: &PollId) -> String {
        format!("poll_expire:{poll}")
    }

    pub fn notify(post: &PostId, follower: &UserId) -> String {
        format!("notify:{post}:{follower}")
    }
}

/// TaskKind + Payload (+ TaskId) の“運搬用”データ。
///
/// This is what a handler sees for one delivery. `attempt` is 1 on the first
/// delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    task_id: TaskId,
    kind: TaskKind,
    payload: serde_json::Value,
    not_before: DateTime<Utc>,
    attempt: u32,
    max_attempts: u32,
}

impl TaskEnvelope {
    pub fn new(
        task_id: TaskId,
        kind: TaskKind,
        payload: serde_json::Value,
        not_before: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            kind,
            payload,
            not_before,
            attempt: 0,
            max_attempts: 1,
        }
    }

    pub fn with_attempts(mut self, attempt: u32, max_attempts: u32) -> Self {
        self.attempt = attempt;
        self.max_attempts = max_attempts;
        self
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        for kind in TaskKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
