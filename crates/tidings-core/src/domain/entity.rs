//! Schedulable entities as seen by the engine.
//!
//! These are projections of records owned by the external store. The engine
//! only ever moves an entity's `status` through [`StatusTransition`], a closed
//! set the store maps to concrete updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{PollId, PostId, RoomId, StoryId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Scheduled,
    Published,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Active,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Open,
    Closed,
}

/// Media type of a stored object; the object store needs it to address the
/// object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub author_id: UserId,
    pub author_name: String,
    pub title: String,
    pub status: PostStatus,
    /// When the post should go live. `None` for posts created as published.
    pub schedule_time: Option<DateTime<Utc>>,
    /// Reset to the publish instant when the post goes live.
    pub created_at: DateTime<Utc>,
    /// Set once every follower notification has been scheduled.
    pub fanout_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: StoryId,
    pub author_id: UserId,
    pub media_ref: String,
    pub media_kind: MediaKind,
    pub status: StoryStatus,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: PollId,
    pub status: PollStatus,
    pub expires_at: DateTime<Utc>,
}

/// Where a follower's notification goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub follower_id: UserId,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub room: RoomId,
    pub sender: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Reference to one schedulable record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "entity", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Post(PostId),
    Story(StoryId),
    Poll(PollId),
}

/// The only status moves the engine may ask the store for.
///
/// Each variant is a conditional update: it applies only while the record is
/// still in the `from` state, so a user-initiated delete or a concurrent
/// handler loses the race cleanly instead of being overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTransition {
    /// Post: scheduled -> published, and `created_at` becomes the publish instant.
    PublishPost,
    /// Story: active -> expired.
    ExpireStory,
    /// Poll: open -> closed.
    ClosePoll,
}

impl StatusTransition {
    /// Whether this transition applies to the given record.
    pub fn applies_to(&self, entity: &EntityRef) -> bool {
        matches!(
            (self, entity),
            (StatusTransition::PublishPost, EntityRef::Post(_))
                | (StatusTransition::ExpireStory, EntityRef::Story(_))
                | (StatusTransition::ClosePoll, EntityRef::Poll(_))
        )
    }
}

/// An entity still waiting for its task, as reported to the recovery scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum PendingSchedule {
    Post {
        post_id: PostId,
        at: DateTime<Utc>,
    },
    Story {
        story_id: StoryId,
        media_ref: String,
        media_kind: MediaKind,
        at: DateTime<Utc>,
    },
    Poll {
        poll_id: PollId,
        at: DateTime<Utc>,
    },
}

impl PendingSchedule {
    pub fn due_at(&self) -> DateTime<Utc> {
        match self {
            PendingSchedule::Post { at, .. }
            | PendingSchedule::Story { at, .. }
            | PendingSchedule::Poll { at, .. } => *at,
        }
    }
}
