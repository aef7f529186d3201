//! RecordStore port - 外部のドキュメントストア（正本）
//!
//! posts / stories / polls / follows / chat messages の持ち主は CRUD 層で、
//! engine はこの trait 越しに読み書きするだけ。
//!
//! # 設計原則
//! - status の変更は [`StatusTransition`] 経由の条件付き更新のみ
//!   （フィールド名を入力から組み立てない）
//! - 「見つからない」はエラーではなく `None` / `false`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{
    Contact, EntityRef, PendingSchedule, Poll, PollId, Post, PostId, RoomId, StatusTransition,
    Story, StoryId, UserId,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("transition {transition:?} does not apply to {entity:?}")]
    InvalidTransition {
        transition: StatusTransition,
        entity: EntityRef,
    },
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_post(&self, id: &PostId) -> Result<Option<Post>, StoreError>;

    async fn find_story(&self, id: &StoryId) -> Result<Option<Story>, StoreError>;

    async fn find_poll(&self, id: &PollId) -> Result<Option<Poll>, StoreError>;

    /// Apply `transition` only if the record is still in the transition's
    /// starting state. Returns whether the record changed.
    ///
    /// `PublishPost` also sets the post's `created_at` to `at`.
    async fn update_status_if_pending(
        &self,
        entity: &EntityRef,
        transition: StatusTransition,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Returns whether a record was removed.
    async fn delete_by_id(&self, entity: &EntityRef) -> Result<bool, StoreError>;

    /// Followers of `author` whose follow started at or before `as_of`.
    async fn list_followers(
        &self,
        author: &UserId,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<UserId>, StoreError>;

    async fn find_follower_contact(&self, follower: &UserId)
    -> Result<Option<Contact>, StoreError>;

    async fn mark_fanout_completed(&self, post: &PostId) -> Result<(), StoreError>;

    /// Entities still waiting for their time-triggered state change:
    /// scheduled posts, active stories, open polls.
    async fn list_pending_schedules(&self) -> Result<Vec<PendingSchedule>, StoreError>;

    async fn list_rooms(&self) -> Result<Vec<RoomId>, StoreError>;

    async fn count_messages(&self, room: &RoomId) -> Result<usize, StoreError>;

    /// Delete the `n` oldest messages of `room`. Returns how many went.
    async fn delete_oldest_messages(&self, room: &RoomId, n: usize) -> Result<usize, StoreError>;
}
