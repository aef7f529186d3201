//! Typed payloads, one per [`TaskKind`].
//!
//! Field names are camelCase on the wire so tasks written by the CRUD layer
//! and tasks written by handlers share one shape.

use serde::{Deserialize, Serialize};

use super::entity::MediaKind;
use super::ids::{PollId, PostId, StoryId, UserId};
use super::task::TaskKind;
use crate::typed::Task;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishPost {
    pub post_id: PostId,
}

impl Task for PublishPost {
    const KIND: TaskKind = TaskKind::Publish;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpireStory {
    pub story_id: StoryId,
    /// Object-store reference (the original service called it `publicId`).
    pub media_ref: String,
    pub media_kind: MediaKind,
}

impl Task for ExpireStory {
    const KIND: TaskKind = TaskKind::StoryExpire;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirePoll {
    pub poll_id: PollId,
}

impl Task for ExpirePoll {
    const KIND: TaskKind = TaskKind::PollExpire;
}

/// ChatPrune carries no data; every run scans all rooms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneChat {}

impl Task for PruneChat {
    const KIND: TaskKind = TaskKind::ChatPrune;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyFollower {
    pub follower_id: UserId,
    pub author_name: String,
    pub post_title: String,
    pub post_id: PostId,
}

impl Task for NotifyFollower {
    const KIND: TaskKind = TaskKind::NotifyFanout;
}
