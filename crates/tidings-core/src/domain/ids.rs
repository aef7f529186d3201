//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID
//! broker が払い出す ID は ULID を使います。時刻でソート可能で、
//! 複数ノードで調整なしに生成できます。
//!
//! `Id<T>` は PhantomData のマーカーで型を分けるだけなので、
//! TaskId と AttemptId（= lease token）を取り違えるとコンパイルエラーになります。
//!
//! Entity ids (posts, stories, ...) belong to the external record store and
//! are opaque strings; they get their own newtypes at the bottom of this file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"task-", "attempt-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Attempt のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attempt {}

impl IdMarker for Attempt {
    fn prefix() -> &'static str {
        "attempt-"
    }
}

/// Identifier of a Task, assigned by the broker at schedule time.
pub type TaskId = Id<Task>;

/// Identifier of one delivery of a Task. Doubles as the lease token.
pub type AttemptId = Id<Attempt>;

// ========================================
// Record store ids
// ========================================

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

entity_id!(
    /// Id of a post in the record store.
    PostId
);
entity_id!(
    /// Id of a story in the record store.
    StoryId
);
entity_id!(
    /// Id of a poll in the record store.
    PollId
);
entity_id!(
    /// Id of a user (authors and followers).
    UserId
);
entity_id!(
    /// Id of a chat room.
    RoomId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let ulid1 = Ulid::new();
        let ulid2 = Ulid::new();

        let task = TaskId::from_ulid(ulid1);
        let attempt = AttemptId::from_ulid(ulid2);

        assert_eq!(task.as_ulid(), ulid1);
        assert_eq!(attempt.as_ulid(), ulid2);

        assert!(task.to_string().starts_with("task-"));
        assert!(attempt.to_string().starts_with("attempt-"));
        // let _: TaskId = attempt; // <- does not compile
    }

    #[test]
    fn ulid_ids_are_sortable() {
        // ULID は時刻ベースなので、生成順序でソート可能
        let id1 = TaskId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = TaskId::from_ulid(Ulid::new());

        assert!(id1 < id2);
    }

    #[test]
    fn task_id_survives_json() {
        let task_id = TaskId::from_ulid(Ulid::new());
        let serialized = serde_json::to_string(&task_id).unwrap();
        let back: TaskId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(task_id, back);
    }

    #[test]
    fn entity_ids_serialize_as_plain_strings() {
        let post = PostId::new("65f0c0ffee");
        assert_eq!(serde_json::to_string(&post).unwrap(), "\"65f0c0ffee\"");
        assert_eq!(post.to_string(), "65f0c0ffee");
        assert_eq!(RoomId::from("lobby").as_str(), "lobby");
    }
}
