//! Cache port - 読み取りキャッシュの無効化
//!
//! CRUD 層は posts / stories / polls / chat の読み取り結果をキャッシュしている。
//! handler は store を書き換えたあと、ack する前にここで該当キーを落とす。

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{PollId, PostId, RoomId, StoryId};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Which keys to drop.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPattern {
    Exact(String),
    /// Every key starting with this prefix.
    Prefix(String),
}

impl KeyPattern {
    /// `"posts:list:*"` is a prefix pattern, anything else is exact.
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => KeyPattern::Prefix(prefix.to_string()),
            None => KeyPattern::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Exact(k) => k == key,
            KeyPattern::Prefix(p) => key.starts_with(p.as_str()),
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::Exact(k) => f.write_str(k),
            KeyPattern::Prefix(p) => write!(f, "{p}*"),
        }
    }
}

/// Key names shared with the CRUD layer.
pub struct CacheKeys;

impl CacheKeys {
    pub fn post(id: &PostId) -> KeyPattern {
        KeyPattern::Exact(format!("post:{id}"))
    }

    pub fn post_lists() -> KeyPattern {
        KeyPattern::parse("posts:list:*")
    }

    pub fn story(id: &StoryId) -> KeyPattern {
        KeyPattern::Exact(format!("story:{id}"))
    }

    pub fn story_lists() -> KeyPattern {
        KeyPattern::parse("stories:list:*")
    }

    pub fn poll(id: &PollId) -> KeyPattern {
        KeyPattern::Exact(format!("poll:{id}"))
    }

    pub fn poll_lists() -> KeyPattern {
        KeyPattern::parse("polls:list:*")
    }

    pub fn chat_recent(room: &RoomId) -> KeyPattern {
        KeyPattern::Exact(format!("chat:{room}:recent"))
    }

    pub fn chat_rooms() -> KeyPattern {
        KeyPattern::Exact("chat:rooms".to_string())
    }
}

#[async_trait]
pub trait Cache: Send + Sync {
    /// Drop every key matching `pattern`. Returns how many keys went.
    async fn invalidate(&self, pattern: &KeyPattern) -> Result<usize, CacheError>;

    async fn invalidate_all(&self, patterns: &[KeyPattern]) -> Result<usize, CacheError> {
        let mut removed = 0;
        for pattern in patterns {
            removed += self.invalidate(pattern).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::exact("post:p-1", "post:p-1", true)]
    #[case::exact_other("post:p-1", "post:p-10", false)]
    #[case::prefix("posts:list:*", "posts:list:page=2", true)]
    #[case::prefix_miss("posts:list:*", "post:p-1", false)]
    fn pattern_matching(#[case] pattern: &str, #[case] key: &str, #[case] expected: bool) {
        assert_eq!(KeyPattern::parse(pattern).matches(key), expected);
    }

    #[test]
    fn chat_keys_include_room() {
        let room = RoomId::new("lobby");
        assert_eq!(CacheKeys::chat_recent(&room).to_string(), "chat:lobby:recent");
        assert_eq!(CacheKeys::post_lists().to_string(), "posts:list:*");
    }
}
