//! InMemoryMediaStore - テスト・デモ用のオブジェクトストア
//!
//! `fail_next(n)` で直後の n 回の削除を失敗させられる。

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::MediaKind;
use crate::ports::{MediaError, MediaStore};

#[derive(Default)]
struct MediaState {
    objects: HashSet<(String, MediaKind)>,
    deleted: Vec<String>,
    failures_left: usize,
}

#[derive(Default)]
pub struct InMemoryMediaStore {
    state: Mutex<MediaState>,
}

impl InMemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_object(&self, media_ref: impl Into<String>, kind: MediaKind) {
        self.state
            .lock()
            .await
            .objects
            .insert((media_ref.into(), kind));
    }

    pub async fn contains(&self, media_ref: &str, kind: MediaKind) -> bool {
        self.state
            .lock()
            .await
            .objects
            .contains(&(media_ref.to_string(), kind))
    }

    /// Refs actually removed, in order.
    pub async fn deleted(&self) -> Vec<String> {
        self.state.lock().await.deleted.clone()
    }

    pub async fn fail_next(&self, n: usize) {
        self.state.lock().await.failures_left = n;
    }
}

#[async_trait]
impl MediaStore for InMemoryMediaStore {
    async fn delete_object(&self, media_ref: &str, kind: MediaKind) -> Result<bool, MediaError> {
        let mut state = self.state.lock().await;
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(MediaError::Unavailable("object store timeout".to_string()));
        }
        let removed = state.objects.remove(&(media_ref.to_string(), kind));
        if removed {
            state.deleted.push(media_ref.to_string());
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_object_is_not_an_error() {
        let media = InMemoryMediaStore::new();
        media.put_object("stories/a", MediaKind::Image).await;

        assert!(media.delete_object("stories/a", MediaKind::Image).await.unwrap());
        assert!(!media.delete_object("stories/a", MediaKind::Image).await.unwrap());
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let media = InMemoryMediaStore::new();
        media.put_object("stories/a", MediaKind::Video).await;
        media.fail_next(1).await;

        assert!(media.delete_object("stories/a", MediaKind::Video).await.is_err());
        assert!(media.delete_object("stories/a", MediaKind::Video).await.unwrap());
        assert_eq!(media.deleted().await, vec!["stories/a".to_string()]);
    }
}
