//! StoryExpire: remove the story record and its media object.
//!
//! The record delete and the object delete are both idempotent, so every
//! attempt runs both. A retry after a media failure finds the record gone
//! and only tries the object again.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::{EntityRef, ExpireStory, HandlerError, Outcome};
use crate::ports::{Cache, CacheKeys, MediaStore, RecordStore};
use crate::typed::{Handler, TaskContext};

pub struct StoryExpiryHandler {
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn Cache>,
    media: Arc<dyn MediaStore>,
}

impl StoryExpiryHandler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn Cache>,
        media: Arc<dyn MediaStore>,
    ) -> Self {
        Self {
            store,
            cache,
            media,
        }
    }
}

#[async_trait]
impl Handler<ExpireStory> for StoryExpiryHandler {
    #[tracing::instrument(skip(self, ctx), fields(story_id = %task.story_id, attempt = ctx.attempt))]
    async fn handle(&self, task: ExpireStory, ctx: &TaskContext) -> Result<Outcome, HandlerError> {
        let entity = EntityRef::Story(task.story_id.clone());
        let removed = self.store.delete_by_id(&entity).await?;
        self.cache
            .invalidate_all(&[CacheKeys::story(&task.story_id), CacheKeys::story_lists()])
            .await?;

        let object_removed = match self
            .media
            .delete_object(&task.media_ref, task.media_kind)
            .await
        {
            Ok(removed) => removed,
            Err(e) => {
                warn!(
                    media_ref = %task.media_ref,
                    media_kind = task.media_kind.as_str(),
                    error = %e,
                    last_attempt = ctx.is_last_attempt(),
                    "story media orphaned"
                );
                return Err(e.into());
            }
        };

        if !removed && !object_removed {
            return Ok(Outcome::skipped("story already expired"));
        }
        info!(removed, object_removed, "story expired");
        Ok(Outcome::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MediaKind, Story, StoryId, StoryStatus, TaskKind, UserId};
    use crate::handlers::testkit::{Harness, t0};
    use crate::ports::RecordStore;

    fn handler(h: &Harness) -> StoryExpiryHandler {
        StoryExpiryHandler::new(h.store.clone(), h.cache.clone(), h.media.clone())
    }

    fn task() -> ExpireStory {
        ExpireStory {
            story_id: StoryId::new("s-1"),
            media_ref: "stories/s-1".to_string(),
            media_kind: MediaKind::Video,
        }
    }

    async fn seed(h: &Harness) {
        h.store
            .insert_story(Story {
                id: StoryId::new("s-1"),
                author_id: UserId::new("ann"),
                media_ref: "stories/s-1".to_string(),
                media_kind: MediaKind::Video,
                status: StoryStatus::Active,
                expires_at: t0(),
            })
            .await;
        h.media.put_object("stories/s-1", MediaKind::Video).await;
    }

    #[tokio::test]
    async fn removes_record_and_media() {
        let h = Harness::new();
        seed(&h).await;

        let outcome = handler(&h)
            .handle(task(), &h.ctx(TaskKind::StoryExpire))
            .await
            .unwrap();
        assert!(!outcome.is_skipped());
        assert!(h.store.find_story(&StoryId::new("s-1")).await.unwrap().is_none());
        assert!(!h.media.contains("stories/s-1", MediaKind::Video).await);
    }

    #[tokio::test]
    async fn media_failure_is_retried_without_the_record() {
        let h = Harness::new();
        seed(&h).await;
        h.media.fail_next(1).await;
        let handler = handler(&h);

        let err = handler
            .handle(task(), &h.ctx(TaskKind::StoryExpire))
            .await
            .unwrap_err();
        assert!(!err.is_permanent());
        assert!(h.store.find_story(&StoryId::new("s-1")).await.unwrap().is_none());
        assert!(h.media.contains("stories/s-1", MediaKind::Video).await);

        let outcome = handler
            .handle(task(), &h.ctx(TaskKind::StoryExpire))
            .await
            .unwrap();
        assert!(!outcome.is_skipped());
        assert_eq!(h.media.deleted().await, vec!["stories/s-1".to_string()]);
    }

    #[tokio::test]
    async fn nothing_left_is_skipped() {
        let h = Harness::new();
        let outcome = handler(&h)
            .handle(task(), &h.ctx(TaskKind::StoryExpire))
            .await
            .unwrap();
        assert!(outcome.is_skipped());
    }
}
