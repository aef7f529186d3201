//! Publish: flip a scheduled post live, then fan out one notification task
//! per follower.
//!
//! The transition and the fan-out are tracked separately (`status` and
//! `fanout_completed`), so a retry after a partial fan-out skips the
//! transition and only repeats invalidation and fan-out.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::{
    DedupeKeys, EntityRef, HandlerError, NotifyFollower, Outcome, PostStatus, PublishPost,
    StatusTransition,
};
use crate::ports::{Cache, CacheKeys, Clock, RecordStore};
use crate::queue::{Broker, RetryPolicy, ScheduleRequest};
use crate::typed::{Handler, TaskContext};

pub struct PublishHandler {
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn Cache>,
    broker: Arc<dyn Broker>,
    clock: Arc<dyn Clock>,
    notify_retry: RetryPolicy,
}

impl PublishHandler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn Cache>,
        broker: Arc<dyn Broker>,
        clock: Arc<dyn Clock>,
        notify_retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            cache,
            broker,
            clock,
            notify_retry,
        }
    }
}

#[async_trait]
impl Handler<PublishPost> for PublishHandler {
    #[tracing::instrument(skip(self, ctx), fields(post_id = %task.post_id, attempt = ctx.attempt))]
    async fn handle(&self, task: PublishPost, ctx: &TaskContext) -> Result<Outcome, HandlerError> {
        let Some(post) = self.store.find_post(&task.post_id).await? else {
            return Ok(Outcome::skipped("post not found"));
        };
        if post.status == PostStatus::Published && post.fanout_completed {
            return Ok(Outcome::skipped("already published"));
        }

        let post = if post.status == PostStatus::Scheduled {
            let entity = EntityRef::Post(post.id.clone());
            let changed = self
                .store
                .update_status_if_pending(&entity, StatusTransition::PublishPost, self.clock.now())
                .await?;
            debug!(changed, "publish transition");

            // re-read: created_at is now the publish instant
            match self.store.find_post(&task.post_id).await? {
                Some(post) if post.status == PostStatus::Published => post,
                Some(_) => {
                    return Err(HandlerError::transient(
                        "post still scheduled after publish transition",
                    ));
                }
                None => return Ok(Outcome::skipped("post deleted while publishing")),
            }
        } else {
            post
        };

        self.cache
            .invalidate_all(&[CacheKeys::post(&post.id), CacheKeys::post_lists()])
            .await?;

        // follow set as of the publish instant, so a retry sees the same set
        let followers = self
            .store
            .list_followers(&post.author_id, post.created_at)
            .await?;

        for follower in &followers {
            let notify = NotifyFollower {
                follower_id: follower.clone(),
                author_name: post.author_name.clone(),
                post_title: post.title.clone(),
                post_id: post.id.clone(),
            };
            let request = ScheduleRequest::typed(&notify)?
                .with_retry(self.notify_retry.clone())
                .with_dedupe_key(DedupeKeys::notify(&post.id, follower));
            self.broker.schedule(request).await?;
        }

        self.store.mark_fanout_completed(&post.id).await?;
        info!(followers = followers.len(), "post published");
        Ok(Outcome::success().with_spawned(followers.len()))
    }
}
