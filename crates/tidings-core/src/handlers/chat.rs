//! ChatPrune: trim every room above the ceiling down to the floor, then
//! schedule the next run.
//!
//! A room that fails does not stop the others. Only a failed reschedule
//! fails the attempt, since without it the chain would stop.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::app::config::ChatPruneConfig;
use crate::domain::{DedupeKeys, HandlerError, Outcome, PruneChat, RoomId};
use crate::ports::{Cache, CacheKeys, RecordStore};
use crate::queue::{Broker, RetryPolicy, ScheduleRequest};
use crate::typed::{Handler, TaskContext};

pub struct ChatPruneHandler {
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn Cache>,
    broker: Arc<dyn Broker>,
    config: ChatPruneConfig,
    retry: RetryPolicy,
}

impl ChatPruneHandler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn Cache>,
        broker: Arc<dyn Broker>,
        config: ChatPruneConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            cache,
            broker,
            config,
            retry,
        }
    }

    /// Returns how many messages went.
    async fn prune_room(&self, room: &RoomId) -> Result<usize, HandlerError> {
        let count = self.store.count_messages(room).await?;
        if count <= self.config.ceiling {
            return Ok(0);
        }
        let deleted = self
            .store
            .delete_oldest_messages(room, count - self.config.floor)
            .await?;
        self.cache.invalidate(&CacheKeys::chat_recent(room)).await?;
        Ok(deleted)
    }
}

#[async_trait]
impl Handler<PruneChat> for ChatPruneHandler {
    #[tracing::instrument(skip_all, fields(attempt = ctx.attempt))]
    async fn handle(&self, _task: PruneChat, ctx: &TaskContext) -> Result<Outcome, HandlerError> {
        let mut pruned_rooms = 0usize;
        let mut deleted = 0usize;
        let mut failed_rooms = 0usize;
        let mut listing_failed = false;

        match self.store.list_rooms().await {
            Ok(rooms) => {
                for room in &rooms {
                    match self.prune_room(room).await {
                        Ok(0) => {}
                        Ok(n) => {
                            debug!(room = %room, deleted = n, "room trimmed");
                            pruned_rooms += 1;
                            deleted += n;
                        }
                        Err(e) => {
                            warn!(room = %room, error = %e, "room prune failed");
                            failed_rooms += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot list chat rooms");
                listing_failed = true;
            }
        }

        // 次回分。ここが失敗したら chain が切れるので attempt ごと失敗させる
        let request = ScheduleRequest::typed(&PruneChat::default())?
            .with_delay(self.config.period())
            .with_retry(self.retry.clone())
            .with_dedupe_key(DedupeKeys::CHAT_PRUNE);
        self.broker.schedule(request).await?;

        info!(pruned_rooms, deleted, failed_rooms, listing_failed, "chat prune finished");
        let outcome = if listing_failed {
            Outcome::skipped("room listing failed; scan not run")
        } else if pruned_rooms == 0 && failed_rooms == 0 {
            Outcome::skipped("no room above ceiling")
        } else {
            Outcome::success().with_reason(format!("deleted {deleted} messages"))
        };
        Ok(outcome.with_spawned(1))
    }
}
