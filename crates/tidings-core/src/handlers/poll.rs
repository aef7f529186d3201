//! PollExpire: remove a poll once its horizon passes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::domain::{EntityRef, ExpirePoll, HandlerError, Outcome};
use crate::ports::{Cache, CacheKeys, RecordStore};
use crate::typed::{Handler, TaskContext};

pub struct PollExpiryHandler {
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn Cache>,
}

impl PollExpiryHandler {
    pub fn new(store: Arc<dyn RecordStore>, cache: Arc<dyn Cache>) -> Self {
        Self { store, cache }
    }
}

#[async_trait]
impl Handler<ExpirePoll> for PollExpiryHandler {
    #[tracing::instrument(skip(self, ctx), fields(poll_id = %task.poll_id, attempt = ctx.attempt))]
    async fn handle(&self, task: ExpirePoll, ctx: &TaskContext) -> Result<Outcome, HandlerError> {
        let removed = self
            .store
            .delete_by_id(&EntityRef::Poll(task.poll_id.clone()))
            .await?;
        // also on a retry where the delete already happened
        self.cache
            .invalidate_all(&[CacheKeys::poll(&task.poll_id), CacheKeys::poll_lists()])
            .await?;

        if !removed {
            return Ok(Outcome::skipped("poll not found"));
        }
        info!("poll expired");
        Ok(Outcome::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Poll, PollId, PollStatus, TaskKind};
    use crate::handlers::testkit::{Harness, t0};
    use crate::ports::{KeyPattern, RecordStore};

    #[tokio::test]
    async fn expires_once() {
        let h = Harness::new();
        h.store
            .insert_poll(Poll {
                id: PollId::new("q-1"),
                status: PollStatus::Open,
                expires_at: t0(),
            })
            .await;
        let handler = PollExpiryHandler::new(h.store.clone(), h.cache.clone());
        let task = ExpirePoll {
            poll_id: PollId::new("q-1"),
        };

        let first = handler
            .handle(task.clone(), &h.ctx(TaskKind::PollExpire))
            .await
            .unwrap();
        assert!(!first.is_skipped());
        assert!(h.store.find_poll(&PollId::new("q-1")).await.unwrap().is_none());
        assert!(
            h.cache
                .invalidated()
                .await
                .contains(&KeyPattern::Exact("poll:q-1".to_string()))
        );

        let second = handler
            .handle(task, &h.ctx(TaskKind::PollExpire))
            .await
            .unwrap();
        assert!(second.is_skipped());
    }
}
