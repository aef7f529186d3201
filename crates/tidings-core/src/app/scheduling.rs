//! SchedulingClient - CRUD 層から呼ばれる登録 API
//!
//! Create/update で due time が決まったら、ここを通して broker に積む。
//! Every call is fire-and-acknowledge: it returns once the broker accepted
//! the task (or, with inline fallback, once the task ran inline).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use super::runtime::Runtime;
use crate::domain::{
    DedupeKeys, ExpirePoll, ExpireStory, HandlerError, MediaKind, Outcome, PollId, PostId,
    PublishPost, StoryId, TaskEnvelope, TaskId,
};
use crate::ports::{Clock, IdGenerator};
use crate::queue::{Broker, BrokerError, RetryPolicy, ScheduleRequest};
use crate::typed::Task;

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleReceipt {
    Scheduled(TaskId),
    /// The broker was down and the task was due, so it ran in the caller.
    ExecutedInline(Outcome),
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("inline execution failed: {0}")]
    Inline(#[source] HandlerError),
}

/// Time left until `at`; zero once it passed.
fn delay_until(now: DateTime<Utc>, at: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

pub struct SchedulingClient {
    broker: Arc<dyn Broker>,
    runtime: Arc<Runtime>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retry: RetryPolicy,
    inline_fallback: bool,
}

impl SchedulingClient {
    pub fn new(
        broker: Arc<dyn Broker>,
        runtime: Arc<Runtime>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            broker,
            runtime,
            clock,
            ids,
            retry,
            inline_fallback: true,
        }
    }

    pub fn with_inline_fallback(mut self, enabled: bool) -> Self {
        self.inline_fallback = enabled;
        self
    }

    pub async fn schedule_publish(
        &self,
        post_id: &PostId,
        at: DateTime<Utc>,
    ) -> Result<ScheduleReceipt, ScheduleError> {
        let task = PublishPost {
            post_id: post_id.clone(),
        };
        self.submit(&task, at, DedupeKeys::publish(post_id)).await
    }

    pub async fn schedule_story_expiry(
        &self,
        story_id: &StoryId,
        media_ref: &str,
        media_kind: MediaKind,
        at: DateTime<Utc>,
    ) -> Result<ScheduleReceipt, ScheduleError> {
        let task = ExpireStory {
            story_id: story_id.clone(),
            media_ref: media_ref.to_string(),
            media_kind,
        };
        self.submit(&task, at, DedupeKeys::story_expire(story_id))
            .await
    }

    pub async fn schedule_poll_expiry(
        &self,
        poll_id: &PollId,
        at: DateTime<Utc>,
    ) -> Result<ScheduleReceipt, ScheduleError> {
        let task = ExpirePoll {
            poll_id: poll_id.clone(),
        };
        self.submit(&task, at, DedupeKeys::poll_expire(poll_id))
            .await
    }

    /// Only a task that has not been leased yet can be cancelled.
    pub async fn cancel_schedule(&self, task_id: TaskId) -> Result<bool, BrokerError> {
        self.broker.cancel(task_id).await
    }

    /// Cancel the pending publish of `post_id`, e.g. when the post is deleted
    /// or its schedule time changes.
    pub async fn cancel_publish(&self, post_id: &PostId) -> Result<bool, BrokerError> {
        self.broker.cancel_key(&DedupeKeys::publish(post_id)).await
    }

    async fn submit<T: Task>(
        &self,
        task: &T,
        at: DateTime<Utc>,
        dedupe_key: String,
    ) -> Result<ScheduleReceipt, ScheduleError> {
        let kind = T::KIND;
        let delay = delay_until(self.clock.now(), at);
        let request = ScheduleRequest::typed(task)?
            .with_not_before(at)
            .with_retry(self.retry.clone())
            .with_dedupe_key(dedupe_key);
        let payload = request.payload.clone();

        match self.broker.schedule(request).await {
            Ok(task_id) => Ok(ScheduleReceipt::Scheduled(task_id)),
            Err(BrokerError::Unavailable(reason)) if self.inline_fallback && delay.is_zero() => {
                warn!(%kind, %reason, "broker unavailable; running task inline");
                let envelope =
                    TaskEnvelope::new(self.ids.generate_task_id(), kind, payload, self.clock.now())
                        .with_attempts(1, 1);
                let outcome = self
                    .runtime
                    .execute(&envelope)
                    .await
                    .map_err(ScheduleError::Inline)?;
                info!(%kind, outcome = ?outcome.kind, "inline task finished");
                Ok(ScheduleReceipt::ExecutedInline(outcome))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::builder::AppBuilder;
    use crate::domain::{Poll, PollStatus};
    use crate::handlers::PollExpiryHandler;
    use crate::handlers::testkit::{Harness, t0};
    use crate::ports::{RecordStore, UlidGenerator};
    use chrono::Duration as TimeDelta;

    fn client(h: &Harness) -> SchedulingClient {
        let runtime = AppBuilder::new()
            .register::<ExpirePoll, _>(PollExpiryHandler::new(h.store.clone(), h.cache.clone()))
            .unwrap()
            .build()
            .unwrap();
        SchedulingClient::new(
            h.broker.clone(),
            Arc::new(runtime),
            h.clock.clone(),
            Arc::new(UlidGenerator::new(h.clock.clone())),
            RetryPolicy::default(),
        )
    }

    async fn seed_poll(h: &Harness) {
        h.store
            .insert_poll(Poll {
                id: PollId::new("q-1"),
                status: PollStatus::Open,
                expires_at: t0(),
            })
            .await;
    }

    #[test]
    fn past_due_times_mean_now() {
        assert_eq!(delay_until(t0(), t0() - TimeDelta::minutes(1)), Duration::ZERO);
        assert_eq!(
            delay_until(t0(), t0() + TimeDelta::seconds(90)),
            Duration::from_secs(90)
        );
    }

    #[tokio::test]
    async fn future_expiry_is_due_at_its_time() {
        let h = Harness::new();
        let at = t0() + TimeDelta::hours(24);

        let receipt = client(&h)
            .schedule_poll_expiry(&PollId::new("q-1"), at)
            .await
            .unwrap();
        let ScheduleReceipt::Scheduled(task_id) = receipt else {
            panic!("expected a scheduled task");
        };
        let record = h.broker.get(task_id).await.unwrap().unwrap();
        assert_eq!(record.not_before, at);
    }

    #[tokio::test]
    async fn same_entity_is_scheduled_once() {
        let h = Harness::new();
        let client = client(&h);
        let at = t0() + TimeDelta::hours(1);

        let first = client.schedule_publish(&PostId::new("p-1"), at).await.unwrap();
        let second = client.schedule_publish(&PostId::new("p-1"), at).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(h.broker.counts_by_state().await.unwrap().pending, 1);

        assert!(client.cancel_publish(&PostId::new("p-1")).await.unwrap());
        assert_eq!(h.broker.counts_by_state().await.unwrap().cancelled, 1);
    }

    #[tokio::test]
    async fn due_task_runs_inline_when_the_broker_is_down() {
        let h = Harness::new();
        seed_poll(&h).await;
        h.broker.close().await.unwrap();

        let receipt = client(&h)
            .schedule_poll_expiry(&PollId::new("q-1"), t0())
            .await
            .unwrap();
        assert!(matches!(receipt, ScheduleReceipt::ExecutedInline(ref o) if !o.is_skipped()));
        assert!(h.store.find_poll(&PollId::new("q-1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn future_task_is_not_run_inline() {
        let h = Harness::new();
        seed_poll(&h).await;
        h.broker.close().await.unwrap();

        let err = client(&h)
            .schedule_poll_expiry(&PollId::new("q-1"), t0() + TimeDelta::minutes(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Broker(BrokerError::Unavailable(_))));
        assert!(h.store.find_poll(&PollId::new("q-1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn inline_fallback_can_be_turned_off() {
        let h = Harness::new();
        seed_poll(&h).await;
        h.broker.close().await.unwrap();

        let err = client(&h)
            .with_inline_fallback(false)
            .schedule_poll_expiry(&PollId::new("q-1"), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Broker(_)));
    }
}
