//! RecoveryScanner - 起動時の再登録
//!
//! broker が memory-only だと再起動で task が消える。起動時に record store から
//! まだ pending な entity を拾い、entity 自身の due time で積み直す。
//!
//! 積み直しは dedupe key 付きなので、durable broker に同じ task が残っていれば
//! そちらに合流して重複しない。残っていた task の due time が entity とずれて
//! いれば、entity 側の時刻に動かす。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::config::RecoveryConfig;
use crate::domain::{
    DedupeKeys, ExpirePoll, ExpireStory, PendingSchedule, PruneChat, PublishPost,
};
use crate::ports::{Clock, RecordStore, StoreError};
use crate::queue::{Broker, BrokerError, RetryPolicy, ScheduleRequest};

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("cannot list pending schedules: {0}")]
    Store(#[from] StoreError),

    #[error("cannot re-submit task: {0}")]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Entity tasks handed to the broker (coalesced ones included).
    pub submitted: usize,
    /// Entities whose due time had already passed.
    pub overdue: usize,
    /// Overdue entities left alone because `recover_overdue` is off.
    pub skipped: usize,
    pub chat_prune_ensured: bool,
}

pub struct RecoveryScanner {
    store: Arc<dyn RecordStore>,
    broker: Arc<dyn Broker>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    config: RecoveryConfig,
}

impl RecoveryScanner {
    pub fn new(
        store: Arc<dyn RecordStore>,
        broker: Arc<dyn Broker>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            store,
            broker,
            clock,
            retry,
            config,
        }
    }

    pub async fn run(&self) -> Result<RecoveryReport, RecoveryError> {
        let pending = self.store.list_pending_schedules().await?;
        let now = self.clock.now();
        let mut report = RecoveryReport::default();

        for schedule in pending {
            let due_at = schedule.due_at();
            if due_at <= now {
                report.overdue += 1;
                if !self.config.recover_overdue {
                    debug!(?schedule, "overdue entity left alone");
                    report.skipped += 1;
                    continue;
                }
            }

            let request = Self::request_for(&schedule)?
                .with_not_before(due_at)
                .with_retry(self.retry.clone());
            let task_id = self.broker.schedule(request).await?;
            debug!(%task_id, %due_at, "re-submitted");
            report.submitted += 1;
        }

        // chat prune の chain は自分で自分を積むので、最初の 1 個だけここで用意する
        let prune = ScheduleRequest::typed(&PruneChat::default())?
            .with_retry(self.retry.clone())
            .with_dedupe_key(DedupeKeys::CHAT_PRUNE)
            .keep_existing();
        self.broker.schedule(prune).await?;
        report.chat_prune_ensured = true;

        info!(
            submitted = report.submitted,
            overdue = report.overdue,
            skipped = report.skipped,
            "recovery scan finished"
        );
        Ok(report)
    }

    fn request_for(schedule: &PendingSchedule) -> Result<ScheduleRequest, BrokerError> {
        let request = match schedule {
            PendingSchedule::Post { post_id, .. } => ScheduleRequest::typed(&PublishPost {
                post_id: post_id.clone(),
            })?
            .with_dedupe_key(DedupeKeys::publish(post_id)),
            PendingSchedule::Story {
                story_id,
                media_ref,
                media_kind,
                ..
            } => ScheduleRequest::typed(&ExpireStory {
                story_id: story_id.clone(),
                media_ref: media_ref.clone(),
                media_kind: *media_kind,
            })?
            .with_dedupe_key(DedupeKeys::story_expire(story_id)),
            PendingSchedule::Poll { poll_id, .. } => ScheduleRequest::typed(&ExpirePoll {
                poll_id: poll_id.clone(),
            })?
            .with_dedupe_key(DedupeKeys::poll_expire(poll_id)),
        };
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        MediaKind, Poll, PollId, PollStatus, Post, PostId, PostStatus, Story, StoryId,
        StoryStatus, TaskKind, UserId,
    };
    use crate::handlers::testkit::{Harness, t0};
    use chrono::Duration;

    fn scanner(h: &Harness, recover_overdue: bool) -> RecoveryScanner {
        RecoveryScanner::new(
            h.store.clone(),
            h.broker.clone(),
            h.clock.clone(),
            RetryPolicy::default(),
            RecoveryConfig { recover_overdue },
        )
    }

    fn post(id: &str, status: PostStatus, at: chrono::DateTime<chrono::Utc>) -> Post {
        Post {
            id: PostId::new(id),
            author_id: UserId::new("ann"),
            author_name: "Ann".to_string(),
            title: "Hello".to_string(),
            status,
            schedule_time: Some(at),
            created_at: t0() - Duration::days(1),
            fanout_completed: false,
        }
    }

    async fn seed(h: &Harness) {
        h.store
            .insert_post(post("p-future", PostStatus::Scheduled, t0() + Duration::hours(2)))
            .await;
        h.store
            .insert_post(post("p-late", PostStatus::Scheduled, t0() - Duration::minutes(5)))
            .await;
        h.store
            .insert_story(Story {
                id: StoryId::new("s-1"),
                author_id: UserId::new("ann"),
                media_ref: "stories/s-1".to_string(),
                media_kind: MediaKind::Image,
                status: StoryStatus::Active,
                expires_at: t0() + Duration::hours(24),
            })
            .await;
        h.store
            .insert_poll(Poll {
                id: PollId::new("q-1"),
                status: PollStatus::Closed,
                expires_at: t0() + Duration::hours(1),
            })
            .await;
    }

    #[tokio::test]
    async fn resubmits_pending_entities_at_their_due_time() {
        let h = Harness::new();
        seed(&h).await;

        let report = scanner(&h, true).run().await.unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                submitted: 3,
                overdue: 1,
                skipped: 0,
                chat_prune_ensured: true,
            }
        );

        // the late post is due now, the future one is not
        let late = h
            .broker
            .consume(TaskKind::Publish, std::time::Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(late.envelope().payload()["postId"], "p-late");
        assert!(
            h.broker
                .consume(TaskKind::Publish, std::time::Duration::ZERO)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn stale_pending_task_moves_to_the_entity_due_time() {
        let h = Harness::new();
        seed(&h).await;
        // left over from before the post was rescheduled to t0 + 2h
        let stale = h
            .broker
            .schedule(
                ScheduleRequest::typed(&PublishPost {
                    post_id: PostId::new("p-future"),
                })
                .unwrap()
                .with_not_before(t0() + Duration::minutes(30))
                .with_dedupe_key(DedupeKeys::publish(&PostId::new("p-future"))),
            )
            .await
            .unwrap();

        scanner(&h, true).run().await.unwrap();

        let record = h.broker.get(stale).await.unwrap().unwrap();
        assert_eq!(record.not_before, t0() + Duration::hours(2));
        assert_eq!(h.broker.counts_by_state().await.unwrap().pending, 4);
    }

    #[tokio::test]
    async fn overdue_entities_can_be_left_alone() {
        let h = Harness::new();
        seed(&h).await;

        let report = scanner(&h, false).run().await.unwrap();
        assert_eq!(report.submitted, 2);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn a_second_scan_creates_no_duplicates() {
        let h = Harness::new();
        seed(&h).await;
        let scanner = scanner(&h, true);

        scanner.run().await.unwrap();
        let before = h.broker.counts_by_state().await.unwrap();
        scanner.run().await.unwrap();
        let after = h.broker.counts_by_state().await.unwrap();

        // 3 entities + the chat prune chain
        assert_eq!(before.pending, 4);
        assert_eq!(after, before);
    }
}
