//! Status - broker の状態を運用者向けにまとめる
//!
//! 見るべきは dead の一覧。残りは件数だけ。

use serde::{Deserialize, Serialize};

use crate::domain::DeadTask;
use crate::queue::{Broker, BrokerError, QueueCounts};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub counts: QueueCounts,
    /// Oldest death first.
    pub dead: Vec<DeadTask>,
}

impl StatusReport {
    pub async fn collect(broker: &dyn Broker) -> Result<Self, BrokerError> {
        Ok(Self {
            counts: broker.counts_by_state().await?,
            dead: broker.dead_tasks().await?,
        })
    }

    pub fn has_dead_tasks(&self) -> bool {
        !self.dead.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HandlerError, PruneChat, TaskKind};
    use crate::handlers::testkit::Harness;
    use crate::queue::{RetryPolicy, ScheduleRequest};
    use std::time::Duration;

    #[tokio::test]
    async fn reports_counts_and_dead_tasks() {
        let h = Harness::new();
        h.broker
            .schedule(
                ScheduleRequest::typed(&PruneChat::default())
                    .unwrap()
                    .with_retry(RetryPolicy::exponential(1, Duration::from_millis(10))),
            )
            .await
            .unwrap();
        let lease = h
            .broker
            .consume(TaskKind::ChatPrune, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        h.broker
            .fail(&lease, &HandlerError::transient("store offline"))
            .await
            .unwrap();

        let report = StatusReport::collect(h.broker.as_ref()).await.unwrap();
        assert_eq!(report.counts.dead, 1);
        assert!(report.has_dead_tasks());
        assert!(report.dead[0].error.contains("store offline"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["dead"][0]["kind"], "chat_prune");
    }
}
