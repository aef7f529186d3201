//! EventSink port - イベント記録の抽象化
//!
//! broker は状態遷移ごとに [`DomainEvent`] を 1 つ発行する。
//! 既定の sink はログに流すだけ（TracingEventSink）。

use tracing::{debug, error, info, warn};

use crate::domain::DomainEvent;

/// EventSink はドメインイベントを記録
///
/// 呼び出しは broker のロック内で行われるので、ブロックしないこと。
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DomainEvent);
}

/// 何もしない
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &DomainEvent) {}
}

/// Writes the event stream to the log. Dead tasks are logged at `error`,
/// retries at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &DomainEvent) {
        match event {
            DomainEvent::TaskScheduled {
                task_id,
                kind,
                not_before,
            } => debug!(%task_id, %kind, %not_before, "task scheduled"),
            DomainEvent::TaskCompleted {
                task_id,
                kind,
                attempts,
            } => info!(%task_id, %kind, attempts, "task completed"),
            DomainEvent::RetryScheduled {
                task_id,
                kind,
                attempt,
                next_run_at,
                error,
            } => warn!(%task_id, %kind, attempt, %next_run_at, %error, "retry scheduled"),
            DomainEvent::LeaseExpired {
                task_id,
                kind,
                attempt,
            } => warn!(%task_id, %kind, attempt, "lease expired"),
            DomainEvent::TaskCancelled { task_id, kind } => {
                info!(%task_id, %kind, "task cancelled")
            }
            DomainEvent::TaskDead(dead) => error!(
                task_id = %dead.task_id,
                kind = %dead.kind,
                attempts = dead.attempts,
                error = %dead.error,
                payload = %dead.payload,
                "task dead"
            ),
        }
    }
}
