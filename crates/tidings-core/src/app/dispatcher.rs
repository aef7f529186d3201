//! Dispatcher - kind ごとの worker 群
//!
//! 各 worker は consume → handle (timeout 付き) → ack | fail を繰り返す。
//! - shutdown は watch channel で全 worker に伝える
//! - 実行中の handler は強制キャンセルしない（新しい lease を取らなくなるだけ）
//! - 順序は broker が kind ごとに due time 順で渡す。kind をまたぐ順序はない

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use super::config::EngineConfig;
use super::runtime::Runtime;
use crate::domain::{HandlerError, TaskKind};
use crate::queue::{Broker, BrokerError, FailDisposition, Lease};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Kinds not listed get one worker.
    pub workers_per_kind: BTreeMap<TaskKind, usize>,
    pub handler_timeout: Duration,
    pub consume_wait: Duration,
    pub error_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_engine(&EngineConfig::default())
    }
}

impl DispatcherConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            workers_per_kind: config.workers_per_kind.clone(),
            handler_timeout: config.handler_timeout(),
            consume_wait: config.consume_wait(),
            error_backoff: config.error_backoff(),
        }
    }

    pub fn workers_for(&self, kind: TaskKind) -> usize {
        self.workers_per_kind.get(&kind).copied().unwrap_or(1)
    }
}

/// Worker group handle.
/// - `shutdown_and_join()` で新しい lease を止め、全 worker の終了を待つ
/// - broker が close されると worker は自分で抜ける
pub struct Dispatcher {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn(broker: Arc<dyn Broker>, runtime: Arc<Runtime>, config: DispatcherConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = Arc::new(config);

        let mut joins = Vec::new();
        for kind in TaskKind::ALL {
            for index in 0..config.workers_for(kind) {
                let worker = Worker {
                    kind,
                    index,
                    broker: Arc::clone(&broker),
                    runtime: Arc::clone(&runtime),
                    config: Arc::clone(&config),
                };
                let rx = shutdown_rx.clone();
                joins.push(tokio::spawn(async move { worker.run(rx).await }));
            }
        }
        info!(workers = joins.len(), "dispatcher started");

        Self { shutdown_tx, joins }
    }

    pub fn worker_count(&self) -> usize {
        self.joins.len()
    }

    /// Stop taking new leases. In-flight handlers finish normally.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                warn!(error = %e, "worker task ended abnormally");
            }
        }
        info!("dispatcher stopped");
    }
}

struct Worker {
    kind: TaskKind,
    index: usize,
    broker: Arc<dyn Broker>,
    runtime: Arc<Runtime>,
    config: Arc<DispatcherConfig>,
}

impl Worker {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let span = info_span!("worker", kind = %self.kind, index = self.index);
        async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                // consume は待つので shutdown と競合させる
                let consumed = tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    consumed = self.broker.consume(self.kind, self.config.consume_wait) => consumed,
                };

                match consumed {
                    Ok(Some(lease)) => self.process(lease).await,
                    Ok(None) => {}
                    Err(BrokerError::Closed) => {
                        debug!("broker closed; worker exiting");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "consume failed; backing off");
                        tokio::select! {
                            _ = shutdown_rx.changed() => {}
                            _ = tokio::time::sleep(self.config.error_backoff) => {}
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn process(&self, lease: Lease) {
        let envelope = lease.envelope();
        let span = info_span!(
            "task",
            task_id = %envelope.task_id(),
            attempt = envelope.attempt(),
        );

        async {
            let result =
                match tokio::time::timeout(self.config.handler_timeout, self.runtime.execute(envelope))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(HandlerError::transient("handler deadline exceeded")),
                };

            match result {
                Ok(outcome) => match self.broker.ack(&lease).await {
                    Ok(()) => debug!(outcome = ?outcome.kind, reason = ?outcome.reason, "task done"),
                    Err(BrokerError::LeaseLost { .. }) => {
                        warn!("lease lost before ack; result discarded")
                    }
                    Err(e) => warn!(error = %e, "ack failed; task will be redelivered"),
                },
                Err(err) => {
                    warn!(error = %err, "handler failed");
                    match self.broker.fail(&lease, &err).await {
                        Ok(FailDisposition::Retrying { next_run_at }) => {
                            debug!(%next_run_at, "retry scheduled")
                        }
                        Ok(FailDisposition::Dead(_)) => {}
                        Err(BrokerError::LeaseLost { .. }) => {
                            warn!("lease lost before fail; report discarded")
                        }
                        Err(e) => warn!(error = %e, "fail report failed"),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExpirePoll, Outcome, PollId};
    use crate::ports::{NoopEventSink, SystemClock, UlidGenerator};
    use crate::queue::{InMemoryBroker, RetryPolicy, ScheduleRequest, TaskState};
    use crate::typed::{Handler, TaskContext, TypedRegistry};
    use async_trait::async_trait;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        sleep: Duration,
    }

    #[async_trait]
    impl Handler<ExpirePoll> for CountingHandler {
        async fn handle(&self, _task: ExpirePoll, _ctx: &TaskContext) -> Result<Outcome, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.sleep).await;
            Ok(Outcome::success())
        }
    }

    fn broker() -> Arc<InMemoryBroker> {
        let clock = Arc::new(SystemClock);
        Arc::new(InMemoryBroker::new(
            clock.clone(),
            Arc::new(UlidGenerator::new(clock)),
            Arc::new(NoopEventSink),
        ))
    }

    fn runtime(calls: Arc<AtomicUsize>, sleep: Duration) -> Arc<Runtime> {
        let mut registry = TypedRegistry::new();
        registry
            .register::<ExpirePoll, _>(CountingHandler { calls, sleep })
            .unwrap();
        Arc::new(Runtime::new(Arc::new(registry)))
    }

    fn config(handler_timeout: Duration) -> DispatcherConfig {
        DispatcherConfig {
            workers_per_kind: BTreeMap::new(),
            handler_timeout,
            consume_wait: Duration::from_millis(50),
            error_backoff: Duration::from_millis(10),
        }
    }

    fn request(retry: RetryPolicy) -> ScheduleRequest {
        ScheduleRequest::typed(&ExpirePoll {
            poll_id: PollId::new("q-1"),
        })
        .unwrap()
        .with_retry(retry)
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..300 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn one_worker_per_kind_unless_configured() {
        let config = DispatcherConfig::default();
        assert_eq!(config.workers_for(TaskKind::NotifyFanout), 4);
        assert_eq!(config.workers_for(TaskKind::Publish), 1);
    }

    #[tokio::test]
    async fn runs_and_acks_a_due_task() {
        let broker = broker();
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::spawn(
            broker.clone(),
            runtime(calls.clone(), Duration::ZERO),
            config(Duration::from_secs(5)),
        );
        assert_eq!(dispatcher.worker_count(), TaskKind::ALL.len());

        let task_id = broker.schedule(request(RetryPolicy::default())).await.unwrap();
        eventually(|| {
            let broker = broker.clone();
            async move {
                matches!(
                    broker.get(task_id).await.unwrap().map(|r| r.state),
                    Some(TaskState::Done)
                )
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        dispatcher.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn handler_timeout_fails_the_attempt() {
        let broker = broker();
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::spawn(
            broker.clone(),
            runtime(calls.clone(), Duration::from_secs(5)),
            config(Duration::from_millis(20)),
        );

        broker
            .schedule(request(RetryPolicy::exponential(1, Duration::from_millis(10))))
            .await
            .unwrap();
        eventually(|| {
            let broker = broker.clone();
            async move { !broker.dead_tasks().await.unwrap().is_empty() }
        })
        .await;

        let dead = broker.dead_tasks().await.unwrap();
        assert!(dead[0].error.contains("handler deadline exceeded"));
        dispatcher.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn workers_exit_when_the_broker_closes() {
        let broker = broker();
        let dispatcher = Dispatcher::spawn(
            broker.clone(),
            runtime(Arc::new(AtomicUsize::new(0)), Duration::ZERO),
            config(Duration::from_secs(1)),
        );
        broker.close().await.unwrap();

        for join in dispatcher.joins {
            tokio::time::timeout(Duration::from_secs(2), join)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
