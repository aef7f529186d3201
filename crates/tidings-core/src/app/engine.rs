//! Engine - 起動から停止までのワイヤリング
//!
//! start の順序:
//! 1. config 検証
//! 2. broker を用意（journal_path があれば journal から復元）
//! 3. handler 登録と全 kind の存在チェック（fail fast）
//! 4. recovery scan
//! 5. dispatcher 起動
//!
//! shutdown は逆順: worker を止めてから broker を close する。

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use super::builder::{AppBuilder, BuildError};
use super::config::{ConfigError, EngineConfig};
use super::dispatcher::{Dispatcher, DispatcherConfig};
use super::recovery::{RecoveryError, RecoveryReport, RecoveryScanner};
use super::runtime::Runtime;
use super::scheduling::SchedulingClient;
use super::status::StatusReport;
use crate::domain::{ExpirePoll, ExpireStory, NotifyFollower, PruneChat, PublishPost};
use crate::handlers::{
    ChatPruneHandler, NotifyHandler, PollExpiryHandler, PublishHandler, StoryExpiryHandler,
};
use crate::ports::{
    Cache, Clock, EventSink, IdGenerator, MediaStore, NotificationChannel, RecordStore,
    SystemClock, TracingEventSink, UlidGenerator,
};
use crate::queue::{Broker, BrokerError, BrokerSettings, InMemoryBroker};
use crate::typed::RegistryError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    #[error("recovery: {0}")]
    Recovery(#[from] RecoveryError),
}

/// Collaborators the engine does not own.
pub struct EngineDeps {
    pub store: Arc<dyn RecordStore>,
    pub cache: Arc<dyn Cache>,
    pub media: Arc<dyn MediaStore>,
    pub channel: Arc<dyn NotificationChannel>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub events: Arc<dyn EventSink>,
    /// Use this broker instead of building one from the config.
    pub broker: Option<Arc<dyn Broker>>,
}

impl EngineDeps {
    /// System clock, ULID ids, events to the log.
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn Cache>,
        media: Arc<dyn MediaStore>,
        channel: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            store,
            cache,
            media,
            channel,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
            events: Arc::new(TracingEventSink),
            broker: None,
        }
    }

    /// Ids follow the same clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }
}

pub struct Engine {
    broker: Arc<dyn Broker>,
    runtime: Arc<Runtime>,
    scheduling: SchedulingClient,
    dispatcher: Dispatcher,
    recovery: RecoveryReport,
}

impl Engine {
    pub async fn start(config: EngineConfig, deps: EngineDeps) -> Result<Self, EngineError> {
        config.validate()?;

        let broker = match deps.broker.clone() {
            Some(broker) => broker,
            None => Self::build_broker(&config, &deps).await?,
        };
        let retry = config.retry_policy();

        let runtime = AppBuilder::new()
            .register::<PublishPost, _>(PublishHandler::new(
                deps.store.clone(),
                deps.cache.clone(),
                broker.clone(),
                deps.clock.clone(),
                retry.clone(),
            ))?
            .register::<ExpireStory, _>(StoryExpiryHandler::new(
                deps.store.clone(),
                deps.cache.clone(),
                deps.media.clone(),
            ))?
            .register::<ExpirePoll, _>(PollExpiryHandler::new(
                deps.store.clone(),
                deps.cache.clone(),
            ))?
            .register::<PruneChat, _>(ChatPruneHandler::new(
                deps.store.clone(),
                deps.cache.clone(),
                broker.clone(),
                config.chat_prune.clone(),
                retry.clone(),
            ))?
            .register::<NotifyFollower, _>(NotifyHandler::new(
                deps.store.clone(),
                deps.channel.clone(),
                config.notification.clone(),
            ))?
            .expect_all_kinds()
            .build()?;
        let runtime = Arc::new(runtime);

        let recovery = RecoveryScanner::new(
            deps.store.clone(),
            broker.clone(),
            deps.clock.clone(),
            retry.clone(),
            config.recovery.clone(),
        )
        .run()
        .await?;

        let dispatcher = Dispatcher::spawn(
            broker.clone(),
            runtime.clone(),
            DispatcherConfig::from_engine(&config),
        );
        let scheduling = SchedulingClient::new(
            broker.clone(),
            runtime.clone(),
            deps.clock.clone(),
            deps.ids.clone(),
            retry,
        )
        .with_inline_fallback(config.inline_fallback);

        info!(
            workers = dispatcher.worker_count(),
            recovered = recovery.submitted,
            "engine started"
        );
        Ok(Self {
            broker,
            runtime,
            scheduling,
            dispatcher,
            recovery,
        })
    }

    async fn build_broker(
        config: &EngineConfig,
        deps: &EngineDeps,
    ) -> Result<Arc<dyn Broker>, BrokerError> {
        let broker = InMemoryBroker::new(deps.clock.clone(), deps.ids.clone(), deps.events.clone())
            .with_settings(BrokerSettings {
                lease_duration: config.lease_duration(),
                ..BrokerSettings::default()
            });
        let broker = match &config.journal_path {
            Some(path) => broker.with_file_journal(path).await?,
            None => broker,
        };
        Ok(Arc::new(broker))
    }

    pub fn scheduling(&self) -> &SchedulingClient {
        &self.scheduling
    }

    pub fn broker(&self) -> Arc<dyn Broker> {
        Arc::clone(&self.broker)
    }

    pub fn runtime(&self) -> Arc<Runtime> {
        Arc::clone(&self.runtime)
    }

    /// What the startup scan re-submitted.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub async fn status(&self) -> Result<StatusReport, BrokerError> {
        StatusReport::collect(self.broker.as_ref()).await
    }

    /// Stop taking work, wait for in-flight handlers, then close the broker.
    /// Pending tasks stay in the journal.
    pub async fn shutdown(self) -> Result<(), BrokerError> {
        self.dispatcher.shutdown_and_join().await;
        self.broker.close().await?;
        info!("engine stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskKind;
    use crate::handlers::testkit::Harness;
    use crate::ports::NoopEventSink;

    fn deps(h: &Harness) -> EngineDeps {
        EngineDeps::new(
            h.store.clone(),
            h.cache.clone(),
            h.media.clone(),
            h.channel.clone(),
        )
        .with_clock(h.clock.clone())
        .with_events(Arc::new(NoopEventSink))
    }

    #[tokio::test]
    async fn starts_with_every_kind_registered() {
        let h = Harness::new();
        let engine = Engine::start(EngineConfig::default(), deps(&h)).await.unwrap();

        assert_eq!(engine.runtime().registry().registered_kinds(), TaskKind::ALL.to_vec());
        assert!(engine.recovery_report().chat_prune_ensured);

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_config_fails_fast() {
        let h = Harness::new();
        let config = EngineConfig {
            max_attempts: 0,
            ..EngineConfig::default()
        };
        let result = Engine::start(config, deps(&h)).await;
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn shutdown_closes_the_broker() {
        let h = Harness::new();
        let engine = Engine::start(EngineConfig::default(), deps(&h).with_broker(h.broker.clone()))
            .await
            .unwrap();
        engine.shutdown().await.unwrap();

        let err = h
            .broker
            .schedule(
                crate::queue::ScheduleRequest::typed(&PruneChat::default()).unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable(_)));
    }
}
