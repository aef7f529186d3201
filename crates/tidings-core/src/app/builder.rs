//! AppBuilder - handler の登録と起動時検証
//!
//! # Fail-fast 設計
//! - `expect_kinds()` / `expect_all_kinds()` で期待される TaskKind を登録
//! - `build()` 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - 不足があれば BuildError を返す（task が来てから気づくのでは遅い）

use std::sync::Arc;

use super::runtime::Runtime;
use crate::domain::TaskKind;
use crate::typed::{Handler, RegistryError, Task, TypedRegistry};

/// # 使用例
/// ```ignore
/// let runtime = AppBuilder::new()
///     .register::<ExpirePoll, _>(PollExpiryHandler::new(store, cache))?
///     .expect_kinds(&[TaskKind::PollExpire])
///     .build()?;
/// ```
pub struct AppBuilder {
    registry: TypedRegistry,
    expected_kinds: Option<Vec<TaskKind>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task kinds: {0:?}. These kinds were expected but not registered.")]
    MissingKinds(Vec<TaskKind>),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: TypedRegistry::new(),
            expected_kinds: None,
        }
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn expect_kinds(mut self, kinds: &[TaskKind]) -> Self {
        self.expected_kinds = Some(kinds.to_vec());
        self
    }

    /// Every kind the engine knows must have a handler.
    pub fn expect_all_kinds(self) -> Self {
        self.expect_kinds(&TaskKind::ALL)
    }

    pub fn build(self) -> Result<Runtime, BuildError> {
        if let Some(expected) = &self.expected_kinds {
            let registered = self.registry.registered_kinds();
            let missing: Vec<TaskKind> = expected
                .iter()
                .filter(|kind| !registered.contains(*kind))
                .copied()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingKinds(missing));
            }
        }
        Ok(Runtime::new(Arc::new(self.registry)))
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExpirePoll, HandlerError, Outcome, PruneChat};
    use crate::typed::TaskContext;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Handler<ExpirePoll> for Noop {
        async fn handle(&self, _task: ExpirePoll, _ctx: &TaskContext) -> Result<Outcome, HandlerError> {
            Ok(Outcome::success())
        }
    }

    #[async_trait]
    impl Handler<PruneChat> for Noop {
        async fn handle(&self, _task: PruneChat, _ctx: &TaskContext) -> Result<Outcome, HandlerError> {
            Ok(Outcome::success())
        }
    }

    #[test]
    fn test_build_success() {
        let runtime = AppBuilder::new()
            .register::<ExpirePoll, _>(Noop)
            .unwrap()
            .expect_kinds(&[TaskKind::PollExpire])
            .build()
            .unwrap();
        assert_eq!(runtime.registry().registered_kinds(), vec![TaskKind::PollExpire]);
    }

    #[test]
    fn test_build_missing_kinds() {
        let result = AppBuilder::new()
            .register::<ExpirePoll, _>(Noop)
            .unwrap()
            .register::<PruneChat, _>(Noop)
            .unwrap()
            .expect_all_kinds()
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingKinds(missing))
                if missing == vec![TaskKind::Publish, TaskKind::StoryExpire, TaskKind::NotifyFanout]
        ));
    }

    #[test]
    fn test_build_no_expectations() {
        assert!(AppBuilder::new().build().is_ok());
    }
}
