//! TypedRegistry - Handler の登録と管理
//!
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::task::Task;
use crate::domain::TaskKind;

/// TypedRegistry は型付き Handler を登録・管理
///
/// # 使用例
/// ```ignore
/// let mut registry = TypedRegistry::new();
/// registry.register::<ExpirePoll, _>(PollExpiryHandler::new(store, cache))?;
///
/// let handler = registry.get(TaskKind::PollExpire);
/// ```
///
/// # 内部実装
/// - `register::<T: Task>(handler: impl Handler<T>)` で登録
/// - 内部的に TypedHandler でラップして DynHandler に変換
/// - HashMap<TaskKind, Arc<dyn DynHandler>> で管理
#[derive(Default)]
pub struct TypedRegistry {
    handlers: HashMap<TaskKind, Arc<dyn DynHandler>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Handler for task kind '{0}' is already registered")]
    AlreadyRegistered(TaskKind),
}

impl TypedRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(&T::KIND) {
            return Err(RegistryError::AlreadyRegistered(T::KIND));
        }
        self.handlers
            .insert(T::KIND, Arc::new(TypedHandler::new(handler)));
        Ok(())
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Registered kinds, in `TaskKind` order.
    pub fn registered_kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<TaskKind> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
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
    fn register_and_get() {
        let mut registry = TypedRegistry::new();
        registry.register::<ExpirePoll, _>(Noop).unwrap();

        let handler = registry.get(TaskKind::PollExpire).unwrap();
        assert_eq!(handler.kind(), TaskKind::PollExpire);
        assert!(registry.get(TaskKind::Publish).is_none());
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = TypedRegistry::new();
        registry.register::<ExpirePoll, _>(Noop).unwrap();
        let result = registry.register::<ExpirePoll, _>(Noop);
        assert!(matches!(
            result,
            Err(RegistryError::AlreadyRegistered(TaskKind::PollExpire))
        ));
    }

    #[test]
    fn registered_kinds_are_sorted() {
        let mut registry = TypedRegistry::new();
        registry.register::<PruneChat, _>(Noop).unwrap();
        registry.register::<ExpirePoll, _>(Noop).unwrap();
        assert_eq!(
            registry.registered_kinds(),
            vec![TaskKind::PollExpire, TaskKind::ChatPrune]
        );
    }
}
