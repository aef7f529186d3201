//! Handler trait - Task を実行する Handler の定義
//!
//! - ジェネリック trait (Handler<T>)
//! - Object-safe trait (DynHandler)
//! - Type erasure パターン (TypedHandler<T, H> → DynHandler)

use std::marker::PhantomData;

use async_trait::async_trait;

use super::task::Task;
use crate::domain::{HandlerError, Outcome, TaskEnvelope, TaskId, TaskKind};

/// Delivery metadata handed to a handler next to its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub kind: TaskKind,
    /// 1 on the first delivery.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl TaskContext {
    pub fn from_envelope(envelope: &TaskEnvelope) -> Self {
        Self {
            task_id: envelope.task_id(),
            kind: envelope.kind(),
            attempt: envelope.attempt(),
            max_attempts: envelope.max_attempts(),
        }
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Handler は Task を実行して Outcome を返す
///
/// # 使用例
/// ```ignore
/// struct PollExpiryHandler { store: Arc<dyn RecordStore> }
///
/// #[async_trait]
/// impl Handler<ExpirePoll> for PollExpiryHandler {
///     async fn handle(&self, task: ExpirePoll, ctx: &TaskContext) -> Result<Outcome, HandlerError> {
///         ...
///     }
/// }
/// ```
///
/// # ジェネリクスによる型安全性
/// - `Handler<ExpirePoll>` は `ExpirePoll` しか受け取れない
/// - コンパイル時に Task と Handler の対応が保証される
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T, ctx: &TaskContext) -> Result<Outcome, HandlerError>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// TypedHandler<T> を DynHandler に変換することで、
/// HashMap<TaskKind, Arc<dyn DynHandler>> に格納可能にします。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(
        &self,
        payload: serde_json::Value,
        ctx: &TaskContext,
    ) -> Result<Outcome, HandlerError>;

    fn kind(&self) -> TaskKind;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(
        &self,
        payload: serde_json::Value,
        ctx: &TaskContext,
    ) -> Result<Outcome, HandlerError> {
        // 壊れた payload は何度やっても壊れている
        let task: T = serde_json::from_value(payload)
            .map_err(|e| HandlerError::permanent(format!("json decode: {e}")))?;
        self.handler.handle(task, ctx).await
    }

    fn kind(&self) -> TaskKind {
        T::KIND
    }
}
