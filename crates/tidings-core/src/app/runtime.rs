//! Runtime - TaskEnvelope を登録済み handler に渡す
//!
//! Built once during startup (registry is immutable afterwards), shared by the
//! dispatcher workers and the inline fallback of the scheduling API.

use std::sync::Arc;

use crate::domain::{HandlerError, Outcome, TaskEnvelope};
use crate::typed::{TaskContext, TypedRegistry};

pub struct Runtime {
    registry: Arc<TypedRegistry>,
}

impl Runtime {
    pub fn new(registry: Arc<TypedRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TypedRegistry {
        &self.registry
    }

    /// Execute one envelope.
    ///
    /// A kind without a handler is a Permanent error: no retry would find one.
    pub async fn execute(&self, envelope: &TaskEnvelope) -> Result<Outcome, HandlerError> {
        let kind = envelope.kind();
        let handler = self.registry.get(kind).ok_or_else(|| {
            HandlerError::permanent(format!("no handler registered for {kind}"))
        })?;

        let ctx = TaskContext::from_envelope(envelope);
        handler.handle_dyn(envelope.payload().clone(), &ctx).await
    }
}
