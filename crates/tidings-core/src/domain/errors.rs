//! Errors - ハンドラエラーと分類
//!
//! 分類:
//! - Transient: 一時的なエラー（store/network の瞬断）。backoff 付きで再試行
//! - Permanent: 再試行しても意味がない（payload が壊れている、handler 未登録）
//!
//! 「対象がすでに目的の状態」「follower が消えた」はエラーではなく
//! `Outcome::skipped` で返す。

use std::fmt;

use crate::ports::{CacheError, ChannelError, MediaError, StoreError};
use crate::queue::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
}

/// Error returned by a handler attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    kind: ErrorKind,
    message: String,
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == ErrorKind::Permanent
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        Self::transient(format!("record store: {e}"))
    }
}

impl From<MediaError> for HandlerError {
    fn from(e: MediaError) -> Self {
        Self::transient(format!("media store: {e}"))
    }
}

impl From<ChannelError> for HandlerError {
    fn from(e: ChannelError) -> Self {
        Self::transient(format!("notification channel: {e}"))
    }
}

impl From<CacheError> for HandlerError {
    fn from(e: CacheError) -> Self {
        Self::transient(format!("cache invalidation: {e}"))
    }
}

impl From<BrokerError> for HandlerError {
    fn from(e: BrokerError) -> Self {
        Self::transient(format!("broker: {e}"))
    }
}
