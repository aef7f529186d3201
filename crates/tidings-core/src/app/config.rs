//! EngineConfig - 起動時設定
//!
//! すべてのフィールドに既定値があるので、JSON では変えたいものだけ書けばよい。
//! 時間はミリ秒の整数で持つ。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::TaskKind;
use crate::queue::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatPruneConfig {
    /// Rooms above this many messages get trimmed.
    pub ceiling: usize,
    /// What a trimmed room is cut down to.
    pub floor: usize,
    pub period_ms: u64,
}

impl Default for ChatPruneConfig {
    fn default() -> Self {
        Self {
            ceiling: 40,
            floor: 30,
            period_ms: 60_000,
        }
    }
}

impl ChatPruneConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Links in mails point at `{base_url}/reading/{post_id}`.
    pub base_url: String,
    pub sender: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://berony.web.app".to_string(),
            sender: "noreply@berony.web.app".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Re-submit entities whose due time already passed (delay 0) instead of
    /// leaving them for manual repair.
    pub recover_overdue: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            recover_overdue: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub lease_ms: u64,
    pub handler_timeout_ms: u64,
    /// How long one consume call waits for a due task.
    pub consume_wait_ms: u64,
    /// Pause after a broker error before a worker consumes again.
    pub error_backoff_ms: u64,
    /// Kinds not listed get one worker.
    pub workers_per_kind: BTreeMap<TaskKind, usize>,
    pub retry_base_ms: u64,
    pub max_attempts: u32,
    pub chat_prune: ChatPruneConfig,
    pub notification: NotificationConfig,
    pub recovery: RecoveryConfig,
    /// Run a due-now task inline when the broker cannot take it.
    pub inline_fallback: bool,
    /// Journal file for a durable broker. `None` keeps the broker in memory.
    pub journal_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lease_ms: 30_000,
            handler_timeout_ms: 10_000,
            consume_wait_ms: 1_000,
            error_backoff_ms: 500,
            workers_per_kind: BTreeMap::from([(TaskKind::NotifyFanout, 4)]),
            retry_base_ms: 3_000,
            max_attempts: 3,
            chat_prune: ChatPruneConfig::default(),
            notification: NotificationConfig::default(),
            recovery: RecoveryConfig::default(),
            inline_fallback: true,
            journal_path: None,
        }
    }
}

impl EngineConfig {
    pub const MAX_ATTEMPTS: u32 = 25;

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chat_prune.floor >= self.chat_prune.ceiling {
            return Err(ConfigError::Invalid(format!(
                "chat_prune.floor ({}) must be below chat_prune.ceiling ({})",
                self.chat_prune.floor, self.chat_prune.ceiling
            )));
        }
        if self.chat_prune.period_ms == 0 {
            return Err(ConfigError::Invalid(
                "chat_prune.period_ms must be positive".to_string(),
            ));
        }
        if self.max_attempts == 0 || self.max_attempts > Self::MAX_ATTEMPTS {
            return Err(ConfigError::Invalid(format!(
                "max_attempts ({}) must be between 1 and {}",
                self.max_attempts,
                Self::MAX_ATTEMPTS
            )));
        }
        if self.handler_timeout_ms >= self.lease_ms {
            // a handler still running when its lease lapses would be delivered twice
            return Err(ConfigError::Invalid(format!(
                "handler_timeout_ms ({}) must be below lease_ms ({})",
                self.handler_timeout_ms, self.lease_ms
            )));
        }
        if let Some((kind, _)) = self.workers_per_kind.iter().find(|(_, n)| **n == 0) {
            return Err(ConfigError::Invalid(format!(
                "workers_per_kind.{kind} must be at least 1"
            )));
        }
        Ok(())
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn consume_wait(&self) -> Duration {
        Duration::from_millis(self.consume_wait_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn workers_for(&self, kind: TaskKind) -> usize {
        self.workers_per_kind.get(&kind).copied().unwrap_or(1)
    }

    /// Retry policy given to every task the engine schedules.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.max_attempts, Duration::from_millis(self.retry_base_ms))
    }
}
