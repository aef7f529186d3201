//! App - アプリケーション層
//!
//! このモジュールは、ports と queue を組み合わせて engine を組み立てます。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: handler 登録と起動時検証
//! - **Runtime**: TaskEnvelope を handler に渡す
//! - **Dispatcher**: kind ごとの worker 群（consume→handle→ack/fail）
//! - **SchedulingClient**: CRUD 層から呼ばれる登録 API
//! - **RecoveryScanner**: 起動時の再登録
//! - **Engine**: 上記のワイヤリングと lifecycle

pub mod builder;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod recovery;
pub mod runtime;
pub mod scheduling;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{AppBuilder, BuildError};
pub use self::config::{ChatPruneConfig, ConfigError, EngineConfig, NotificationConfig, RecoveryConfig};
pub use self::dispatcher::{Dispatcher, DispatcherConfig};
pub use self::engine::{Engine, EngineDeps, EngineError};
pub use self::recovery::{RecoveryError, RecoveryReport, RecoveryScanner};
pub use self::runtime::Runtime;
pub use self::scheduling::{ScheduleError, ScheduleReceipt, SchedulingClient};
pub use self::status::StatusReport;
