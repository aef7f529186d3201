//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の in-memory 実装を含めます。
//! 障害注入のフックを持っており、テストとデモ用バイナリで使います。
//!
//! # 本番用実装
//! 本番の record store / object store / メール送信 / キャッシュは
//! engine の外にあり、ports の trait を実装して差し込みます。

pub mod memory_cache;
pub mod memory_media;
pub mod memory_store;
pub mod recording_channel;
pub mod recording_events;

// 主要な型を再エクスポート
pub use self::memory_cache::InMemoryCache;
pub use self::memory_media::InMemoryMediaStore;
pub use self::memory_store::InMemoryRecordStore;
pub use self::recording_channel::RecordingChannel;
pub use self::recording_events::RecordingEventSink;
