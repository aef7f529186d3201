//! tidings-core
//!
//! Delayed task execution and fan-out notification engine.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task kinds, payloads, entities, outcome, decision, errors, events）
//! - **queue**: Broker trait と in-memory（journal 付き）実装、retry policy
//! - **ports**: 外部との境界（RecordStore, MediaStore, NotificationChannel, Cache, Clock, IdGenerator, EventSink）
//! - **typed**: 型付き Task API（Task trait, Handler trait, TypedRegistry）
//! - **handlers**: kind ごとの handler
//! - **app**: builder, runtime, dispatcher, scheduling, recovery, engine
//! - **impls**: ports の in-memory 実装（テスト・デモ用）

pub mod app;
pub mod domain;
pub mod handlers;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod typed;
