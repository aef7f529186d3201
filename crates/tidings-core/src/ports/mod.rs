//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! engine の外にあるもの（record store, object store, メール送信, キャッシュ）と、
//! テストで差し替えたいもの（時刻, ID, イベント）はすべて trait 越しに扱います。
//!
//! broker 自体の port は `queue::Broker` にあります。

pub mod cache;
pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod media_store;
pub mod notifier;
pub mod record_store;

// 主要な trait を再エクスポート
pub use self::cache::{Cache, CacheError, CacheKeys, KeyPattern};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, NoopEventSink, TracingEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::media_store::{MediaError, MediaStore};
pub use self::notifier::{ChannelError, NotificationChannel, NotificationMessage};
pub use self::record_store::{RecordStore, StoreError};
