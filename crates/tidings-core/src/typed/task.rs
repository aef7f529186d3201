//! Task trait - 型付き Task の定義

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::TaskKind;

/// Task は TaskKind と payload の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct ExpirePoll {
///     poll_id: PollId,
/// }
///
/// impl Task for ExpirePoll {
///     const KIND: TaskKind = TaskKind::PollExpire;
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize`: broker に積むため
/// - `DeserializeOwned`: broker から取り出した payload を復元するため
/// - `Send + Sync`: 複数 worker から安全に使えるため
/// - `'static`: Arc に格納できるため（参照を持たない）
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: TaskKind;
}
