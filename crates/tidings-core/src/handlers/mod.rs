//! Handlers - one per [`TaskKind`](crate::domain::TaskKind).
//!
//! Every handler starts by checking whether its work is already done, so a
//! redelivered task is harmless. Store, cache and broker errors fail the
//! attempt as Transient; "already in the target state" is a Skipped outcome.

pub mod chat;
pub mod notify;
pub mod poll;
pub mod publish;
pub mod story;

pub use self::chat::ChatPruneHandler;
pub use self::notify::NotifyHandler;
pub use self::poll::PollExpiryHandler;
pub use self::publish::PublishHandler;
pub use self::story::StoryExpiryHandler;
