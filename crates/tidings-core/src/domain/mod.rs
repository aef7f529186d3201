//! Domain model (IDs, kinds, payloads, entities, outcomes, events, ...).

pub mod attempt;
pub mod decision;
pub mod entity;
pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod payload;
pub mod task;

pub use attempt::{AttemptRecord, AttemptResult};
pub use decision::{Decider, Decision, DefaultDecider};
pub use entity::{
    ChatMessage, Contact, EntityRef, MediaKind, PendingSchedule, Poll, PollStatus, Post,
    PostStatus, StatusTransition, Story, StoryStatus,
};
pub use errors::{ErrorKind, HandlerError};
pub use events::{DeadTask, DomainEvent};
pub use ids::{AttemptId, PollId, PostId, RoomId, StoryId, TaskId, UserId};
pub use outcome::{Outcome, OutcomeKind};
pub use payload::{ExpirePoll, ExpireStory, NotifyFollower, PruneChat, PublishPost};
pub use task::{DedupeKeys, TaskEnvelope, TaskKind};
