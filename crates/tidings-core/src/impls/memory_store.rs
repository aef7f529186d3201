//! InMemoryRecordStore - テスト・デモ用の record store
//!
//! 本番では CRUD 層のドキュメントストアが RecordStore を実装する。
//! ここでは HashMap で持ち、障害注入（`set_unavailable`, `fail_room`）と
//! 遷移回数の観測（`transitions`）ができるようにしている。

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    ChatMessage, Contact, EntityRef, PendingSchedule, Poll, PollId, PollStatus, Post, PostId,
    PostStatus, RoomId, StatusTransition, Story, StoryId, StoryStatus, UserId,
};
use crate::ports::{RecordStore, StoreError};

#[derive(Debug, Clone)]
struct Follow {
    follower: UserId,
    author: UserId,
    since: DateTime<Utc>,
}

#[derive(Default)]
struct StoreState {
    posts: HashMap<PostId, Post>,
    stories: HashMap<StoryId, Story>,
    polls: HashMap<PollId, Poll>,
    follows: Vec<Follow>,
    contacts: HashMap<UserId, Contact>,
    /// Oldest first within each room.
    messages: BTreeMap<RoomId, Vec<ChatMessage>>,
    transitions: usize,
    unavailable: bool,
    failing_rooms: HashSet<RoomId>,
}

impl StoreState {
    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }

    fn check_room(&self, room: &RoomId) -> Result<(), StoreError> {
        self.check()?;
        if self.failing_rooms.contains(room) {
            return Err(StoreError::Unavailable(format!("room {room} unreadable")));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    state: Mutex<StoreState>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_post(&self, post: Post) {
        self.state.lock().await.posts.insert(post.id.clone(), post);
    }

    pub async fn insert_story(&self, story: Story) {
        self.state.lock().await.stories.insert(story.id.clone(), story);
    }

    pub async fn insert_poll(&self, poll: Poll) {
        self.state.lock().await.polls.insert(poll.id.clone(), poll);
    }

    /// `follower` starts following `author` at `since`.
    pub async fn follow(&self, follower: UserId, author: UserId, since: DateTime<Utc>) {
        self.state.lock().await.follows.push(Follow {
            follower,
            author,
            since,
        });
    }

    pub async fn insert_contact(&self, contact: Contact) {
        self.state
            .lock()
            .await
            .contacts
            .insert(contact.follower_id.clone(), contact);
    }

    pub async fn push_message(&self, message: ChatMessage) {
        let mut state = self.state.lock().await;
        let room = state.messages.entry(message.room.clone()).or_default();
        let at = room.partition_point(|m| m.created_at <= message.created_at);
        room.insert(at, message);
    }

    pub async fn post(&self, id: &PostId) -> Option<Post> {
        self.state.lock().await.posts.get(id).cloned()
    }

    pub async fn messages(&self, room: &RoomId) -> Vec<ChatMessage> {
        self.state
            .lock()
            .await
            .messages
            .get(room)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of status transitions that actually changed a record.
    pub async fn transitions(&self) -> usize {
        self.state.lock().await.transitions
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Every call touching `room` fails until cleared.
    pub async fn fail_room(&self, room: RoomId) {
        self.state.lock().await.failing_rooms.insert(room);
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find_post(&self, id: &PostId) -> Result<Option<Post>, StoreError> {
        let state = self.state.lock().await;
        state.check()?;
        Ok(state.posts.get(id).cloned())
    }

    async fn find_story(&self, id: &StoryId) -> Result<Option<Story>, StoreError> {
        let state = self.state.lock().await;
        state.check()?;
        Ok(state.stories.get(id).cloned())
    }

    async fn find_poll(&self, id: &PollId) -> Result<Option<Poll>, StoreError> {
        let state = self.state.lock().await;
        state.check()?;
        Ok(state.polls.get(id).cloned())
    }

    async fn update_status_if_pending(
        &self,
        entity: &EntityRef,
        transition: StatusTransition,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        state.check()?;
        if !transition.applies_to(entity) {
            return Err(StoreError::InvalidTransition {
                transition,
                entity: entity.clone(),
            });
        }

        let changed = match entity {
            EntityRef::Post(id) => match state.posts.get_mut(id) {
                Some(post) if post.status == PostStatus::Scheduled => {
                    post.status = PostStatus::Published;
                    post.created_at = at;
                    true
                }
                _ => false,
            },
            EntityRef::Story(id) => match state.stories.get_mut(id) {
                Some(story) if story.status == StoryStatus::Active => {
                    story.status = StoryStatus::Expired;
                    true
                }
                _ => false,
            },
            EntityRef::Poll(id) => match state.polls.get_mut(id) {
                Some(poll) if poll.status == PollStatus::Open => {
                    poll.status = PollStatus::Closed;
                    true
                }
                _ => false,
            },
        };
        if changed {
            state.transitions += 1;
        }
        Ok(changed)
    }

    async fn delete_by_id(&self, entity: &EntityRef) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        state.check()?;
        Ok(match entity {
            EntityRef::Post(id) => state.posts.remove(id).is_some(),
            EntityRef::Story(id) => state.stories.remove(id).is_some(),
            EntityRef::Poll(id) => state.polls.remove(id).is_some(),
        })
    }

    async fn list_followers(
        &self,
        author: &UserId,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<UserId>, StoreError> {
        let state = self.state.lock().await;
        state.check()?;
        Ok(state
            .follows
            .iter()
            .filter(|f| &f.author == author && f.since <= as_of)
            .map(|f| f.follower.clone())
            .collect())
    }

    async fn find_follower_contact(
        &self,
        follower: &UserId,
    ) -> Result<Option<Contact>, StoreError> {
        let state = self.state.lock().await;
        state.check()?;
        Ok(state.contacts.get(follower).cloned())
    }

    async fn mark_fanout_completed(&self, post: &PostId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check()?;
        if let Some(post) = state.posts.get_mut(post) {
            post.fanout_completed = true;
        }
        Ok(())
    }

    async fn list_pending_schedules(&self) -> Result<Vec<PendingSchedule>, StoreError> {
        let state = self.state.lock().await;
        state.check()?;

        let posts = state
            .posts
            .values()
            .filter(|p| p.status == PostStatus::Scheduled)
            .map(|p| PendingSchedule::Post {
                post_id: p.id.clone(),
                at: p.schedule_time.unwrap_or(p.created_at),
            });
        let stories = state
            .stories
            .values()
            .filter(|s| s.status == StoryStatus::Active)
            .map(|s| PendingSchedule::Story {
                story_id: s.id.clone(),
                media_ref: s.media_ref.clone(),
                media_kind: s.media_kind,
                at: s.expires_at,
            });
        let polls = state
            .polls
            .values()
            .filter(|p| p.status == PollStatus::Open)
            .map(|p| PendingSchedule::Poll {
                poll_id: p.id.clone(),
                at: p.expires_at,
            });

        let mut pending: Vec<PendingSchedule> = posts.chain(stories).chain(polls).collect();
        pending.sort_by_key(PendingSchedule::due_at);
        Ok(pending)
    }

    async fn list_rooms(&self) -> Result<Vec<RoomId>, StoreError> {
        let state = self.state.lock().await;
        state.check()?;
        Ok(state.messages.keys().cloned().collect())
    }

    async fn count_messages(&self, room: &RoomId) -> Result<usize, StoreError> {
        let state = self.state.lock().await;
        state.check_room(room)?;
        Ok(state.messages.get(room).map_or(0, Vec::len))
    }

    async fn delete_oldest_messages(&self, room: &RoomId, n: usize) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        state.check_room(room)?;
        let Some(messages) = state.messages.get_mut(room) else {
            return Ok(0);
        };
        let n = n.min(messages.len());
        messages.drain(..n);
        Ok(n)
    }
}
