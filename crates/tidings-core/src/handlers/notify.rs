//! NotifyFanout: one "new post" mail to one follower.

use std::sync::Arc;

use async_trait::async_trait;

use crate::app::config::NotificationConfig;
use crate::domain::{HandlerError, NotifyFollower, Outcome};
use crate::ports::{NotificationChannel, NotificationMessage, RecordStore};
use crate::typed::{Handler, TaskContext};

pub struct NotifyHandler {
    store: Arc<dyn RecordStore>,
    channel: Arc<dyn NotificationChannel>,
    config: NotificationConfig,
}

impl NotifyHandler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        channel: Arc<dyn NotificationChannel>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            store,
            channel,
            config,
        }
    }
}

#[async_trait]
impl Handler<NotifyFollower> for NotifyHandler {
    #[tracing::instrument(
        skip(self, task, ctx),
        fields(post_id = %task.post_id, follower_id = %task.follower_id, attempt = ctx.attempt)
    )]
    async fn handle(&self, task: NotifyFollower, ctx: &TaskContext) -> Result<Outcome, HandlerError> {
        let Some(contact) = self.store.find_follower_contact(&task.follower_id).await? else {
            // follower left; nothing will change that on retry
            return Ok(Outcome::skipped("follower has no contact"));
        };

        let message = NotificationMessage::new_post(
            &self.config.sender,
            &contact.email,
            &task.author_name,
            &task.post_title,
            &task.post_id,
            &self.config.base_url,
        );
        self.channel.send(&message).await?;
        Ok(Outcome::success())
    }
}
