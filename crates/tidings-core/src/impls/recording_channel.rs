//! RecordingChannel - 送らずに記録するだけの NotificationChannel

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::ports::{ChannelError, NotificationChannel, NotificationMessage};

#[derive(Default)]
struct ChannelState {
    sent: Vec<NotificationMessage>,
    failing_recipients: HashSet<String>,
}

#[derive(Default)]
pub struct RecordingChannel {
    state: Mutex<ChannelState>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<NotificationMessage> {
        self.state.lock().await.sent.clone()
    }

    /// Sends to `recipient` fail until [`Self::recover_recipient`].
    pub async fn fail_recipient(&self, recipient: impl Into<String>) {
        self.state
            .lock()
            .await
            .failing_recipients
            .insert(recipient.into());
    }

    pub async fn recover_recipient(&self, recipient: &str) {
        self.state.lock().await.failing_recipients.remove(recipient);
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn send(&self, message: &NotificationMessage) -> Result<(), ChannelError> {
        let mut state = self.state.lock().await;
        if state.failing_recipients.contains(&message.to) {
            return Err(ChannelError::Unavailable(format!(
                "mail relay refused {}",
                message.to
            )));
        }
        info!(to = %message.to, subject = %message.subject, "notification sent");
        state.sent.push(message.clone());
        Ok(())
    }
}
