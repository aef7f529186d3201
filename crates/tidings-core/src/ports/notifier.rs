//! NotificationChannel port - 外向きの通知（メール）
//!
//! 配送は at-least-once。channel 側で重複を弾く仕組みは持たない。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::PostId;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel unavailable: {0}")]
    Unavailable(String),

    #[error("recipient {recipient} rejected: {reason}")]
    Rejected { recipient: String, reason: String },
}

/// One rendered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl NotificationMessage {
    /// The "new post" mail sent to each follower.
    pub fn new_post(
        from: &str,
        to: &str,
        author_name: &str,
        post_title: &str,
        post_id: &PostId,
        base_url: &str,
    ) -> Self {
        let author = escape_html(author_name);
        let title = escape_html(post_title);
        let link = format!("{}/reading/{}", base_url.trim_end_matches('/'), post_id);
        let html = format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <title>New Post Notification</title>
</head>
<body>
  <div class="container">
    <div class="header"><h1>New Post Alert</h1></div>
    <div class="content">
      <p>Hi,</p>
      <p><strong>{author}</strong> just published a new post titled <strong>{title}</strong>!</p>
      <div class="cta"><a href="{link}">Read the Post</a></div>
    </div>
    <div class="footer">
      <p>If you no longer wish to receive these emails, <a href="mailto:{from}">contact us</a>.</p>
    </div>
  </div>
</body>
</html>
"#
        );

        Self {
            from: from.to_string(),
            to: to.to_string(),
            subject: format!("Check This New Post By {author_name}!"),
            html,
        }
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, message: &NotificationMessage) -> Result<(), ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_post_message_links_to_reading_page() {
        let msg = NotificationMessage::new_post(
            "noreply@example.com",
            "bob@example.com",
            "Ann",
            "Hello <world>",
            &PostId::new("p-1"),
            "https://example.com/",
        );
        assert_eq!(msg.subject, "Check This New Post By Ann!");
        assert_eq!(msg.to, "bob@example.com");
        assert!(msg.html.contains("href=\"https://example.com/reading/p-1\""));
        assert!(msg.html.contains("Hello &lt;world&gt;"));
    }
}
