//! MediaStore port - 画像・動画のオブジェクトストア

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::MediaKind;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media store unavailable: {0}")]
    Unavailable(String),

    #[error("media store rejected {media_ref}: {reason}")]
    Rejected { media_ref: String, reason: String },
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Delete one object. An object that is already gone is not an error;
    /// the return value tells whether something was actually removed.
    async fn delete_object(&self, media_ref: &str, kind: MediaKind) -> Result<bool, MediaError>;
}
