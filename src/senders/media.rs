//! Media sender
//!
//! Attachments are persisted `Unsent` until the encrypted upload yields a
//! `(mediaId, key)` pair, then advance to `Journaled` and transmit like any
//! other journalable message. The upload itself is not retried
//! automatically: an upload failure fails the message, while a transport
//! failure after upload journals it (the mediaId survives in the record, so
//! a later retry skips straight to transmit).

use async_trait::async_trait;
use tracing::warn;

use super::{apply_preview, failure_outcome, record_status, MessageDraft, SendContext, SendStrategy};
use crate::message::{ContentType, MessageData, MessageStatus};
use crate::storage::PreviewStatus;
use crate::{Error, Result};

/// Content types owned by the media sender
pub const MEDIA_CONTENT_TYPES: &[ContentType] = &[
    ContentType::Image,
    ContentType::Video,
    ContentType::File,
    ContentType::Avatar,
];

/// Largest file the sender will upload
const MAX_MEDIA_BYTES: u64 = 64 * 1024 * 1024;

/// Sender for the media content-type family
pub struct MediaSender;

fn media_parts(data: &MessageData) -> Option<(&Option<String>, &Option<String>)> {
    match data {
        MessageData::Media {
            file_path,
            media_id,
            ..
        } => Some((file_path, media_id)),
        _ => None,
    }
}

#[async_trait]
impl SendStrategy for MediaSender {
    fn content_types(&self) -> &'static [ContentType] {
        MEDIA_CONTENT_TYPES
    }

    fn journalable(&self) -> bool {
        true
    }

    fn initial_status(&self, draft: &MessageDraft) -> MessageStatus {
        match media_parts(&draft.data) {
            Some((_, Some(_))) => MessageStatus::Journaled,
            _ => MessageStatus::Unsent,
        }
    }

    fn validate(&self, draft: &MessageDraft) -> Result<()> {
        if !self.content_types().contains(&draft.content_type) {
            return Err(Error::Validation(format!(
                "content type {} not handled by this sender",
                draft.content_type.as_str()
            )));
        }
        let Some((file_path, media_id)) = media_parts(&draft.data) else {
            return Err(Error::Validation(
                "media message without media data".to_string(),
            ));
        };
        let size = serde_json::to_string(&draft.data)
            .map(|s| s.len())
            .unwrap_or(usize::MAX);
        if size >= crate::config::MESSAGE_DATA_MAX_LENGTH {
            return Err(Error::Validation(format!(
                "message data too big: {} bytes",
                size
            )));
        }

        if media_id.is_none() {
            let Some(path) = file_path else {
                return Err(Error::Validation("media message without a file".to_string()));
            };
            let metadata = std::fs::metadata(path)
                .map_err(|e| Error::Validation(format!("file {} unreadable: {}", path, e)))?;
            if metadata.len() > MAX_MEDIA_BYTES {
                return Err(Error::Validation(format!(
                    "file too large: {} bytes",
                    metadata.len()
                )));
            }
        }
        Ok(())
    }

    /// Upload step: `Unsent → Persisted(journaled)` once the ciphertext is
    /// stored and the payload carries mediaId and key
    async fn prepare(&self, ctx: &SendContext, draft: &mut MessageDraft) -> Result<()> {
        let (file_name, file_path, file_type, text, media_id) = match &draft.data {
            MessageData::Media {
                file_name,
                file_path,
                file_type,
                text,
                media_id,
                ..
            } => (
                file_name.clone(),
                file_path.clone(),
                file_type.clone(),
                text.clone(),
                media_id.clone(),
            ),
            _ => {
                return Err(Error::Validation(
                    "media message without media data".to_string(),
                ));
            }
        };

        if media_id.is_some() {
            return Ok(());
        }

        let path = file_path
            .ok_or_else(|| Error::Validation("media message without a file".to_string()))?;

        // Chat avatars stay where they are; everything else moves into the
        // chat's media directory first.
        let source = if draft.content_type == ContentType::Avatar {
            std::path::PathBuf::from(&path)
        } else {
            ctx.media
                .adopt_into_chat_dir(&draft.chat_id, std::path::Path::new(&path))
                .await?
        };

        let (new_media_id, new_key) = ctx.media.upload(&source, file_type.as_deref()).await?;

        draft.data = MessageData::Media {
            file_name,
            file_path: Some(source.to_string_lossy().to_string()),
            file_type,
            text,
            media_id: Some(new_media_id),
            key: Some(new_key),
        };

        ctx.messages
            .update_data(&draft.chat_id, &draft.message_id, &draft.data)
            .await?;
        ctx.messages
            .update_status(&draft.chat_id, &draft.message_id, MessageStatus::Journaled)
            .await?;
        Ok(())
    }

    async fn on_failure(&self, ctx: &SendContext, draft: &MessageDraft, error: &Error) -> bool {
        // No mediaId yet means the upload itself failed; that is not
        // retried automatically, the message fails outright.
        let upload_pending = matches!(media_parts(&draft.data), Some((_, None)));
        if upload_pending && !matches!(error, Error::AuthNotReady(_)) {
            warn!(
                "Media upload failed for {}/{}: {}",
                draft.chat_id, draft.message_id, error
            );
            record_status(ctx, draft, MessageStatus::Failed).await;
            apply_preview(ctx, self.preview_text(draft), draft, PreviewStatus::Failed).await;
            return false;
        }
        failure_outcome(ctx, draft, error, self.journalable(), self.preview_text(draft)).await
    }

    fn preview_text(&self, draft: &MessageDraft) -> Option<String> {
        let MessageData::Media {
            file_name, text, ..
        } = &draft.data
        else {
            return None;
        };
        match draft.content_type {
            ContentType::Avatar => None,
            ContentType::Image => Some(
                text.clone()
                    .unwrap_or_else(|| format!("sent image: {}", file_name)),
            ),
            ContentType::Video => Some(
                text.clone()
                    .unwrap_or_else(|| format!("sent video: {}", file_name)),
            ),
            _ => Some(
                text.clone()
                    .unwrap_or_else(|| format!("sent file: {}", file_name)),
            ),
        }
    }
}
