//! Edit sender
//!
//! Journalable like a text message, but with no history of its own: once
//! delivered, the edit is applied to the target message, the instruction
//! record is deleted, and the connection preview is recomputed from
//! whatever is now the chat's latest message.

use async_trait::async_trait;
use tracing::debug;

use super::{MessageDraft, SendContext, SendStrategy};
use crate::events::CoreEvent;
use crate::message::{ContentType, Message, MessageData, MessageStatus};
use crate::storage::{PreviewStatus, PreviewUpdate};
use crate::{Error, Result};

/// Content types owned by the edit sender
pub const EDIT_CONTENT_TYPES: &[ContentType] = &[ContentType::Edit];

/// Sender for message edits
pub struct EditSender;

fn edited_data(original: &MessageData, new_text: &str) -> Option<MessageData> {
    match original {
        MessageData::Text { .. } => Some(MessageData::Text {
            text: new_text.to_string(),
        }),
        MessageData::Link { url, .. } => Some(MessageData::Link {
            text: new_text.to_string(),
            url: url.clone(),
        }),
        MessageData::Media {
            file_name,
            file_path,
            file_type,
            media_id,
            key,
            ..
        } => Some(MessageData::Media {
            file_name: file_name.clone(),
            file_path: file_path.clone(),
            file_type: file_type.clone(),
            text: Some(new_text.to_string()),
            media_id: media_id.clone(),
            key: key.clone(),
        }),
        _ => None,
    }
}

fn preview_status_for(message: &Message) -> PreviewStatus {
    match message.status {
        MessageStatus::Journaled | MessageStatus::Unsent => PreviewStatus::Journaled,
        MessageStatus::Failed => PreviewStatus::Failed,
        _ => PreviewStatus::Sent,
    }
}

#[async_trait]
impl SendStrategy for EditSender {
    fn content_types(&self) -> &'static [ContentType] {
        EDIT_CONTENT_TYPES
    }

    fn journalable(&self) -> bool {
        true
    }

    /// The target must still exist; a chat or message deleted concurrently
    /// aborts the attempt as an orphan
    async fn prepare(&self, ctx: &SendContext, draft: &mut MessageDraft) -> Result<()> {
        let MessageData::Edit {
            message_id_to_edit, ..
        } = &draft.data
        else {
            return Err(Error::Validation(
                "edit message without edit data".to_string(),
            ));
        };

        if ctx
            .messages
            .get(&draft.chat_id, message_id_to_edit)
            .await?
            .is_none()
        {
            return Err(Error::NotFound(format!(
                "edit target {}/{}",
                draft.chat_id, message_id_to_edit
            )));
        }
        Ok(())
    }

    /// Apply the edit locally and recompute the preview
    async fn cleanup(&self, ctx: &SendContext, draft: &MessageDraft) -> Result<()> {
        let MessageData::Edit {
            message_id_to_edit,
            text,
        } = &draft.data
        else {
            return Err(Error::Validation(
                "edit message without edit data".to_string(),
            ));
        };

        ctx.messages
            .delete_record(&draft.chat_id, &draft.message_id)
            .await?;
        ctx.journal.remove(&draft.chat_id, &draft.message_id).await?;

        if let Some(target) = ctx.messages.get(&draft.chat_id, message_id_to_edit).await? {
            match edited_data(&target.data, text) {
                Some(new_data) => {
                    ctx.messages
                        .update_data(&draft.chat_id, message_id_to_edit, &new_data)
                        .await?;
                }
                None => debug!(
                    "Edit target {}/{} carries uneditable data",
                    draft.chat_id, message_id_to_edit
                ),
            }
        }

        // The edited message may or may not be the latest; recompute the
        // preview from the current tail either way.
        if let Some(latest) = ctx.messages.latest_message(&draft.chat_id).await? {
            let text = latest
                .data
                .text()
                .map(|t| t.to_string())
                .unwrap_or_default();
            ctx.connections
                .update_on_new_message(&PreviewUpdate {
                    chat_id: draft.chat_id.clone(),
                    text,
                    status: preview_status_for(&latest),
                    content_type: latest.content_type,
                })
                .await?;
            ctx.events.publish(CoreEvent::ConnectionUpdated {
                chat_id: draft.chat_id.clone(),
            });
        }

        Ok(())
    }
}
