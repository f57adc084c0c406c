//! Deletion sender
//!
//! Deleting a message is fire-once: the peer is told, the target becomes a
//! local tombstone, and the instruction record is consumed. The connection
//! preview only changes when the deleted message was the chat's latest.

use async_trait::async_trait;
use tracing::debug;

use super::{MessageDraft, SendContext, SendStrategy};
use crate::events::CoreEvent;
use crate::message::{ContentType, MessageData};
use crate::storage::{PreviewStatus, PreviewUpdate};
use crate::{Error, Result};

/// Content types owned by the deletion sender
pub const DELETION_CONTENT_TYPES: &[ContentType] = &[ContentType::Deletion];

/// Sender for message deletions
pub struct DeletionSender;

#[async_trait]
impl SendStrategy for DeletionSender {
    fn content_types(&self) -> &'static [ContentType] {
        DELETION_CONTENT_TYPES
    }

    fn journalable(&self) -> bool {
        false
    }

    /// Tombstone the target and consume the instruction record
    async fn cleanup(&self, ctx: &SendContext, draft: &MessageDraft) -> Result<()> {
        let MessageData::Deletion {
            message_id_to_delete,
        } = &draft.data
        else {
            return Err(Error::Validation(
                "deletion message without deletion data".to_string(),
            ));
        };

        // The instruction record goes first so the latest-message check
        // sees the real conversation tail.
        ctx.messages
            .delete_record(&draft.chat_id, &draft.message_id)
            .await?;

        let was_latest = match ctx.messages.latest_message(&draft.chat_id).await? {
            Some(latest) => &latest.message_id == message_id_to_delete,
            None => false,
        };

        if ctx
            .messages
            .get(&draft.chat_id, message_id_to_delete)
            .await?
            .is_none()
        {
            debug!(
                "Deletion target {}/{} already gone",
                draft.chat_id, message_id_to_delete
            );
            return Ok(());
        }
        ctx.messages
            .tombstone(&draft.chat_id, message_id_to_delete)
            .await?;

        if was_latest {
            ctx.connections
                .update_on_new_message(&PreviewUpdate {
                    chat_id: draft.chat_id.clone(),
                    text: "message deleted".to_string(),
                    status: PreviewStatus::Sent,
                    content_type: ContentType::Deletion,
                })
                .await?;
            ctx.events.publish(CoreEvent::ConnectionUpdated {
                chat_id: draft.chat_id.clone(),
            });
        }

        Ok(())
    }
}
