//! Reaction sender
//!
//! Reactions are journalable but keep no history of their own: the local
//! reaction rows are updated before transmit, and a confirmed send deletes
//! the instruction record. A tombstone reaction withdraws an earlier one
//! and skips the preview update.

use async_trait::async_trait;

use super::{MessageDraft, SendContext, SendStrategy};
use crate::message::{ContentType, MessageData};
use crate::{Error, Result};

/// Content types owned by the reaction sender
pub const REACTION_CONTENT_TYPES: &[ContentType] = &[ContentType::Reaction];

/// Reaction rows written by this device carry this sender marker
pub const SELF_SENDER: &str = "self";

/// Sender for reactions
pub struct ReactionSender;

#[async_trait]
impl SendStrategy for ReactionSender {
    fn content_types(&self) -> &'static [ContentType] {
        REACTION_CONTENT_TYPES
    }

    fn journalable(&self) -> bool {
        true
    }

    /// Apply the reaction locally before the transmit attempt
    async fn prepare(&self, ctx: &SendContext, draft: &mut MessageDraft) -> Result<()> {
        let MessageData::Reaction {
            message_id,
            reaction,
            tombstone,
        } = &draft.data
        else {
            return Err(Error::Validation(
                "reaction message without reaction data".to_string(),
            ));
        };

        if *tombstone {
            ctx.messages
                .remove_reaction(&draft.chat_id, message_id, SELF_SENDER)
                .await?;
            let remaining = ctx.messages.reactions(&draft.chat_id, message_id).await?;
            if remaining.is_empty() {
                ctx.messages
                    .set_has_reactions(&draft.chat_id, message_id, false)
                    .await?;
            }
        } else {
            ctx.messages
                .add_reaction(&draft.chat_id, message_id, SELF_SENDER, reaction)
                .await?;
            ctx.messages
                .set_has_reactions(&draft.chat_id, message_id, true)
                .await?;
        }
        Ok(())
    }

    fn preview_text(&self, draft: &MessageDraft) -> Option<String> {
        match &draft.data {
            MessageData::Reaction {
                reaction,
                tombstone: false,
                ..
            } => Some(format!("reacted {}", reaction)),
            _ => None,
        }
    }

    /// Reactions keep no record of their own once delivered
    async fn cleanup(&self, ctx: &SendContext, draft: &MessageDraft) -> Result<()> {
        ctx.messages
            .delete_record(&draft.chat_id, &draft.message_id)
            .await?;
        ctx.journal.remove(&draft.chat_id, &draft.message_id).await
    }
}
