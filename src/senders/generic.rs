//! Generic sender
//!
//! Handles the plain content types: text, links, identity pushes and the
//! small infrastructure messages (info lines, avatar notices, timer
//! changes, contact sharing). Journalable; only the user-visible subtypes
//! update the connection preview, and the contact-sharing subtypes delete
//! their own record once delivered.

use async_trait::async_trait;

use super::{SendContext, SendStrategy, MessageDraft};
use crate::message::{ContentType, MessageData};
use crate::Result;

/// Content types owned by the generic sender
pub const GENERIC_CONTENT_TYPES: &[ContentType] = &[
    ContentType::Text,
    ContentType::Link,
    ContentType::Name,
    ContentType::Info,
    ContentType::DisplayAvatar,
    ContentType::DisappearingMessages,
    ContentType::ContactBundle,
    ContentType::ContactBundleResponse,
    ContentType::ContactRequest,
];

/// Generic subtypes with no durable history; their record is removed after
/// a confirmed send
const EPHEMERAL_TYPES: &[ContentType] = &[
    ContentType::ContactBundle,
    ContentType::ContactBundleResponse,
    ContentType::ContactRequest,
];

/// Sender for the generic content-type family
pub struct GenericSender;

#[async_trait]
impl SendStrategy for GenericSender {
    fn content_types(&self) -> &'static [ContentType] {
        GENERIC_CONTENT_TYPES
    }

    fn journalable(&self) -> bool {
        true
    }

    fn preview_text(&self, draft: &MessageDraft) -> Option<String> {
        match (&draft.content_type, &draft.data) {
            (ContentType::Text, MessageData::Text { text }) => Some(text.clone()),
            (ContentType::Link, MessageData::Link { text, .. }) => Some(text.clone()),
            (ContentType::ContactBundle, MessageData::ContactShare { contact_name, .. }) => {
                Some(format!("shared contact of {}", contact_name))
            }
            _ => None,
        }
    }

    async fn cleanup(&self, ctx: &SendContext, draft: &MessageDraft) -> Result<()> {
        if EPHEMERAL_TYPES.contains(&draft.content_type) {
            ctx.messages
                .delete_record(&draft.chat_id, &draft.message_id)
                .await?;
        }

        if draft.content_type == ContentType::DisappearingMessages {
            if let MessageData::Timer { duration_seconds } = &draft.data {
                let secs = (*duration_seconds > 0).then_some(*duration_seconds as i64);
                ctx.connections
                    .set_disappear_after(&draft.chat_id, secs)
                    .await?;
            }
        }

        Ok(())
    }
}
