//! Update sender
//!
//! Status propagation messages. Fire-once: not journalable, no preview
//! update, no cleanup beyond the default lifecycle.

use async_trait::async_trait;

use super::SendStrategy;
use crate::message::ContentType;

/// Content types owned by the update sender
pub const UPDATE_CONTENT_TYPES: &[ContentType] = &[ContentType::Update];

/// Sender for status-propagation updates
pub struct UpdateSender;

#[async_trait]
impl SendStrategy for UpdateSender {
    fn content_types(&self) -> &'static [ContentType] {
        UPDATE_CONTENT_TYPES
    }

    fn journalable(&self) -> bool {
        false
    }
}
