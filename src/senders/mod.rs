//! Sender state machines
//!
//! One strategy per content-type family, all implementing the shared
//! contract `{validate, persist, prepare, transmit, on_failure, cleanup,
//! preview_text}`. A single driver owns the lifecycle
//! `Constructed → Validated → Persisted → Transmitting → {Sent | Failed |
//! Unsent}`; the strategies only fill in the per-family differences.
//! Failures never leave this module as errors: every attempt resolves to a
//! boolean "accepted for delivery" plus a persisted status change.

pub mod deletion;
pub mod edit;
pub mod generic;
pub mod media;
pub mod reaction;
pub mod receipt;
pub mod update;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::api::ServerApi;
use crate::config::MESSAGE_DATA_MAX_LENGTH;
use crate::crypto::CryptoProvider;
use crate::events::{CoreEvent, EventBus};
use crate::journal::{Journal, JournalEntry};
use crate::media::MediaTransfer;
use crate::message::{
    generate_message_id, ContentType, Message, MessageData, MessagePayload, MessageStatus,
};
use crate::storage::{
    ChatCryptoStore, Connection, ConnectionStore, MessageStore, PreviewStatus, PreviewUpdate,
};
use crate::auth::TokenKeeper;
use crate::{Error, Result};

/// Content types that ring a notification on the peer's device; everything
/// else is sent with the transport's silent flag
pub(crate) const AUDIBLE_TYPES: &[ContentType] = &[
    ContentType::Text,
    ContentType::Link,
    ContentType::Image,
    ContentType::Video,
    ContentType::File,
    ContentType::Reaction,
];

/// Content types stamped with an expiry when the chat has a disappearing
/// timer
pub(crate) const DISAPPEARING_TYPES: &[ContentType] = &[
    ContentType::Text,
    ContentType::Link,
    ContentType::Image,
    ContentType::Video,
    ContentType::File,
];

/// Content types allowed to go out unencrypted before the handshake
/// completes (the identity push)
pub(crate) const PLAINTEXT_TYPES: &[ContentType] = &[ContentType::Name];

/// Everything a sender needs, passed by handle
#[derive(Clone)]
pub struct SendContext {
    /// Network capability
    pub api: Arc<dyn ServerApi>,
    /// Crypto capability
    pub crypto: Arc<dyn CryptoProvider>,
    /// Message history store
    pub messages: MessageStore,
    /// Connection summary store
    pub connections: ConnectionStore,
    /// Per-chat crypto material
    pub chat_crypto: ChatCryptoStore,
    /// The retry journal
    pub journal: Journal,
    /// Auth token lifecycle
    pub token: TokenKeeper,
    /// Media upload/download
    pub media: MediaTransfer,
    /// Event bus for state-change notifications
    pub events: EventBus,
}

/// A message being driven through the send state machine
#[derive(Debug, Clone)]
pub struct MessageDraft {
    /// Chat to deliver into
    pub chat_id: String,
    /// Message id, unique per chat
    pub message_id: String,
    /// Payload kind
    pub content_type: ContentType,
    /// Payload data
    pub data: MessageData,
    /// Message this one replies to
    pub reply_id: Option<String>,
    /// Expiry stamp for disappearing messages
    pub expires_on: Option<DateTime<Utc>>,
    /// Group-only: restrict delivery to one member
    pub single_recipient: Option<String>,
    /// Whether the chat is a group
    pub is_group: bool,
    /// Creation time
    pub timestamp: DateTime<Utc>,
}

impl MessageDraft {
    /// A fresh draft with a generated message id
    pub fn new(
        chat_id: &str,
        content_type: ContentType,
        data: MessageData,
        reply_id: Option<String>,
    ) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            message_id: generate_message_id(),
            content_type,
            data,
            reply_id,
            expires_on: None,
            single_recipient: None,
            is_group: false,
            timestamp: Utc::now(),
        }
    }

    /// Rebuild a draft from a persisted record (the retry path)
    pub fn from_message(message: &Message, is_group: bool) -> Self {
        Self {
            chat_id: message.chat_id.clone(),
            message_id: message.message_id.clone(),
            content_type: message.content_type,
            data: message.data.clone(),
            reply_id: message.reply_id.clone(),
            expires_on: message.expires_on,
            single_recipient: message.single_recipient.clone(),
            is_group,
            timestamp: message.timestamp,
        }
    }

    /// The persisted form with the given status
    pub fn to_message(&self, status: MessageStatus) -> Message {
        Message {
            chat_id: self.chat_id.clone(),
            message_id: self.message_id.clone(),
            content_type: self.content_type,
            data: self.data.clone(),
            timestamp: self.timestamp,
            sender: true,
            status,
            reply_id: self.reply_id.clone(),
            expires_on: self.expires_on,
            single_recipient: self.single_recipient.clone(),
            has_reactions: false,
            receipt_pending: false,
        }
    }

    /// The wire payload (local file paths stripped)
    pub fn payload(&self) -> MessagePayload {
        let data = match &self.data {
            MessageData::Media {
                file_name,
                file_type,
                text,
                media_id,
                key,
                ..
            } => MessageData::Media {
                file_name: file_name.clone(),
                file_path: None,
                file_type: file_type.clone(),
                text: text.clone(),
                media_id: media_id.clone(),
                key: key.clone(),
            },
            other => other.clone(),
        };
        MessagePayload {
            message_id: self.message_id.clone(),
            content_type: self.content_type,
            data,
            reply_id: self.reply_id.clone(),
            expires_on: self.expires_on,
        }
    }
}

/// Shared contract implemented by each sender variant
#[async_trait]
pub trait SendStrategy: Send + Sync {
    /// The disjoint set of content types this variant owns
    fn content_types(&self) -> &'static [ContentType];

    /// Whether a transport failure parks the message for retry
    fn journalable(&self) -> bool;

    /// Status the message is first persisted with
    fn initial_status(&self, _draft: &MessageDraft) -> MessageStatus {
        if self.journalable() {
            MessageStatus::Journaled
        } else {
            MessageStatus::Unassigned
        }
    }

    /// Size, type-match and required-field checks; failure aborts the
    /// attempt before anything is persisted
    fn validate(&self, draft: &MessageDraft) -> Result<()> {
        if !self.content_types().contains(&draft.content_type) {
            return Err(Error::Validation(format!(
                "content type {} not handled by this sender",
                draft.content_type.as_str()
            )));
        }
        if !draft.data.matches(draft.content_type) {
            return Err(Error::Validation(format!(
                "data shape does not match content type {}",
                draft.content_type.as_str()
            )));
        }
        let size = serde_json::to_string(&draft.data)
            .map(|s| s.len())
            .unwrap_or(usize::MAX);
        if size >= MESSAGE_DATA_MAX_LENGTH {
            return Err(Error::Validation(format!(
                "message data too big: {} bytes",
                size
            )));
        }
        Ok(())
    }

    /// Write the message record with its initial status
    async fn persist(&self, ctx: &SendContext, draft: &MessageDraft) -> Result<()> {
        ctx.messages
            .save(&draft.to_message(self.initial_status(draft)))
            .await?;
        ctx.events.publish(CoreEvent::MessageAdded {
            chat_id: draft.chat_id.clone(),
            message_id: draft.message_id.clone(),
        });
        Ok(())
    }

    /// Variant-specific work between persist and transmit (media upload,
    /// local reaction bookkeeping)
    async fn prepare(&self, _ctx: &SendContext, _draft: &mut MessageDraft) -> Result<()> {
        Ok(())
    }

    /// Build, encrypt and post the wire payload
    async fn transmit(&self, ctx: &SendContext, draft: &MessageDraft) -> Result<()> {
        transmit_payload(ctx, draft).await
    }

    /// Failure handling; returns whether the message is still accepted for
    /// delivery (i.e. journaled)
    async fn on_failure(&self, ctx: &SendContext, draft: &MessageDraft, error: &Error) -> bool {
        failure_outcome(
            ctx,
            draft,
            error,
            self.journalable(),
            self.preview_text(draft),
        )
        .await
    }

    /// Variant-specific work after a confirmed send
    async fn cleanup(&self, _ctx: &SendContext, _draft: &MessageDraft) -> Result<()> {
        Ok(())
    }

    /// Preview line for the connection row; None skips the preview update
    fn preview_text(&self, _draft: &MessageDraft) -> Option<String> {
        None
    }
}

/// Send the payload: encrypt when the chat has a secret, fall back to
/// plaintext only for the identity push, and post with a valid token
pub(crate) async fn transmit_payload(ctx: &SendContext, draft: &MessageDraft) -> Result<()> {
    let payload = serde_json::to_value(draft.payload())?;

    let secret = ctx
        .chat_crypto
        .get(&draft.chat_id)
        .await?
        .and_then(|c| c.shared_secret);

    let mut packet = match secret {
        Some(secret) => {
            let plaintext = serde_json::to_string(&payload)?;
            let envelope = ctx.crypto.seal(&secret, plaintext.as_bytes())?;
            serde_json::json!({ "encryptedContent": envelope.encode() })
        }
        None if PLAINTEXT_TYPES.contains(&draft.content_type) => {
            serde_json::json!({ "content": payload })
        }
        None => {
            return Err(Error::AuthNotReady(format!(
                "chat {} has no shared secret",
                draft.chat_id
            )));
        }
    };

    if let Some(single_recipient) = &draft.single_recipient {
        packet["singleRecipient"] = serde_json::Value::String(single_recipient.clone());
    }

    let token = ctx.token.get(ctx.api.as_ref()).await?;
    let silent = !AUDIBLE_TYPES.contains(&draft.content_type);
    ctx.api
        .send_message(&token, &draft.chat_id, packet, draft.is_group, silent)
        .await
}

/// Apply a preview line to the connection row; `None` skips the update
pub(crate) async fn apply_preview(
    ctx: &SendContext,
    preview: Option<String>,
    draft: &MessageDraft,
    status: PreviewStatus,
) {
    let Some(text) = preview else {
        return;
    };
    let update = PreviewUpdate {
        chat_id: draft.chat_id.clone(),
        text,
        status,
        content_type: draft.content_type,
    };
    if let Err(e) = ctx.connections.update_on_new_message(&update).await {
        warn!("Preview update failed for chat {}: {}", draft.chat_id, e);
        return;
    }
    ctx.events.publish(CoreEvent::ConnectionUpdated {
        chat_id: draft.chat_id.clone(),
    });
}

/// Record a status change and publish it; a record that vanished
/// mid-operation only logs
pub(crate) async fn record_status(ctx: &SendContext, draft: &MessageDraft, status: MessageStatus) {
    match ctx
        .messages
        .update_status(&draft.chat_id, &draft.message_id, status)
        .await
    {
        Ok(()) => ctx.events.publish(CoreEvent::MessageStatusChanged {
            chat_id: draft.chat_id.clone(),
            message_id: draft.message_id.clone(),
            status,
        }),
        Err(Error::NotFound(_)) => {
            debug!(
                "Message {}/{} vanished before status update",
                draft.chat_id, draft.message_id
            );
        }
        Err(e) => warn!(
            "Status update to {} failed for {}/{}: {}",
            status.as_str(),
            draft.chat_id,
            draft.message_id,
            e
        ),
    }
}

/// Default failure resolution shared by the variants
pub(crate) async fn failure_outcome(
    ctx: &SendContext,
    draft: &MessageDraft,
    error: &Error,
    journalable: bool,
    preview: Option<String>,
) -> bool {
    match error {
        Error::NotFound(_) => {
            // Chat or record deleted concurrently: drop our orphan and stop.
            warn!(
                "Record vanished during send of {}/{}; cleaning up",
                draft.chat_id, draft.message_id
            );
            let _ = ctx
                .messages
                .delete_record(&draft.chat_id, &draft.message_id)
                .await;
            let _ = ctx.journal.remove(&draft.chat_id, &draft.message_id).await;
            false
        }
        Error::Crypto(e) => {
            error!(
                "Crypto failure sending {}/{}: {}",
                draft.chat_id, draft.message_id, e
            );
            record_status(ctx, draft, MessageStatus::Failed).await;
            let _ = ctx.journal.remove(&draft.chat_id, &draft.message_id).await;
            apply_preview(ctx, preview, draft, PreviewStatus::Failed).await;
            false
        }
        Error::AuthNotReady(e) if journalable => {
            // Silent deferral: the message stays journaled until the
            // handshake completes.
            debug!(
                "Chat {} not authenticated yet, deferring {}: {}",
                draft.chat_id, draft.message_id, e
            );
            record_status(ctx, draft, MessageStatus::Journaled).await;
            let _ = ctx
                .journal
                .append(&JournalEntry {
                    message: draft.to_message(MessageStatus::Journaled),
                    destination: draft.chat_id.clone(),
                })
                .await;
            true
        }
        _ if journalable => {
            info!(
                "Send of {}/{} failed ({}); journaling for retry",
                draft.chat_id, draft.message_id, error
            );
            record_status(ctx, draft, MessageStatus::Journaled).await;
            let _ = ctx
                .journal
                .append(&JournalEntry {
                    message: draft.to_message(MessageStatus::Journaled),
                    destination: draft.chat_id.clone(),
                })
                .await;
            apply_preview(ctx, preview, draft, PreviewStatus::Journaled).await;
            true
        }
        _ => {
            warn!(
                "Send of {}/{} failed ({}); not journalable",
                draft.chat_id, draft.message_id, error
            );
            record_status(ctx, draft, MessageStatus::Failed).await;
            apply_preview(ctx, preview, draft, PreviewStatus::Failed).await;
            false
        }
    }
}

/// Drive a fresh send through the full state machine
pub(crate) async fn drive_send(
    ctx: &SendContext,
    strategy: &dyn SendStrategy,
    mut draft: MessageDraft,
) -> bool {
    // Constructed → Validated
    if let Err(e) = strategy.validate(&draft) {
        warn!(
            "Validation failed for {}/{}: {}",
            draft.chat_id, draft.message_id, e
        );
        return false;
    }

    // Resolve chat flags and stamp expiry before anything is persisted
    let connection = match ctx.connections.get(&draft.chat_id).await {
        Ok(Some(connection)) => connection,
        Ok(None) => {
            warn!("Send aimed at unknown chat {}", draft.chat_id);
            return false;
        }
        Err(e) => {
            warn!("Connection lookup failed for {}: {}", draft.chat_id, e);
            return false;
        }
    };
    stamp(&mut draft, &connection);

    // Validated → Persisted
    if let Err(e) = strategy.persist(ctx, &draft).await {
        warn!(
            "Persist failed for {}/{}: {}",
            draft.chat_id, draft.message_id, e
        );
        return false;
    }

    drive_transmit(ctx, strategy, &connection, draft).await
}

/// Drive the transmit half of the state machine (shared by send and retry)
pub(crate) async fn drive_transmit(
    ctx: &SendContext,
    strategy: &dyn SendStrategy,
    connection: &Connection,
    mut draft: MessageDraft,
) -> bool {
    if connection.disconnected {
        return strategy
            .on_failure(
                ctx,
                &draft,
                &Error::Transport(format!("chat {} is disconnected", draft.chat_id)),
            )
            .await;
    }

    // Unauthenticated chats: the identity push goes out plaintext, anything
    // journalable defers silently, the rest fails.
    if !connection.authenticated && !PLAINTEXT_TYPES.contains(&draft.content_type) {
        return strategy
            .on_failure(
                ctx,
                &draft,
                &Error::AuthNotReady(format!("chat {} not authenticated", draft.chat_id)),
            )
            .await;
    }

    if let Err(e) = strategy.prepare(ctx, &mut draft).await {
        return strategy.on_failure(ctx, &draft, &e).await;
    }

    // Persisted → Transmitting
    match strategy.transmit(ctx, &draft).await {
        Ok(()) => {
            // Transmitting → Sent
            record_status(ctx, &draft, MessageStatus::Sent).await;
            let _ = ctx.journal.remove(&draft.chat_id, &draft.message_id).await;
            apply_preview(ctx, strategy.preview_text(&draft), &draft, PreviewStatus::Sent).await;
            if let Err(e) = strategy.cleanup(ctx, &draft).await {
                warn!(
                    "Post-send cleanup failed for {}/{}: {}",
                    draft.chat_id, draft.message_id, e
                );
            }
            true
        }
        Err(e) => strategy.on_failure(ctx, &draft, &e).await,
    }
}

fn stamp(draft: &mut MessageDraft, connection: &Connection) {
    draft.is_group = connection.chat_type == crate::storage::ChatType::Group;
    if draft.expires_on.is_none() && DISAPPEARING_TYPES.contains(&draft.content_type) {
        if let Some(secs) = connection.disappear_after_secs {
            draft.expires_on = Some(Utc::now() + Duration::seconds(secs));
        }
    }
}
