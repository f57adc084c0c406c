//! Content router and public dispatch
//!
//! Classifies an outgoing message by content type and drives the matching
//! sender variant. This is the crate's public send boundary: nothing below
//! it escapes as an error. Every call resolves to a [`SendOutcome`], with
//! persisted status changes and tracing as the only other observable
//! effects.

use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::events::CoreEvent;
use crate::journal::JournalEntry;
use crate::message::{ContentType, MessageData, MessageStatus};
use crate::senders::deletion::DeletionSender;
use crate::senders::edit::EditSender;
use crate::senders::generic::GenericSender;
use crate::senders::media::MediaSender;
use crate::senders::reaction::ReactionSender;
use crate::senders::receipt::ReceiptSender;
use crate::senders::update::UpdateSender;
use crate::senders::{drive_send, drive_transmit, MessageDraft, SendContext, SendStrategy};

static GENERIC: GenericSender = GenericSender;
static MEDIA: MediaSender = MediaSender;
static UPDATE: UpdateSender = UpdateSender;
static REACTION: ReactionSender = ReactionSender;
static RECEIPT: ReceiptSender = ReceiptSender;
static DELETION: DeletionSender = DeletionSender;
static EDIT: EditSender = EditSender;

/// The seven sender variants, in routing order
pub(crate) static STRATEGIES: &[&(dyn SendStrategy)] = &[
    &GENERIC, &MEDIA, &UPDATE, &REACTION, &RECEIPT, &DELETION, &EDIT,
];

/// How a dispatch resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Sent, or journaled for a later retry
    Accepted,
    /// Validation failure or a non-retryable delivery failure
    Rejected,
    /// No sender variant owns this content type
    Unroutable,
}

impl SendOutcome {
    /// Whether the message is on its way (now or via the journal)
    pub fn accepted(self) -> bool {
        self == SendOutcome::Accepted
    }
}

/// Find the sender variant owning a content type
pub fn route(content_type: ContentType) -> Option<&'static dyn SendStrategy> {
    STRATEGIES
        .iter()
        .copied()
        .find(|s| s.content_types().contains(&content_type))
}

/// Send a message through its sender variant
///
/// `message_id` is generated when not supplied. The boolean-ish outcome is
/// the only signal: "accepted" means sent or journaled, and actual delivery
/// is observed later through the connection preview.
pub async fn send(
    ctx: &SendContext,
    chat_id: &str,
    content_type: ContentType,
    data: MessageData,
    reply_id: Option<String>,
    message_id: Option<String>,
) -> SendOutcome {
    let Some(strategy) = route(content_type) else {
        warn!(
            "No sender for content type {}; dropping",
            content_type.as_str()
        );
        ctx.events.publish(CoreEvent::UnroutableContent {
            chat_id: chat_id.to_string(),
            content_type,
        });
        return SendOutcome::Unroutable;
    };

    let mut draft = MessageDraft::new(chat_id, content_type, data, reply_id);
    if let Some(message_id) = message_id {
        draft.message_id = message_id;
    }

    if drive_send(ctx, strategy, draft).await {
        SendOutcome::Accepted
    } else {
        SendOutcome::Rejected
    }
}

/// Fire-and-forget send
///
/// Spawns the send as its own task and returns a completion channel the
/// caller is free to drop; nothing is cancelled by ignoring it.
pub fn send_detached(
    ctx: &SendContext,
    chat_id: &str,
    content_type: ContentType,
    data: MessageData,
    reply_id: Option<String>,
) -> oneshot::Receiver<SendOutcome> {
    let (done, receiver) = oneshot::channel();
    let ctx = ctx.clone();
    let chat_id = chat_id.to_string();

    tokio::spawn(async move {
        let outcome = send(&ctx, &chat_id, content_type, data, reply_id, None).await;
        let _ = done.send(outcome);
    });

    receiver
}

/// Retry a persisted message
///
/// Reconstructs all working state from the stored record. Retrying a
/// message that is already `Sent` or already cleaned up is a no-op, not a
/// duplicate transmit.
pub async fn retry(ctx: &SendContext, chat_id: &str, message_id: &str) -> bool {
    let message = match ctx.messages.get(chat_id, message_id).await {
        Ok(Some(message)) => message,
        Ok(None) => {
            // Already cleaned up; nothing left to do.
            return true;
        }
        Err(e) => {
            warn!("Retry lookup failed for {}/{}: {}", chat_id, message_id, e);
            return false;
        }
    };

    if message.status == MessageStatus::Sent {
        let _ = ctx.journal.remove(chat_id, message_id).await;
        return true;
    }

    let Some(strategy) = route(message.content_type) else {
        warn!(
            "No sender for persisted content type {}",
            message.content_type.as_str()
        );
        return false;
    };

    if !strategy.journalable() {
        warn!(
            "Retry is unsupported for content type {}",
            message.content_type.as_str()
        );
        return false;
    }

    let connection = match ctx.connections.get(chat_id).await {
        Ok(Some(connection)) => connection,
        Ok(None) => {
            // Chat deleted while the message waited; drop the orphan.
            warn!("Retry for vanished chat {}; cleaning up", chat_id);
            let _ = ctx.messages.delete_record(chat_id, message_id).await;
            let _ = ctx.journal.remove(chat_id, message_id).await;
            return true;
        }
        Err(e) => {
            warn!("Connection lookup failed for {}: {}", chat_id, e);
            return false;
        }
    };

    let is_group = connection.chat_type == crate::storage::ChatType::Group;
    let draft = MessageDraft::from_message(&message, is_group);
    drive_transmit(ctx, strategy, &connection, draft).await
}

/// Attempt immediate transmission of a journal entry
///
/// On transport failure the entry is (re)appended and the call still
/// reports acceptance: the caller is told "accepted for delivery", and
/// delivery itself is observed later via the connection preview.
pub async fn try_send(ctx: &SendContext, entry: JournalEntry) -> bool {
    let chat_id = entry.message.chat_id.clone();
    let message_id = entry.message.message_id.clone();

    match ctx.messages.get(&chat_id, &message_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            if let Err(e) = ctx.messages.save(&entry.message).await {
                warn!("Journal entry persist failed: {}", e);
                return false;
            }
        }
        Err(e) => {
            warn!("Journal entry lookup failed: {}", e);
            return false;
        }
    }

    if retry(ctx, &chat_id, &message_id).await {
        return true;
    }

    // Transport said no, the journal says later.
    match ctx.journal.contains(&chat_id, &message_id).await {
        Ok(true) => true,
        _ => false,
    }
}

/// Drain the journal in order
///
/// Entries that succeed are dropped; on the first failure the failed entry
/// and everything after it are written back unchanged, preserving order.
pub async fn drain_journal(ctx: &SendContext) -> crate::Result<()> {
    let entries = ctx.journal.take_all().await?;
    if entries.is_empty() {
        return Ok(());
    }
    let total = entries.len();
    info!("Draining journal of {} entries", total);

    for (index, entry) in entries.iter().enumerate() {
        let delivered = retry(ctx, &entry.message.chat_id, &entry.message.message_id).await;
        let still_parked = ctx
            .journal
            .contains(&entry.message.chat_id, &entry.message.message_id)
            .await
            .unwrap_or(false);

        if !delivered || still_parked {
            // Write back this entry and everything after it, unchanged.
            ctx.journal.restore(&entries[index..]).await?;
            ctx.events.publish(CoreEvent::JournalDrained {
                delivered: index,
                remaining: total - index,
            });
            info!(
                "Journal drain stopped at entry {}; {} written back",
                index,
                total - index
            );
            return Ok(());
        }
    }

    ctx.events.publish(CoreEvent::JournalDrained {
        delivered: total,
        remaining: 0,
    });
    info!("Journal drained: {} entries delivered", total);
    Ok(())
}
