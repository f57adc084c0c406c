//! Receipt sender
//!
//! Receipts are best-effort and fire-once: never journaled, never retried.
//! A failed read receipt flags the target message so a future session can
//! notice the acknowledgement never went out.

use async_trait::async_trait;
use tracing::debug;

use super::{failure_outcome, MessageDraft, SendContext, SendStrategy};
use crate::message::{ContentType, MessageData};
use crate::Error;

/// Content types owned by the receipt sender
pub const RECEIPT_CONTENT_TYPES: &[ContentType] = &[ContentType::Receipt];

/// Sender for receipts
pub struct ReceiptSender;

#[async_trait]
impl SendStrategy for ReceiptSender {
    fn content_types(&self) -> &'static [ContentType] {
        RECEIPT_CONTENT_TYPES
    }

    fn journalable(&self) -> bool {
        false
    }

    async fn on_failure(&self, ctx: &SendContext, draft: &MessageDraft, error: &Error) -> bool {
        let accepted = failure_outcome(
            ctx,
            draft,
            error,
            self.journalable(),
            self.preview_text(draft),
        )
        .await;

        // A read receipt that never left stays visible on the target
        // message, so the acknowledgement can be reissued later.
        if let MessageData::Receipt {
            message_id,
            read_at: Some(_),
        } = &draft.data
        {
            debug!(
                "Read receipt for {}/{} failed; flagging as pending",
                draft.chat_id, message_id
            );
            let _ = ctx
                .messages
                .set_receipt_pending(&draft.chat_id, message_id, true)
                .await;
        }

        accepted
    }
}
