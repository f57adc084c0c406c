use super::support::TestCore;
use crate::message::{ContentType, MessageData, MessageStatus};
use crate::router::{self, SendOutcome};
use crate::storage::PreviewStatus;
use chrono::Utc;

fn text(text: &str) -> MessageData {
    MessageData::Text {
        text: text.to_string(),
    }
}

#[tokio::test]
async fn test_text_send_success() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;

    let outcome = router::send(&core.ctx, "chat1", ContentType::Text, text("hello"), None, None).await;
    assert_eq!(outcome, SendOutcome::Accepted);

    assert_eq!(core.api.sent_count(), 1);
    assert!(core.ctx.journal.is_empty().await.expect("journal"));

    let messages = core
        .ctx
        .messages
        .messages_for_chat("chat1")
        .await
        .expect("messages");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, MessageStatus::Sent);

    let connection = core
        .ctx
        .connections
        .get("chat1")
        .await
        .expect("get")
        .expect("connection");
    assert_eq!(connection.preview_text, "hello");
    assert_eq!(connection.preview_status, PreviewStatus::Sent);
}

#[tokio::test]
async fn test_offline_text_send_journals_then_drains() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;
    core.api.set_online(false);

    let outcome = router::send(&core.ctx, "chat1", ContentType::Text, text("later"), None, None).await;
    // Accepted for delivery, not delivered
    assert_eq!(outcome, SendOutcome::Accepted);
    assert_eq!(core.api.sent_count(), 0);

    let message = &core
        .ctx
        .messages
        .messages_for_chat("chat1")
        .await
        .expect("messages")[0];
    assert_eq!(message.status, MessageStatus::Journaled);
    assert!(core
        .ctx
        .journal
        .contains("chat1", &message.message_id)
        .await
        .expect("journal"));

    let connection = core
        .ctx
        .connections
        .get("chat1")
        .await
        .expect("get")
        .expect("connection");
    assert_eq!(connection.preview_status, PreviewStatus::Journaled);

    // Connectivity restored: a drain flips everything to sent
    core.api.set_online(true);
    router::drain_journal(&core.ctx).await.expect("drain");

    assert_eq!(core.api.sent_count(), 1);
    assert!(core.ctx.journal.is_empty().await.expect("journal"));
    let message = &core
        .ctx
        .messages
        .messages_for_chat("chat1")
        .await
        .expect("messages")[0];
    assert_eq!(message.status, MessageStatus::Sent);
    let connection = core
        .ctx
        .connections
        .get("chat1")
        .await
        .expect("get")
        .expect("connection");
    assert_eq!(connection.preview_status, PreviewStatus::Sent);
}

#[tokio::test]
async fn test_oversized_payload_rejected_synchronously() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;

    let huge = "x".repeat(crate::config::MESSAGE_DATA_MAX_LENGTH);
    let outcome = router::send(&core.ctx, "chat1", ContentType::Text, text(&huge), None, None).await;

    assert_eq!(outcome, SendOutcome::Rejected);
    // Never persisted, never journaled
    assert!(core
        .ctx
        .messages
        .messages_for_chat("chat1")
        .await
        .expect("messages")
        .is_empty());
    assert!(core.ctx.journal.is_empty().await.expect("journal"));
}

#[tokio::test]
async fn test_retry_on_sent_message_is_noop() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;

    router::send(
        &core.ctx,
        "chat1",
        ContentType::Text,
        text("once"),
        None,
        Some("m1".to_string()),
    )
    .await;
    assert_eq!(core.api.sent_count(), 1);

    assert!(router::retry(&core.ctx, "chat1", "m1").await);
    assert!(router::retry(&core.ctx, "chat1", "m1").await);

    // No duplicate transmit, still absent from the journal
    assert_eq!(core.api.sent_count(), 1);
    assert!(!core.ctx.journal.contains("chat1", "m1").await.expect("journal"));
}

#[tokio::test]
async fn test_retry_on_cleaned_up_message_is_noop() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;

    assert!(router::retry(&core.ctx, "chat1", "ghost").await);
    assert_eq!(core.api.sent_count(), 0);
}

#[tokio::test]
async fn test_unauthenticated_chat_defers_journalable_send() {
    let core = TestCore::new().await;
    core.add_unauthenticated_chat("chat1").await;

    let outcome = router::send(&core.ctx, "chat1", ContentType::Text, text("early"), None, None).await;

    // Silent deferral: accepted, journaled, nothing on the wire
    assert_eq!(outcome, SendOutcome::Accepted);
    assert_eq!(core.api.sent_count(), 0);
    let message = &core
        .ctx
        .messages
        .messages_for_chat("chat1")
        .await
        .expect("messages")[0];
    assert_eq!(message.status, MessageStatus::Journaled);
}

#[tokio::test]
async fn test_identity_push_goes_plaintext_before_handshake() {
    let core = TestCore::new().await;
    core.add_unauthenticated_chat("chat1").await;

    let outcome = router::send(
        &core.ctx,
        "chat1",
        ContentType::Name,
        MessageData::Name {
            name: "Sam".to_string(),
            pubkey: Some("aa".repeat(32)),
        },
        None,
        None,
    )
    .await;

    assert_eq!(outcome, SendOutcome::Accepted);
    let sent = core.api.sent.lock().expect("poisoned");
    assert_eq!(sent.len(), 1);
    assert!(sent[0].payload.get("content").is_some());
    assert!(sent[0].payload.get("encryptedContent").is_none());
    assert!(sent[0].silent);
}

#[tokio::test]
async fn test_authenticated_send_is_encrypted() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;

    router::send(&core.ctx, "chat1", ContentType::Text, text("secret"), None, None).await;

    let sent = core.api.sent.lock().expect("poisoned");
    assert!(sent[0].payload.get("encryptedContent").is_some());
    assert!(sent[0].payload.get("content").is_none());
    assert!(!sent[0].silent);
}

#[tokio::test]
async fn test_update_failure_is_not_journaled() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;
    core.api.set_online(false);

    let outcome = router::send(
        &core.ctx,
        "chat1",
        ContentType::Update,
        MessageData::Update {
            message_id: "m1".to_string(),
            status: MessageStatus::Sent,
        },
        None,
        Some("u1".to_string()),
    )
    .await;

    assert_eq!(outcome, SendOutcome::Rejected);
    assert!(core.ctx.journal.is_empty().await.expect("journal"));
    let message = core
        .ctx
        .messages
        .get("chat1", "u1")
        .await
        .expect("get")
        .expect("message");
    assert_eq!(message.status, MessageStatus::Failed);
}

#[tokio::test]
async fn test_failed_read_receipt_marks_target_pending() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;

    // The incoming message we are acknowledging
    core.ctx
        .messages
        .save(&crate::message::Message {
            chat_id: "chat1".to_string(),
            message_id: "incoming1".to_string(),
            content_type: ContentType::Text,
            data: text("hi"),
            timestamp: Utc::now(),
            sender: false,
            status: MessageStatus::Sent,
            reply_id: None,
            expires_on: None,
            single_recipient: None,
            has_reactions: false,
            receipt_pending: false,
        })
        .await
        .expect("save");

    core.api.set_online(false);
    let outcome = router::send(
        &core.ctx,
        "chat1",
        ContentType::Receipt,
        MessageData::Receipt {
            message_id: "incoming1".to_string(),
            read_at: Some(Utc::now()),
        },
        None,
        None,
    )
    .await;

    assert_eq!(outcome, SendOutcome::Rejected);
    let target = core
        .ctx
        .messages
        .get("chat1", "incoming1")
        .await
        .expect("get")
        .expect("message");
    assert!(target.receipt_pending);
}

#[tokio::test]
async fn test_reaction_applies_locally_and_cleans_up() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;

    core.ctx
        .messages
        .save(&crate::message::Message {
            chat_id: "chat1".to_string(),
            message_id: "target".to_string(),
            content_type: ContentType::Text,
            data: text("react to me"),
            timestamp: Utc::now(),
            sender: false,
            status: MessageStatus::Sent,
            reply_id: None,
            expires_on: None,
            single_recipient: None,
            has_reactions: false,
            receipt_pending: false,
        })
        .await
        .expect("save");

    let outcome = router::send(
        &core.ctx,
        "chat1",
        ContentType::Reaction,
        MessageData::Reaction {
            message_id: "target".to_string(),
            reaction: "🎉".to_string(),
            tombstone: false,
        },
        None,
        Some("r1".to_string()),
    )
    .await;
    assert_eq!(outcome, SendOutcome::Accepted);

    let reactions = core
        .ctx
        .messages
        .reactions("chat1", "target")
        .await
        .expect("reactions");
    assert_eq!(reactions, vec![("self".to_string(), "🎉".to_string())]);
    let target = core
        .ctx
        .messages
        .get("chat1", "target")
        .await
        .expect("get")
        .expect("message");
    assert!(target.has_reactions);

    // The reaction message keeps no record of its own
    assert!(core.ctx.messages.get("chat1", "r1").await.expect("get").is_none());
}

#[tokio::test]
async fn test_reaction_tombstone_withdraws() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;

    core.ctx
        .messages
        .save(&crate::message::Message {
            chat_id: "chat1".to_string(),
            message_id: "target".to_string(),
            content_type: ContentType::Text,
            data: text("react to me"),
            timestamp: Utc::now(),
            sender: false,
            status: MessageStatus::Sent,
            reply_id: None,
            expires_on: None,
            single_recipient: None,
            has_reactions: false,
            receipt_pending: false,
        })
        .await
        .expect("save");

    router::send(
        &core.ctx,
        "chat1",
        ContentType::Reaction,
        MessageData::Reaction {
            message_id: "target".to_string(),
            reaction: "🎉".to_string(),
            tombstone: false,
        },
        None,
        None,
    )
    .await;

    router::send(
        &core.ctx,
        "chat1",
        ContentType::Reaction,
        MessageData::Reaction {
            message_id: "target".to_string(),
            reaction: "🎉".to_string(),
            tombstone: true,
        },
        None,
        None,
    )
    .await;

    assert!(core
        .ctx
        .messages
        .reactions("chat1", "target")
        .await
        .expect("reactions")
        .is_empty());
    let target = core
        .ctx
        .messages
        .get("chat1", "target")
        .await
        .expect("get")
        .expect("message");
    assert!(!target.has_reactions);
}

#[tokio::test]
async fn test_deletion_tombstones_target_and_updates_preview_when_latest() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;

    router::send(
        &core.ctx,
        "chat1",
        ContentType::Text,
        text("delete me"),
        None,
        Some("m1".to_string()),
    )
    .await;

    let outcome = router::send(
        &core.ctx,
        "chat1",
        ContentType::Deletion,
        MessageData::Deletion {
            message_id_to_delete: "m1".to_string(),
        },
        None,
        Some("d1".to_string()),
    )
    .await;
    assert_eq!(outcome, SendOutcome::Accepted);

    let target = core
        .ctx
        .messages
        .get("chat1", "m1")
        .await
        .expect("get")
        .expect("message");
    assert_eq!(target.content_type, ContentType::Info);

    // The instruction record was consumed
    assert!(core.ctx.messages.get("chat1", "d1").await.expect("get").is_none());

    let connection = core
        .ctx
        .connections
        .get("chat1")
        .await
        .expect("get")
        .expect("connection");
    assert_eq!(connection.preview_text, "message deleted");
}

#[tokio::test]
async fn test_deletion_of_older_message_keeps_preview() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;

    router::send(
        &core.ctx,
        "chat1",
        ContentType::Text,
        text("old"),
        None,
        Some("m1".to_string()),
    )
    .await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    router::send(
        &core.ctx,
        "chat1",
        ContentType::Text,
        text("latest"),
        None,
        Some("m2".to_string()),
    )
    .await;

    router::send(
        &core.ctx,
        "chat1",
        ContentType::Deletion,
        MessageData::Deletion {
            message_id_to_delete: "m1".to_string(),
        },
        None,
        None,
    )
    .await;

    let connection = core
        .ctx
        .connections
        .get("chat1")
        .await
        .expect("get")
        .expect("connection");
    assert_eq!(connection.preview_text, "latest");
}

#[tokio::test]
async fn test_edit_rewrites_target_and_recomputes_preview() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;

    router::send(
        &core.ctx,
        "chat1",
        ContentType::Text,
        text("tpyo"),
        None,
        Some("m1".to_string()),
    )
    .await;

    let outcome = router::send(
        &core.ctx,
        "chat1",
        ContentType::Edit,
        MessageData::Edit {
            message_id_to_edit: "m1".to_string(),
            text: "typo".to_string(),
        },
        None,
        Some("e1".to_string()),
    )
    .await;
    assert_eq!(outcome, SendOutcome::Accepted);

    let target = core
        .ctx
        .messages
        .get("chat1", "m1")
        .await
        .expect("get")
        .expect("message");
    assert_eq!(
        target.data,
        MessageData::Text {
            text: "typo".to_string()
        }
    );
    assert!(core.ctx.messages.get("chat1", "e1").await.expect("get").is_none());

    let connection = core
        .ctx
        .connections
        .get("chat1")
        .await
        .expect("get")
        .expect("connection");
    assert_eq!(connection.preview_text, "typo");
}

#[tokio::test]
async fn test_edit_of_missing_target_cleans_orphan() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;

    let outcome = router::send(
        &core.ctx,
        "chat1",
        ContentType::Edit,
        MessageData::Edit {
            message_id_to_edit: "ghost".to_string(),
            text: "whatever".to_string(),
        },
        None,
        Some("e1".to_string()),
    )
    .await;

    assert_eq!(outcome, SendOutcome::Rejected);
    assert_eq!(core.api.sent_count(), 0);
    assert!(core.ctx.messages.get("chat1", "e1").await.expect("get").is_none());
    assert!(core.ctx.journal.is_empty().await.expect("journal"));
}

#[tokio::test]
async fn test_unroutable_content_type() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;
    let mut events = core.ctx.events.subscribe();

    let outcome = router::send(
        &core.ctx,
        "chat1",
        ContentType::NewChat,
        text("never"),
        None,
        None,
    )
    .await;

    assert_eq!(outcome, SendOutcome::Unroutable);
    assert_eq!(core.api.sent_count(), 0);
    let event = events.recv().await.expect("event");
    assert_eq!(
        event,
        crate::events::CoreEvent::UnroutableContent {
            chat_id: "chat1".to_string(),
            content_type: ContentType::NewChat,
        }
    );
}

#[tokio::test]
async fn test_wrong_data_shape_is_validation_failure() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;

    let outcome = router::send(
        &core.ctx,
        "chat1",
        ContentType::Image,
        text("not media data"),
        None,
        None,
    )
    .await;

    assert_eq!(outcome, SendOutcome::Rejected);
    assert!(core
        .ctx
        .messages
        .messages_for_chat("chat1")
        .await
        .expect("messages")
        .is_empty());
}

#[tokio::test]
async fn test_disappearing_timer_stamps_expiry() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;

    // Turn the timer on for the chat
    router::send(
        &core.ctx,
        "chat1",
        ContentType::DisappearingMessages,
        MessageData::Timer {
            duration_seconds: 3600,
        },
        None,
        None,
    )
    .await;

    router::send(
        &core.ctx,
        "chat1",
        ContentType::Text,
        text("ephemeral"),
        None,
        Some("m1".to_string()),
    )
    .await;

    let message = core
        .ctx
        .messages
        .get("chat1", "m1")
        .await
        .expect("get")
        .expect("message");
    let expires_on = message.expires_on.expect("expiry missing");
    assert!(expires_on > Utc::now());
}

#[tokio::test]
async fn test_status_transitions_fuzzed_against_table() {
    use rand::seq::SliceRandom;
    use rand::Rng;

    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;

    let statuses = [
        MessageStatus::Unassigned,
        MessageStatus::Journaled,
        MessageStatus::Sent,
        MessageStatus::Failed,
        MessageStatus::Unsent,
    ];
    let mut rng = rand::thread_rng();

    for round in 0..50 {
        let message_id = format!("fuzz-{}", round);
        let initial = *statuses.choose(&mut rng).expect("choose");
        core.ctx
            .messages
            .save(&crate::message::Message {
                chat_id: "chat1".to_string(),
                message_id: message_id.clone(),
                content_type: ContentType::Text,
                data: text("fuzz"),
                timestamp: Utc::now(),
                sender: true,
                status: initial,
                reply_id: None,
                expires_on: None,
                single_recipient: None,
                has_reactions: false,
                receipt_pending: false,
            })
            .await
            .expect("save");

        let mut current = initial;
        for _ in 0..rng.gen_range(1..8) {
            let next = *statuses.choose(&mut rng).expect("choose");
            let result = core.ctx.messages.update_status("chat1", &message_id, next).await;
            if MessageStatus::can_transition(current, next) {
                result.expect("legal transition refused");
                current = next;
            } else {
                assert!(result.is_err(), "illegal transition {:?} -> {:?} accepted", current, next);
            }
        }
    }
}
