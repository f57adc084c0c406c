use super::support::{file_count, TestCore};
use crate::message::{ContentType, MessageData, MessageStatus};
use crate::router::{self, SendOutcome};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::atomic::Ordering;

fn media_data(path: &std::path::Path, file_name: &str) -> MessageData {
    MessageData::Media {
        file_name: file_name.to_string(),
        file_path: Some(path.to_string_lossy().to_string()),
        file_type: Some("image/jpeg".to_string()),
        text: None,
        media_id: None,
        key: None,
    }
}

#[tokio::test]
async fn test_upload_download_roundtrip_byte_identical() {
    let core = TestCore::new().await;
    let source_dir = tempfile::tempdir().expect("source dir");
    let source = source_dir.path().join("photo.jpg");
    let plaintext: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&source, &plaintext).expect("write source");

    let (media_id, key) = core
        .ctx
        .media
        .upload(&source, Some("image/jpeg"))
        .await
        .expect("upload");

    // No ciphertext temp file survives the upload
    assert_eq!(file_count(core.scratch_dir()), 0);

    let downloaded = core
        .ctx
        .media
        .download("chat1", &media_id, &key, "photo.jpg")
        .await
        .expect("download");

    assert_eq!(file_count(core.scratch_dir()), 0);
    let roundtripped = std::fs::read(&downloaded).expect("read downloaded");
    assert_eq!(roundtripped, plaintext);
    // Landed in the chat's media directory
    assert!(downloaded.starts_with(core.media_dir()));
}

#[tokio::test]
async fn test_upload_failure_leaves_no_ciphertext_behind() {
    let core = TestCore::new().await;
    core.api.fail_upload.store(true, Ordering::SeqCst);

    let source_dir = tempfile::tempdir().expect("source dir");
    let source = source_dir.path().join("doc.pdf");
    std::fs::write(&source, b"important bytes").expect("write source");

    let result = core.ctx.media.upload(&source, None).await;
    assert!(result.is_err());
    assert_eq!(file_count(core.scratch_dir()), 0);
}

#[tokio::test]
async fn test_download_failure_leaves_no_ciphertext_behind() {
    let core = TestCore::new().await;

    let key = STANDARD.encode([0u8; 32]);
    let result = core
        .ctx
        .media
        .download("chat1", "no-such-media", &key, "x.bin")
        .await;

    assert!(result.is_err());
    assert_eq!(file_count(core.scratch_dir()), 0);
}

#[tokio::test]
async fn test_media_message_uploads_then_sends() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;

    let source_dir = tempfile::tempdir().expect("source dir");
    let source = source_dir.path().join("photo.jpg");
    std::fs::write(&source, b"jpeg bytes").expect("write source");

    let outcome = router::send(
        &core.ctx,
        "chat1",
        ContentType::Image,
        media_data(&source, "photo.jpg"),
        None,
        Some("m1".to_string()),
    )
    .await;
    assert_eq!(outcome, SendOutcome::Accepted);

    let message = core
        .ctx
        .messages
        .get("chat1", "m1")
        .await
        .expect("get")
        .expect("message");
    assert_eq!(message.status, MessageStatus::Sent);
    let MessageData::Media { media_id, key, .. } = &message.data else {
        panic!("media data expected");
    };
    assert!(media_id.is_some());
    assert!(key.is_some());

    // One message on the wire, one blob uploaded, scratch dir clean
    assert_eq!(core.api.sent_count(), 1);
    assert_eq!(core.api.blobs.lock().expect("poisoned").len(), 1);
    assert_eq!(file_count(core.scratch_dir()), 0);
}

#[tokio::test]
async fn test_media_upload_failure_fails_message_without_journaling() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;
    core.api.fail_upload.store(true, Ordering::SeqCst);

    let source_dir = tempfile::tempdir().expect("source dir");
    let source = source_dir.path().join("clip.mp4");
    std::fs::write(&source, b"video bytes").expect("write source");

    let outcome = router::send(
        &core.ctx,
        "chat1",
        ContentType::Video,
        media_data(&source, "clip.mp4"),
        None,
        Some("m1".to_string()),
    )
    .await;

    // The upload is not retried automatically
    assert_eq!(outcome, SendOutcome::Rejected);
    let message = core
        .ctx
        .messages
        .get("chat1", "m1")
        .await
        .expect("get")
        .expect("message");
    assert_eq!(message.status, MessageStatus::Failed);
    assert!(core.ctx.journal.is_empty().await.expect("journal"));
}

#[tokio::test]
async fn test_media_transport_failure_after_upload_journals() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;
    core.api.fail_destination("chat1");

    let source_dir = tempfile::tempdir().expect("source dir");
    let source = source_dir.path().join("photo.jpg");
    std::fs::write(&source, b"jpeg bytes").expect("write source");

    let outcome = router::send(
        &core.ctx,
        "chat1",
        ContentType::Image,
        media_data(&source, "photo.jpg"),
        None,
        Some("m1".to_string()),
    )
    .await;

    // Upload worked, the send itself is parked for retry
    assert_eq!(outcome, SendOutcome::Accepted);
    let message = core
        .ctx
        .messages
        .get("chat1", "m1")
        .await
        .expect("get")
        .expect("message");
    assert_eq!(message.status, MessageStatus::Journaled);
    assert!(core.ctx.journal.contains("chat1", "m1").await.expect("journal"));

    // Drain after the destination recovers: no second upload
    core.api.fail_destinations.lock().expect("poisoned").clear();
    router::drain_journal(&core.ctx).await.expect("drain");

    let message = core
        .ctx
        .messages
        .get("chat1", "m1")
        .await
        .expect("get")
        .expect("message");
    assert_eq!(message.status, MessageStatus::Sent);
    assert_eq!(core.api.blobs.lock().expect("poisoned").len(), 1);
}

#[tokio::test]
async fn test_missing_file_is_validation_error() {
    let core = TestCore::new().await;
    core.add_authenticated_chat("chat1").await;

    let outcome = router::send(
        &core.ctx,
        "chat1",
        ContentType::File,
        media_data(std::path::Path::new("/nonexistent/file.bin"), "file.bin"),
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
