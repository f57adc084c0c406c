use super::support::TestCore;
use crate::crypto::KeyPair;
use crate::storage::Profile;
use crate::Error;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_token_cached_within_validity_window() {
    let core = TestCore::new().await;

    let first = core.ctx.token.get(core.api.as_ref()).await.expect("token");
    let second = core.ctx.token.get(core.api.as_ref()).await.expect("token");

    assert_eq!(first, second);
    // One challenge round served both calls
    assert_eq!(core.api.challenge_rounds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_token_regenerated_after_expiry() {
    // A negative validity window expires every token immediately
    let core = TestCore::with_token_validity(-1).await;

    let first = core.ctx.token.get(core.api.as_ref()).await.expect("token");
    let second = core.ctx.token.get(core.api.as_ref()).await.expect("token");

    assert_ne!(first, second);
    assert_eq!(core.api.challenge_rounds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalidate_forces_fresh_challenge() {
    let core = TestCore::new().await;

    core.ctx.token.get(core.api.as_ref()).await.expect("token");
    core.ctx.token.invalidate().await.expect("invalidate");
    core.ctx.token.get(core.api.as_ref()).await.expect("token");

    assert_eq!(core.api.challenge_rounds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_token_requires_shared_secret() {
    let core = TestCore::new().await;
    core.profile
        .save(&Profile {
            user_id: "user-1".to_string(),
            nickname: "Sam".to_string(),
            keypair: KeyPair::generate(),
            server_key: None,
            shared_secret: None,
        })
        .await
        .expect("save");

    let result = core.ctx.token.get(core.api.as_ref()).await;
    assert!(matches!(result, Err(Error::AuthNotReady(_))));
}

#[tokio::test]
async fn test_offline_token_fetch_is_transport_error() {
    let core = TestCore::new().await;
    core.api.set_online(false);

    let result = core.ctx.token.get(core.api.as_ref()).await;
    assert!(matches!(result, Err(Error::Transport(_))));
}
