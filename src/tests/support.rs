//! Shared fixtures: a scriptable mock server and a fully wired core

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use crate::api::{AuthToken, ServerApi, UploadLocation};
use crate::auth::TokenKeeper;
use crate::crypto::{CryptoDriver, KeyPair};
use crate::events::EventBus;
use crate::handshake::Handshake;
use crate::journal::Journal;
use crate::links::LinkPool;
use crate::media::MediaTransfer;
use crate::senders::SendContext;
use crate::storage::{
    BundleStore, ChatCrypto, ChatCryptoStore, Connection, ConnectionStore, MediaStore,
    MessageStore, Profile, ProfileStore,
};
use crate::{Error, Result};

/// One message the mock accepted
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub destination: String,
    pub payload: serde_json::Value,
    pub is_group: bool,
    pub silent: bool,
}

/// Scriptable in-process stand-in for the relay server
pub struct MockApi {
    pub online: AtomicBool,
    pub fail_upload: AtomicBool,
    pub fail_link_batch: AtomicBool,
    pub fail_destinations: Mutex<HashSet<String>>,
    pub sent: Mutex<Vec<SentRecord>>,
    pub consumed_links: Mutex<Vec<String>>,
    pub blobs: Mutex<HashMap<String, Bytes>>,
    pub bundles: Mutex<HashMap<String, String>>,
    pub challenge_rounds: AtomicU64,
    counter: AtomicU64,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(true),
            fail_upload: AtomicBool::new(false),
            fail_link_batch: AtomicBool::new(false),
            fail_destinations: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
            consumed_links: Mutex::new(Vec::new()),
            blobs: Mutex::new(HashMap::new()),
            bundles: Mutex::new(HashMap::new()),
            challenge_rounds: AtomicU64::new(0),
            counter: AtomicU64::new(0),
        })
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn fail_destination(&self, destination: &str) {
        self.fail_destinations
            .lock()
            .expect("poisoned")
            .insert(destination.to_string());
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("poisoned").len()
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Transport("mock server offline".to_string()))
        }
    }
}

#[async_trait]
impl ServerApi for MockApi {
    async fn issue_link_batch(&self, count: usize) -> Result<Vec<String>> {
        self.check_online()?;
        if self.fail_link_batch.load(Ordering::SeqCst) {
            return Err(Error::Transport("link batch unavailable".to_string()));
        }
        Ok((0..count).map(|_| format!("link-{}", self.next())).collect())
    }

    async fn create_channel(&self, link_id: &str) -> Result<String> {
        self.check_online()?;
        let mut consumed = self.consumed_links.lock().expect("poisoned");
        if consumed.iter().any(|l| l == link_id) {
            return Err(Error::Transport("link already consumed".to_string()));
        }
        consumed.push(link_id.to_string());
        Ok(format!("chat-{}", link_id))
    }

    async fn send_message(
        &self,
        _token: &AuthToken,
        destination: &str,
        payload: serde_json::Value,
        is_group: bool,
        silent: bool,
    ) -> Result<()> {
        self.check_online()?;
        if self
            .fail_destinations
            .lock()
            .expect("poisoned")
            .contains(destination)
        {
            return Err(Error::Transport(format!(
                "destination {} unreachable",
                destination
            )));
        }
        self.sent.lock().expect("poisoned").push(SentRecord {
            destination: destination.to_string(),
            payload,
            is_group,
            silent,
        });
        Ok(())
    }

    async fn upload_location(&self) -> Result<UploadLocation> {
        self.check_online()?;
        let media_id = format!("media-{}", self.next());
        Ok(UploadLocation {
            url: format!("mock://{}", media_id),
            media_id,
        })
    }

    async fn download_location(&self, media_id: &str) -> Result<String> {
        self.check_online()?;
        Ok(format!("mock://{}", media_id))
    }

    async fn upload(&self, location: &UploadLocation, body: Bytes) -> Result<()> {
        self.check_online()?;
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(Error::Transport("upload rejected".to_string()));
        }
        self.blobs
            .lock()
            .expect("poisoned")
            .insert(location.media_id.clone(), body);
        Ok(())
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        self.check_online()?;
        let media_id = url.trim_start_matches("mock://");
        self.blobs
            .lock()
            .expect("poisoned")
            .get(media_id)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("no blob {}", media_id)))
    }

    async fn post_bundle(&self, bundle_json: &str) -> Result<String> {
        self.check_online()?;
        let bundle_id = format!("bundle-{}", self.next());
        self.bundles
            .lock()
            .expect("poisoned")
            .insert(bundle_id.clone(), bundle_json.to_string());
        Ok(bundle_id)
    }

    async fn get_bundle(&self, bundle_id: &str) -> Result<String> {
        self.check_online()?;
        self.bundles
            .lock()
            .expect("poisoned")
            .get(bundle_id)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("no bundle {}", bundle_id)))
    }

    async fn get_challenge(&self, user_id: &str) -> Result<String> {
        self.check_online()?;
        Ok(format!("challenge-for-{}", user_id))
    }

    async fn post_challenge_response(&self, _user_id: &str, _cipher: &str) -> Result<AuthToken> {
        self.check_online()?;
        let round = self.challenge_rounds.fetch_add(1, Ordering::SeqCst);
        Ok(AuthToken(format!("token-{}", round)))
    }
}

/// A fully wired core over in-memory stores and the mock server
pub struct TestCore {
    pub ctx: SendContext,
    pub api: Arc<MockApi>,
    pub profile: ProfileStore,
    pub bundles: BundleStore,
    pub links: LinkPool,
    pub handshake: Handshake,
    // Held for their Drop cleanup
    _scratch: tempfile::TempDir,
    _media: tempfile::TempDir,
}

impl TestCore {
    pub async fn new() -> Self {
        Self::with_token_validity(15 * 60).await
    }

    pub async fn with_token_validity(validity_secs: i64) -> Self {
        let api = MockApi::new();
        let crypto = Arc::new(CryptoDriver);

        let messages = MessageStore::open_in_memory().expect("messages store");
        let connections = ConnectionStore::open_in_memory().expect("connections store");
        let chat_crypto = ChatCryptoStore::open_in_memory().expect("chat crypto store");
        let journal = Journal::open_in_memory().expect("journal");
        let media_store = MediaStore::open_in_memory().expect("media store");
        let profile = ProfileStore::open_in_memory().expect("profile store");
        let bundles = BundleStore::open_in_memory().expect("bundle store");
        let links = LinkPool::open_in_memory(2, 5).expect("link pool");

        profile
            .save(&Profile {
                user_id: "user-1".to_string(),
                nickname: "Sam".to_string(),
                keypair: KeyPair::generate(),
                server_key: None,
                shared_secret: Some([1u8; 32]),
            })
            .await
            .expect("profile save");

        let token = TokenKeeper::open_in_memory(validity_secs, crypto.clone(), profile.clone())
            .expect("token keeper");

        let scratch = tempfile::tempdir().expect("scratch dir");
        let media_dir = tempfile::tempdir().expect("media dir");
        let media = MediaTransfer::new(
            api.clone(),
            crypto.clone(),
            media_store,
            scratch.path().to_path_buf(),
            media_dir.path().to_path_buf(),
        );

        let ctx = SendContext {
            api: api.clone(),
            crypto,
            messages,
            connections,
            chat_crypto,
            journal,
            token,
            media,
            events: EventBus::new(),
        };

        let handshake = Handshake::new(
            ctx.clone(),
            bundles.clone(),
            links.clone(),
            profile.clone(),
            5_000,
        );

        Self {
            ctx,
            api,
            profile,
            bundles,
            links,
            handshake,
            _scratch: scratch,
            _media: media_dir,
        }
    }

    pub fn scratch_dir(&self) -> &std::path::Path {
        self._scratch.path()
    }

    pub fn media_dir(&self) -> &std::path::Path {
        self._media.path()
    }

    /// Add a connection with a completed handshake
    pub async fn add_authenticated_chat(&self, chat_id: &str) {
        let mut connection = Connection::new_direct(chat_id.to_string(), "Peer".to_string());
        connection.authenticated = true;
        self.ctx.connections.add(&connection).await.expect("add connection");

        self.ctx
            .chat_crypto
            .save(
                chat_id,
                &ChatCrypto {
                    shared_secret: Some([9u8; 32]),
                    ..Default::default()
                },
            )
            .await
            .expect("save chat crypto");
    }

    /// Add a connection whose handshake has not completed
    pub async fn add_unauthenticated_chat(&self, chat_id: &str) {
        let connection = Connection::new_direct(chat_id.to_string(), "Peer".to_string());
        self.ctx.connections.add(&connection).await.expect("add connection");
    }

    /// Poll until `check` passes or the deadline hits
    pub async fn wait_for<F>(&self, mut check: F) -> bool
    where
        F: FnMut() -> bool,
    {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }
}

/// Count files in a directory (non-recursive)
pub fn file_count(dir: &std::path::Path) -> usize {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).count(),
        Err(_) => 0,
    }
}
