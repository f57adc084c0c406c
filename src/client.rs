//! Top-level assembly of the delivery core
//!
//! [`DeliveryCore`] wires the stores, the HTTP client, the crypto driver
//! and the handshake protocol together from a [`Config`] and is the handle
//! the embedding application keeps for the lifetime of the process.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::api::HttpApi;
use crate::auth::TokenKeeper;
use crate::config::Config;
use crate::crypto::CryptoDriver;
use crate::events::{CoreEvent, EventBus};
use crate::handshake::{BundleReadOutcome, Handshake};
use crate::journal::Journal;
use crate::links::LinkPool;
use crate::media::MediaTransfer;
use crate::message::{ContentType, MessageData};
use crate::router::{self, SendOutcome};
use crate::senders::SendContext;
use crate::storage::{
    BundleStore, ChatCryptoStore, ConnectionStore, MediaStore, MessageStore, ProfileStore,
};
use crate::Result;

/// The assembled delivery core
pub struct DeliveryCore {
    /// Shared sender context (stores + capabilities)
    pub ctx: SendContext,
    /// Handshake driver for bundle issue/consume
    pub handshake: Handshake,
    /// The local user's profile store
    pub profile: ProfileStore,
    /// The configuration this core was built from
    pub config: Config,
}

impl DeliveryCore {
    /// Open (or create) every store under the configured data directory and
    /// wire up the production capabilities
    pub fn open(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let data_dir = Path::new(&config.data_dir);

        let api = Arc::new(HttpApi::new(
            &config.api_base_url,
            Duration::from_secs(config.request_timeout_secs),
        )?);
        let crypto = Arc::new(CryptoDriver);

        let messages = MessageStore::open(data_dir.join("messages.db"))?;
        let connections = ConnectionStore::open(data_dir.join("connections.db"))?;
        let chat_crypto = ChatCryptoStore::open(data_dir.join("chat_crypto.db"))?;
        let journal = Journal::open(data_dir.join("journal.db"))?;
        let media_store = MediaStore::open(data_dir.join("media.db"))?;
        let profile = ProfileStore::open(data_dir.join("profile.db"))?;
        let bundles = BundleStore::open(data_dir.join("bundles.db"))?;
        let links = LinkPool::open(
            data_dir.join("links.db"),
            config.link_pool_floor,
            config.link_pool_batch,
        )?;

        let token = TokenKeeper::open(
            data_dir.join("token.db"),
            config.token_validity_secs,
            crypto.clone(),
            profile.clone(),
        )?;

        let media = MediaTransfer::new(
            api.clone(),
            crypto.clone(),
            media_store,
            config.scratch_dir.clone(),
            config.media_dir.clone(),
        );

        let ctx = SendContext {
            api,
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
            bundles,
            links,
            profile.clone(),
            config.dedup_window_ms,
        );

        Ok(Self {
            ctx,
            handshake,
            profile,
            config,
        })
    }

    /// Subscribe to core state-change events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CoreEvent> {
        self.ctx.events.subscribe()
    }

    /// Send a message; `true`-ish outcome means accepted for delivery
    pub async fn send(
        &self,
        chat_id: &str,
        content_type: ContentType,
        data: MessageData,
        reply_id: Option<String>,
    ) -> SendOutcome {
        router::send(&self.ctx, chat_id, content_type, data, reply_id, None).await
    }

    /// Fire-and-forget send with an ignorable completion channel
    pub fn send_detached(
        &self,
        chat_id: &str,
        content_type: ContentType,
        data: MessageData,
        reply_id: Option<String>,
    ) -> tokio::sync::oneshot::Receiver<SendOutcome> {
        router::send_detached(&self.ctx, chat_id, content_type, data, reply_id)
    }

    /// Retry a persisted message by id
    pub async fn retry(&self, chat_id: &str, message_id: &str) -> bool {
        router::retry(&self.ctx, chat_id, message_id).await
    }

    /// Drain the journal (user action or connectivity-restored signal)
    pub async fn drain_journal(&self) -> Result<()> {
        router::drain_journal(&self.ctx).await
    }

    /// Consume a scanned bundle
    pub async fn accept_bundle(&self, raw: &str) -> Result<BundleReadOutcome> {
        self.handshake.accept_bundle(raw).await
    }

    /// Handle a deep link; non-connect links resolve to `None`
    pub async fn handle_connect_link(&self, url: &str) -> Result<Option<BundleReadOutcome>> {
        self.handshake.handle_connect_link(url).await
    }

    /// Process-start sweep: drain the journal, retry parked bundles and
    /// purge expired disappearing messages
    pub async fn on_start(&self) {
        if let Err(e) = router::drain_journal(&self.ctx).await {
            warn!("Startup journal drain failed: {}", e);
        }
        if let Err(e) = self.handshake.retry_pending_bundles().await {
            warn!("Startup bundle retry failed: {}", e);
        }
        match self.ctx.messages.delete_expired(chrono::Utc::now()).await {
            Ok(0) => {}
            Ok(purged) => tracing::info!("Purged {} expired messages", purged),
            Err(e) => warn!("Expired-message purge failed: {}", e),
        }
    }
}
