//! Handshake protocol
//!
//! Connections bootstrap from bundles. The issuer mints a bundle around a
//! single-use link id plus fresh handshake material; the reader consumes it,
//! creates the channel and pushes its identity; each side then completes
//! locally when the other side's identity push arrives. The two sides are
//! not required to complete in lockstep, and a reader that cannot reach the
//! server parks the bundle for a later retry instead of surfacing an error.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bundle::{check_bundle_data, format_connect_link, parse_connect_link, Bundle};
use crate::crypto::{random_nonce_hex, sha256_hex, KeyPair};
use crate::events::CoreEvent;
use crate::links::LinkPool;
use crate::message::{ContentType, MessageData};
use crate::router;
use crate::senders::SendContext;
use crate::storage::{BundleStore, ChatCrypto, Connection, ProfileStore};
use crate::storage::bundles::IssuedBundle;
use crate::{Error, Result};

/// How many recently consumed link ids the duplicate guard remembers
const DEDUP_HISTORY: usize = 16;

/// How reading a bundle resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleReadOutcome {
    /// Channel created; the connection exists (unauthenticated)
    Connected {
        /// The new chat's id
        chat_id: String,
    },
    /// Channel creation failed; the bundle is parked for a later retry
    Deferred,
    /// The same link was consumed moments ago; nothing was created
    Duplicate,
    /// The scanned data failed the schema check; the user may re-scan
    Malformed,
}

/// Rolling-window guard against duplicate link deliveries
///
/// Duplicate OS callbacks and re-taps arrive within moments of each other;
/// a short window over a small bounded history is enough, and the mutex
/// serializes concurrent link-open events around the check-and-insert.
struct DedupGuard {
    window: Duration,
    recent: Mutex<VecDeque<(String, Instant)>>,
}

impl DedupGuard {
    fn new(window: Duration) -> Self {
        Self {
            window,
            recent: Mutex::new(VecDeque::with_capacity(DEDUP_HISTORY)),
        }
    }

    /// True the first time a link id shows up inside the window
    async fn first_seen(&self, link_id: &str) -> bool {
        let mut recent = self.recent.lock().await;
        let now = Instant::now();

        recent.retain(|(_, seen)| now.duration_since(*seen) < self.window);
        if recent.iter().any(|(id, _)| id == link_id) {
            return false;
        }

        if recent.len() == DEDUP_HISTORY {
            recent.pop_front();
        }
        recent.push_back((link_id.to_string(), now));
        true
    }
}

/// Driver for both sides of the connection handshake
pub struct Handshake {
    ctx: SendContext,
    bundles: BundleStore,
    links: LinkPool,
    profile: ProfileStore,
    dedup: DedupGuard,
}

impl Handshake {
    /// Create a handshake driver
    pub fn new(
        ctx: SendContext,
        bundles: BundleStore,
        links: LinkPool,
        profile: ProfileStore,
        dedup_window_ms: u64,
    ) -> Self {
        Self {
            ctx,
            bundles,
            links,
            profile,
            dedup: DedupGuard::new(Duration::from_millis(dedup_window_ms)),
        }
    }

    // ========== Issuing side ==========

    /// Mint a new bundle around a freshly consumed link id
    ///
    /// The issued record keeps the keypair and nonce needed to finish the
    /// handshake when the peer's identity push arrives.
    pub async fn issue_bundle(&self, label: Option<String>) -> Result<Bundle> {
        let link_id = self.links.consume(self.ctx.api.as_ref()).await?;

        let keypair = KeyPair::generate();
        let nonce = random_nonce_hex();
        let pubkey_hash = sha256_hex(&keypair.public);

        self.bundles
            .save_issued(&IssuedBundle {
                link_id: link_id.clone(),
                label: label.clone(),
                nonce: nonce.clone(),
                keypair,
                created_at: chrono::Utc::now(),
            })
            .await?;

        info!("Issued bundle for link {}", link_id);
        Ok(Bundle::new_direct(
            link_id,
            label,
            Some(nonce),
            Some(pubkey_hash),
        ))
    }

    /// Publish a bundle and return its shareable connect link
    pub async fn share_link(&self, bundle: &Bundle) -> Result<String> {
        let bundle_id = self.ctx.api.post_bundle(&bundle.to_qr_string()?).await?;
        Ok(format_connect_link(&bundle_id))
    }

    // ========== Reading side ==========

    /// Consume scanned bundle data
    ///
    /// This is the public entry point for attacker-controlled input: schema
    /// violations resolve to [`BundleReadOutcome::Malformed`], duplicates
    /// inside the de-dup window to [`BundleReadOutcome::Duplicate`], and an
    /// unreachable server to [`BundleReadOutcome::Deferred`] with the raw
    /// bundle parked for retry. None of these raise an error.
    pub async fn accept_bundle(&self, raw: &str) -> Result<BundleReadOutcome> {
        let bundle = match check_bundle_data(raw) {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!("Rejected malformed bundle: {}", e);
                return Ok(BundleReadOutcome::Malformed);
            }
        };

        if !self.dedup.first_seen(bundle.link_id()).await {
            info!("Duplicate delivery of link {}; ignoring", bundle.link_id());
            return Ok(BundleReadOutcome::Duplicate);
        }

        match self.ctx.api.create_channel(bundle.link_id()).await {
            Ok(chat_id) => {
                self.connect_as_reader(&bundle, &chat_id).await?;
                Ok(BundleReadOutcome::Connected { chat_id })
            }
            Err(e) => {
                // Offline, link already consumed, or a server error: the UI
                // proceeds optimistically and the connection is back-filled
                // once a retry succeeds.
                warn!(
                    "Channel creation failed for link {}: {}; parking bundle",
                    bundle.link_id(),
                    e
                );
                self.bundles.push_pending(raw).await?;
                Ok(BundleReadOutcome::Deferred)
            }
        }
    }

    /// Resolve a connect deep link and consume the bundle behind it
    ///
    /// Returns `None` for URLs that are not connect links (in particular
    /// the share-intent scheme), which the caller simply ignores.
    pub async fn handle_connect_link(&self, url: &str) -> Result<Option<BundleReadOutcome>> {
        let Some(bundle_id) = parse_connect_link(url) else {
            debug!("Ignoring non-connect link");
            return Ok(None);
        };
        let raw = self.ctx.api.get_bundle(&bundle_id).await?;
        Ok(Some(self.accept_bundle(&raw).await?))
    }

    /// Retry bundles whose channel creation previously failed
    ///
    /// Stops at the first transport failure; the remaining bundles stay
    /// parked. Returns how many connections were formed.
    pub async fn retry_pending_bundles(&self) -> Result<usize> {
        let pending = self.bundles.pending().await?;
        let mut connected = 0;

        for (seq, raw) in pending {
            let bundle = match check_bundle_data(&raw) {
                Ok(bundle) => bundle,
                Err(e) => {
                    warn!("Dropping malformed parked bundle: {}", e);
                    self.bundles.remove_pending(seq).await?;
                    continue;
                }
            };

            match self.ctx.api.create_channel(bundle.link_id()).await {
                Ok(chat_id) => {
                    self.connect_as_reader(&bundle, &chat_id).await?;
                    self.bundles.remove_pending(seq).await?;
                    connected += 1;
                }
                Err(e) => {
                    debug!("Parked bundle still unreachable: {}", e);
                    break;
                }
            }
        }

        Ok(connected)
    }

    async fn connect_as_reader(&self, bundle: &Bundle, chat_id: &str) -> Result<()> {
        let keypair = KeyPair::generate();
        let pubkey_hex = hex::encode(keypair.public);

        let name = bundle.bundles.label.clone().unwrap_or_default();
        self.ctx
            .connections
            .add(&Connection::new_direct(chat_id.to_string(), name))
            .await?;

        self.ctx
            .chat_crypto
            .save(
                chat_id,
                &ChatCrypto {
                    nonce: bundle.bundles.data.nonce.clone(),
                    pubkey_hash: bundle.bundles.data.pubkey_hash.clone(),
                    keypair: Some(keypair),
                    peer_pubkey: None,
                    shared_secret: None,
                },
            )
            .await?;

        self.ctx.events.publish(CoreEvent::NewConnection {
            chat_id: chat_id.to_string(),
        });

        // First identity message rides out as a detached send; completion
        // is observable but ignorable.
        let profile = self.profile.require().await?;
        let _ = router::send_detached(
            &self.ctx,
            chat_id,
            ContentType::Name,
            MessageData::Name {
                name: profile.nickname,
                pubkey: Some(pubkey_hex),
            },
            None,
        );

        info!("Connection {} created from bundle (unauthenticated)", chat_id);
        Ok(())
    }

    // ========== Completion (both sides) ==========

    /// React to a peer's identity push
    ///
    /// Dispatches on whatever state exists locally: a matching issued
    /// bundle completes the issuing side, a chat awaiting its peer key
    /// completes the reading side, and anything else is a plain display
    /// name update.
    pub async fn handle_identity_push(
        &self,
        chat_id: &str,
        link_id: Option<&str>,
        name: &str,
        pubkey_hex: Option<&str>,
    ) -> Result<()> {
        if let Some(link_id) = link_id {
            if self.bundles.get_issued(link_id).await?.is_some() {
                let pubkey_hex = pubkey_hex.ok_or_else(|| {
                    Error::MalformedBundle("identity push without a public key".to_string())
                })?;
                return self
                    .complete_as_issuer(chat_id, link_id, name, pubkey_hex)
                    .await;
            }
        }

        let awaiting_peer = self
            .ctx
            .chat_crypto
            .get(chat_id)
            .await?
            .map(|c| c.shared_secret.is_none() && c.keypair.is_some())
            .unwrap_or(false);

        if awaiting_peer {
            if let Some(pubkey_hex) = pubkey_hex {
                return self.complete_as_reader(chat_id, name, pubkey_hex).await;
            }
        }

        if !name.is_empty() {
            self.ctx.connections.set_name(chat_id, name).await?;
            self.ctx.events.publish(CoreEvent::ConnectionUpdated {
                chat_id: chat_id.to_string(),
            });
        }
        Ok(())
    }

    /// Issuing side: the peer consumed our bundle and pushed its identity
    async fn complete_as_issuer(
        &self,
        chat_id: &str,
        link_id: &str,
        peer_name: &str,
        peer_pubkey_hex: &str,
    ) -> Result<()> {
        let Some(issued) = self.bundles.get_issued(link_id).await? else {
            return Err(Error::NotFound(format!("issued bundle {}", link_id)));
        };

        let peer_pubkey = decode_pubkey(peer_pubkey_hex)?;
        let shared_secret = issued.keypair.derive_shared_secret(&peer_pubkey);

        let name = if peer_name.is_empty() {
            issued.label.clone().unwrap_or_default()
        } else {
            peer_name.to_string()
        };

        let mut connection = Connection::new_direct(chat_id.to_string(), name);
        connection.authenticated = true;
        self.ctx.connections.add(&connection).await?;

        self.ctx
            .chat_crypto
            .save(
                chat_id,
                &ChatCrypto {
                    nonce: Some(issued.nonce.clone()),
                    pubkey_hash: None,
                    keypair: Some(issued.keypair.clone()),
                    peer_pubkey: Some(peer_pubkey),
                    shared_secret: Some(shared_secret),
                },
            )
            .await?;

        self.bundles.delete_issued(link_id).await?;
        self.ctx.events.publish(CoreEvent::NewConnection {
            chat_id: chat_id.to_string(),
        });

        // Our own identity goes back over the now-secret channel.
        let profile = self.profile.require().await?;
        let own_pubkey = hex::encode(issued.keypair.public);
        let _ = router::send_detached(
            &self.ctx,
            chat_id,
            ContentType::Name,
            MessageData::Name {
                name: profile.nickname,
                pubkey: Some(own_pubkey),
            },
            None,
        );

        info!("Issuer side of handshake complete for chat {}", chat_id);
        Ok(())
    }

    /// Reading side: the issuer's identity push closes the loop
    async fn complete_as_reader(
        &self,
        chat_id: &str,
        peer_name: &str,
        peer_pubkey_hex: &str,
    ) -> Result<()> {
        let Some(crypto) = self.ctx.chat_crypto.get(chat_id).await? else {
            return Err(Error::NotFound(format!("chat crypto for {}", chat_id)));
        };
        let Some(keypair) = crypto.keypair.clone() else {
            return Err(Error::AuthNotReady(format!(
                "chat {} has no handshake keypair",
                chat_id
            )));
        };

        let peer_pubkey = decode_pubkey(peer_pubkey_hex)?;

        // The bundle promised a specific issuer key; anything else tears
        // the connection down.
        if let Some(expected) = &crypto.pubkey_hash {
            let actual = sha256_hex(&peer_pubkey);
            if &actual != expected {
                warn!("Pubkey hash mismatch for chat {}; destroying", chat_id);
                self.destroy_connection(chat_id).await?;
                return Err(Error::Crypto("hash authentication failed".to_string()));
            }
        }

        let shared_secret = keypair.derive_shared_secret(&peer_pubkey);
        self.ctx
            .chat_crypto
            .save(
                chat_id,
                &ChatCrypto {
                    peer_pubkey: Some(peer_pubkey),
                    shared_secret: Some(shared_secret),
                    keypair: Some(keypair),
                    ..crypto
                },
            )
            .await?;

        self.ctx.connections.set_authenticated(chat_id, true).await?;
        if !peer_name.is_empty() {
            self.ctx.connections.set_name(chat_id, peer_name).await?;
        }
        self.ctx.events.publish(CoreEvent::ConnectionUpdated {
            chat_id: chat_id.to_string(),
        });

        info!("Reader side of handshake complete for chat {}", chat_id);
        Ok(())
    }

    async fn destroy_connection(&self, chat_id: &str) -> Result<()> {
        self.ctx.connections.delete(chat_id).await?;
        self.ctx.chat_crypto.delete(chat_id).await?;
        self.ctx.messages.delete_chat(chat_id).await?;
        Ok(())
    }
}

fn decode_pubkey(pubkey_hex: &str) -> Result<[u8; 32]> {
    let raw = hex::decode(pubkey_hex)
        .map_err(|e| Error::Crypto(format!("invalid public key encoding: {}", e)))?;
    raw.as_slice()
        .try_into()
        .map_err(|_| Error::Crypto(format!("invalid public key length: {}", raw.len())))
}
