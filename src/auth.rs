//! Server authentication token lifecycle
//!
//! Steps to authenticate to the relay server:
//! 1. fetch a challenge for our user id
//! 2. encrypt the challenge with the shared secret negotiated at signup
//! 3. post the ciphertext back; the server answers with a short-lived token
//!
//! The token is cached in memory and persisted, and regenerated through the
//! same challenge-response whenever it is absent or past its validity
//! window. The whole lifecycle sits behind one mutex so concurrent senders
//! cannot race duplicate challenge rounds.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::api::{AuthToken, ServerApi};
use crate::crypto::CryptoProvider;
use crate::storage::ProfileStore;
use crate::{Error, Result};

/// A token together with the moment it was issued
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedToken {
    token: AuthToken,
    timestamp: DateTime<Utc>,
}

struct Inner {
    conn: Connection,
    cache: Option<SavedToken>,
}

/// Cached, time-boxed authentication token
#[derive(Clone)]
pub struct TokenKeeper {
    inner: Arc<Mutex<Inner>>,
    validity: Duration,
    crypto: Arc<dyn CryptoProvider>,
    profile: ProfileStore,
}

impl TokenKeeper {
    /// Open (or create) the token cache at the given path
    pub fn open<P: AsRef<Path>>(
        path: P,
        validity_secs: i64,
        crypto: Arc<dyn CryptoProvider>,
        profile: ProfileStore,
    ) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open token db: {}", e)))?;
        Self::with_connection(conn, validity_secs, crypto, profile)
    }

    /// In-memory token cache for tests
    pub fn open_in_memory(
        validity_secs: i64,
        crypto: Arc<dyn CryptoProvider>,
        profile: ProfileStore,
    ) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory db: {}", e)))?;
        Self::with_connection(conn, validity_secs, crypto, profile)
    }

    fn with_connection(
        conn: Connection,
        validity_secs: i64,
        crypto: Arc<dyn CryptoProvider>,
        profile: ProfileStore,
    ) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_token (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                record TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner { conn, cache: None })),
            validity: Duration::seconds(validity_secs),
            crypto,
            profile,
        })
    }

    /// Return a valid token, regenerating via challenge-response if needed
    pub async fn get(&self, api: &dyn ServerApi) -> Result<AuthToken> {
        let mut inner = self.inner.lock().await;

        if let Some(saved) = &inner.cache {
            if self.is_current(saved) {
                return Ok(saved.token.clone());
            }
        }

        if let Some(saved) = Self::read_persisted(&inner.conn)? {
            if self.is_current(&saved) {
                debug!("Auth token restored from disk");
                let token = saved.token.clone();
                inner.cache = Some(saved);
                return Ok(token);
            }
        }

        let saved = self.regenerate(api).await?;
        Self::persist(&inner.conn, &saved)?;
        let token = saved.token.clone();
        inner.cache = Some(saved);
        Ok(token)
    }

    /// Drop cached and persisted token, forcing the next [`TokenKeeper::get`]
    /// to run the challenge flow
    pub async fn invalidate(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.cache = None;
        inner.conn.execute("DELETE FROM auth_token", [])?;
        Ok(())
    }

    fn is_current(&self, saved: &SavedToken) -> bool {
        Utc::now() - saved.timestamp <= self.validity
    }

    async fn regenerate(&self, api: &dyn ServerApi) -> Result<SavedToken> {
        let profile = self.profile.require().await?;
        let Some(shared_secret) = profile.shared_secret else {
            return Err(Error::AuthNotReady(
                "no shared secret provisioned for token challenges".to_string(),
            ));
        };

        info!("Auth token expired or absent, solving a fresh challenge");
        let challenge = api.get_challenge(&profile.user_id).await?;
        let envelope = self.crypto.seal(&shared_secret, challenge.as_bytes())?;
        let token = api
            .post_challenge_response(&profile.user_id, &envelope.encode())
            .await?;

        Ok(SavedToken {
            token,
            timestamp: Utc::now(),
        })
    }

    fn read_persisted(conn: &Connection) -> Result<Option<SavedToken>> {
        let row: Option<String> = conn
            .query_row("SELECT record FROM auth_token WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match row {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn persist(conn: &Connection, saved: &SavedToken) -> Result<()> {
        let json = serde_json::to_string(saved)?;
        conn.execute(
            "INSERT OR REPLACE INTO auth_token (id, record) VALUES (1, ?1)",
            params![json],
        )?;
        Ok(())
    }
}
