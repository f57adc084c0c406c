//! Local user profile store
//!
//! Single-row store for the device owner's identity: user id, nickname,
//! handshake keypair and the shared secret negotiated with the server for
//! token challenges.

use rusqlite::{params, Connection as SqlConnection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::crypto::KeyPair;
use crate::{Error, Result};

/// The local user's identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Server-assigned user identifier
    pub user_id: String,
    /// Display name sent in identity pushes
    pub nickname: String,
    /// X25519 keypair used for connection handshakes
    pub keypair: KeyPair,
    /// Server's public key, hex encoded, once received
    pub server_key: Option<String>,
    /// Shared secret with the server, used to solve token challenges
    pub shared_secret: Option<[u8; 32]>,
}

/// SQLite-backed profile store (single row)
#[derive(Clone)]
pub struct ProfileStore {
    conn: Arc<Mutex<SqlConnection>>,
}

impl ProfileStore {
    /// Open (or create) the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = SqlConnection::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open profile db: {}", e)))?;
        Self::with_connection(conn)
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = SqlConnection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory db: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: SqlConnection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS profile (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                profile TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Save (or replace) the profile
    pub async fn save(&self, profile: &Profile) -> Result<()> {
        let json = serde_json::to_string(profile)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO profile (id, profile) VALUES (1, ?1)",
            params![json],
        )?;
        Ok(())
    }

    /// Load the profile, if one has been created
    pub async fn load(&self) -> Result<Option<Profile>> {
        let conn = self.conn.lock().await;
        let row: Option<String> = conn
            .query_row("SELECT profile FROM profile WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match row {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Load the profile or fail with [`Error::NotFound`]
    pub async fn require(&self) -> Result<Profile> {
        self.load()
            .await?
            .ok_or_else(|| Error::NotFound("profile".to_string()))
    }

    /// Update just the nickname
    pub async fn set_nickname(&self, nickname: &str) -> Result<()> {
        let mut profile = self.require().await?;
        profile.nickname = nickname.to_string();
        self.save(&profile).await
    }
}
