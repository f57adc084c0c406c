//! Per-chat cryptographic material
//!
//! One row per chat holding whatever handshake state exists so far: the
//! bundle's nonce and pubkey hash, our own keypair, the peer's public key
//! and the derived shared secret. Fields fill in as the handshake advances.

use rusqlite::{params, Connection as SqlConnection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::crypto::KeyPair;
use crate::{Error, Result};

/// Handshake/encryption state of one chat
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatCrypto {
    /// Handshake nonce from the bundle, hex encoded
    pub nonce: Option<String>,
    /// SHA-256 of the issuer's public key, hex encoded
    pub pubkey_hash: Option<String>,
    /// Our handshake keypair for this chat
    pub keypair: Option<KeyPair>,
    /// The peer's public key
    pub peer_pubkey: Option<[u8; 32]>,
    /// Derived shared secret; present once the handshake completed
    pub shared_secret: Option<[u8; 32]>,
}

/// SQLite-backed chat crypto store
#[derive(Clone)]
pub struct ChatCryptoStore {
    conn: Arc<Mutex<SqlConnection>>,
}

impl ChatCryptoStore {
    /// Open (or create) the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = SqlConnection::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open chat crypto db: {}", e)))?;
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
            "CREATE TABLE IF NOT EXISTS chat_crypto (
                chat_id TEXT PRIMARY KEY,
                crypto TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Store the full crypto record for a chat
    pub async fn save(&self, chat_id: &str, crypto: &ChatCrypto) -> Result<()> {
        let json = serde_json::to_string(crypto)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO chat_crypto (chat_id, crypto) VALUES (?1, ?2)",
            params![chat_id, json],
        )?;
        Ok(())
    }

    /// Fetch a chat's crypto record
    pub async fn get(&self, chat_id: &str) -> Result<Option<ChatCrypto>> {
        let conn = self.conn.lock().await;
        let row: Option<String> = conn
            .query_row(
                "SELECT crypto FROM chat_crypto WHERE chat_id = ?1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()?;

        match row {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// The chat's shared secret, or [`Error::AuthNotReady`]
    pub async fn require_secret(&self, chat_id: &str) -> Result<[u8; 32]> {
        self.get(chat_id)
            .await?
            .and_then(|crypto| crypto.shared_secret)
            .ok_or_else(|| Error::AuthNotReady(format!("no shared secret for chat {}", chat_id)))
    }

    /// Delete a chat's crypto record (connection destroyed)
    pub async fn delete(&self, chat_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM chat_crypto WHERE chat_id = ?1",
            params![chat_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_get_roundtrip() {
        let store = ChatCryptoStore::open_in_memory().expect("Failed to open store");
        let crypto = ChatCrypto {
            nonce: Some("aabb".to_string()),
            pubkey_hash: Some("ccdd".to_string()),
            keypair: Some(KeyPair::generate()),
            peer_pubkey: None,
            shared_secret: None,
        };

        store.save("chat1", &crypto).await.expect("Failed to save");
        let loaded = store
            .get("chat1")
            .await
            .expect("Failed to get")
            .expect("Record missing");
        assert_eq!(loaded.nonce.as_deref(), Some("aabb"));
        assert!(loaded.shared_secret.is_none());
    }

    #[tokio::test]
    async fn test_require_secret_before_handshake() {
        let store = ChatCryptoStore::open_in_memory().expect("Failed to open store");
        store
            .save("chat1", &ChatCrypto::default())
            .await
            .expect("Failed to save");

        assert!(matches!(
            store.require_secret("chat1").await,
            Err(Error::AuthNotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_require_secret_after_handshake() {
        let store = ChatCryptoStore::open_in_memory().expect("Failed to open store");
        let crypto = ChatCrypto {
            shared_secret: Some([3u8; 32]),
            ..Default::default()
        };
        store.save("chat1", &crypto).await.expect("Failed to save");

        let secret = store.require_secret("chat1").await.expect("Secret missing");
        assert_eq!(secret, [3u8; 32]);
    }
}
