//! Bundle persistence
//!
//! Two tables: bundles we read but could not act on yet (channel creation
//! failed; retried later), and bundles we issued ourselves together with
//! the handshake material needed to complete the connection when the peer
//! shows up.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection as SqlConnection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::crypto::KeyPair;
use crate::{Error, Result};

/// A bundle we issued, with the material to finish the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedBundle {
    /// The link id baked into the bundle
    pub link_id: String,
    /// Label the user attached, used as the connection's initial name
    pub label: Option<String>,
    /// Handshake nonce, hex encoded
    pub nonce: String,
    /// Our handshake keypair for this bundle
    pub keypair: KeyPair,
    /// When the bundle was issued
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed store for pending (read) and issued bundles
#[derive(Clone)]
pub struct BundleStore {
    conn: Arc<Mutex<SqlConnection>>,
}

impl BundleStore {
    /// Open (or create) the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = SqlConnection::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open bundles db: {}", e)))?;
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
            "CREATE TABLE IF NOT EXISTS pending_bundles (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                raw TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS issued_bundles (
                link_id TEXT PRIMARY KEY,
                record TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ========== Pending (read) bundles ==========

    /// Queue a raw bundle whose channel creation failed
    pub async fn push_pending(&self, raw: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO pending_bundles (raw) VALUES (?1)",
            params![raw],
        )?;
        Ok(())
    }

    /// All pending bundles in insertion order, as (seq, raw) pairs
    pub async fn pending(&self) -> Result<Vec<(i64, String)>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT seq, raw FROM pending_bundles ORDER BY seq ASC")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Remove one pending bundle after it was consumed
    pub async fn remove_pending(&self, seq: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM pending_bundles WHERE seq = ?1", params![seq])?;
        Ok(())
    }

    // ========== Issued bundles ==========

    /// Store an issued bundle's handshake material
    pub async fn save_issued(&self, issued: &IssuedBundle) -> Result<()> {
        let json = serde_json::to_string(issued)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO issued_bundles (link_id, record) VALUES (?1, ?2)",
            params![issued.link_id, json],
        )?;
        Ok(())
    }

    /// Fetch an issued bundle by its link id
    pub async fn get_issued(&self, link_id: &str) -> Result<Option<IssuedBundle>> {
        let conn = self.conn.lock().await;
        let row: Option<String> = conn
            .query_row(
                "SELECT record FROM issued_bundles WHERE link_id = ?1",
                params![link_id],
                |row| row.get(0),
            )
            .optional()?;

        match row {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Delete an issued bundle once its connection formed
    pub async fn delete_issued(&self, link_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM issued_bundles WHERE link_id = ?1",
            params![link_id],
        )?;
        Ok(())
    }
}
