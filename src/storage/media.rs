//! Uploaded-media records
//!
//! Tracks every blob this device uploaded: the server-side media id, the
//! symmetric key protecting it, and where the plaintext lives locally.
//! Keys are generated fresh per upload and never reused.

use rusqlite::{params, Connection as SqlConnection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::{Error, Result};

/// One uploaded blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedMedia {
    /// Server-side media identifier
    pub media_id: String,
    /// Base64 symmetric key for the ciphertext
    pub key: String,
    /// Local plaintext path
    pub local_path: String,
    /// MIME type, when known
    pub content_type: Option<String>,
}

/// SQLite-backed uploaded-media store
#[derive(Clone)]
pub struct MediaStore {
    conn: Arc<Mutex<SqlConnection>>,
}

impl MediaStore {
    /// Open (or create) the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = SqlConnection::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open media db: {}", e)))?;
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
            "CREATE TABLE IF NOT EXISTS uploaded_media (
                media_id TEXT PRIMARY KEY,
                key TEXT NOT NULL,
                local_path TEXT NOT NULL,
                content_type TEXT
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Record an uploaded blob
    pub async fn save(&self, media: &UploadedMedia) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO uploaded_media (media_id, key, local_path, content_type)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                media.media_id,
                media.key,
                media.local_path,
                media.content_type
            ],
        )?;
        Ok(())
    }

    /// Fetch a record by media id
    pub async fn get(&self, media_id: &str) -> Result<Option<UploadedMedia>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT media_id, key, local_path, content_type
                 FROM uploaded_media WHERE media_id = ?1",
                params![media_id],
                |row| {
                    Ok(UploadedMedia {
                        media_id: row.get(0)?,
                        key: row.get(1)?,
                        local_path: row.get(2)?,
                        content_type: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Delete a record
    pub async fn delete(&self, media_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM uploaded_media WHERE media_id = ?1",
            params![media_id],
        )?;
        Ok(())
    }
}
