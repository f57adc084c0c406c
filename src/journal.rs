//! Message journal
//!
//! The persisted queue of messages accepted for sending but not yet
//! confirmed delivered. Entries are `{message, destination}` pairs that can
//! resume a send across a process restart without any in-memory state.
//! Ordering is insertion order and survives a partial drain: when entry *i*
//! fails, entries *i..n* are written back unchanged.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::message::Message;
use crate::{Error, Result};

/// One journaled send
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    /// The message to (re)send
    pub message: Message,
    /// Destination chat id
    pub destination: String,
}

/// Persisted, ordered journal of unconfirmed sends
#[derive(Clone)]
pub struct Journal {
    conn: Arc<Mutex<Connection>>,
}

impl Journal {
    /// Create a journal with a file-based database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open journal db: {}", e)))?;
        Self::with_connection(conn)
    }

    /// Create a journal with an in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory db: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS journal (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                destination TEXT NOT NULL,
                entry TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_journal_message
             ON journal(chat_id, message_id)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Append an entry; re-appending the same message is a no-op so a
    /// message never occupies two journal slots
    pub async fn append(&self, entry: &JournalEntry) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO journal (chat_id, message_id, destination, entry)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.message.chat_id,
                entry.message.message_id,
                entry.destination,
                json
            ],
        )?;
        if inserted == 0 {
            tracing::debug!(
                "Message {}/{} already journaled",
                entry.message.chat_id,
                entry.message.message_id
            );
        }
        Ok(())
    }

    /// All entries in order
    pub async fn entries(&self) -> Result<Vec<JournalEntry>> {
        let conn = self.conn.lock().await;
        Self::read_all(&conn)
    }

    /// Snapshot all entries and clear the journal in one step
    ///
    /// The drain loop works off the snapshot and writes the unsent suffix
    /// back via [`Journal::restore`].
    pub async fn take_all(&self) -> Result<Vec<JournalEntry>> {
        let conn = self.conn.lock().await;
        let entries = Self::read_all(&conn)?;
        conn.execute("DELETE FROM journal", [])?;
        Ok(entries)
    }

    /// Write entries back, preserving their relative order
    pub async fn restore(&self, entries: &[JournalEntry]) -> Result<()> {
        let conn = self.conn.lock().await;
        for entry in entries {
            let json = serde_json::to_string(entry)?;
            conn.execute(
                "INSERT OR IGNORE INTO journal (chat_id, message_id, destination, entry)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.message.chat_id,
                    entry.message.message_id,
                    entry.destination,
                    json
                ],
            )?;
        }
        Ok(())
    }

    /// Remove one message's entry (send confirmed)
    pub async fn remove(&self, chat_id: &str, message_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM journal WHERE chat_id = ?1 AND message_id = ?2",
            params![chat_id, message_id],
        )?;
        Ok(())
    }

    /// Whether a message currently sits in the journal
    pub async fn contains(&self, chat_id: &str, message_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM journal WHERE chat_id = ?1 AND message_id = ?2",
            params![chat_id, message_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Number of journaled entries
    pub async fn len(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: usize = conn.query_row("SELECT COUNT(*) FROM journal", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Whether the journal is empty
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    fn read_all(conn: &Connection) -> Result<Vec<JournalEntry>> {
        let mut stmt = conn.prepare("SELECT entry FROM journal ORDER BY seq ASC")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for json in rows {
            entries.push(serde_json::from_str(&json)?);
        }
        Ok(entries)
    }
}
