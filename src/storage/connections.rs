//! Connection summary store
//!
//! One row per chat: the preview line the chat list renders, plus the
//! handshake flags the senders consult. Rows are created exclusively by the
//! handshake protocol and mutated by senders after a transmit attempt
//! resolves.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection as SqlConnection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::message::ContentType;
use crate::{Error, Result};

/// Whether a chat is a direct line or a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    /// One-to-one chat
    Direct,
    /// Group chat
    Group,
}

impl ChatType {
    fn as_str(self) -> &'static str {
        match self {
            ChatType::Direct => "direct",
            ChatType::Group => "group",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(ChatType::Direct),
            "group" => Some(ChatType::Group),
            _ => None,
        }
    }
}

/// Read status shown next to a connection's preview line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewStatus {
    /// Fresh connection, nothing sent yet
    New,
    /// Latest message was delivered
    Sent,
    /// Latest message is waiting in the journal
    Journaled,
    /// Latest message failed
    Failed,
}

impl PreviewStatus {
    fn as_str(self) -> &'static str {
        match self {
            PreviewStatus::New => "new",
            PreviewStatus::Sent => "sent",
            PreviewStatus::Journaled => "journaled",
            PreviewStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(PreviewStatus::New),
            "sent" => Some(PreviewStatus::Sent),
            "journaled" => Some(PreviewStatus::Journaled),
            "failed" => Some(PreviewStatus::Failed),
            _ => None,
        }
    }
}

/// Per-chat summary row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Chat identifier (the channel id returned by the server)
    pub chat_id: String,
    /// Direct or group
    pub chat_type: ChatType,
    /// Display name of the peer or group
    pub name: String,
    /// Preview line for the chat list
    pub preview_text: String,
    /// Status indicator next to the preview
    pub preview_status: PreviewStatus,
    /// Content type of the most recent message
    pub recent_content_type: ContentType,
    /// Whether the handshake has completed
    pub authenticated: bool,
    /// Transport session identifier, when one exists
    pub session_id: Option<String>,
    /// Whether the peer has disconnected this chat
    pub disconnected: bool,
    /// Last activity time; drives chat list ordering
    pub timestamp: DateTime<Utc>,
    /// Unread message counter
    pub new_message_count: u32,
    /// Disappearing-messages timer; None disables expiry stamping
    pub disappear_after_secs: Option<i64>,
}

impl Connection {
    /// A fresh, unauthenticated connection as the handshake creates it
    pub fn new_direct(chat_id: String, name: String) -> Self {
        Self {
            chat_id,
            chat_type: ChatType::Direct,
            name,
            preview_text: String::new(),
            preview_status: PreviewStatus::New,
            recent_content_type: ContentType::NewChat,
            authenticated: false,
            session_id: None,
            disconnected: false,
            timestamp: Utc::now(),
            new_message_count: 0,
            disappear_after_secs: None,
        }
    }
}

/// Preview update applied after a transmit attempt resolves
#[derive(Debug, Clone)]
pub struct PreviewUpdate {
    /// Chat to update
    pub chat_id: String,
    /// New preview line
    pub text: String,
    /// New status indicator
    pub status: PreviewStatus,
    /// Content type of the message driving the update
    pub content_type: ContentType,
}

/// SQLite-backed connection store
#[derive(Clone)]
pub struct ConnectionStore {
    conn: Arc<Mutex<SqlConnection>>,
}

impl ConnectionStore {
    /// Open (or create) the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = SqlConnection::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open connections db: {}", e)))?;
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
            "CREATE TABLE IF NOT EXISTS connections (
                chat_id TEXT PRIMARY KEY,
                chat_type TEXT NOT NULL,
                name TEXT NOT NULL,
                preview_text TEXT NOT NULL,
                preview_status TEXT NOT NULL,
                recent_content_type TEXT NOT NULL,
                authenticated INTEGER NOT NULL,
                session_id TEXT,
                disconnected INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                new_message_count INTEGER NOT NULL,
                disappear_after_secs INTEGER
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert or replace a connection row
    pub async fn add(&self, connection: &Connection) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO connections
             (chat_id, chat_type, name, preview_text, preview_status, recent_content_type,
              authenticated, session_id, disconnected, timestamp, new_message_count,
              disappear_after_secs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                connection.chat_id,
                connection.chat_type.as_str(),
                connection.name,
                connection.preview_text,
                connection.preview_status.as_str(),
                connection.recent_content_type.as_str(),
                connection.authenticated as i32,
                connection.session_id,
                connection.disconnected as i32,
                connection.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                connection.new_message_count,
                connection.disappear_after_secs,
            ],
        )?;
        Ok(())
    }

    /// Fetch a connection by chat id
    pub async fn get(&self, chat_id: &str) -> Result<Option<Connection>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT chat_id, chat_type, name, preview_text, preview_status,
                        recent_content_type, authenticated, session_id, disconnected,
                        timestamp, new_message_count, disappear_after_secs
                 FROM connections WHERE chat_id = ?1",
                params![chat_id],
                Self::row_to_connection,
            )
            .optional()?;
        Ok(row)
    }

    /// All connections, most recent activity first
    pub async fn list(&self) -> Result<Vec<Connection>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT chat_id, chat_type, name, preview_text, preview_status,
                    recent_content_type, authenticated, session_id, disconnected,
                    timestamp, new_message_count, disappear_after_secs
             FROM connections ORDER BY timestamp DESC",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_connection)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Apply a preview update after a transmit attempt; missing rows are a
    /// no-op because the chat may have been deleted concurrently
    pub async fn update_on_new_message(&self, update: &PreviewUpdate) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE connections
             SET preview_text = ?2, preview_status = ?3, recent_content_type = ?4,
                 timestamp = ?5
             WHERE chat_id = ?1",
            params![
                update.chat_id,
                update.text,
                update.status.as_str(),
                update.content_type.as_str(),
                Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        if changed == 0 {
            tracing::debug!("Preview update for missing chat {}", update.chat_id);
        }
        Ok(())
    }

    /// Toggle the authenticated flag once the handshake completes
    pub async fn set_authenticated(&self, chat_id: &str, authenticated: bool) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE connections SET authenticated = ?2 WHERE chat_id = ?1",
            params![chat_id, authenticated as i32],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("connection {}", chat_id)));
        }
        Ok(())
    }

    /// Mark a chat disconnected (peer deleted it)
    pub async fn set_disconnected(&self, chat_id: &str, disconnected: bool) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE connections SET disconnected = ?2 WHERE chat_id = ?1",
            params![chat_id, disconnected as i32],
        )?;
        Ok(())
    }

    /// Update the disappearing-messages timer
    pub async fn set_disappear_after(&self, chat_id: &str, secs: Option<i64>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE connections SET disappear_after_secs = ?2 WHERE chat_id = ?1",
            params![chat_id, secs],
        )?;
        Ok(())
    }

    /// Update the display name
    pub async fn set_name(&self, chat_id: &str, name: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE connections SET name = ?2 WHERE chat_id = ?1",
            params![chat_id, name],
        )?;
        Ok(())
    }

    /// Delete a connection row
    pub async fn delete(&self, chat_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM connections WHERE chat_id = ?1",
            params![chat_id],
        )?;
        Ok(())
    }

    fn row_to_connection(row: &rusqlite::Row) -> rusqlite::Result<Connection> {
        let chat_type: String = row.get(1)?;
        let preview_status: String = row.get(4)?;
        let recent: String = row.get(5)?;
        let timestamp: String = row.get(9)?;

        Ok(Connection {
            chat_id: row.get(0)?,
            chat_type: ChatType::parse(&chat_type).unwrap_or(ChatType::Direct),
            name: row.get(2)?,
            preview_text: row.get(3)?,
            preview_status: PreviewStatus::parse(&preview_status).unwrap_or(PreviewStatus::New),
            recent_content_type: ContentType::parse(&recent).unwrap_or(ContentType::NewChat),
            authenticated: row.get::<_, i32>(6)? != 0,
            session_id: row.get(7)?,
            disconnected: row.get::<_, i32>(8)? != 0,
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            new_message_count: row.get(10)?,
            disappear_after_secs: row.get(11)?,
        })
    }
}
