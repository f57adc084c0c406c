//! Message history store
//!
//! Stores every message row plus the reaction rows attached to them. Status
//! columns only ever move along the sender state machine; the store refuses
//! an illegal transition instead of silently accepting it.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection as SqlConnection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::message::{ContentType, Message, MessageData, MessageStatus};
use crate::{Error, Result};

/// SQLite-backed message store
#[derive(Clone)]
pub struct MessageStore {
    conn: Arc<Mutex<SqlConnection>>,
}

impl MessageStore {
    /// Open (or create) the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = SqlConnection::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open messages db: {}", e)))?;
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
            "CREATE TABLE IF NOT EXISTS messages (
                chat_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                content_type TEXT NOT NULL,
                data TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                sender INTEGER NOT NULL,
                status TEXT NOT NULL,
                reply_id TEXT,
                expires_on TEXT,
                single_recipient TEXT,
                has_reactions INTEGER NOT NULL DEFAULT 0,
                receipt_pending INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (chat_id, message_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_chat_time
             ON messages(chat_id, timestamp)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS reactions (
                chat_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                sender TEXT NOT NULL,
                reaction TEXT NOT NULL,
                PRIMARY KEY (chat_id, message_id, sender)
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert or replace a message row
    pub async fn save(&self, message: &Message) -> Result<()> {
        let data = serde_json::to_string(&message.data)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO messages
             (chat_id, message_id, content_type, data, timestamp, sender, status,
              reply_id, expires_on, single_recipient, has_reactions, receipt_pending)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                message.chat_id,
                message.message_id,
                message.content_type.as_str(),
                data,
                message.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                message.sender as i32,
                message.status.as_str(),
                message.reply_id,
                message.expires_on.map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true)),
                message.single_recipient,
                message.has_reactions as i32,
                message.receipt_pending as i32,
            ],
        )?;
        Ok(())
    }

    /// Fetch a message
    pub async fn get(&self, chat_id: &str, message_id: &str) -> Result<Option<Message>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT chat_id, message_id, content_type, data, timestamp, sender, status,
                        reply_id, expires_on, single_recipient, has_reactions, receipt_pending
                 FROM messages WHERE chat_id = ?1 AND message_id = ?2",
                params![chat_id, message_id],
                Self::row_to_message,
            )
            .optional()?;
        Ok(row)
    }

    /// All messages of a chat, oldest first
    pub async fn messages_for_chat(&self, chat_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT chat_id, message_id, content_type, data, timestamp, sender, status,
                    reply_id, expires_on, single_recipient, has_reactions, receipt_pending
             FROM messages WHERE chat_id = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt
            .query_map(params![chat_id], Self::row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The chat's most recent message, if any
    pub async fn latest_message(&self, chat_id: &str) -> Result<Option<Message>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT chat_id, message_id, content_type, data, timestamp, sender, status,
                        reply_id, expires_on, single_recipient, has_reactions, receipt_pending
                 FROM messages WHERE chat_id = ?1 ORDER BY timestamp DESC LIMIT 1",
                params![chat_id],
                Self::row_to_message,
            )
            .optional()?;
        Ok(row)
    }

    /// Advance a message's delivery status
    ///
    /// The read and the conditional write happen under the store lock, so a
    /// concurrent retry cannot interleave an illegal step. Moving to the
    /// current status is accepted only where the state machine allows it
    /// (`Journaled → Journaled`).
    pub async fn update_status(
        &self,
        chat_id: &str,
        message_id: &str,
        new_status: MessageStatus,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM messages WHERE chat_id = ?1 AND message_id = ?2",
                params![chat_id, message_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(current) = current else {
            return Err(Error::NotFound(format!(
                "message {}/{}",
                chat_id, message_id
            )));
        };
        let current = MessageStatus::parse(&current)
            .ok_or_else(|| Error::Storage(format!("corrupt status column: {}", current)))?;

        if !MessageStatus::can_transition(current, new_status) {
            return Err(Error::Storage(format!(
                "illegal status transition {} -> {} for {}/{}",
                current.as_str(),
                new_status.as_str(),
                chat_id,
                message_id
            )));
        }

        conn.execute(
            "UPDATE messages SET status = ?3 WHERE chat_id = ?1 AND message_id = ?2",
            params![chat_id, message_id, new_status.as_str()],
        )?;
        Ok(())
    }

    /// Replace a message's data (e.g. after a media upload fills in mediaId/key)
    pub async fn update_data(
        &self,
        chat_id: &str,
        message_id: &str,
        data: &MessageData,
    ) -> Result<()> {
        let json = serde_json::to_string(data)?;
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE messages SET data = ?3 WHERE chat_id = ?1 AND message_id = ?2",
            params![chat_id, message_id, json],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!(
                "message {}/{}",
                chat_id, message_id
            )));
        }
        Ok(())
    }

    /// Remove a message row entirely (ephemeral variants after success)
    pub async fn delete_record(&self, chat_id: &str, message_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM messages WHERE chat_id = ?1 AND message_id = ?2",
            params![chat_id, message_id],
        )?;
        conn.execute(
            "DELETE FROM reactions WHERE chat_id = ?1 AND message_id = ?2",
            params![chat_id, message_id],
        )?;
        Ok(())
    }

    /// Replace a deleted message with its tombstone
    pub async fn tombstone(&self, chat_id: &str, message_id: &str) -> Result<()> {
        let data = serde_json::to_string(&MessageData::Info {
            info: "message deleted".to_string(),
        })?;
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE messages SET content_type = ?3, data = ?4, has_reactions = 0
             WHERE chat_id = ?1 AND message_id = ?2",
            params![chat_id, message_id, ContentType::Info.as_str(), data],
        )?;
        conn.execute(
            "DELETE FROM reactions WHERE chat_id = ?1 AND message_id = ?2",
            params![chat_id, message_id],
        )?;
        Ok(())
    }

    /// Flag that a message has (or no longer has) reactions
    pub async fn set_has_reactions(
        &self,
        chat_id: &str,
        message_id: &str,
        has_reactions: bool,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE messages SET has_reactions = ?3 WHERE chat_id = ?1 AND message_id = ?2",
            params![chat_id, message_id, has_reactions as i32],
        )?;
        Ok(())
    }

    /// Flag that a read receipt for this message still needs to go out
    pub async fn set_receipt_pending(
        &self,
        chat_id: &str,
        message_id: &str,
        pending: bool,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE messages SET receipt_pending = ?3 WHERE chat_id = ?1 AND message_id = ?2",
            params![chat_id, message_id, pending as i32],
        )?;
        Ok(())
    }

    /// Record a reaction from a sender, replacing their previous one
    pub async fn add_reaction(
        &self,
        chat_id: &str,
        message_id: &str,
        sender: &str,
        reaction: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO reactions (chat_id, message_id, sender, reaction)
             VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, message_id, sender, reaction],
        )?;
        Ok(())
    }

    /// Withdraw a sender's reaction
    pub async fn remove_reaction(
        &self,
        chat_id: &str,
        message_id: &str,
        sender: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM reactions WHERE chat_id = ?1 AND message_id = ?2 AND sender = ?3",
            params![chat_id, message_id, sender],
        )?;
        Ok(())
    }

    /// Reactions on a message as (sender, reaction) pairs
    pub async fn reactions(&self, chat_id: &str, message_id: &str) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT sender, reaction FROM reactions
             WHERE chat_id = ?1 AND message_id = ?2 ORDER BY sender",
        )?;
        let rows = stmt
            .query_map(params![chat_id, message_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Drop every expired disappearing message
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM messages WHERE expires_on IS NOT NULL AND expires_on < ?1",
            params![now.to_rfc3339_opts(SecondsFormat::Micros, true)],
        )?;
        Ok(deleted)
    }

    /// Remove all messages of a chat (chat deletion)
    pub async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat_id])?;
        conn.execute("DELETE FROM reactions WHERE chat_id = ?1", params![chat_id])?;
        Ok(())
    }

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
        let content_type: String = row.get(2)?;
        let data: String = row.get(3)?;
        let timestamp: String = row.get(4)?;
        let status: String = row.get(6)?;
        let expires_on: Option<String> = row.get(8)?;

        Ok(Message {
            chat_id: row.get(0)?,
            message_id: row.get(1)?,
            content_type: ContentType::parse(&content_type).unwrap_or(ContentType::Text),
            data: serde_json::from_str(&data).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            sender: row.get::<_, i32>(5)? != 0,
            status: MessageStatus::parse(&status).unwrap_or(MessageStatus::Failed),
            reply_id: row.get(7)?,
            expires_on: expires_on.and_then(|t| {
                DateTime::parse_from_rfc3339(&t)
                    .map(|t| t.with_timezone(&Utc))
                    .ok()
            }),
            single_recipient: row.get(9)?,
            has_reactions: row.get::<_, i32>(10)? != 0,
            receipt_pending: row.get::<_, i32>(11)? != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message(chat_id: &str, message_id: &str, status: MessageStatus) -> Message {
        Message {
            chat_id: chat_id.to_string(),
            message_id: message_id.to_string(),
            content_type: ContentType::Text,
            data: MessageData::Text {
                text: "hello".to_string(),
            },
            timestamp: Utc::now(),
            sender: true,
            status,
            reply_id: None,
            expires_on: None,
            single_recipient: None,
            has_reactions: false,
            receipt_pending: false,
        }
    }

    #[tokio::test]
    async fn test_save_and_get_roundtrip() {
        let store = MessageStore::open_in_memory().expect("Failed to open store");
        let message = text_message("chat1", "m1", MessageStatus::Journaled);

        store.save(&message).await.expect("Failed to save");

        let loaded = store
            .get("chat1", "m1")
            .await
            .expect("Failed to get")
            .expect("Message missing");
        assert_eq!(loaded.status, MessageStatus::Journaled);
        assert_eq!(
            loaded.data,
            MessageData::Text {
                text: "hello".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_legal_status_transition() {
        let store = MessageStore::open_in_memory().expect("Failed to open store");
        store
            .save(&text_message("chat1", "m1", MessageStatus::Journaled))
            .await
            .expect("Failed to save");

        store
            .update_status("chat1", "m1", MessageStatus::Sent)
            .await
            .expect("Transition should succeed");

        let loaded = store
            .get("chat1", "m1")
            .await
            .expect("Failed to get")
            .expect("Message missing");
        assert_eq!(loaded.status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn test_illegal_status_transition_refused() {
        let store = MessageStore::open_in_memory().expect("Failed to open store");
        store
            .save(&text_message("chat1", "m1", MessageStatus::Sent))
            .await
            .expect("Failed to save");

        let result = store.update_status("chat1", "m1", MessageStatus::Journaled).await;
        assert!(matches!(result, Err(Error::Storage(_))));

        let loaded = store
            .get("chat1", "m1")
            .await
            .expect("Failed to get")
            .expect("Message missing");
        assert_eq!(loaded.status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn test_update_status_missing_message() {
        let store = MessageStore::open_in_memory().expect("Failed to open store");
        let result = store.update_status("chat1", "ghost", MessageStatus::Sent).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_latest_message() {
        let store = MessageStore::open_in_memory().expect("Failed to open store");

        let mut first = text_message("chat1", "m1", MessageStatus::Sent);
        first.timestamp = Utc::now() - chrono::Duration::minutes(5);
        store.save(&first).await.expect("Failed to save");
        store
            .save(&text_message("chat1", "m2", MessageStatus::Sent))
            .await
            .expect("Failed to save");

        let latest = store
            .latest_message("chat1")
            .await
            .expect("Failed to query")
            .expect("No latest");
        assert_eq!(latest.message_id, "m2");
    }

    #[tokio::test]
    async fn test_reactions_add_remove() {
        let store = MessageStore::open_in_memory().expect("Failed to open store");
        store
            .save(&text_message("chat1", "m1", MessageStatus::Sent))
            .await
            .expect("Failed to save");

        store
            .add_reaction("chat1", "m1", "self", "🎉")
            .await
            .expect("Failed to add reaction");
        store
            .add_reaction("chat1", "m1", "self", "👍")
            .await
            .expect("Failed to replace reaction");

        let reactions = store.reactions("chat1", "m1").await.expect("Failed to list");
        assert_eq!(reactions, vec![("self".to_string(), "👍".to_string())]);

        store
            .remove_reaction("chat1", "m1", "self")
            .await
            .expect("Failed to remove");
        assert!(store
            .reactions("chat1", "m1")
            .await
            .expect("Failed to list")
            .is_empty());
    }

    #[tokio::test]
    async fn test_tombstone_replaces_data() {
        let store = MessageStore::open_in_memory().expect("Failed to open store");
        store
            .save(&text_message("chat1", "m1", MessageStatus::Sent))
            .await
            .expect("Failed to save");
        store
            .add_reaction("chat1", "m1", "peer", "🔥")
            .await
            .expect("Failed to add reaction");

        store.tombstone("chat1", "m1").await.expect("Failed to tombstone");

        let loaded = store
            .get("chat1", "m1")
            .await
            .expect("Failed to get")
            .expect("Message missing");
        assert_eq!(loaded.content_type, ContentType::Info);
        assert!(store
            .reactions("chat1", "m1")
            .await
            .expect("Failed to list")
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let store = MessageStore::open_in_memory().expect("Failed to open store");

        let mut expiring = text_message("chat1", "m1", MessageStatus::Sent);
        expiring.expires_on = Some(Utc::now() - chrono::Duration::minutes(1));
        store.save(&expiring).await.expect("Failed to save");
        store
            .save(&text_message("chat1", "m2", MessageStatus::Sent))
            .await
            .expect("Failed to save");

        let deleted = store.delete_expired(Utc::now()).await.expect("Failed to purge");
        assert_eq!(deleted, 1);
        assert!(store.get("chat1", "m1").await.expect("Failed to get").is_none());
        assert!(store.get("chat1", "m2").await.expect("Failed to get").is_some());
    }
}
