//! Single-use connection identifier pool
//!
//! Bundles must be mintable while offline, so the crate keeps a local cache
//! of server-issued link ids and replenishes it opportunistically: consume
//! from the cache first, then top up once the cache falls to the floor. A
//! failed top-up never costs the caller the identifier that was already
//! popped. Only a cold start with an empty cache has to wait on the server.

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::api::ServerApi;
use crate::{Error, Result};

/// Cached pool of single-use link ids
#[derive(Clone)]
pub struct LinkPool {
    conn: Arc<Mutex<Connection>>,
    floor: usize,
    batch: usize,
}

impl LinkPool {
    /// Open (or create) the pool at the given path
    pub fn open<P: AsRef<Path>>(path: P, floor: usize, batch: usize) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open link pool db: {}", e)))?;
        Self::with_connection(conn, floor, batch)
    }

    /// In-memory pool for tests
    pub fn open_in_memory(floor: usize, batch: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory db: {}", e)))?;
        Self::with_connection(conn, floor, batch)
    }

    fn with_connection(conn: Connection, floor: usize, batch: usize) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS link_cache (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                link_id TEXT NOT NULL UNIQUE
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            floor,
            batch,
        })
    }

    /// Consume one identifier
    ///
    /// Pops from the cache, then replenishes if the remainder is at or
    /// below the floor. Replenishment failure only logs; the popped id is
    /// returned regardless. An empty cache (cold start) fetches before
    /// popping, and that fetch failing is the only error path.
    pub async fn consume(&self, api: &dyn ServerApi) -> Result<String> {
        let conn = self.conn.lock().await;

        let mut popped = Self::pop_front(&conn)?;
        if popped.is_none() {
            info!("Link cache empty, fetching initial batch");
            let fresh = api.issue_link_batch(self.batch).await?;
            Self::insert_batch(&conn, &fresh)?;
            popped = Self::pop_front(&conn)?;
        }

        let link_id = popped
            .ok_or_else(|| Error::Storage("link pool empty after replenish".to_string()))?;

        if Self::count(&conn)? <= self.floor {
            match api.issue_link_batch(self.batch).await {
                Ok(fresh) => {
                    Self::insert_batch(&conn, &fresh)?;
                    info!("Link cache replenished with {} ids", fresh.len());
                }
                Err(e) => {
                    // The popped id is already ours; top-up can wait.
                    warn!("Link cache replenishment failed: {}", e);
                }
            }
        }

        Ok(link_id)
    }

    /// Number of cached identifiers
    pub async fn len(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        Self::count(&conn)
    }

    /// Whether the cache is empty
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Seed identifiers directly (tests and migrations)
    pub async fn add_links(&self, links: &[String]) -> Result<()> {
        let conn = self.conn.lock().await;
        Self::insert_batch(&conn, links)
    }

    fn pop_front(conn: &Connection) -> Result<Option<String>> {
        use rusqlite::OptionalExtension;

        let front: Option<(i64, String)> = conn
            .query_row(
                "SELECT seq, link_id FROM link_cache ORDER BY seq ASC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match front {
            Some((seq, link_id)) => {
                conn.execute("DELETE FROM link_cache WHERE seq = ?1", params![seq])?;
                Ok(Some(link_id))
            }
            None => Ok(None),
        }
    }

    fn insert_batch(conn: &Connection, links: &[String]) -> Result<()> {
        for link in links {
            conn.execute(
                "INSERT OR IGNORE INTO link_cache (link_id) VALUES (?1)",
                params![link],
            )?;
        }
        Ok(())
    }

    fn count(conn: &Connection) -> Result<usize> {
        let count: usize = conn.query_row("SELECT COUNT(*) FROM link_cache", [], |row| row.get(0))?;
        Ok(count)
    }
}
