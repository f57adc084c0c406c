//! Linkline - delivery core for an end-to-end-encrypted P2P messaging client
//!
//! This library implements the delivery layer of Linkline: reliable message
//! transmission with offline journaling and retry, large-media transfer, and
//! connection establishment via scanned or shared bundles (QR codes / links).
//! Rendering, notifications and the low-level transport live in the embedding
//! application; this crate talks to them through capability traits.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod auth;
pub mod bundle;
pub mod client;
pub mod config;
pub mod crypto;
pub mod events;
pub mod handshake;
pub mod journal;
pub mod links;
pub mod media;
pub mod message;
pub mod router;
pub mod senders;
pub mod storage;

#[cfg(test)]
mod tests;

/// Result type alias for Linkline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Linkline operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Message failed its pre-send checks; the attempt is aborted and the
    /// message is never persisted or journaled
    #[error("Validation error: {0}")]
    Validation(String),

    /// The network call failed; recoverable by journaling where the message
    /// kind allows it
    #[error("Transport error: {0}")]
    Transport(String),

    /// The chat has not completed its handshake yet; the send is deferred
    #[error("Authentication not ready: {0}")]
    AuthNotReady(String),

    /// Scanned bundle data did not match the expected schema
    #[error("Malformed bundle: {0}")]
    MalformedBundle(String),

    /// A record vanished mid-operation (e.g. chat deleted concurrently)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Cryptographic operation error; never retried
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Storage operation error
    #[error("Storage error: {0}")]
    Storage(String),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Initialize the Linkline library with logging
pub fn init() {
    tracing_subscriber::fmt::init();
}
