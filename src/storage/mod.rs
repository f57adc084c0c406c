//! Local storage module
//!
//! Persistent stores consumed by the delivery core, one SQLite-backed
//! handle per logical store. Every handle serializes its read-modify-write
//! cycles behind its own async mutex, so concurrent senders, the journal
//! drain and handshake completion cannot lose updates to each other.
//!
//! - `connections` - per-chat summary rows
//! - `messages` - message history and reactions
//! - `profile` - the local user's identity row
//! - `chat_crypto` - per-chat handshake/encryption material
//! - `bundles` - pending (read) and issued (generated) bundles
//! - `media` - uploaded-media records

pub mod bundles;
pub mod chat_crypto;
pub mod connections;
pub mod media;
pub mod messages;
pub mod profile;

pub use bundles::BundleStore;
pub use chat_crypto::{ChatCrypto, ChatCryptoStore};
pub use connections::{ChatType, Connection, ConnectionStore, PreviewStatus, PreviewUpdate};
pub use media::{MediaStore, UploadedMedia};
pub use messages::MessageStore;
pub use profile::{Profile, ProfileStore};
