//! Cryptographic operations module
//!
//! The delivery core treats cryptography as a capability: everything that
//! needs to encrypt, decrypt or derive secrets goes through the
//! [`CryptoProvider`] trait, and [`CryptoDriver`] is the default
//! implementation on top of XChaCha20-Poly1305 and X25519. Key generation,
//! AEAD sealing and shared-secret derivation all live here; nothing outside
//! this module touches cipher primitives directly.

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use ring::digest::{Context, SHA256};
use serde::{Deserialize, Serialize};

/// Encrypted envelope containing ciphertext, nonce, and authentication tag
///
/// AEAD output of XChaCha20-Poly1305; the 16-byte Poly1305 tag is embedded
/// at the end of the ciphertext by the cipher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// 24-byte nonce for XChaCha20-Poly1305
    pub nonce: [u8; 24],
    /// Encrypted data + 16-byte Poly1305 authentication tag (appended)
    pub ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Encode the envelope as base64 of `nonce || ciphertext` for embedding
    /// in JSON payloads
    pub fn encode(&self) -> String {
        let mut buf = Vec::with_capacity(24 + self.ciphertext.len());
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.ciphertext);
        STANDARD.encode(buf)
    }

    /// Decode an envelope previously produced by [`EncryptedEnvelope::encode`]
    pub fn decode(encoded: &str) -> Result<Self> {
        let buf = STANDARD
            .decode(encoded)
            .map_err(|e| Error::Crypto(format!("Invalid envelope encoding: {}", e)))?;
        if buf.len() < 24 + 16 {
            return Err(Error::Crypto(format!(
                "Envelope too short: {} bytes",
                buf.len()
            )));
        }
        let mut nonce = [0u8; 24];
        nonce.copy_from_slice(&buf[..24]);
        Ok(Self {
            nonce,
            ciphertext: buf[24..].to_vec(),
        })
    }
}

/// An X25519 key pair used for the connection handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    /// X25519 public key
    pub public: [u8; 32],
    /// X25519 secret key (keep out of logs)
    pub(crate) secret: [u8; 32],
}

impl KeyPair {
    /// Generate a new X25519 key pair
    pub fn generate() -> Self {
        use rand::rngs::OsRng;
        use rand::RngCore;

        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        let public = x25519_dalek::x25519(secret, x25519_dalek::X25519_BASEPOINT_BYTES);

        Self { public, secret }
    }

    /// Derive a shared secret with a remote peer's public key
    pub fn derive_shared_secret(&self, remote_public: &[u8; 32]) -> [u8; 32] {
        derive_shared_secret(&self.secret, remote_public)
    }
}

/// Derive a shared secret using X25519 ECDH
///
/// The x25519 function performs the scalar multiplication with proper
/// clamping; the result feeds the AEAD cipher directly.
pub fn derive_shared_secret(local_priv: &[u8; 32], remote_pub: &[u8; 32]) -> [u8; 32] {
    x25519_dalek::x25519(*local_priv, *remote_pub)
}

/// SHA-256 digest of arbitrary bytes, hex encoded
///
/// Used for the public-key hash carried in connection bundles.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    hex::encode(digest.as_ref())
}

/// Generate a random 32-byte value, hex encoded
///
/// Used for handshake nonces.
pub fn random_nonce_hex() -> String {
    use rand::rngs::OsRng;
    use rand::RngCore;

    let mut buf = [0u8; 32];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Capability trait for symmetric encryption consumed by the delivery core
///
/// Senders, media transfer and the token lifecycle are written against this
/// trait so tests can substitute a transparent implementation.
pub trait CryptoProvider: Send + Sync {
    /// Generate a fresh 32-byte symmetric key
    fn random_key(&self) -> [u8; 32];

    /// Encrypt plaintext under the given key
    fn seal(&self, key: &[u8; 32], plaintext: &[u8]) -> Result<EncryptedEnvelope>;

    /// Decrypt an envelope under the given key, verifying the auth tag
    fn open(&self, key: &[u8; 32], envelope: &EncryptedEnvelope) -> Result<Vec<u8>>;
}

/// Default [`CryptoProvider`] backed by XChaCha20-Poly1305
#[derive(Debug, Clone, Default)]
pub struct CryptoDriver;

impl CryptoProvider for CryptoDriver {
    fn random_key(&self) -> [u8; 32] {
        use rand::rngs::OsRng;
        use rand::RngCore;

        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    fn seal(&self, key: &[u8; 32], plaintext: &[u8]) -> Result<EncryptedEnvelope> {
        use rand::rngs::OsRng;
        use rand::RngCore;

        let cipher = XChaCha20Poly1305::new(key.into());

        let mut nonce_bytes = [0u8; 24];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from(nonce_bytes);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

        Ok(EncryptedEnvelope {
            nonce: nonce_bytes,
            ciphertext,
        })
    }

    fn open(&self, key: &[u8; 32], envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
        let cipher = XChaCha20Poly1305::new(key.into());
        let nonce = XNonce::from(envelope.nonce);

        cipher
            .decrypt(&nonce, envelope.ciphertext.as_ref())
            .map_err(|e| {
                Error::Crypto(format!(
                    "Decryption failed (auth tag mismatch or corrupted data): {}",
                    e
                ))
            })
    }
}
