//! Server API capability
//!
//! The delivery core never talks HTTP directly; every network interaction
//! goes through the [`ServerApi`] trait. [`HttpApi`] is the production
//! implementation against the relay server, and tests substitute a
//! scriptable mock. All transport failures are mapped to
//! [`Error::Transport`] so senders can decide between journaling and
//! failing without inspecting HTTP details.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// A server-issued authentication token, opaque to this crate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken(pub String);

/// Where to put an encrypted media blob, and the id it will be known by
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadLocation {
    /// Pre-authorized upload URL
    pub url: String,
    /// Identifier the blob can later be fetched under
    pub media_id: String,
}

/// Network capabilities consumed by the delivery core
#[async_trait]
pub trait ServerApi: Send + Sync {
    /// Request a batch of fresh single-use connection identifiers
    async fn issue_link_batch(&self, count: usize) -> Result<Vec<String>>;

    /// Consume a link id, creating the underlying channel; returns the chat id
    async fn create_channel(&self, link_id: &str) -> Result<String>;

    /// Post an outgoing message payload to a destination chat
    async fn send_message(
        &self,
        token: &AuthToken,
        destination: &str,
        payload: serde_json::Value,
        is_group: bool,
        silent: bool,
    ) -> Result<()>;

    /// Request an upload location for a new media blob
    async fn upload_location(&self) -> Result<UploadLocation>;

    /// Resolve the download URL for an uploaded media blob
    async fn download_location(&self, media_id: &str) -> Result<String>;

    /// Upload ciphertext to a previously requested location
    async fn upload(&self, location: &UploadLocation, body: Bytes) -> Result<()>;

    /// Fetch ciphertext from a resolved download URL
    async fn download(&self, url: &str) -> Result<Bytes>;

    /// Publish a bundle, returning the opaque id used in connect links
    async fn post_bundle(&self, bundle_json: &str) -> Result<String>;

    /// Fetch a published bundle's raw JSON by id
    async fn get_bundle(&self, bundle_id: &str) -> Result<String>;

    /// Fetch an authentication challenge for the given user
    async fn get_challenge(&self, user_id: &str) -> Result<String>;

    /// Post the encrypted challenge, yielding a fresh token
    async fn post_challenge_response(&self, user_id: &str, cipher: &str) -> Result<AuthToken>;
}

/// HTTP implementation of [`ServerApi`] against the relay server
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct LinkBatchResponse {
    links: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateChannelResponse {
    chat_id: String,
}

#[derive(Deserialize)]
struct DownloadLocationResponse {
    url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostBundleResponse {
    bundle_id: String,
}

#[derive(Deserialize)]
struct ChallengeResponse {
    challenge: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

impl HttpApi {
    /// Create a new API client for the given base URL
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Error::Transport(format!(
                "Request failed with status {}",
                response.status()
            )))
        }
    }
}

#[async_trait]
impl ServerApi for HttpApi {
    async fn issue_link_batch(&self, count: usize) -> Result<Vec<String>> {
        debug!("Requesting batch of {} link ids", count);

        let response = self
            .client
            .post(self.url("/links"))
            .json(&serde_json::json!({ "count": count }))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Link batch request failed: {}", e)))?;

        let batch: LinkBatchResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Invalid link batch response: {}", e)))?;

        info!("Received {} fresh link ids", batch.links.len());
        Ok(batch.links)
    }

    async fn create_channel(&self, link_id: &str) -> Result<String> {
        info!("Creating channel from link id");

        let response = self
            .client
            .post(self.url("/channels"))
            .json(&serde_json::json!({ "linkId": link_id }))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Channel creation failed: {}", e)))?;

        let created: CreateChannelResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Invalid channel response: {}", e)))?;

        Ok(created.chat_id)
    }

    async fn send_message(
        &self,
        token: &AuthToken,
        destination: &str,
        payload: serde_json::Value,
        is_group: bool,
        silent: bool,
    ) -> Result<()> {
        let (path, body) = if is_group {
            (
                "/messages/group",
                serde_json::json!({
                    "type": "group",
                    "message": payload,
                    "chat": destination,
                    "silent": silent,
                }),
            )
        } else {
            (
                "/messages/direct",
                serde_json::json!({
                    "message": payload,
                    "line": destination,
                    "silent": silent,
                }),
            )
        };

        let response = self
            .client
            .post(self.url(path))
            .header("Authorization", &token.0)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Message send failed: {}", e)))?;

        Self::check(response).await?;
        debug!("Message posted to {}", path);
        Ok(())
    }

    async fn upload_location(&self) -> Result<UploadLocation> {
        let response = self
            .client
            .post(self.url("/media"))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Upload location request failed: {}", e)))?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Invalid upload location: {}", e)))
    }

    async fn download_location(&self, media_id: &str) -> Result<String> {
        let response = self
            .client
            .get(self.url("/media/location"))
            .query(&[("mediaId", media_id)])
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Download location request failed: {}", e)))?;

        let location: DownloadLocationResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Invalid download location: {}", e)))?;

        Ok(location.url)
    }

    async fn upload(&self, location: &UploadLocation, body: Bytes) -> Result<()> {
        info!("Uploading {} bytes of ciphertext", body.len());

        let response = self
            .client
            .put(&location.url)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Media upload failed: {}", e)))?;

        Self::check(response).await?;
        Ok(())
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Media download failed: {}", e)))?;

        Self::check(response)
            .await?
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("Media download body failed: {}", e)))
    }

    async fn post_bundle(&self, bundle_json: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url("/bundles"))
            .header("Content-Type", "application/json")
            .body(bundle_json.to_string())
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Bundle post failed: {}", e)))?;

        let posted: PostBundleResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Invalid bundle post response: {}", e)))?;

        Ok(posted.bundle_id)
    }

    async fn get_bundle(&self, bundle_id: &str) -> Result<String> {
        let response = self
            .client
            .get(self.url(&format!("/bundles/{}", bundle_id)))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Bundle fetch failed: {}", e)))?;

        Self::check(response)
            .await?
            .text()
            .await
            .map_err(|e| Error::Transport(format!("Bundle fetch body failed: {}", e)))
    }

    async fn get_challenge(&self, user_id: &str) -> Result<String> {
        let response = self
            .client
            .get(self.url(&format!("/auth/challenge/{}", user_id)))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Challenge fetch failed: {}", e)))?;

        let challenge: ChallengeResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Invalid challenge response: {}", e)))?;

        Ok(challenge.challenge)
    }

    async fn post_challenge_response(&self, user_id: &str, cipher: &str) -> Result<AuthToken> {
        let response = self
            .client
            .post(self.url(&format!("/auth/challenge/{}", user_id)))
            .json(&serde_json::json!({ "cipher": cipher }))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Challenge response post failed: {}", e)))?;

        let issued: TokenResponse = match Self::check(response).await {
            Ok(r) => r
                .json()
                .await
                .map_err(|e| Error::Transport(format!("Invalid token response: {}", e)))?,
            Err(e) => {
                warn!("Challenge response rejected: {}", e);
                return Err(e);
            }
        };

        Ok(AuthToken(issued.token))
    }
}
