//! Connection bundles
//!
//! A bundle is the portable capsule of data, carried in a QR code or a
//! link, that bootstraps a connection between two parties. Scanned input is
//! attacker-controlled, so the schema check is exact and failures surface
//! as [`Error::MalformedBundle`], which the caller treats as "rescan".

use serde::{Deserialize, Serialize};

use crate::config::{BUNDLE_TYPE_DIRECT, BUNDLE_VERSION, LINK_DOMAIN, ORG_TAG, SHARE_INTENT_SCHEME};
use crate::{Error, Result};

/// A portable connection bundle (wire JSON)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    /// Organisation tag; must equal [`ORG_TAG`]
    pub org: String,
    /// Bundle kind, e.g. "direct"
    #[serde(rename = "type")]
    pub bundle_type: String,
    /// Versioned bundle body
    pub bundles: BundleBody,
}

/// Versioned body of a bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleBody {
    /// Schema version of the data block
    pub version: String,
    /// Optional label the issuer attached (shown as the contact's name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// The connection data itself
    pub data: BundleData,
}

/// Connection data carried by a bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleData {
    /// Single-use connection identifier
    pub link_id: String,
    /// Handshake nonce, hex encoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// SHA-256 of the issuer's handshake public key, hex encoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey_hash: Option<String>,
}

impl Bundle {
    /// Build a direct-connection bundle for a freshly consumed link id
    pub fn new_direct(
        link_id: String,
        label: Option<String>,
        nonce: Option<String>,
        pubkey_hash: Option<String>,
    ) -> Self {
        Self {
            org: ORG_TAG.to_string(),
            bundle_type: BUNDLE_TYPE_DIRECT.to_string(),
            bundles: BundleBody {
                version: BUNDLE_VERSION.to_string(),
                label,
                data: BundleData {
                    link_id,
                    nonce,
                    pubkey_hash,
                },
            },
        }
    }

    /// The single-use link id inside this bundle
    pub fn link_id(&self) -> &str {
        &self.bundles.data.link_id
    }

    /// Serialize to the JSON string embedded in a QR code
    pub fn to_qr_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Validate raw scanned data against the bundle schema, exactly
///
/// Every deviation is a [`Error::MalformedBundle`]; the message names the
/// first field that failed so support logs stay useful.
pub fn check_bundle_data(raw: &str) -> Result<Bundle> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| Error::MalformedBundle(format!("not valid JSON: {}", e)))?;

    if value.get("org").and_then(|v| v.as_str()) != Some(ORG_TAG) {
        return Err(Error::MalformedBundle(
            "organisation data incorrect".to_string(),
        ));
    }
    if !value.get("type").map(|v| v.is_string()).unwrap_or(false) {
        return Err(Error::MalformedBundle("bundle type incorrect".to_string()));
    }
    let Some(bundles) = value.get("bundles") else {
        return Err(Error::MalformedBundle("bundle not present".to_string()));
    };
    if !bundles
        .get("version")
        .map(|v| v.is_string())
        .unwrap_or(false)
    {
        return Err(Error::MalformedBundle("version data incorrect".to_string()));
    }
    let Some(data) = bundles.get("data") else {
        return Err(Error::MalformedBundle(
            "bundle data not present".to_string(),
        ));
    };
    if !data.get("linkId").map(|v| v.is_string()).unwrap_or(false) {
        return Err(Error::MalformedBundle("linkId is not a string".to_string()));
    }

    serde_json::from_value(value)
        .map_err(|e| Error::MalformedBundle(format!("bundle shape invalid: {}", e)))
}

/// Build the shareable deep link for a posted bundle id
pub fn format_connect_link(bundle_id: &str) -> String {
    format!("https://{}/connect?bundleId={}", LINK_DOMAIN, bundle_id)
}

/// Extract the bundle id from a connect deep link
///
/// Returns `None` for anything that is not an
/// `https://<domain>/connect?bundleId=…` URL. In particular the custom
/// share-intent scheme is ignored here; those links belong to the media
/// share handler.
pub fn parse_connect_link(url: &str) -> Option<String> {
    if url.starts_with(&format!("{}://", SHARE_INTENT_SCHEME)) {
        return None;
    }
    let rest = url.strip_prefix("https://")?;
    let (host, rest) = rest.split_once("/connect?")?;
    if host != LINK_DOMAIN {
        return None;
    }
    rest.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == "bundleId" && !value.is_empty() {
            Some(value.to_string())
        } else {
            None
        }
    })
}
