//! Message types, content-type domain and delivery status tracking
//!
//! Every outgoing and stored message is described by a [`ContentType`] tag,
//! a [`MessageData`] variant carrying the tag's payload shape, and a
//! [`MessageStatus`] that only ever advances along the send state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bundle::Bundle;

/// Semantic kind of a message payload; drives which sender variant handles it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentType {
    /// Plain text message
    Text,
    /// Text message with a URL preview
    Link,
    /// Display-name push (the handshake identity message)
    Name,
    /// Informational line rendered inline in the chat
    Info,
    /// Display picture change notice
    DisplayAvatar,
    /// Disappearing-messages timer change
    DisappearingMessages,
    /// A shared contact bundle
    ContactBundle,
    /// Response to a shared contact bundle
    ContactBundleResponse,
    /// Request for a contact's bundle
    ContactRequest,
    /// Image attachment
    Image,
    /// Video attachment
    Video,
    /// Generic file attachment
    File,
    /// Chat avatar media
    Avatar,
    /// Status propagation for a previously sent message
    Update,
    /// Emoji reaction to a message
    Reaction,
    /// Delivery/read receipt
    Receipt,
    /// Deletion of a previously sent message
    Deletion,
    /// Edit of a previously sent message
    Edit,
    /// Marker for freshly created connections; never sent as a message
    NewChat,
}

impl ContentType {
    /// Wire/database text representation (matches the serde name)
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Link => "link",
            ContentType::Name => "name",
            ContentType::Info => "info",
            ContentType::DisplayAvatar => "displayAvatar",
            ContentType::DisappearingMessages => "disappearingMessages",
            ContentType::ContactBundle => "contactBundle",
            ContentType::ContactBundleResponse => "contactBundleResponse",
            ContentType::ContactRequest => "contactRequest",
            ContentType::Image => "image",
            ContentType::Video => "video",
            ContentType::File => "file",
            ContentType::Avatar => "avatar",
            ContentType::Update => "update",
            ContentType::Reaction => "reaction",
            ContentType::Receipt => "receipt",
            ContentType::Deletion => "deletion",
            ContentType::Edit => "edit",
            ContentType::NewChat => "newChat",
        }
    }

    /// Parse the wire/database text representation
    pub fn parse(s: &str) -> Option<Self> {
        ContentType::ALL
            .iter()
            .copied()
            .find(|ct| ct.as_str() == s)
    }

    /// Every content type the core knows about
    pub const ALL: &'static [ContentType] = &[
        ContentType::Text,
        ContentType::Link,
        ContentType::Name,
        ContentType::Info,
        ContentType::DisplayAvatar,
        ContentType::DisappearingMessages,
        ContentType::ContactBundle,
        ContentType::ContactBundleResponse,
        ContentType::ContactRequest,
        ContentType::Image,
        ContentType::Video,
        ContentType::File,
        ContentType::Avatar,
        ContentType::Update,
        ContentType::Reaction,
        ContentType::Receipt,
        ContentType::Deletion,
        ContentType::Edit,
        ContentType::NewChat,
    ];
}

/// Message delivery status
///
/// Transitions are monotonic: once a message reaches `Sent` or `Failed` it
/// never moves again, and every legal step is encoded in
/// [`MessageStatus::can_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Persisted but no delivery attempt resolved yet
    Unassigned,
    /// Accepted for delivery; waiting in the journal for a retry
    Journaled,
    /// Transport acknowledged the send
    Sent,
    /// Delivery failed and will not be retried
    Failed,
    /// Media message whose upload has not yet produced a mediaId/key
    Unsent,
}

impl MessageStatus {
    /// Whether a status change from `from` to `to` is legal
    ///
    /// The allowed edges mirror the sender state machine:
    /// `Unassigned → {Journaled, Unsent, Sent, Failed}`,
    /// `Journaled → {Journaled, Sent, Failed}`,
    /// `Unsent → {Journaled, Failed}`; `Sent` and `Failed` are terminal.
    pub fn can_transition(from: MessageStatus, to: MessageStatus) -> bool {
        use MessageStatus::*;
        match from {
            Unassigned => matches!(to, Journaled | Unsent | Sent | Failed),
            Journaled => matches!(to, Journaled | Sent | Failed),
            Unsent => matches!(to, Journaled | Failed),
            Sent | Failed => false,
        }
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Sent | MessageStatus::Failed)
    }

    /// Database text representation
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Unassigned => "unassigned",
            MessageStatus::Journaled => "journaled",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
            MessageStatus::Unsent => "unsent",
        }
    }

    /// Parse the database text representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unassigned" => Some(MessageStatus::Unassigned),
            "journaled" => Some(MessageStatus::Journaled),
            "sent" => Some(MessageStatus::Sent),
            "failed" => Some(MessageStatus::Failed),
            "unsent" => Some(MessageStatus::Unsent),
            _ => None,
        }
    }
}

/// Message payload data, shaped by content type
///
/// Serialized untagged so the wire form is the bare object the content type
/// implies. Variant order matters: types whose required fields are a
/// superset of another's must come first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, rename_all = "camelCase")]
pub enum MessageData {
    /// Image / video / file / avatar attachment
    #[serde(rename_all = "camelCase")]
    Media {
        /// Original file name
        file_name: String,
        /// Local path; stripped from the wire payload before sending
        #[serde(skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
        /// MIME type, when known
        #[serde(skip_serializing_if = "Option::is_none")]
        file_type: Option<String>,
        /// Optional caption
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        /// Server-side media identifier, present once uploaded
        #[serde(skip_serializing_if = "Option::is_none")]
        media_id: Option<String>,
        /// Base64 symmetric key for the uploaded ciphertext
        #[serde(skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    /// Text with a URL preview
    Link {
        /// Message text
        text: String,
        /// The linked URL
        url: String,
    },
    /// Edit instruction for an earlier message
    #[serde(rename_all = "camelCase")]
    Edit {
        /// Message being edited
        message_id_to_edit: String,
        /// Replacement text
        text: String,
    },
    /// Emoji reaction
    #[serde(rename_all = "camelCase")]
    Reaction {
        /// Message being reacted to
        message_id: String,
        /// The reaction itself
        reaction: String,
        /// True when withdrawing a previous reaction
        tombstone: bool,
    },
    /// Status propagation for an earlier message
    #[serde(rename_all = "camelCase")]
    Update {
        /// Message whose status is propagated
        message_id: String,
        /// The propagated status
        status: MessageStatus,
    },
    /// Delivery/read receipt
    #[serde(rename_all = "camelCase")]
    Receipt {
        /// Message being acknowledged
        message_id: String,
        /// Read timestamp; absent for delivery-only receipts
        #[serde(skip_serializing_if = "Option::is_none")]
        read_at: Option<DateTime<Utc>>,
    },
    /// Deletion instruction for an earlier message
    #[serde(rename_all = "camelCase")]
    Deletion {
        /// Message to tombstone
        message_id_to_delete: String,
    },
    /// A shared contact bundle
    #[serde(rename_all = "camelCase")]
    ContactShare {
        /// The portable connection bundle
        bundle: Bundle,
        /// Display name of the shared contact
        contact_name: String,
    },
    /// Accept/decline response to a shared contact
    Approval {
        /// Whether the shared contact was accepted
        accepted: bool,
    },
    /// Disappearing-messages timer change
    #[serde(rename_all = "camelCase")]
    Timer {
        /// New timer duration in seconds; 0 disables
        duration_seconds: u64,
    },
    /// Identity push: display name plus handshake public key
    Name {
        /// Sender's display name
        name: String,
        /// Hex-encoded X25519 public key, present during the handshake
        #[serde(skip_serializing_if = "Option::is_none")]
        pubkey: Option<String>,
    },
    /// Informational line
    Info {
        /// The information text
        info: String,
    },
    /// Plain text
    Text {
        /// Message text
        text: String,
    },
}

impl MessageData {
    /// Whether this data shape is the one `content_type` requires
    pub fn matches(&self, content_type: ContentType) -> bool {
        use ContentType as C;
        use MessageData as D;
        matches!(
            (content_type, self),
            (C::Text, D::Text { .. })
                | (C::Link, D::Link { .. })
                | (C::Name, D::Name { .. })
                | (C::Info, D::Info { .. })
                | (C::DisplayAvatar, D::Media { .. })
                | (C::DisappearingMessages, D::Timer { .. })
                | (C::ContactBundle, D::ContactShare { .. })
                | (C::ContactBundleResponse, D::Approval { .. })
                | (C::ContactRequest, D::ContactShare { .. })
                | (C::Image, D::Media { .. })
                | (C::Video, D::Media { .. })
                | (C::File, D::Media { .. })
                | (C::Avatar, D::Media { .. })
                | (C::Update, D::Update { .. })
                | (C::Reaction, D::Reaction { .. })
                | (C::Receipt, D::Receipt { .. })
                | (C::Deletion, D::Deletion { .. })
                | (C::Edit, D::Edit { .. })
        )
    }

    /// Display text for previews, when the data carries any
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageData::Text { text } | MessageData::Link { text, .. } => Some(text),
            MessageData::Media { text, .. } => text.as_deref(),
            _ => None,
        }
    }
}

/// A stored message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Chat this message belongs to
    pub chat_id: String,
    /// Message identifier, unique within the chat
    pub message_id: String,
    /// Semantic kind of the payload
    pub content_type: ContentType,
    /// Payload data
    pub data: MessageData,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// True when this device sent the message
    pub sender: bool,
    /// Delivery status
    pub status: MessageStatus,
    /// Message this one replies to, if any
    #[serde(default)]
    pub reply_id: Option<String>,
    /// Expiry for disappearing messages
    #[serde(default)]
    pub expires_on: Option<DateTime<Utc>>,
    /// Group-only: restrict delivery to a single member
    #[serde(default)]
    pub single_recipient: Option<String>,
    /// True once any reaction has landed on this message
    #[serde(default)]
    pub has_reactions: bool,
    /// True when a read receipt for this message failed to send
    #[serde(default)]
    pub receipt_pending: bool,
}

/// The wire form of an outgoing message, before encryption
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Message identifier
    pub message_id: String,
    /// Semantic kind of the payload
    pub content_type: ContentType,
    /// Payload data
    pub data: MessageData,
    /// Message this one replies to, if any
    #[serde(default)]
    pub reply_id: Option<String>,
    /// Expiry for disappearing messages
    #[serde(default)]
    pub expires_on: Option<DateTime<Utc>>,
}

/// Generate a random hex message id
pub fn generate_message_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses_never_transition() {
        for to in [
            MessageStatus::Unassigned,
            MessageStatus::Journaled,
            MessageStatus::Sent,
            MessageStatus::Failed,
            MessageStatus::Unsent,
        ] {
            assert!(!MessageStatus::can_transition(MessageStatus::Sent, to));
            assert!(!MessageStatus::can_transition(MessageStatus::Failed, to));
        }
    }

    #[test]
    fn test_journaled_can_stay_journaled() {
        assert!(MessageStatus::can_transition(
            MessageStatus::Journaled,
            MessageStatus::Journaled
        ));
    }

    #[test]
    fn test_unsent_moves_to_journaled_after_upload() {
        assert!(MessageStatus::can_transition(
            MessageStatus::Unsent,
            MessageStatus::Journaled
        ));
        assert!(!MessageStatus::can_transition(
            MessageStatus::Unsent,
            MessageStatus::Sent
        ));
    }

    #[test]
    fn test_status_str_roundtrip() {
        for status in [
            MessageStatus::Unassigned,
            MessageStatus::Journaled,
            MessageStatus::Sent,
            MessageStatus::Failed,
            MessageStatus::Unsent,
        ] {
            assert_eq!(MessageStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MessageStatus::parse("bogus"), None);
    }

    #[test]
    fn test_data_matches_content_type() {
        let text = MessageData::Text {
            text: "hi".to_string(),
        };
        assert!(text.matches(ContentType::Text));
        assert!(!text.matches(ContentType::Image));

        let media = MessageData::Media {
            file_name: "photo.jpg".to_string(),
            file_path: Some("/tmp/photo.jpg".to_string()),
            file_type: None,
            text: None,
            media_id: None,
            key: None,
        };
        assert!(media.matches(ContentType::Image));
        assert!(media.matches(ContentType::Avatar));
        assert!(!media.matches(ContentType::Text));
    }

    #[test]
    fn test_data_json_shape_is_bare_object() {
        let data = MessageData::Reaction {
            message_id: "m1".to_string(),
            reaction: "👍".to_string(),
            tombstone: false,
        };
        let json = serde_json::to_value(&data).expect("Failed to serialize");
        assert_eq!(json["messageId"], "m1");
        assert_eq!(json["tombstone"], false);

        let back: MessageData = serde_json::from_value(json).expect("Failed to deserialize");
        assert_eq!(back, data);
    }

    #[test]
    fn test_untagged_ordering_preserves_link_and_edit() {
        let link = MessageData::Link {
            text: "see".to_string(),
            url: "https://example.org".to_string(),
        };
        let json = serde_json::to_string(&link).expect("Failed to serialize");
        let back: MessageData = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(back, link);

        let edit = MessageData::Edit {
            message_id_to_edit: "m9".to_string(),
            text: "fixed".to_string(),
        };
        let json = serde_json::to_string(&edit).expect("Failed to serialize");
        let back: MessageData = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(back, edit);
    }

    #[test]
    fn test_payload_wire_fields_are_camel_case() {
        let payload = MessagePayload {
            message_id: generate_message_id(),
            content_type: ContentType::Text,
            data: MessageData::Text {
                text: "hello".to_string(),
            },
            reply_id: None,
            expires_on: None,
        };
        let json = serde_json::to_value(&payload).expect("Failed to serialize");
        assert!(json.get("messageId").is_some());
        assert!(json.get("contentType").is_some());
    }

    #[test]
    fn test_generated_ids_are_hex_and_unique() {
        let a = generate_message_id();
        let b = generate_message_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
