//! Ephemeral notifications shared across devices.
//!
//! A notification carries no expiry of its own. The display timeout is a
//! caller-side timer that ends in `clear_notification`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sender identity used for location-triggered and system notifications.
pub const SYSTEM_SENDER: &str = "Serena AI";

/// Notification category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationCategory {
    /// A passenger is asking for a rest stop.
    RestRequest,
    /// Music related.
    Music,
    /// General information.
    Info,
    /// Something needs attention.
    Warning,
}

impl std::fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RestRequest => write!(f, "rest-request"),
            Self::Music => write!(f, "music"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// What produced a notification and what extra data it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NotificationPayload {
    /// Sent by a person or a plain informational event.
    PlainInfo,
    /// Raised by a geofence.
    #[serde(rename_all = "camelCase")]
    LocationTrigger {
        /// Text for speech synthesis.
        spoken_text: String,
    },
}

impl NotificationPayload {
    /// Spoken text, if this payload has any.
    #[must_use]
    pub fn spoken_text(&self) -> Option<&str> {
        match self {
            Self::PlainInfo => None,
            Self::LocationTrigger { spoken_text } => Some(spoken_text),
        }
    }
}

/// The single active notification slot's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppNotification {
    /// Globally unique id.
    pub id: String,
    /// Category tag.
    pub category: NotificationCategory,
    /// Message shown on screen.
    pub message: String,
    /// Origin-specific payload.
    pub payload: NotificationPayload,
    /// Who sent it.
    pub sender: String,
    /// When it was created.
    pub created_at: DateTime<Utc>,
}

impl AppNotification {
    /// Whether a geofence raised this notification.
    #[must_use]
    pub fn is_location_trigger(&self) -> bool {
        matches!(self.payload, NotificationPayload::LocationTrigger { .. })
    }
}

/// A notification before it is stamped with an id and creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDraft {
    /// Category tag.
    pub category: NotificationCategory,
    /// Message shown on screen.
    pub message: String,
    /// Origin-specific payload.
    pub payload: NotificationPayload,
    /// Who is sending it.
    pub sender: String,
}

impl NotificationDraft {
    /// A plain message from `sender`.
    #[must_use]
    pub fn new(
        category: NotificationCategory,
        message: impl Into<String>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            payload: NotificationPayload::PlainInfo,
            sender: sender.into(),
        }
    }

    /// A geofence announcement from the system sender.
    #[must_use]
    pub fn location_trigger(message: impl Into<String>, spoken_text: impl Into<String>) -> Self {
        Self {
            category: NotificationCategory::Info,
            message: message.into(),
            payload: NotificationPayload::LocationTrigger {
                spoken_text: spoken_text.into(),
            },
            sender: SYSTEM_SENDER.to_string(),
        }
    }

    /// Stamp the draft.
    #[must_use]
    pub fn into_notification(self, id: String, created_at: DateTime<Utc>) -> AppNotification {
        AppNotification {
            id,
            category: self.category,
            message: self.message,
            payload: self.payload,
            sender: self.sender,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_display() {
        assert_eq!(NotificationCategory::RestRequest.to_string(), "rest-request");
        assert_eq!(NotificationCategory::Warning.to_string(), "warning");
    }

    #[test]
    fn test_category_serde_matches_display() {
        let json = serde_json::to_string(&NotificationCategory::RestRequest).unwrap();
        assert_eq!(json, "\"rest-request\"");
    }

    #[test]
    fn test_location_trigger_draft() {
        let draft = NotificationDraft::location_trigger("Shown", "Spoken");
        assert_eq!(draft.sender, SYSTEM_SENDER);
        assert_eq!(draft.payload.spoken_text(), Some("Spoken"));

        let n = draft.into_notification("n1".to_string(), Utc::now());
        assert!(n.is_location_trigger());
        assert_eq!(n.id, "n1");
    }

    #[test]
    fn test_plain_draft() {
        let n = NotificationDraft::new(NotificationCategory::RestRequest, "Toilet break?", "Ken")
            .into_notification("n2".to_string(), Utc::now());
        assert!(!n.is_location_trigger());
        assert_eq!(n.payload.spoken_text(), None);
        assert_eq!(n.sender, "Ken");
    }

    #[test]
    fn test_payload_wire_shape() {
        let payload = NotificationPayload::LocationTrigger {
            spoken_text: "hello".to_string(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["kind"], "locationTrigger");
        assert_eq!(value["spokenText"], "hello");

        let plain = serde_json::to_value(NotificationPayload::PlainInfo).unwrap();
        assert_eq!(plain["kind"], "plainInfo");
    }

    #[test]
    fn test_notification_wire_shape() {
        let n = NotificationDraft::new(NotificationCategory::Music, "Next song", "Yui")
            .into_notification("abc".to_string(), Utc::now());
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["category"], "music");
        assert!(value.get("createdAt").is_some());

        let back: AppNotification = serde_json::from_value(value).unwrap();
        assert_eq!(back, n);
    }
}
