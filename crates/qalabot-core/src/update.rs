use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An inbound update from the messaging transport.
///
/// Exactly one of `text`, `callback`, `location`, or `photo` is normally
/// present, but the engine treats them independently so a caption on a
/// photo does not confuse routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub id: Uuid,
    /// Channel name (e.g. "telegram").
    pub channel: String,
    /// Stable identifier of the chat participant — the session store key.
    pub transport_id: String,
    /// Human-readable sender name.
    pub sender_name: Option<String>,
    /// Message text, if any.
    pub text: Option<String>,
    /// Button callback payload, if the update came from a button press.
    pub callback: Option<String>,
    /// Location attachment, if any.
    pub location: Option<Location>,
    /// Photo attachment, if any.
    pub photo: Option<PhotoRef>,
    pub timestamp: DateTime<Utc>,
    /// Platform-specific target for routing the reply (e.g. Telegram chat_id).
    #[serde(default)]
    pub reply_target: Option<String>,
}

/// A geographic point attached to an update.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// A reference to a photo hosted by the transport.
///
/// `url` is transport-hosted and short-lived; the photo storage
/// collaborator turns it into a durable public URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoRef {
    pub file_id: String,
    pub url: String,
}

/// An outbound reply to send back through a channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reply {
    pub text: String,
    /// Inline buttons, in display order. Empty means a plain text reply.
    #[serde(default)]
    pub buttons: Vec<Button>,
    /// Platform-specific target for routing (e.g. Telegram chat_id).
    #[serde(default)]
    pub reply_target: Option<String>,
}

/// An inline button: a visible label and the payload echoed back on press.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub payload: String,
}

impl Reply {
    /// A plain text reply addressed back at the sender of `update`.
    pub fn text_to(update: &Update, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
            reply_target: update.reply_target.clone(),
        }
    }

    /// A reply with inline buttons addressed back at the sender of `update`.
    pub fn with_buttons(update: &Update, text: impl Into<String>, buttons: Vec<Button>) -> Self {
        Self {
            text: text.into(),
            buttons,
            reply_target: update.reply_target.clone(),
        }
    }
}
