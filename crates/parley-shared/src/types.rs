use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User identity = opaque stable identifier issued by the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Destination of this user's private inbound queue on the broker.
    pub fn inbox_destination(&self) -> String {
        format!("/user/{}/queue/messages", self.0)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One-to-one chats carry no identifier of their own; a chat is keyed by
/// the counterpart user. Kept as an alias so that decoupling the two
/// (group chats) stays a type-level change.
pub type ChatId = UserId;

/// Delivery progress of a single message as seen by this session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryState {
    /// Published optimistically, server echo not yet seen.
    Pending,
    /// Echoed back by the server with its id attached.
    Confirmed,
    /// Publish failed synchronously; retry is an explicit re-submission.
    Failed,
}

/// A single chat message held in an open chat's sequence.
///
/// Created the instant it is queued for publish or parsed off the wire;
/// never destroyed during the session, at most marked [`DeliveryState::Failed`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Locally minted id, unique within the session.
    pub local_id: Uuid,
    /// Server-assigned id, stable and unique within the chat once echoed.
    pub server_id: Option<String>,
    pub sender: UserId,
    pub receiver: UserId,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    /// Whether this session's user authored the message.
    pub is_own: bool,
    pub delivery: DeliveryState,
}

impl ChatMessage {
    /// Total order of messages within one chat.
    pub fn order_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.sent_at, self.local_id)
    }
}

/// Directory entry for one counterpart. Mutated on every message touching
/// the chat; never deleted in-session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSummary {
    pub chat_id: ChatId,
    pub display_name: String,
    pub avatar_ref: Option<String>,
    pub last_message_preview: Option<String>,
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Insertion order, breaks last-activity ties in the directory view.
    pub seq: u64,
}

/// A counterpart candidate returned by the user search endpoint.
/// Ephemeral until the user selects it, which promotes it to a
/// [`ChatSummary`] with empty history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_ref: Option<String>,
}

/// Connection lifecycle, owned exclusively by the session manager; all
/// other components observe it read-only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}
