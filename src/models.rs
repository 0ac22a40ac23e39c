use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A durable chat message as the server stores and delivers it.
///
/// This is the wire type for both the persistence response and the
/// real-time "new-message" event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Read receipt flag, computed server-side. Read-only here.
    #[serde(default)]
    pub read: bool,
}

/// Render-time state of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Sending,   // Optimistic, persistence call in flight
    Confirmed, // Durable or peer-delivered
    Failed,    // Persistence call errored, retry available
}

/// A locally-authored message awaiting server confirmation.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    /// Locally-minted temporary id; replaced by the server id on confirm.
    pub temp_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// How many times this content has been submitted, retries included.
    pub attempts: u32,
}

impl PendingMessage {
    pub fn new(content: &str) -> Self {
        PendingMessage {
            temp_id: uuid::Uuid::new_v4().to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            attempts: 1,
        }
    }
}

/// A pending message whose persistence call failed.
#[derive(Debug, Clone)]
pub struct FailedMessage {
    pub pending: PendingMessage,
    pub error: String,
}

/// A buyer/seller thread tied to one product listing.
///
/// Conversations are created and closed by server-side processes; this
/// component only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub listing_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    /// Historical messages, server-rendered initial data.
    pub messages: Vec<Message>,
    /// Server-computed unread summary for the local user.
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    /// The other participant from `user_id`'s point of view.
    pub fn peer_of(&self, user_id: &str) -> &str {
        if self.buyer_id == user_id {
            &self.seller_id
        } else {
            &self.buyer_id
        }
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }
}
