// Collaborator contracts for the chat component.
//
// The session talks to two external services: a persistence backend that
// durably stores messages, and a managed pub/sub channel that pushes peer
// messages and typing signals. Both are behind traits so tests and the
// demo binary can run against the in-memory implementations.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::{Conversation, Message};

/// Event name carried on the real-time channel for peer messages.
pub const NEW_MESSAGE_EVENT: &str = "new-message";

/// Channel naming scheme: one channel per conversation.
pub fn conversation_channel(conversation_id: &str) -> String {
    format!("conversation-{}", conversation_id)
}

/// Request body for the message-creation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: String,
    pub content: String,
}

/// Response body from the message-creation endpoint.
///
/// `message` carries the persisted record on success so the caller can
/// merge it into its durable set instead of refetching the whole view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

impl SendMessageResponse {
    pub fn ok(message: Message) -> Self {
        SendMessageResponse {
            success: true,
            error: None,
            message: Some(message),
        }
    }

    pub fn rejected(error: &str) -> Self {
        SendMessageResponse {
            success: false,
            error: Some(error.to_string()),
            message: None,
        }
    }
}

/// An event pushed over a conversation's real-time channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ChannelEvent {
    NewMessage { message: Message },
    Typing { user_id: String, active: bool },
}

/// Persistence collaborator: durably stores messages and serves the
/// conversation read model.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message. A transport error or a `success: false`
    /// response both count as a send failure.
    async fn send_message(&self, request: SendMessageRequest) -> Result<SendMessageResponse>;

    /// The durable read model: every conversation `user_id` participates
    /// in, with its historical messages.
    async fn conversations(&self, user_id: &str) -> Result<Vec<Conversation>>;
}

/// Real-time delivery collaborator: a managed pub/sub channel scoped to
/// one conversation.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Bind to a named channel. Events arrive on the returned receiver
    /// until it is dropped.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<ChannelEvent>>;

    /// Broadcast the local user's typing state. Fire-and-forget; no
    /// acknowledgement.
    async fn broadcast_typing(&self, channel: &str, user_id: &str, active: bool) -> Result<()>;
}
