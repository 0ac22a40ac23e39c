// In-memory implementations of the collaborator contracts.
//
// Used by the demo binary and the integration tests. The store can be
// scripted to fail upcoming sends, and can be linked to a channel so a
// successful send is echoed to every subscriber the way a hosted pub/sub
// service would echo it back to the sender too.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use tokio::sync::mpsc;
use tokio::sync::Mutex as TokioMutex;

use crate::models::{Conversation, Message};

use super::{
    ChannelEvent, MessageStore, RealtimeChannel, SendMessageRequest, SendMessageResponse,
    conversation_channel,
};

/// How the store should fail a scripted send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// The request itself errors (network-level failure).
    Transport,
    /// The server answers with `success: false`.
    Rejected,
}

pub struct InMemoryStore {
    /// The authenticated user the store attributes sends to, the way the
    /// real endpoint reads the sender from its auth session.
    acting_user: String,
    conversations: TokioMutex<Vec<Conversation>>,
    /// Failures to inject into upcoming sends, consumed front-first.
    scripted_failures: TokioMutex<VecDeque<FailureMode>>,
    /// When set, the next `conversations` call errors.
    fail_next_load: TokioMutex<bool>,
    /// Channel to echo confirmed messages onto, if linked.
    echo_channel: TokioMutex<Option<Arc<InMemoryChannel>>>,
}

impl InMemoryStore {
    pub fn new(acting_user: &str, conversations: Vec<Conversation>) -> Self {
        InMemoryStore {
            acting_user: acting_user.to_string(),
            conversations: TokioMutex::new(conversations),
            scripted_failures: TokioMutex::new(VecDeque::new()),
            fail_next_load: TokioMutex::new(false),
            echo_channel: TokioMutex::new(None),
        }
    }

    /// Make the next send fail with the given mode. Calls queue up.
    pub async fn fail_next_send(&self, mode: FailureMode) {
        self.scripted_failures.lock().await.push_back(mode);
    }

    /// Make the next `conversations` call error.
    pub async fn fail_next_load(&self) {
        *self.fail_next_load.lock().await = true;
    }

    /// Echo every confirmed message onto `channel`, sender included.
    pub async fn attach_channel(&self, channel: Arc<InMemoryChannel>) {
        *self.echo_channel.lock().await = Some(channel);
    }

    /// Durable messages currently stored for a conversation.
    pub async fn stored_messages(&self, conversation_id: &str) -> Vec<Message> {
        self.conversations
            .lock()
            .await
            .iter()
            .find(|c| c.id == conversation_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn send_message(&self, request: SendMessageRequest) -> Result<SendMessageResponse> {
        if let Some(mode) = self.scripted_failures.lock().await.pop_front() {
            debug!("Injecting scripted {:?} failure for send", mode);
            return match mode {
                FailureMode::Transport => Err(anyhow!("connection reset by peer")),
                FailureMode::Rejected => Ok(SendMessageResponse::rejected("message rejected")),
            };
        }

        let mut conversations = self.conversations.lock().await;
        let conversation = conversations
            .iter_mut()
            .find(|c| c.id == request.conversation_id)
            .ok_or_else(|| anyhow!("unknown conversation: {}", request.conversation_id))?;

        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation.id.clone(),
            sender_id: self.acting_user.clone(),
            content: request.content.clone(),
            timestamp: Utc::now(),
            read: false,
        };
        conversation.messages.push(message.clone());
        drop(conversations);

        if let Some(channel) = self.echo_channel.lock().await.as_ref() {
            channel
                .publish(
                    &conversation_channel(&message.conversation_id),
                    ChannelEvent::NewMessage {
                        message: message.clone(),
                    },
                )
                .await;
        }

        Ok(SendMessageResponse::ok(message))
    }

    async fn conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let mut fail = self.fail_next_load.lock().await;
        if *fail {
            *fail = false;
            return Err(anyhow!("conversation read model unavailable"));
        }
        drop(fail);

        let conversations = self.conversations.lock().await;
        Ok(conversations
            .iter()
            .filter(|c| c.involves(user_id))
            .cloned()
            .collect())
    }
}

/// One broadcast recorded by the in-memory channel, for assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct TypingBroadcast {
    pub channel: String,
    pub user_id: String,
    pub active: bool,
}

#[derive(Default)]
pub struct InMemoryChannel {
    subscribers: TokioMutex<HashMap<String, Vec<mpsc::UnboundedSender<ChannelEvent>>>>,
    typing_log: TokioMutex<Vec<TypingBroadcast>>,
    /// When set, the next `subscribe` call errors.
    fail_next_subscribe: TokioMutex<bool>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `subscribe` call error.
    pub async fn fail_next_subscribe(&self) {
        *self.fail_next_subscribe.lock().await = true;
    }

    /// Live subscriptions on `channel`; dropped receivers are pruned
    /// before counting.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        match subscribers.get_mut(channel) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.len()
            }
            None => 0,
        }
    }

    /// Push an event to every subscriber of `channel`. Dead receivers are
    /// dropped from the list.
    pub async fn publish(&self, channel: &str, event: ChannelEvent) {
        let mut subscribers = self.subscribers.lock().await;
        if let Some(senders) = subscribers.get_mut(channel) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Every typing broadcast seen so far, oldest first.
    pub async fn typing_broadcasts(&self) -> Vec<TypingBroadcast> {
        self.typing_log.lock().await.clone()
    }
}

#[async_trait]
impl RealtimeChannel for InMemoryChannel {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<ChannelEvent>> {
        let mut fail = self.fail_next_subscribe.lock().await;
        if *fail {
            *fail = false;
            return Err(anyhow!("subscription refused"));
        }
        drop(fail);

        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .await
            .entry(channel.to_string())
            .or_insert_with(Vec::new)
            .push(tx);
        debug!("Subscribed to channel {}", channel);
        Ok(rx)
    }

    async fn broadcast_typing(&self, channel: &str, user_id: &str, active: bool) -> Result<()> {
        self.typing_log.lock().await.push(TypingBroadcast {
            channel: channel.to_string(),
            user_id: user_id.to_string(),
            active,
        });
        self.publish(
            channel,
            ChannelEvent::Typing {
                user_id: user_id.to_string(),
                active,
            },
        )
        .await;
        Ok(())
    }
}
