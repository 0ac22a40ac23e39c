// The optimistic send / reconcile state machine.
//
// One ChatSession instance owns the transient message sets for the
// currently selected conversation. All asynchronous work (persistence
// calls, channel subscriptions, typing timers) runs on spawned tasks
// that report back through a single event queue; the owner drains the
// queue and applies events, so every state mutation happens on the
// owner's task.

pub mod transcript;
pub mod typing;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Local, NaiveDate, Utc};
use log::{debug, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::backend::{
    conversation_channel, ChannelEvent, MessageStore, RealtimeChannel, SendMessageRequest,
    SendMessageResponse,
};
use crate::models::{Conversation, DeliveryState, FailedMessage, Message, PendingMessage};

use transcript::{group_by_day, DateGroup, TranscriptEntry};
use typing::TypingTracker;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("no active conversation")]
    NoActiveConversation,
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),
    #[error("no failed message with id {0}")]
    UnknownFailedMessage(String),
}

/// An event posted back to the session by one of its spawned tasks.
///
/// Every event carries the generation it was dispatched under; the
/// session bumps its generation on conversation switch, so resolutions
/// belonging to an abandoned conversation are recognized and dropped.
#[derive(Debug)]
pub enum SessionEvent {
    SendResolved {
        generation: u64,
        conversation_id: String,
        temp_id: String,
        result: Result<SendMessageResponse, String>,
    },
    Channel {
        generation: u64,
        event: ChannelEvent,
    },
    TypingTimeout {
        generation: u64,
        seq: u64,
    },
}

pub struct ChatSession {
    user_id: String,
    store: Arc<dyn MessageStore>,
    channel: Arc<dyn RealtimeChannel>,
    /// Durable read model, loaded once and patched in place as sends
    /// confirm. Read-only otherwise.
    conversations: Vec<Conversation>,
    active_id: Option<String>,
    generation: u64,
    draft: String,
    optimistic: Vec<PendingMessage>,
    failed: Vec<FailedMessage>,
    realtime: Vec<Message>,
    peer_typing: HashSet<String>,
    typing: TypingTracker,
    /// Forwarder task for the active conversation's subscription;
    /// aborted on switch so the old receiver is dropped and the channel
    /// can prune it.
    subscription: Option<tokio::task::JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl ChatSession {
    /// Build a session for `user_id`, loading the conversation list from
    /// the store. A load failure degrades to an empty list with a
    /// warning rather than surfacing.
    pub async fn new(
        user_id: &str,
        store: Arc<dyn MessageStore>,
        channel: Arc<dyn RealtimeChannel>,
    ) -> Self {
        let conversations = match store.conversations(user_id).await {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!("Failed to load conversations for {}: {}", user_id, e);
                Vec::new()
            }
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        ChatSession {
            user_id: user_id.to_string(),
            store,
            channel,
            conversations,
            active_id: None,
            generation: 0,
            draft: String::new(),
            optimistic: Vec::new(),
            failed: Vec::new(),
            realtime: Vec::new(),
            peer_typing: HashSet::new(),
            typing: TypingTracker::new(),
            subscription: None,
            events_tx,
            events_rx,
        }
    }

    /// Shorten the typing quiet period, for tests that wait on it.
    pub fn set_typing_quiet_period(&mut self, quiet_period: Duration) {
        self.typing = TypingTracker::with_quiet_period(quiet_period);
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        let active_id = self.active_id.as_deref()?;
        self.conversations.iter().find(|c| c.id == active_id)
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn optimistic(&self) -> &[PendingMessage] {
        &self.optimistic
    }

    pub fn failed(&self) -> &[FailedMessage] {
        &self.failed
    }

    pub fn realtime(&self) -> &[Message] {
        &self.realtime
    }

    /// The set of peers currently typing in the active conversation.
    pub fn peer_typing(&self) -> &HashSet<String> {
        &self.peer_typing
    }

    pub fn is_peer_typing(&self) -> bool {
        !self.peer_typing.is_empty()
    }

    /// Make `conversation_id` the active conversation.
    ///
    /// All transient state belonging to the previous conversation is
    /// cleared before anything of the new one is shown, and the
    /// generation bump orphans whatever work is still in flight for it.
    pub async fn select_conversation(&mut self, conversation_id: &str) -> Result<(), ChatError> {
        if !self.conversations.iter().any(|c| c.id == conversation_id) {
            return Err(ChatError::UnknownConversation(conversation_id.to_string()));
        }

        // Stop forwarding the old conversation's feed; dropping the
        // receiver lets the channel prune the dead subscription.
        if let Some(subscription) = self.subscription.take() {
            subscription.abort();
        }

        self.optimistic.clear();
        self.failed.clear();
        self.realtime.clear();
        self.peer_typing.clear();
        self.typing.reset();
        self.draft.clear();
        self.generation += 1;
        self.active_id = Some(conversation_id.to_string());

        let channel_name = conversation_channel(conversation_id);
        match self.channel.subscribe(&channel_name).await {
            Ok(mut rx) => {
                let events_tx = self.events_tx.clone();
                let generation = self.generation;
                self.subscription = Some(tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        let forwarded = SessionEvent::Channel { generation, event };
                        if events_tx.send(forwarded).is_err() {
                            break;
                        }
                    }
                }));
            }
            // Degrade to history-only; sends still work without the
            // live feed.
            Err(e) => warn!("Failed to subscribe to {}: {}", channel_name, e),
        }
        debug!(
            "Selected conversation {} (generation {})",
            conversation_id, self.generation
        );
        Ok(())
    }

    /// Update the draft from the composer. Re-broadcasts the typing
    /// signal and re-arms the quiet timer on every keystroke.
    pub fn keystroke(&mut self, draft: &str) {
        self.draft = draft.to_string();
        let Some(active_id) = self.active_id.clone() else {
            return;
        };

        let seq = self.typing.keystroke();
        self.broadcast_typing(&active_id, true);

        let events_tx = self.events_tx.clone();
        let generation = self.generation;
        let quiet = self.typing.quiet_period();
        tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            let _ = events_tx.send(SessionEvent::TypingTimeout { generation, seq });
        });
    }

    /// Submit the current draft.
    ///
    /// Appends an optimistic entry, clears the composer synchronously
    /// and dispatches the persistence call. Returns the temporary id of
    /// the new entry.
    pub fn submit(&mut self) -> Result<String, ChatError> {
        let active_id = self
            .active_id
            .clone()
            .ok_or(ChatError::NoActiveConversation)?;
        let content = self.draft.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let pending = PendingMessage::new(content);
        let temp_id = pending.temp_id.clone();
        self.draft.clear();
        self.dispatch_send(&active_id, &pending);
        self.optimistic.push(pending);
        Ok(temp_id)
    }

    /// Re-send a failed message. The entry leaves the failed set and
    /// comes back as a fresh optimistic entry with a new temporary id;
    /// the attempt counter carries over.
    pub fn retry(&mut self, temp_id: &str) -> Result<String, ChatError> {
        let active_id = self
            .active_id
            .clone()
            .ok_or(ChatError::NoActiveConversation)?;
        let idx = self
            .failed
            .iter()
            .position(|f| f.pending.temp_id == temp_id)
            .ok_or_else(|| ChatError::UnknownFailedMessage(temp_id.to_string()))?;
        let failed = self.failed.remove(idx);

        let pending = PendingMessage {
            temp_id: uuid::Uuid::new_v4().to_string(),
            content: failed.pending.content.clone(),
            timestamp: Utc::now(),
            attempts: failed.pending.attempts + 1,
        };
        debug!(
            "Retrying message (attempt {}): {:?}",
            pending.attempts, pending.temp_id
        );

        // The failure put this text back in the composer; the retry
        // consumes it.
        if self.draft == failed.pending.content {
            self.draft.clear();
        }

        let new_temp_id = pending.temp_id.clone();
        self.dispatch_send(&active_id, &pending);
        self.optimistic.push(pending);
        Ok(new_temp_id)
    }

    fn dispatch_send(&self, conversation_id: &str, pending: &PendingMessage) {
        let store = Arc::clone(&self.store);
        let events_tx = self.events_tx.clone();
        let generation = self.generation;
        let conversation_id = conversation_id.to_string();
        let temp_id = pending.temp_id.clone();
        let request = SendMessageRequest {
            conversation_id: conversation_id.clone(),
            content: pending.content.clone(),
        };
        tokio::spawn(async move {
            let result = store
                .send_message(request)
                .await
                .map_err(|e| e.to_string());
            let _ = events_tx.send(SessionEvent::SendResolved {
                generation,
                conversation_id,
                temp_id,
                result,
            });
        });
    }

    fn broadcast_typing(&self, conversation_id: &str, active: bool) {
        let channel = Arc::clone(&self.channel);
        let channel_name = conversation_channel(conversation_id);
        let user_id = self.user_id.clone();
        tokio::spawn(async move {
            if let Err(e) = channel.broadcast_typing(&channel_name, &user_id, active).await {
                debug!("Typing broadcast to {} failed: {}", channel_name, e);
            }
        });
    }

    /// Apply one event from the queue to the session state.
    pub fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::SendResolved {
                generation,
                conversation_id,
                temp_id,
                result,
            } => self.apply_send_resolved(generation, &conversation_id, &temp_id, result),
            SessionEvent::Channel { generation, event } => {
                self.apply_channel_event(generation, event)
            }
            SessionEvent::TypingTimeout { generation, seq } => {
                if generation != self.generation {
                    return;
                }
                if self.typing.timeout(seq) {
                    if let Some(active_id) = self.active_id.clone() {
                        self.broadcast_typing(&active_id, false);
                    }
                }
            }
        }
    }

    fn apply_send_resolved(
        &mut self,
        generation: u64,
        conversation_id: &str,
        temp_id: &str,
        result: Result<SendMessageResponse, String>,
    ) {
        if generation != self.generation || self.active_id.as_deref() != Some(conversation_id) {
            debug!(
                "Ignoring stale send resolution for {} in {}",
                temp_id, conversation_id
            );
            return;
        }
        let Some(idx) = self
            .optimistic
            .iter()
            .position(|p| p.temp_id == temp_id)
        else {
            debug!("Send resolution for unknown optimistic entry {}", temp_id);
            return;
        };
        let pending = self.optimistic.remove(idx);

        let error = match result {
            Ok(response) if response.success => {
                if let Some(message) = response.message {
                    self.merge_durable(message);
                }
                return;
            }
            Ok(response) => response
                .error
                .unwrap_or_else(|| "send rejected".to_string()),
            Err(e) => e,
        };

        warn!(
            "Send failed after {} attempt(s): {}",
            pending.attempts, error
        );
        // Put the text back in the composer so the draft is not lost.
        self.draft = pending.content.clone();
        self.failed.push(FailedMessage { pending, error });
    }

    fn apply_channel_event(&mut self, generation: u64, event: ChannelEvent) {
        if generation != self.generation {
            debug!("Ignoring channel event from an abandoned subscription");
            return;
        }
        match event {
            ChannelEvent::NewMessage { message } => {
                // The local optimistic/confirmed path already renders our
                // own messages; drop the echo.
                if message.sender_id == self.user_id {
                    debug!("Suppressing self-echo for message {}", message.id);
                    return;
                }
                if self.active_id.as_deref() != Some(message.conversation_id.as_str()) {
                    return;
                }
                let in_durable = self
                    .active_conversation()
                    .map(|c| c.messages.iter().any(|m| m.id == message.id))
                    .unwrap_or(false);
                if in_durable || self.realtime.iter().any(|m| m.id == message.id) {
                    return;
                }
                self.realtime.push(message);
            }
            ChannelEvent::Typing { user_id, active } => {
                if user_id == self.user_id {
                    return;
                }
                if active {
                    self.peer_typing.insert(user_id);
                } else {
                    self.peer_typing.remove(&user_id);
                }
            }
        }
    }

    /// Merge a server-confirmed message into the durable set, instead of
    /// refetching the whole conversation view.
    fn merge_durable(&mut self, message: Message) {
        let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        else {
            debug!(
                "Confirmed message for unknown conversation {}",
                message.conversation_id
            );
            return;
        };
        if conversation.messages.iter().any(|m| m.id == message.id) {
            return;
        }
        // A real-time echo may have slipped past the sender check (e.g.
        // delivered before the confirmation); the durable copy wins.
        self.realtime.retain(|m| m.id != message.id);
        conversation.messages.push(message);
    }

    /// Receive the next event from the session's spawned tasks.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Drain and apply events until the queue stays quiet for a short
    /// grace period.
    pub async fn settle(&mut self) {
        let grace = Duration::from_millis(50);
        while let Ok(Some(event)) = tokio::time::timeout(grace, self.next_event()).await {
            self.apply(event);
        }
    }

    /// Render the active conversation's transcript, grouped by calendar
    /// day relative to the local date.
    pub fn transcript(&self) -> Vec<DateGroup> {
        self.transcript_on(Local::now().date_naive())
    }

    /// Render the transcript against an explicit "today".
    pub fn transcript_on(&self, today: NaiveDate) -> Vec<DateGroup> {
        let mut entries: Vec<TranscriptEntry> = Vec::new();
        if let Some(conversation) = self.active_conversation() {
            for message in &conversation.messages {
                entries.push(confirmed_entry(message));
            }
        }
        for message in &self.realtime {
            entries.push(confirmed_entry(message));
        }
        for pending in &self.optimistic {
            entries.push(pending_entry(pending, &self.user_id, DeliveryState::Sending));
        }
        for failed in &self.failed {
            entries.push(pending_entry(
                &failed.pending,
                &self.user_id,
                DeliveryState::Failed,
            ));
        }
        group_by_day(entries, today)
    }
}

fn confirmed_entry(message: &Message) -> TranscriptEntry {
    TranscriptEntry {
        id: message.id.clone(),
        sender_id: message.sender_id.clone(),
        content: message.content.clone(),
        timestamp: message.timestamp,
        state: DeliveryState::Confirmed,
        attempts: 0,
    }
}

fn pending_entry(pending: &PendingMessage, user_id: &str, state: DeliveryState) -> TranscriptEntry {
    TranscriptEntry {
        id: pending.temp_id.clone(),
        sender_id: user_id.to_string(),
        content: pending.content.clone(),
        timestamp: pending.timestamp,
        state,
        attempts: pending.attempts,
    }
}
