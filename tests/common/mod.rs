// Common test utilities for integration tests
// This module contains shared code for all integration tests

use std::sync::Arc;
use std::sync::Once;

use chrono::{DateTime, Utc};
use log::LevelFilter;

use marketchat::backend::memory::{InMemoryChannel, InMemoryStore};
use marketchat::models::{Conversation, Message};
use marketchat::ChatSession;

pub const BUYER: &str = "buyer-1";
pub const SELLER: &str = "seller-1";
pub const CONV: &str = "conv-1";
pub const OTHER_CONV: &str = "conv-2";

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

pub fn message(id: &str, sender: &str, content: &str, timestamp: DateTime<Utc>) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: CONV.to_string(),
        sender_id: sender.to_string(),
        content: content.to_string(),
        timestamp,
        read: false,
    }
}

pub fn conversation(id: &str, messages: Vec<Message>) -> Conversation {
    Conversation {
        id: id.to_string(),
        listing_id: format!("listing-{}", id),
        buyer_id: BUYER.to_string(),
        seller_id: SELLER.to_string(),
        messages,
        unread_count: 0,
    }
}

/// A buyer-side session over the in-memory backends, with the store
/// echoing confirmed messages onto the channel the way a hosted pub/sub
/// service would, and `CONV` already selected.
pub async fn buyer_session(
    history: Vec<Message>,
) -> (Arc<InMemoryStore>, Arc<InMemoryChannel>, ChatSession) {
    setup_logging();
    let store = Arc::new(InMemoryStore::new(
        BUYER,
        vec![conversation(CONV, history), conversation(OTHER_CONV, Vec::new())],
    ));
    let channel = Arc::new(InMemoryChannel::new());
    store.attach_channel(Arc::clone(&channel)).await;

    let mut session = ChatSession::new(BUYER, store.clone(), channel.clone()).await;
    session
        .select_conversation(CONV)
        .await
        .expect("seeded conversation should select");
    (store, channel, session)
}

/// Total number of rendered transcript entries across all day groups.
pub fn rendered_count(session: &ChatSession) -> usize {
    session
        .transcript()
        .iter()
        .map(|group| group.entries.len())
        .sum()
}
