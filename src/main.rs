use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use log::{info, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;

mod utils;

use marketchat::backend::memory::{FailureMode, InMemoryChannel, InMemoryStore};
use marketchat::backend::{conversation_channel, ChannelEvent};
use marketchat::models::{Conversation, DeliveryState, Message};
use marketchat::ChatSession;

/// Command line arguments for the marketchat demo
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Marketchat: optimistic-send chat reconciliation demo.",
    long_about = "Runs a scripted buyer/seller exchange against the in-memory backends\n\
    and prints the reconciled transcript after each step."
)]
struct Args {
    /// Write logs to this file instead of stdout
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    verbose: bool,
}

const BUYER: &str = "buyer-demo";
const SELLER: &str = "seller-demo";
const CONVERSATION: &str = "conv-vintage-bike";

fn seed_conversation() -> Conversation {
    let yesterday = Utc::now() - ChronoDuration::days(1);
    Conversation {
        id: CONVERSATION.to_string(),
        listing_id: "listing-vintage-bike".to_string(),
        buyer_id: BUYER.to_string(),
        seller_id: SELLER.to_string(),
        messages: vec![
            Message {
                id: "msg-1".to_string(),
                conversation_id: CONVERSATION.to_string(),
                sender_id: BUYER.to_string(),
                content: "Hi! Does the bike come with the rack?".to_string(),
                timestamp: yesterday,
                read: true,
            },
            Message {
                id: "msg-2".to_string(),
                conversation_id: CONVERSATION.to_string(),
                sender_id: SELLER.to_string(),
                content: "Yes, rack and lights included.".to_string(),
                timestamp: yesterday + ChronoDuration::minutes(4),
                read: true,
            },
        ],
        unread_count: 0,
    }
}

fn print_transcript(session: &ChatSession) {
    for group in session.transcript() {
        println!("--- {} ---", group.label);
        for entry in &group.entries {
            let marker = match entry.state {
                DeliveryState::Sending => " (sending)",
                DeliveryState::Failed => " (failed - retry available)",
                DeliveryState::Confirmed => "",
            };
            println!(
                "  [{}] {}: {}{}",
                entry.timestamp.format("%H:%M"),
                entry.sender_id,
                entry.content,
                marker
            );
        }
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let log_path = args.log_file.as_ref().and_then(|p| p.to_str());
    utils::init_logger(log_path, level)?;

    let store = Arc::new(InMemoryStore::new(BUYER, vec![seed_conversation()]));
    let channel = Arc::new(InMemoryChannel::new());
    store.attach_channel(Arc::clone(&channel)).await;

    let mut session = ChatSession::new(BUYER, store.clone(), channel.clone()).await;
    session.select_conversation(CONVERSATION).await?;
    info!("Session ready for {}", BUYER);

    println!("Initial transcript:");
    print_transcript(&session);

    // A successful optimistic send.
    session.keystroke("Great, I'll take it. When can I pick it up?");
    session.submit()?;
    println!("After submit (optimistic):");
    print_transcript(&session);

    session.settle().await;
    println!("After server confirmation:");
    print_transcript(&session);

    // A send that fails and is retried.
    store.fail_next_send(FailureMode::Transport).await;
    session.keystroke("Would tomorrow evening work?");
    session.submit()?;
    session.settle().await;
    println!("After failed send (draft restored: {:?}):", session.draft());
    print_transcript(&session);

    if let Some(failed) = session.failed().first() {
        let failed_id = failed.pending.temp_id.clone();
        session.retry(&failed_id)?;
        session.settle().await;
        println!("After retry:");
        print_transcript(&session);
    }

    // The seller answers over the real-time channel.
    let reply = Message {
        id: "msg-peer-1".to_string(),
        conversation_id: CONVERSATION.to_string(),
        sender_id: SELLER.to_string(),
        content: "Tomorrow at 6pm works, see you then!".to_string(),
        timestamp: Utc::now(),
        read: false,
    };
    channel
        .publish(
            &conversation_channel(CONVERSATION),
            ChannelEvent::NewMessage { message: reply },
        )
        .await;
    session.settle().await;
    println!("After peer reply:");
    print_transcript(&session);

    info!("Demo finished");
    Ok(())
}
