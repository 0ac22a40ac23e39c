// Transcript rendering tests: date grouping and the merge of durable,
// optimistic and real-time sets into one deduplicated view.

mod common;
use common::{buyer_session, message, rendered_count, BUYER, SELLER};

use anyhow::Result;
use chrono::{Datelike, Duration, Local, Utc};

use marketchat::backend::{conversation_channel, ChannelEvent};
use marketchat::models::DeliveryState;

#[tokio::test]
async fn three_days_of_history_render_three_headers_newest_first() -> Result<()> {
    let now = Utc::now();
    let history = vec![
        message("old-1", BUYER, "two days ago", now - Duration::days(2)),
        message("yday-1", SELLER, "yesterday", now - Duration::days(1)),
        message("today-1", BUYER, "today", now),
    ];
    let (_store, _channel, session) = buyer_session(history).await;

    let groups = session.transcript();
    assert_eq!(groups.len(), 3);
    assert_eq!(groups[0].label, "Today");
    assert_eq!(groups[1].label, "Yesterday");

    // The oldest bucket gets the explicit weekday/date label.
    let oldest = (Local::now() - Duration::days(2)).date_naive();
    assert_eq!(
        groups[2].label,
        format!(
            "{}, {} {}, {}",
            oldest.format("%A"),
            oldest.format("%B"),
            oldest.day(),
            oldest.year()
        )
    );

    // Each bucket only holds its own day's messages.
    assert_eq!(groups[0].entries[0].id, "today-1");
    assert_eq!(groups[1].entries[0].id, "yday-1");
    assert_eq!(groups[2].entries[0].id, "old-1");
    Ok(())
}

#[tokio::test]
async fn transcript_unions_every_message_set() -> Result<()> {
    let now = Utc::now();
    let history = vec![message("hist-1", SELLER, "from history", now - Duration::minutes(10))];
    let (store, channel, mut session) = buyer_session(history).await;

    // One peer message over the channel, one failed local send, one
    // in-flight optimistic send.
    channel
        .publish(
            &conversation_channel(common::CONV),
            ChannelEvent::NewMessage {
                message: message("peer-1", SELLER, "live reply", now - Duration::minutes(5)),
            },
        )
        .await;
    session.settle().await;

    store
        .fail_next_send(marketchat::backend::memory::FailureMode::Transport)
        .await;
    session.keystroke("failed one");
    session.submit()?;
    session.settle().await;

    session.keystroke("in flight");
    session.submit()?;

    assert_eq!(rendered_count(&session), 4);
    let groups = session.transcript();
    let states: Vec<DeliveryState> = groups
        .iter()
        .flat_map(|g| g.entries.iter().map(|e| e.state))
        .collect();
    assert!(states.contains(&DeliveryState::Confirmed));
    assert!(states.contains(&DeliveryState::Failed));
    assert!(states.contains(&DeliveryState::Sending));
    Ok(())
}

#[tokio::test]
async fn late_redelivery_of_own_message_never_duplicates() -> Result<()> {
    let (store, channel, mut session) = buyer_session(Vec::new()).await;

    session.keystroke("Hello");
    session.submit()?;
    session.settle().await;
    let stored = store.stored_messages(common::CONV).await;
    assert_eq!(stored.len(), 1);

    // The pub/sub service redelivers the confirmed message; the durable
    // set already has it.
    channel
        .publish(
            &conversation_channel(common::CONV),
            ChannelEvent::NewMessage {
                message: stored[0].clone(),
            },
        )
        .await;
    session.settle().await;

    assert!(session.realtime().is_empty());
    assert_eq!(rendered_count(&session), 1);
    Ok(())
}
