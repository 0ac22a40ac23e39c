// Rendering merge: one deduplicated transcript out of the durable,
// real-time, optimistic and failed message sets, bucketed by calendar
// day for display.

use chrono::{DateTime, Datelike, Local, NaiveDate, Utc};

use crate::models::DeliveryState;

/// One bubble in the rendered transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub id: String,
    pub sender_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub state: DeliveryState,
    /// Submission attempts so far; 0 for messages not authored locally
    /// in this session.
    pub attempts: u32,
}

/// A calendar-day bucket of transcript entries.
#[derive(Debug, Clone, PartialEq)]
pub struct DateGroup {
    pub date: NaiveDate,
    pub label: String,
    pub entries: Vec<TranscriptEntry>,
}

/// Display label for a day bucket: "Today", "Yesterday", else the full
/// weekday and date.
pub fn date_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_string()
    } else if today.pred_opt() == Some(date) {
        "Yesterday".to_string()
    } else {
        format!(
            "{}, {} {}, {}",
            date.format("%A"),
            date.format("%B"),
            date.day(),
            date.year()
        )
    }
}

/// Bucket entries by local calendar day.
///
/// Entries are deduplicated by id (first occurrence wins) and sorted by
/// timestamp within each day; the day groups themselves come out newest
/// first, so "Today" leads.
pub fn group_by_day(mut entries: Vec<TranscriptEntry>, today: NaiveDate) -> Vec<DateGroup> {
    let mut seen: Vec<String> = Vec::new();
    entries.retain(|entry| {
        if seen.iter().any(|id| *id == entry.id) {
            false
        } else {
            seen.push(entry.id.clone());
            true
        }
    });
    entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let mut groups: Vec<DateGroup> = Vec::new();
    for entry in entries {
        let date = entry.timestamp.with_timezone(&Local).date_naive();
        match groups.iter_mut().find(|g| g.date == date) {
            Some(group) => group.entries.push(entry),
            None => groups.push(DateGroup {
                date,
                label: date_label(date, today),
                entries: vec![entry],
            }),
        }
    }
    groups.sort_by(|a, b| b.date.cmp(&a.date));
    groups
}
