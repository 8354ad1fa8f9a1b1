use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TemplateSource {
    Manual,
    Learned,
}

impl TemplateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Learned => "learned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(Self::Manual),
            "learned" => Some(Self::Learned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockSource {
    Manual,
    Event,
}

impl BlockSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Event => "event",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(Self::Manual),
            "event" => Some(Self::Event),
            _ => None,
        }
    }
}

/// Recurring weekly rule. `weekday` counts from Sunday (0) to Saturday (6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTemplate {
    pub id: String,
    pub user_id: String,
    pub weekday: u8,
    pub start_minute: u16,
    pub end_minute: u16,
    pub available: bool,
    pub source: TemplateSource,
    pub sample_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleBlock {
    pub id: String,
    pub user_id: String,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub available: bool,
    pub source: BlockSource,
    pub event_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityOverride {
    pub user_id: String,
    pub event_id: String,
    pub event_date_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventDate {
    pub id: String,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
}

/// One event as seen by a single participant: its candidate dates and the
/// answers that participant has stored so far, keyed by event date id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantEvent {
    pub id: String,
    pub title: String,
    pub finalized: bool,
    pub dates: Vec<EventDate>,
    pub answers: HashMap<String, bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerWrite {
    pub event_date_id: String,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DateDiff {
    pub event_date_id: String,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub current: Option<bool>,
    pub desired: Option<bool>,
    pub will_change: bool,
    pub is_protected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncDiff {
    pub event_id: String,
    pub event_title: String,
    pub total_changes: usize,
    pub to_unavailable: usize,
    pub to_available: usize,
    pub protected_skipped: usize,
    pub dates: Vec<DateDiff>,
}

impl SyncDiff {
    pub fn has_changes(&self) -> bool {
        self.total_changes > 0
    }

    pub fn pending_writes(&self) -> Vec<AnswerWrite> {
        self.dates
            .iter()
            .filter(|date| date.will_change && !date.is_protected)
            .filter_map(|date| {
                date.desired.map(|available| AnswerWrite {
                    event_date_id: date.event_date_id.clone(),
                    available,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub events_with_changes: usize,
    pub total_changes: usize,
    pub protected_skipped: usize,
}

impl SyncSummary {
    pub fn from_diffs(diffs: &[SyncDiff]) -> Self {
        diffs.iter().fold(Self::default(), |mut summary, diff| {
            if diff.has_changes() {
                summary.events_with_changes += 1;
            }
            summary.total_changes += diff.total_changes;
            summary.protected_skipped += diff.protected_skipped;
            summary
        })
    }
}
