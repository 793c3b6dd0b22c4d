use crate::coerce;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Columns a game-event source must declare.
pub const GAME_EVENT_COLUMNS: &[&str] = &[
    "user_id",
    "session_id",
    "event_time",
    "playtime_minutes",
    "revenue",
];

/// Columns a campaign-click source must declare.
pub const CAMPAIGN_CLICK_COLUMNS: &[&str] = &["user_id", "campaign_name", "source", "clicked_at"];

/// A raw row type an extractor can produce.
pub trait Record: DeserializeOwned + Clone + Send + 'static {
    /// Dataset name used in logs and errors.
    const DATASET: &'static str;
    /// Columns the source must declare for the record set to be usable.
    const COLUMNS: &'static [&'static str];
}

/// One gameplay session-event exactly as read from the source.
///
/// Every field is optional here; completeness is decided by the transform's
/// clean step, not by the extractor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GameEventRow {
    #[serde(default, deserialize_with = "coerce::optional_id")]
    pub user_id: Option<i64>,
    #[serde(default, deserialize_with = "coerce::optional_text")]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "coerce::optional_timestamp")]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "coerce::optional_number")]
    pub playtime_minutes: Option<f64>,
    /// May be negative for refunds.
    #[serde(default, deserialize_with = "coerce::optional_number")]
    pub revenue: Option<f64>,
}

impl Record for GameEventRow {
    const DATASET: &'static str = "game_events";
    const COLUMNS: &'static [&'static str] = GAME_EVENT_COLUMNS;
}

/// One ad/campaign click exactly as read from the source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CampaignClickRow {
    #[serde(default, deserialize_with = "coerce::optional_id")]
    pub user_id: Option<i64>,
    #[serde(default, deserialize_with = "coerce::optional_text")]
    pub campaign_name: Option<String>,
    /// Traffic channel, e.g. `facebook` or `google`.
    #[serde(default, deserialize_with = "coerce::optional_text")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "coerce::optional_timestamp")]
    pub clicked_at: Option<DateTime<Utc>>,
}

impl Record for CampaignClickRow {
    const DATASET: &'static str = "campaign_clicks";
    const COLUMNS: &'static [&'static str] = CAMPAIGN_CLICK_COLUMNS;
}

/// A game event with every required field present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub user_id: i64,
    pub session_id: String,
    pub event_time: DateTime<Utc>,
    /// Missing source values are stored as 0.
    pub playtime_minutes: f64,
    /// Missing source values are stored as 0.
    pub revenue: f64,
}

impl From<GameEvent> for GameEventRow {
    fn from(event: GameEvent) -> Self {
        GameEventRow {
            user_id: Some(event.user_id),
            session_id: Some(event.session_id),
            event_time: Some(event.event_time),
            playtime_minutes: Some(event.playtime_minutes),
            revenue: Some(event.revenue),
        }
    }
}

/// A campaign click with every required field present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignClick {
    pub user_id: i64,
    pub campaign_name: String,
    pub source: String,
    pub clicked_at: DateTime<Utc>,
}

impl From<CampaignClick> for CampaignClickRow {
    fn from(click: CampaignClick) -> Self {
        CampaignClickRow {
            user_id: Some(click.user_id),
            campaign_name: Some(click.campaign_name),
            source: Some(click.source),
            clicked_at: Some(click.clicked_at),
        }
    }
}

/// One campaign click enriched with the clicking user's total gameplay.
///
/// This is the unit the loader persists and the viewer reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCampaignSummary {
    pub user_id: i64,
    pub campaign_name: String,
    pub source: String,
    pub clicked_at: DateTime<Utc>,
    pub total_playtime: f64,
    pub total_revenue: f64,
}

/// A tabular record set: the rows plus the column names the source declared.
///
/// A set with no columns and no rows is the "nothing extracted" value a
/// failed extraction hands downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet<R> {
    columns: Vec<String>,
    rows: Vec<R>,
}

impl<R> RecordSet<R> {
    /// Creates a record set from declared columns and rows.
    pub fn new(columns: Vec<String>, rows: Vec<R>) -> Self {
        RecordSet { columns, rows }
    }

    /// Creates the empty, column-less record set.
    pub fn empty() -> Self {
        RecordSet {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<R> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns true for a set that declares nothing at all.
    pub fn is_untyped(&self) -> bool {
        self.columns.is_empty() && self.rows.is_empty()
    }

    /// Returns the required columns this set does not declare.
    ///
    /// The untyped empty set is never missing anything.
    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        if self.is_untyped() {
            return Vec::new();
        }
        required
            .iter()
            .filter(|name| !self.columns.iter().any(|column| column == *name))
            .map(|name| name.to_string())
            .collect()
    }
}

impl<R: Record> RecordSet<R> {
    /// Creates a record set declaring every column of the record type.
    pub fn from_rows(rows: Vec<R>) -> Self {
        RecordSet {
            columns: R::COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }
}

impl<R> Default for RecordSet<R> {
    fn default() -> Self {
        Self::empty()
    }
}
