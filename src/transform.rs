//! Clean, aggregate and join the two event streams into the campaign summary.
//!
//! The transform is a pure, synchronous, in-memory computation:
//!
//! 1. clean: drop game rows lacking `user_id`, `session_id` or `event_time`, and
//!    click rows lacking any of their four fields;
//! 2. aggregate: sum playtime and revenue of the cleaned game rows per user;
//! 3. join: left outer join the cleaned clicks against the per-user totals;
//! 4. fill: clicks of users without gameplay get totals of 0.

use crate::records::{
    CampaignClick, CampaignClickRow, GameEvent, GameEventRow, Record, RecordSet,
    UserCampaignSummary,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Errors that make the transform impossible to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// A record set does not declare a required column at all.
    ///
    /// This is a configuration or contract error, not a data-quality issue.
    SchemaViolation {
        dataset: &'static str,
        missing: Vec<String>,
    },
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformError::SchemaViolation { dataset, missing } => write!(
                f,
                "Schema violation: {} is missing required column(s) {}",
                dataset,
                missing.join(", ")
            ),
        }
    }
}

impl std::error::Error for TransformError {}

/// A single row lacking a required field. Recovered by exclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordIncomplete {
    /// First required field found missing
    pub field: &'static str,
}

impl std::fmt::Display for RecordIncomplete {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Record incomplete: missing {}", self.field)
    }
}

impl std::error::Error for RecordIncomplete {}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, RecordIncomplete> {
    value.ok_or(RecordIncomplete { field })
}

impl TryFrom<GameEventRow> for GameEvent {
    type Error = RecordIncomplete;

    fn try_from(row: GameEventRow) -> Result<Self, Self::Error> {
        Ok(GameEvent {
            user_id: required(row.user_id, "user_id")?,
            session_id: required(row.session_id, "session_id")?,
            event_time: required(row.event_time, "event_time")?,
            playtime_minutes: row.playtime_minutes.unwrap_or(0.0),
            revenue: row.revenue.unwrap_or(0.0),
        })
    }
}

impl TryFrom<CampaignClickRow> for CampaignClick {
    type Error = RecordIncomplete;

    fn try_from(row: CampaignClickRow) -> Result<Self, Self::Error> {
        Ok(CampaignClick {
            user_id: required(row.user_id, "user_id")?,
            campaign_name: required(row.campaign_name, "campaign_name")?,
            source: required(row.source, "source")?,
            clicked_at: required(row.clicked_at, "clicked_at")?,
        })
    }
}

/// Per-user gameplay totals.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UserActivity {
    pub total_playtime: f64,
    pub total_revenue: f64,
}

/// Fails with [`TransformError::SchemaViolation`] if `records` lacks a required column.
pub fn check_schema<R: Record>(records: &RecordSet<R>) -> Result<(), TransformError> {
    let missing = records.missing_columns(R::COLUMNS);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(TransformError::SchemaViolation {
            dataset: R::DATASET,
            missing,
        })
    }
}

fn clean<R, T>(rows: &[R]) -> Vec<T>
where
    R: Record,
    T: TryFrom<R, Error = RecordIncomplete>,
{
    let mut kept = Vec::with_capacity(rows.len());
    let mut dropped: BTreeMap<&'static str, usize> = BTreeMap::new();

    for row in rows {
        match T::try_from(row.clone()) {
            Ok(record) => kept.push(record),
            Err(incomplete) => *dropped.entry(incomplete.field).or_insert(0) += 1,
        }
    }

    let dropped_total: usize = dropped.values().sum();
    if dropped_total > 0 {
        warn!(
            dataset = R::DATASET,
            dropped = dropped_total,
            kept = kept.len(),
            "Dropped incomplete records"
        );
        debug!(dataset = R::DATASET, by_field = ?dropped, "Incomplete records by first missing field");
    }

    kept
}

/// Keeps the game rows whose `user_id`, `session_id` and `event_time` are present.
pub fn clean_game_events(rows: &[GameEventRow]) -> Vec<GameEvent> {
    clean(rows)
}

/// Keeps the click rows whose four fields are all present.
pub fn clean_campaign_clicks(rows: &[CampaignClickRow]) -> Vec<CampaignClick> {
    clean(rows)
}

/// Sums playtime and revenue per user. Session detail is discarded.
///
/// Users without game events are absent from the result.
pub fn aggregate_by_user(games: &[GameEvent]) -> HashMap<i64, UserActivity> {
    let mut totals: HashMap<i64, UserActivity> = HashMap::new();
    for event in games {
        let activity = totals.entry(event.user_id).or_default();
        activity.total_playtime += event.playtime_minutes;
        activity.total_revenue += event.revenue;
    }
    totals
}

/// Left outer join of `clicks` against `activity` on `user_id`, filling gaps with 0.
///
/// Every click yields exactly one summary row, in input order. A user's totals
/// are repeated on each of their clicks, never divided between them.
pub fn join_activity(
    clicks: Vec<CampaignClick>,
    activity: &HashMap<i64, UserActivity>,
) -> Vec<UserCampaignSummary> {
    clicks
        .into_iter()
        .map(|click| {
            let totals = activity.get(&click.user_id).copied().unwrap_or_default();
            UserCampaignSummary {
                user_id: click.user_id,
                campaign_name: click.campaign_name,
                source: click.source,
                clicked_at: click.clicked_at,
                total_playtime: totals.total_playtime,
                total_revenue: totals.total_revenue,
            }
        })
        .collect()
}

/// Combines game events and campaign clicks into one summary row per valid click.
///
/// # Arguments
/// * `games` - raw game-event rows, not assumed clean
/// * `clicks` - raw campaign-click rows, not assumed clean
///
/// # Errors
/// Returns [`TransformError::SchemaViolation`] when either input declares
/// columns but lacks a required one. Individual incomplete rows are dropped,
/// never reported as errors.
pub fn transform_and_join(
    games: &RecordSet<GameEventRow>,
    clicks: &RecordSet<CampaignClickRow>,
) -> Result<Vec<UserCampaignSummary>, TransformError> {
    check_schema(games)?;
    check_schema(clicks)?;

    let games = clean_game_events(games.rows());
    let clicks = clean_campaign_clicks(clicks.rows());

    let activity = aggregate_by_user(&games);
    debug!(users = activity.len(), "Aggregated game activity");

    let summary = join_activity(clicks, &activity);
    info!(records = summary.len(), "Transformed data after join and aggregation");

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn game(user_id: i64, playtime: f64, revenue: f64) -> GameEventRow {
        GameEventRow {
            user_id: Some(user_id),
            session_id: Some(format!("s-{}-{}", user_id, playtime)),
            event_time: Some(day(1)),
            playtime_minutes: Some(playtime),
            revenue: Some(revenue),
        }
    }

    fn click(user_id: i64, campaign: &str, source: &str) -> CampaignClickRow {
        CampaignClickRow {
            user_id: Some(user_id),
            campaign_name: Some(campaign.to_string()),
            source: Some(source.to_string()),
            clicked_at: Some(day(1)),
        }
    }

    #[test]
    fn test_click_without_games_gets_zero_totals() {
        let games = RecordSet::<GameEventRow>::from_rows(vec![]);
        let clicks = RecordSet::from_rows(vec![click(1, "A", "fb")]);

        let summary = transform_and_join(&games, &clicks).unwrap();

        assert_eq!(
            summary,
            vec![UserCampaignSummary {
                user_id: 1,
                campaign_name: "A".to_string(),
                source: "fb".to_string(),
                clicked_at: day(1),
                total_playtime: 0.0,
                total_revenue: 0.0,
            }]
        );
    }

    #[test]
    fn test_aggregate_repeated_on_each_click() {
        let games = RecordSet::from_rows(vec![game(1, 5.0, 1.0)]);
        let clicks = RecordSet::from_rows(vec![click(1, "A", "fb"), click(1, "B", "google")]);

        let summary = transform_and_join(&games, &clicks).unwrap();

        assert_eq!(summary.len(), 2);
        for row in &summary {
            assert_eq!(row.total_playtime, 5.0);
            assert_eq!(row.total_revenue, 1.0);
        }
    }

    #[test]
    fn test_aggregation_sums_per_user() {
        let games = clean_game_events(&[game(7, 10.0, 5.0), game(7, 20.0, -2.0), game(8, 1.0, 1.0)]);
        let activity = aggregate_by_user(&games);

        assert_eq!(activity.len(), 2);
        assert_eq!(activity[&7].total_playtime, 30.0);
        assert_eq!(activity[&7].total_revenue, 3.0);
        assert_eq!(activity[&8].total_playtime, 1.0);
    }

    #[test]
    fn test_click_missing_source_is_excluded() {
        let mut incomplete = click(2, "A", "fb");
        incomplete.source = None;
        let games = RecordSet::from_rows(vec![game(2, 3.0, 3.0)]);
        let clicks = RecordSet::from_rows(vec![click(1, "A", "fb"), incomplete]);

        let summary = transform_and_join(&games, &clicks).unwrap();

        assert_eq!(summary.len(), 1);
        assert!(summary.iter().all(|row| row.user_id != 2));
    }

    #[test]
    fn test_cardinality_matches_cleaned_clicks() {
        let mut missing_time = click(3, "C", "tiktok");
        missing_time.clicked_at = None;
        let raw_clicks = vec![
            click(1, "A", "fb"),
            click(1, "A", "fb"),
            click(2, "B", "google"),
            missing_time,
            click(9, "C", "tiktok"),
        ];
        let games = RecordSet::from_rows(vec![
            game(1, 1.0, 1.0),
            game(1, 2.0, 2.0),
            game(2, 4.0, 0.0),
            game(2, 8.0, 0.0),
            game(2, 16.0, 0.0),
        ]);
        let clicks = RecordSet::from_rows(raw_clicks.clone());

        let summary = transform_and_join(&games, &clicks).unwrap();

        assert_eq!(summary.len(), clean_campaign_clicks(&raw_clicks).len());
        assert_eq!(summary.len(), 4);
        assert!(summary
            .iter()
            .all(|row| row.total_playtime.is_finite() && row.total_revenue.is_finite()));
    }

    #[test]
    fn test_output_keeps_click_order() {
        let games = RecordSet::from_rows(vec![game(2, 1.0, 0.0)]);
        let clicks = RecordSet::from_rows(vec![
            click(3, "C", "x"),
            click(1, "A", "x"),
            click(2, "B", "x"),
        ]);

        let summary = transform_and_join(&games, &clicks).unwrap();
        let users: Vec<i64> = summary.iter().map(|row| row.user_id).collect();
        assert_eq!(users, vec![3, 1, 2]);
    }

    #[test]
    fn test_incomplete_game_rows_do_not_count() {
        let mut no_session = game(1, 100.0, 100.0);
        no_session.session_id = None;
        let mut no_user = game(1, 100.0, 100.0);
        no_user.user_id = None;
        let games = RecordSet::from_rows(vec![game(1, 2.0, 3.0), no_session, no_user]);
        let clicks = RecordSet::from_rows(vec![click(1, "A", "fb")]);

        let summary = transform_and_join(&games, &clicks).unwrap();
        assert_eq!(summary[0].total_playtime, 2.0);
        assert_eq!(summary[0].total_revenue, 3.0);
    }

    #[test]
    fn test_missing_measures_count_as_zero() {
        let mut no_measures = game(1, 0.0, 0.0);
        no_measures.playtime_minutes = None;
        no_measures.revenue = None;
        let games = RecordSet::from_rows(vec![no_measures, game(1, 4.0, 2.5)]);
        let clicks = RecordSet::from_rows(vec![click(1, "A", "fb")]);

        let summary = transform_and_join(&games, &clicks).unwrap();
        assert_eq!(summary[0].total_playtime, 4.0);
        assert_eq!(summary[0].total_revenue, 2.5);
    }

    #[test]
    fn test_clean_is_idempotent() {
        let mut partial = game(4, 1.0, 1.0);
        partial.event_time = None;
        let mut unmeasured = game(5, 0.0, 0.0);
        unmeasured.revenue = None;
        let rows = vec![game(1, 1.0, 2.0), partial, unmeasured];

        let once = clean_game_events(&rows);
        let again_rows: Vec<GameEventRow> = once.iter().cloned().map(GameEventRow::from).collect();
        let twice = clean_game_events(&again_rows);
        assert_eq!(once, twice);

        let mut no_campaign = click(1, "A", "fb");
        no_campaign.campaign_name = None;
        let clicks = vec![click(1, "A", "fb"), no_campaign];
        let once = clean_campaign_clicks(&clicks);
        let again_rows: Vec<CampaignClickRow> =
            once.iter().cloned().map(CampaignClickRow::from).collect();
        assert_eq!(clean_campaign_clicks(&again_rows), once);
    }

    #[test]
    fn test_empty_inputs_produce_empty_output() {
        let summary = transform_and_join(&RecordSet::empty(), &RecordSet::empty()).unwrap();
        assert!(summary.is_empty());
    }

    #[test]
    fn test_missing_column_is_schema_violation() {
        let games = RecordSet::from_rows(vec![game(1, 1.0, 1.0)]);
        let clicks: RecordSet<CampaignClickRow> = RecordSet::new(
            vec![
                "user_id".to_string(),
                "campaign_name".to_string(),
                "clicked_at".to_string(),
            ],
            vec![],
        );

        let err = transform_and_join(&games, &clicks).unwrap_err();
        assert_eq!(
            err,
            TransformError::SchemaViolation {
                dataset: "campaign_clicks",
                missing: vec!["source".to_string()],
            }
        );
        assert!(err.to_string().contains("source"));
    }

    #[test]
    fn test_record_incomplete_names_first_missing_field() {
        let row = CampaignClickRow {
            user_id: Some(1),
            ..Default::default()
        };
        let err = CampaignClick::try_from(row).unwrap_err();
        assert_eq!(err.field, "campaign_name");
    }
}
