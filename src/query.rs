//! Read-only queries over the loaded summary table.
//!
//! These back the dashboard views: the raw listing with campaign and source
//! filters, headline KPIs, and per-source and per-campaign breakdowns. A table
//! that has not been loaded yet reads as empty.

use crate::load::{is_valid_identifier, table_exists};
use crate::records::UserCampaignSummary;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Row limit applied when the caller gives none.
pub const DEFAULT_ROW_LIMIT: usize = 100;
/// Largest row limit a caller may request.
pub const MAX_ROW_LIMIT: usize = 10_000;

/// Campaign and source filters. An empty list means "all".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryFilter {
    pub campaigns: Vec<String>,
    pub sources: Vec<String>,
}

impl SummaryFilter {
    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty() && self.sources.is_empty()
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        for (column, wanted) in [("campaign_name", &self.campaigns), ("source", &self.sources)] {
            if wanted.is_empty() {
                continue;
            }
            let start = values.len() + 1;
            let placeholders: Vec<String> = (start..start + wanted.len()).map(|i| format!("?{}", i)).collect();
            clauses.push(format!("{} IN ({})", column, placeholders.join(", ")));
            values.extend(wanted.iter().cloned().map(Value::Text));
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

/// Headline figures over the (filtered) summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Kpis {
    pub total_revenue: f64,
    pub total_playtime: f64,
    pub unique_users: i64,
    pub campaigns: i64,
    pub rows: i64,
}

/// A per-source total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTotal {
    pub source: String,
    pub total: f64,
}

/// A campaign ranked by attributed revenue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRanking {
    pub campaign_name: String,
    pub clicks: i64,
    pub revenue: f64,
}

/// Read-only access to the summary table.
#[derive(Debug)]
pub struct SummaryReader {
    conn: Connection,
    table_name: String,
}

impl SummaryReader {
    /// Opens the database file read-only.
    ///
    /// # Errors
    /// Returns `QueryError::InvalidTableName` or `QueryError::Connection` if the
    /// file cannot be opened (it is never created here).
    pub fn open<P: AsRef<Path>>(database_path: P, table_name: &str) -> Result<Self, QueryError> {
        let path = database_path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| QueryError::Connection(format!("{}: {}", path.display(), e)))?;
        Self::from_connection(conn, table_name)
    }

    /// Wraps an existing connection.
    pub fn from_connection(conn: Connection, table_name: &str) -> Result<Self, QueryError> {
        if !is_valid_identifier(table_name) {
            return Err(QueryError::InvalidTableName(table_name.to_string()));
        }
        Ok(SummaryReader {
            conn,
            table_name: table_name.to_string(),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn has_table(&self) -> Result<bool, QueryError> {
        table_exists(&self.conn, &self.table_name).map_err(QueryError::from)
    }

    /// Returns up to `limit` rows in table order.
    ///
    /// `limit` defaults to [`DEFAULT_ROW_LIMIT`] and is capped at [`MAX_ROW_LIMIT`].
    pub fn fetch_rows(&self, limit: Option<usize>, filter: &SummaryFilter) -> Result<Vec<UserCampaignSummary>, QueryError> {
        if !self.has_table()? {
            return Ok(Vec::new());
        }

        let limit = limit.unwrap_or(DEFAULT_ROW_LIMIT).min(MAX_ROW_LIMIT);
        let (where_sql, values) = filter.where_clause();
        let sql = format!(
            "SELECT user_id, campaign_name, source, clicked_at, total_playtime, total_revenue
             FROM \"{}\"{} ORDER BY rowid LIMIT {}",
            self.table_name, where_sql, limit
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok(UserCampaignSummary {
                user_id: row.get(0)?,
                campaign_name: row.get(1)?,
                source: row.get(2)?,
                clicked_at: row.get(3)?,
                total_playtime: row.get(4)?,
                total_revenue: row.get(5)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(QueryError::from)
    }

    /// Computes the headline figures over the filtered rows.
    pub fn kpis(&self, filter: &SummaryFilter) -> Result<Kpis, QueryError> {
        if !self.has_table()? {
            return Ok(Kpis::default());
        }

        let (where_sql, values) = filter.where_clause();
        let sql = format!(
            "SELECT COALESCE(SUM(total_revenue), 0.0), COALESCE(SUM(total_playtime), 0.0),
                    COUNT(DISTINCT user_id), COUNT(DISTINCT campaign_name), COUNT(*)
             FROM \"{}\"{}",
            self.table_name, where_sql
        );

        self.conn
            .query_row(&sql, params_from_iter(values), |row| {
                Ok(Kpis {
                    total_revenue: row.get(0)?,
                    total_playtime: row.get(1)?,
                    unique_users: row.get(2)?,
                    campaigns: row.get(3)?,
                    rows: row.get(4)?,
                })
            })
            .map_err(QueryError::from)
    }

    /// Total revenue per source, largest first.
    pub fn revenue_by_source(&self) -> Result<Vec<SourceTotal>, QueryError> {
        self.total_by_source("total_revenue")
    }

    /// Total playtime per source, largest first.
    pub fn playtime_by_source(&self) -> Result<Vec<SourceTotal>, QueryError> {
        self.total_by_source("total_playtime")
    }

    fn total_by_source(&self, measure: &str) -> Result<Vec<SourceTotal>, QueryError> {
        if !self.has_table()? {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT source, SUM({measure}) AS total FROM \"{table}\"
             GROUP BY source ORDER BY total DESC, source",
            measure = measure,
            table = self.table_name
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(SourceTotal {
                source: row.get(0)?,
                total: row.get(1)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(QueryError::from)
    }

    /// Campaigns ranked by revenue, with their click counts.
    pub fn top_campaigns(&self, limit: usize) -> Result<Vec<CampaignRanking>, QueryError> {
        if !self.has_table()? {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT campaign_name, COUNT(*) AS clicks, SUM(total_revenue) AS revenue
             FROM \"{}\" GROUP BY campaign_name ORDER BY revenue DESC, campaign_name LIMIT {}",
            self.table_name,
            limit.min(MAX_ROW_LIMIT)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(CampaignRanking {
                campaign_name: row.get(0)?,
                clicks: row.get(1)?,
                revenue: row.get(2)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(QueryError::from)
    }
}

/// Errors that can occur while reading the summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    InvalidTableName(String),
    /// Database could not be opened
    Connection(String),
    /// Query failed
    Sql(String),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::InvalidTableName(name) => write!(f, "Invalid table name: {}", name),
            QueryError::Connection(msg) => write!(f, "Connection error: {}", msg),
            QueryError::Sql(msg) => write!(f, "SQL error: {}", msg),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<rusqlite::Error> for QueryError {
    fn from(e: rusqlite::Error) -> Self {
        QueryError::Sql(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::{replace_snapshot, DEFAULT_TABLE_NAME};
    use chrono::{TimeZone, Utc};

    fn summary(user_id: i64, campaign: &str, source: &str, playtime: f64, revenue: f64) -> UserCampaignSummary {
        UserCampaignSummary {
            user_id,
            campaign_name: campaign.to_string(),
            source: source.to_string(),
            clicked_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            total_playtime: playtime,
            total_revenue: revenue,
        }
    }

    fn sample_reader() -> SummaryReader {
        let mut conn = Connection::open_in_memory().unwrap();
        replace_snapshot(
            &mut conn,
            DEFAULT_TABLE_NAME,
            &[
                summary(1, "A", "fb", 40.0, 5.0),
                summary(1, "B", "google", 40.0, 5.0),
                summary(2, "A", "google", 20.0, 2.0),
                summary(3, "C", "fb", 0.0, 0.0),
            ],
        )
        .unwrap();
        SummaryReader::from_connection(conn, DEFAULT_TABLE_NAME).unwrap()
    }

    #[test]
    fn test_fetch_rows_in_table_order() {
        let reader = sample_reader();
        let rows = reader.fetch_rows(None, &SummaryFilter::default()).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].campaign_name, "A");
        assert_eq!(rows[3].user_id, 3);

        let limited = reader.fetch_rows(Some(2), &SummaryFilter::default()).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_fetch_rows_filtered() {
        let reader = sample_reader();
        let filter = SummaryFilter {
            campaigns: vec!["A".to_string()],
            sources: vec!["google".to_string()],
        };
        let rows = reader.fetch_rows(None, &filter).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, 2);

        let by_source = SummaryFilter {
            campaigns: Vec::new(),
            sources: vec!["fb".to_string(), "google".to_string()],
        };
        assert_eq!(reader.fetch_rows(None, &by_source).unwrap().len(), 4);
    }

    #[test]
    fn test_kpis() {
        let reader = sample_reader();
        let kpis = reader.kpis(&SummaryFilter::default()).unwrap();
        assert_eq!(kpis.total_revenue, 12.0);
        assert_eq!(kpis.total_playtime, 100.0);
        assert_eq!(kpis.unique_users, 3);
        assert_eq!(kpis.campaigns, 3);
        assert_eq!(kpis.rows, 4);

        let fb = SummaryFilter {
            campaigns: Vec::new(),
            sources: vec!["fb".to_string()],
        };
        let kpis = reader.kpis(&fb).unwrap();
        assert_eq!(kpis.total_revenue, 5.0);
        assert_eq!(kpis.unique_users, 2);
    }

    #[test]
    fn test_kpis_no_matching_rows() {
        let reader = sample_reader();
        let filter = SummaryFilter {
            campaigns: vec!["Z".to_string()],
            sources: Vec::new(),
        };
        assert_eq!(reader.kpis(&filter).unwrap(), Kpis::default());
    }

    #[test]
    fn test_revenue_and_playtime_by_source() {
        let reader = sample_reader();
        let revenue = reader.revenue_by_source().unwrap();
        assert_eq!(revenue[0].source, "google");
        assert_eq!(revenue[0].total, 7.0);
        assert_eq!(revenue[1].total, 5.0);

        let playtime = reader.playtime_by_source().unwrap();
        assert_eq!(playtime[0].source, "google");
        assert_eq!(playtime[0].total, 60.0);
        assert_eq!(playtime[1].total, 40.0);
    }

    #[test]
    fn test_top_campaigns() {
        let reader = sample_reader();
        let top = reader.top_campaigns(2).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(
            top[0],
            CampaignRanking {
                campaign_name: "A".to_string(),
                clicks: 2,
                revenue: 7.0
            }
        );
        assert_eq!(top[1].campaign_name, "B");
    }

    #[test]
    fn test_missing_table_reads_empty() {
        let reader = SummaryReader::from_connection(Connection::open_in_memory().unwrap(), "never_loaded").unwrap();
        assert!(reader.fetch_rows(None, &SummaryFilter::default()).unwrap().is_empty());
        assert_eq!(reader.kpis(&SummaryFilter::default()).unwrap(), Kpis::default());
        assert!(reader.revenue_by_source().unwrap().is_empty());
        assert!(reader.top_campaigns(5).unwrap().is_empty());
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = SummaryReader::open(dir.path().join("absent.db"), DEFAULT_TABLE_NAME);
        assert!(matches!(result, Err(QueryError::Connection(_))));
    }

    #[test]
    fn test_invalid_table_name() {
        let result = SummaryReader::from_connection(Connection::open_in_memory().unwrap(), "x; y");
        assert!(matches!(result, Err(QueryError::InvalidTableName(_))));
    }
}
