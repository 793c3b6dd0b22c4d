use crate::config::DatabaseConfig;
use crate::records::UserCampaignSummary;
use rusqlite::{params, Connection, Result as SqliteResult};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Table the summary snapshot is written to unless configured otherwise.
pub const DEFAULT_TABLE_NAME: &str = "user_campaign_summary";

/// Returns true if `name` can be spliced into SQL as a bare table name.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Checks if a table exists in the database.
///
/// # Arguments
/// * `conn` - Open connection
/// * `table_name` - Name of the table to check
///
/// # Returns
/// Returns `true` if the table exists, `false` otherwise.
pub fn table_exists(conn: &Connection, table_name: &str) -> SqliteResult<bool> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table' AND name=?1")?;
    stmt.exists([table_name])
}

/// Replaces the contents of `table_name` with `rows` in a single transaction.
///
/// The table is dropped, recreated and filled before the commit. On any error
/// the transaction rolls back and the previous snapshot stays in place.
///
/// # Errors
/// Returns `rusqlite::Error::InvalidParameterName` for an unusable table name,
/// or the underlying SQLite error.
pub fn replace_snapshot(
    conn: &mut Connection,
    table_name: &str,
    rows: &[UserCampaignSummary],
) -> SqliteResult<usize> {
    if !is_valid_identifier(table_name) {
        return Err(rusqlite::Error::InvalidParameterName(table_name.to_string()));
    }

    let tx = conn.transaction()?;
    tx.execute(&format!("DROP TABLE IF EXISTS \"{}\"", table_name), [])?;
    tx.execute(
        &format!(
            "CREATE TABLE \"{}\" (
                user_id INTEGER,
                campaign_name TEXT,
                source TEXT,
                clicked_at TIMESTAMP,
                total_playtime FLOAT,
                total_revenue FLOAT
            )",
            table_name
        ),
        [],
    )?;

    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO \"{}\" (user_id, campaign_name, source, clicked_at, total_playtime, total_revenue)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            table_name
        ))?;
        for row in rows {
            stmt.execute(params![
                row.user_id,
                row.campaign_name,
                row.source,
                row.clicked_at,
                row.total_playtime,
                row.total_revenue,
            ])?;
        }
    }

    tx.commit()?;
    Ok(rows.len())
}

/// Writes summary snapshots to a SQLite database file.
///
/// Each load replaces the whole table; earlier snapshots are not kept.
/// Every load opens its own connection and closes it before returning.
#[derive(Debug, Clone)]
pub struct SqliteLoader {
    database_path: PathBuf,
    table_name: String,
}

impl SqliteLoader {
    /// Creates a loader for the configured database and table.
    pub fn new(config: &DatabaseConfig) -> Self {
        Self::with_table(config.database_path(), &config.table_name)
    }

    /// Creates a loader for an explicit database file and table.
    pub fn with_table<P: AsRef<Path>>(database_path: P, table_name: &str) -> Self {
        SqliteLoader {
            database_path: database_path.as_ref().to_path_buf(),
            table_name: table_name.to_string(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Replaces the target table with `rows`.
    ///
    /// # Returns
    /// The number of rows written.
    ///
    /// # Errors
    /// Returns `LoadError` if the table name is invalid, the database cannot be
    /// opened, or the write fails. Failures are logged before returning.
    pub fn load(&self, rows: &[UserCampaignSummary]) -> Result<usize, LoadError> {
        let result = self.write(rows);
        match &result {
            Ok(count) => info!(
                table = %self.table_name,
                records = count,
                "Data loaded successfully"
            ),
            Err(e) => error!(table = %self.table_name, error = %e, "Error loading data"),
        }
        result
    }

    fn write(&self, rows: &[UserCampaignSummary]) -> Result<usize, LoadError> {
        if !is_valid_identifier(&self.table_name) {
            return Err(LoadError::InvalidTableName(self.table_name.clone()));
        }

        let mut conn = Connection::open(&self.database_path).map_err(|e| {
            LoadError::Connection(format!("{}: {}", self.database_path.display(), e))
        })?;

        replace_snapshot(&mut conn, &self.table_name, rows).map_err(|e| LoadError::Write(e.to_string()))
    }
}

/// Errors that can occur while persisting a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// Table name is not a plain SQL identifier
    InvalidTableName(String),
    /// Database could not be opened
    Connection(String),
    /// Drop, create or insert failed; the previous snapshot is kept
    Write(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::InvalidTableName(name) => write!(f, "Invalid table name: {}", name),
            LoadError::Connection(msg) => write!(f, "Connection error: {}", msg),
            LoadError::Write(msg) => write!(f, "Write error: {}", msg),
        }
    }
}

impl std::error::Error for LoadError {}
