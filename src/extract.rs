use crate::records::{CampaignClickRow, GameEventRow, Record, RecordSet};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{Map, Value};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Where an extractor reads its records from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Local CSV file with a header row
    Csv(PathBuf),
    /// Local JSON file holding an array of objects
    Json(PathBuf),
    /// HTTP(S) endpoint answering a GET with an array of objects
    Http(String),
}

impl Source {
    /// Resolves a configured location into a source.
    ///
    /// URLs starting with `http://` or `https://` are HTTP sources; files are
    /// recognized by their `.csv` or `.json` extension.
    pub fn from_location(location: &str) -> Result<Self, ExtractError> {
        let location = location.trim();
        if location.starts_with("http://") || location.starts_with("https://") {
            return Ok(Source::Http(location.to_string()));
        }

        let path = PathBuf::from(location);
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("csv") => Ok(Source::Csv(path)),
            Some("json") => Ok(Source::Json(path)),
            _ => Err(ExtractError::UnsupportedFormat(location.to_string())),
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Csv(path) | Source::Json(path) => write!(f, "{}", path.display()),
            Source::Http(url) => write!(f, "{}", url),
        }
    }
}

/// Configuration for the extractor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorConfig {
    /// Surface read failures instead of returning an empty record set (default: false)
    pub strict: bool,
    /// HTTP request timeout in seconds (default: 30)
    pub timeout_seconds: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig {
            strict: false,
            timeout_seconds: 30,
        }
    }
}

/// Reads game events and campaign clicks from files or HTTP endpoints.
///
/// The same extractor serves both datasets; the record type decides which
/// columns are expected.
#[derive(Debug, Clone)]
pub struct Extractor {
    client: Client,
    config: ExtractorConfig,
}

impl Extractor {
    /// Creates an extractor with default configuration.
    pub fn new() -> Result<Self, ExtractError> {
        Self::with_config(ExtractorConfig::default())
    }

    /// Creates an extractor with custom configuration.
    ///
    /// # Errors
    /// Returns `ExtractError::ClientCreation` if the HTTP client cannot be built.
    pub fn with_config(config: ExtractorConfig) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ExtractError::ClientCreation(e.to_string()))?;

        Ok(Extractor { client, config })
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Reads and parses `source`, surfacing every failure.
    pub async fn try_extract<R: Record>(&self, source: &Source) -> Result<RecordSet<R>, ExtractError> {
        let records = match source {
            Source::Csv(path) => read_csv(read_file(path).await?.as_slice())?,
            Source::Json(path) => read_json(&read_file(path).await?)?,
            Source::Http(url) => read_json(&self.fetch_bytes(url).await?)?,
        };

        info!(
            dataset = R::DATASET,
            source = %source,
            records = records.len(),
            "Successfully loaded records"
        );
        Ok(records)
    }

    /// Reads and parses `source`, failing soft.
    ///
    /// On any read failure the error is logged and an empty record set is
    /// returned, so downstream steps run with zero rows. With
    /// [`ExtractorConfig::strict`] set the failure is returned instead.
    pub async fn extract<R: Record>(&self, source: &Source) -> Result<RecordSet<R>, ExtractError> {
        match self.try_extract(source).await {
            Ok(records) => Ok(records),
            Err(err) if self.config.strict => Err(err),
            Err(err) => {
                warn!(
                    dataset = R::DATASET,
                    source = %source,
                    error = %err,
                    "Error reading source, continuing with an empty record set"
                );
                Ok(RecordSet::empty())
            }
        }
    }

    /// Extracts gameplay events.
    pub async fn extract_game_events(&self, source: &Source) -> Result<RecordSet<GameEventRow>, ExtractError> {
        self.extract(source).await
    }

    /// Extracts campaign clicks.
    pub async fn extract_campaign_clicks(
        &self,
        source: &Source,
    ) -> Result<RecordSet<CampaignClickRow>, ExtractError> {
        self.extract(source).await
    }

    /// Downloads `endpoint` and stores the JSON payload in `landing_dir`.
    ///
    /// The file is named `marketing_data_<YYYYmmdd_HHMMSS>_<6 hex>.json`.
    ///
    /// # Returns
    /// The path of the written file.
    pub async fn fetch_to_landing(&self, endpoint: &str, landing_dir: &Path) -> Result<PathBuf, ExtractError> {
        let bytes = self.fetch_bytes(endpoint).await?;
        let payload: Value = serde_json::from_slice(&bytes)
            .map_err(|e| ExtractError::Malformed(format!("invalid JSON payload: {}", e)))?;
        let body = serde_json::to_vec_pretty(&payload)
            .map_err(|e| ExtractError::Malformed(e.to_string()))?;

        tokio::fs::create_dir_all(landing_dir)
            .await
            .map_err(|e| ExtractError::Io(format!("{}: {}", landing_dir.display(), e)))?;
        let path = landing_dir.join(landing_file_name(Utc::now(), Uuid::new_v4()));
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| ExtractError::Io(format!("{}: {}", path.display(), e)))?;

        info!(path = %path.display(), "Snapshot written to landing directory");
        Ok(path)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ExtractError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::ApiError(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown error")
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExtractError::NetworkError(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Builds the landing file name for a fetched snapshot.
pub fn landing_file_name(now: DateTime<Utc>, id: Uuid) -> String {
    let suffix = id.simple().to_string();
    format!("marketing_data_{}_{}.json", now.format("%Y%m%d_%H%M%S"), &suffix[..6])
}

async fn read_file(path: &Path) -> Result<Vec<u8>, ExtractError> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ExtractError::NotFound(path.display().to_string()),
        _ => ExtractError::Io(format!("{}: {}", path.display(), e)),
    })
}

/// Parses CSV with a header row into a record set.
///
/// Columns are the (trimmed) header names; unknown columns are ignored.
/// Every cell reaches the row type as the text written in the file. A row
/// shorter than the header leaves its trailing fields missing; a row longer
/// than the header is malformed.
pub fn read_csv<R: Record, T: Read>(input: T) -> Result<RecordSet<R>, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);

    let headers = reader
        .headers()
        .map_err(|e| ExtractError::Malformed(format!("unreadable header: {}", e)))?
        .clone();
    let columns: Vec<String> = headers
        .iter()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| ExtractError::Malformed(format!("row {}: {}", index + 1, e)))?;
        if record.len() > headers.len() {
            return Err(ExtractError::Malformed(format!(
                "row {}: {} fields, header has {}",
                index + 1,
                record.len(),
                headers.len()
            )));
        }

        let object: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, cell)| (name.to_string(), Value::String(cell.to_string())))
            .collect();
        let row = serde_json::from_value::<R>(Value::Object(object))
            .map_err(|e| ExtractError::Malformed(format!("row {}: {}", index + 1, e)))?;
        rows.push(row);
    }

    Ok(RecordSet::new(columns, rows))
}

/// Parses a JSON array of objects into a record set.
///
/// Columns are the union of keys over all objects, in first-seen order.
pub fn read_json<R: Record>(bytes: &[u8]) -> Result<RecordSet<R>, ExtractError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| ExtractError::Malformed(format!("invalid JSON: {}", e)))?;
    let Value::Array(items) = value else {
        return Err(ExtractError::Malformed(
            "expected a JSON array of objects".to_string(),
        ));
    };

    let mut columns: Vec<String> = Vec::new();
    let mut rows = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(object) = item else {
            return Err(ExtractError::Malformed(format!(
                "row {}: expected an object",
                index + 1
            )));
        };
        for key in object.keys() {
            if !columns.iter().any(|column| column == key) {
                columns.push(key.clone());
            }
        }
        let row = serde_json::from_value::<R>(Value::Object(object))
            .map_err(|e| ExtractError::Malformed(format!("row {}: {}", index + 1, e)))?;
        rows.push(row);
    }

    Ok(RecordSet::new(columns, rows))
}

/// Errors that can occur while reading a source.
///
/// All of them mean the source is unavailable for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// File does not exist
    NotFound(String),
    /// Other file system failure
    Io(String),
    /// Content could not be parsed
    Malformed(String),
    /// Location is neither a URL nor a `.csv`/`.json` file
    UnsupportedFormat(String),
    /// HTTP client creation failed
    ClientCreation(String),
    /// Network error occurred
    NetworkError(String),
    /// Endpoint answered with a non-success status
    ApiError(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::NotFound(path) => write!(f, "File not found: {}", path),
            ExtractError::Io(msg) => write!(f, "I/O error: {}", msg),
            ExtractError::Malformed(msg) => write!(f, "Malformed content: {}", msg),
            ExtractError::UnsupportedFormat(location) => {
                write!(f, "Unsupported source format: {}", location)
            }
            ExtractError::ClientCreation(msg) => write!(f, "Client creation error: {}", msg),
            ExtractError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            ExtractError::ApiError(msg) => write!(f, "API error: {}", msg),
        }
    }
}

impl std::error::Error for ExtractError {}
