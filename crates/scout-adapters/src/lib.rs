//! Spreadsheet source contracts + Google Sheets and fixture-backed
//! implementations.
//!
//! Sources hand the sync pipeline rows keyed by the sheet's own header
//! names ("pretty" names such as `"Website Url"`); translation to stored
//! column names happens downstream.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use scout_core::{Row, TableSpec, Value};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "scout-adapters";

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("missing required configuration: {0}")]
    MissingConfig(&'static str),

    #[error("could not extract a spreadsheet id from {0}")]
    BadSheetUrl(String),

    #[error("no sheet configured for table {0}")]
    UnknownTable(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("http status {status} fetching sheet {sheet}")]
    HttpStatus { status: u16, sheet: String },

    #[error("malformed sheet payload: {0}")]
    MalformedPayload(String),

    #[error("reading fixture {path}: {source}")]
    FixtureIo {
        path: String,
        source: std::io::Error,
    },

    #[error("parsing fixture {path}: {source}")]
    FixtureParse {
        path: String,
        source: serde_json::Error,
    },
}

/// Supplies the incoming rows for one logical table. Failures surface as
/// errors; the orchestrator decides how far they propagate.
#[async_trait]
pub trait SheetSource: Send + Sync {
    async fn fetch_rows(&self, spec: &TableSpec) -> Result<Vec<Row>, SourceError>;
}

/// Raw values payload as the Sheets API returns it: one array per sheet
/// row, first row holding the headers. Fixtures reuse the same shape.
#[derive(Debug, Clone, Deserialize)]
pub struct SheetValues {
    #[serde(default)]
    pub values: Vec<Vec<serde_json::Value>>,
}

/// Assemble header-keyed rows from a raw values payload.
///
/// Short rows are padded with `Null` (trailing blank cells are dropped by
/// the API). Fails if the payload has no header row or the header lacks
/// the table's primary key field: that is an ingestion-boundary error,
/// not a per-row one.
pub fn rows_from_values(spec: &TableSpec, payload: &SheetValues) -> Result<Vec<Row>, SourceError> {
    let Some((header_cells, data_rows)) = payload.values.split_first() else {
        return Ok(Vec::new());
    };

    let headers: Vec<String> = header_cells
        .iter()
        .map(|cell| match cell {
            serde_json::Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        })
        .collect();

    if !headers.iter().any(|h| h == spec.source_key) {
        return Err(SourceError::MalformedPayload(format!(
            "sheet for {} has no '{}' column",
            spec.name, spec.source_key
        )));
    }

    let rows = data_rows
        .iter()
        .map(|cells| {
            let mut row = Row::new();
            for (idx, header) in headers.iter().enumerate() {
                let value = cells.get(idx).map(Value::from_json).unwrap_or(Value::Null);
                row.set(header.clone(), value);
            }
            row
        })
        .collect();
    Ok(rows)
}

/// Extract the spreadsheet id from a full sheet URL
/// (`https://docs.google.com/spreadsheets/d/<id>/edit#gid=0`).
pub fn spreadsheet_id_from_url(sheet_url: &str) -> Result<&str, SourceError> {
    let after = sheet_url
        .split_once("/d/")
        .map(|(_, rest)| rest)
        .ok_or_else(|| SourceError::BadSheetUrl(sheet_url.to_string()))?;
    let id = after.split(['/', '?', '#']).next().unwrap_or_default();
    if id.is_empty() {
        return Err(SourceError::BadSheetUrl(sheet_url.to_string()));
    }
    Ok(id)
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub sheet_url: String,
    pub api_key: String,
    pub processed_companies_sheet: String,
    pub company_research_sheet: String,
    pub timeout: Duration,
}

impl SheetsConfig {
    /// Build from the environment. `SHEET_URL` and
    /// `GOOGLE_SHEETS_API_KEY` are required; missing values are fatal for
    /// any sync that depends on this source.
    pub fn from_env() -> Result<Self, SourceError> {
        let sheet_url =
            std::env::var("SHEET_URL").map_err(|_| SourceError::MissingConfig("SHEET_URL"))?;
        let api_key = std::env::var("GOOGLE_SHEETS_API_KEY")
            .map_err(|_| SourceError::MissingConfig("GOOGLE_SHEETS_API_KEY"))?;
        Ok(Self {
            sheet_url,
            api_key,
            processed_companies_sheet: std::env::var("PROCESSED_COMPANIES_SHEET_NAME")
                .unwrap_or_else(|_| "Processed Companies".to_string()),
            company_research_sheet: std::env::var("COMPANY_RESEARCH_SHEET_NAME")
                .unwrap_or_else(|_| "Company Research".to_string()),
            timeout: Duration::from_secs(
                std::env::var("SCOUT_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
        })
    }

    /// Which worksheet backs a logical table.
    pub fn sheet_name_for(&self, spec: &TableSpec) -> Result<&str, SourceError> {
        match spec.name {
            "processed_companies" => Ok(self.processed_companies_sheet.as_str()),
            "company_research" => Ok(self.company_research_sheet.as_str()),
            other => Err(SourceError::UnknownTable(other.to_string())),
        }
    }
}

/// Live source reading worksheets through the Sheets values API.
pub struct GoogleSheetsSource {
    client: reqwest::Client,
    config: SheetsConfig,
}

impl GoogleSheetsSource {
    pub fn new(config: SheetsConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn values_url(&self, sheet_name: &str) -> Result<url::Url, SourceError> {
        let spreadsheet_id = spreadsheet_id_from_url(&self.config.sheet_url)?;
        url::Url::parse_with_params(
            &format!("{SHEETS_API_BASE}/{spreadsheet_id}/values/{sheet_name}"),
            &[("key", self.config.api_key.as_str())],
        )
        .map_err(|_| SourceError::BadSheetUrl(self.config.sheet_url.clone()))
    }
}

#[async_trait]
impl SheetSource for GoogleSheetsSource {
    async fn fetch_rows(&self, spec: &TableSpec) -> Result<Vec<Row>, SourceError> {
        let sheet_name = self.config.sheet_name_for(spec)?.to_string();
        let url = self.values_url(&sheet_name)?;

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::HttpStatus {
                status: status.as_u16(),
                sheet: sheet_name,
            });
        }

        let payload: SheetValues = response.json().await?;
        let rows = rows_from_values(spec, &payload)?;
        info!(table = spec.name, sheet = %sheet_name, rows = rows.len(), "fetched sheet rows");
        Ok(rows)
    }
}

/// Offline source reading `<dir>/<table>.json` files holding the same
/// values payload the live API returns. Used for local runs and tests.
pub struct FixtureSheetSource {
    dir: PathBuf,
}

impl FixtureSheetSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn fixture_path(&self, spec: &TableSpec) -> PathBuf {
        self.dir.join(format!("{}.json", spec.name))
    }
}

#[async_trait]
impl SheetSource for FixtureSheetSource {
    async fn fetch_rows(&self, spec: &TableSpec) -> Result<Vec<Row>, SourceError> {
        let path = self.fixture_path(spec);
        let payload = load_sheet_fixture(&path)?;
        let rows = rows_from_values(spec, &payload)?;
        info!(table = spec.name, fixture = %path.display(), rows = rows.len(), "loaded fixture rows");
        Ok(rows)
    }
}

pub fn load_sheet_fixture(path: impl AsRef<Path>) -> Result<SheetValues, SourceError> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path).map_err(|source| SourceError::FixtureIo {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| SourceError::FixtureParse {
        path: path.display().to_string(),
        source,
    })
}
