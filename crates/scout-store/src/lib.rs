//! Embedded record store for the scout pipeline.
//!
//! The database lives at `~/.scout/scout.db` by default and mirrors the
//! external spreadsheets; the spreadsheets remain the source of truth for
//! synced tables. Read failures degrade to empty snapshots and write
//! failures are isolated per row, so one bad record never aborts a sync.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection};
use scout_core::{join_list, pretty_column_name, EnrichedCompany, Row, TableSpec, Value};
use thiserror::Error;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "scout-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("home directory not found")]
    HomeDirNotFound,

    #[error("failed to create database directory: {0}")]
    CreateDir(std::io::Error),
}

/// Outcome of one batched upsert. Failed rows are logged with their key
/// and skipped; the rest of the batch still applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub attempted: usize,
    pub failed: usize,
}

/// SQLite connection wrapper. Intentionally not `Clone` or `Sync`: the
/// pipeline process owns the store exclusively for the duration of a run.
pub struct RecordStore {
    conn: Connection,
}

impl RecordStore {
    /// Open (or create) the database at `~/.scout/scout.db` and ensure
    /// the schema exists.
    pub fn open_default() -> Result<Self, StoreError> {
        let path = Self::default_db_path()?;
        Self::open(path)
    }

    /// Open a database at an explicit path. Also used by tests.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(StoreError::CreateDir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Resolve the default database path: `~/.scout/scout.db`.
    pub fn default_db_path() -> Result<PathBuf, StoreError> {
        let home = dirs::home_dir().ok_or(StoreError::HomeDirNotFound)?;
        Ok(home.join(".scout").join("scout.db"))
    }

    /// Idempotently ensure every table and index exists. Safe to call on
    /// every startup.
    pub fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Full snapshot of a synced table, keyed by stored primary key.
    ///
    /// An empty table yields an empty map. A read failure also yields an
    /// empty map (logged): the sync should still attempt writes.
    pub fn fetch_all(&self, spec: &TableSpec) -> BTreeMap<String, Row> {
        match self.try_fetch_all(spec) {
            Ok(rows) => {
                info!(table = spec.name, rows = rows.len(), "fetched existing snapshot");
                rows
            }
            Err(err) => {
                error!(table = spec.name, %err, "failed to read table, treating snapshot as empty");
                BTreeMap::new()
            }
        }
    }

    fn try_fetch_all(&self, spec: &TableSpec) -> Result<BTreeMap<String, Row>, StoreError> {
        let mut stmt = self.conn.prepare(&format!("SELECT * FROM {}", spec.name))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut out = BTreeMap::new();
        let mut rows = stmt.query([])?;
        while let Some(sql_row) = rows.next()? {
            let mut row = Row::new();
            for (idx, column) in columns.iter().enumerate() {
                row.set(column.clone(), value_from_sql(sql_row.get_ref(idx)?));
            }
            let Some(key) = row.key_text(spec.stored_key).map(str::to_owned) else {
                warn!(table = spec.name, "stored row without a usable primary key skipped");
                continue;
            };
            out.insert(key, row);
        }
        Ok(out)
    }

    /// Insert-or-replace each row, keyed by primary key. Rows are looked
    /// up by pretty column names, matching the incoming sheet shape.
    pub fn upsert(&self, spec: &TableSpec, rows: &[Row]) -> UpsertReport {
        if rows.is_empty() {
            info!(table = spec.name, "no rows to upsert");
            return UpsertReport::default();
        }

        let column_list = spec.columns.join(", ");
        let placeholders = (1..=spec.columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({column_list}) VALUES ({placeholders})",
            spec.name
        );

        info!(table = spec.name, rows = rows.len(), "upserting rows");
        let mut report = UpsertReport {
            attempted: rows.len(),
            failed: 0,
        };
        for row in rows {
            let values = spec
                .columns
                .iter()
                .map(|column| sql_value(row.get(&pretty_column_name(column))))
                .collect::<Vec<_>>();
            if let Err(err) = self.conn.execute(&sql, params_from_iter(values)) {
                report.failed += 1;
                error!(
                    table = spec.name,
                    key = row.key_text(spec.source_key).unwrap_or("<missing>"),
                    %err,
                    "failed to upsert row"
                );
            }
        }
        report
    }

    /// Remove a row by primary key. Returns false on failure (logged,
    /// never propagated).
    pub fn delete(&self, spec: &TableSpec, key: &str) -> bool {
        let sql = format!("DELETE FROM {} WHERE {} = ?1", spec.name, spec.stored_key);
        match self.conn.execute(&sql, params![key]) {
            Ok(_) => {
                info!(table = spec.name, key, "removed row");
                true
            }
            Err(err) => {
                error!(table = spec.name, key, %err, "failed to delete row");
                false
            }
        }
    }

    /// Companies awaiting enrichment, in stored order.
    pub fn unprocessed_companies(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT company FROM processed_companies
             WHERE COALESCE(company_processed, FALSE) = FALSE",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut companies = Vec::new();
        for company in rows {
            companies.push(company?);
        }
        Ok(companies)
    }

    /// Persist a non-empty enrichment result and mark the company
    /// processed, stamping `last_updated`.
    pub fn apply_enrichment(
        &self,
        company: &str,
        enriched: &EnrichedCompany,
    ) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE processed_companies SET
                summary = ?1,
                product = ?2,
                tags = ?3,
                investors = ?4,
                ideal_roles = ?5,
                recent_news = ?6,
                tone_advice = ?7,
                alignment_reason = ?8,
                suggested_opener = ?9,
                funding_stage = ?10,
                technologies_used = ?11,
                website_url = ?12,
                industry = ?13,
                linkedin_company_url = ?14,
                linkedin_search_links = ?15,
                company_processed = TRUE,
                last_updated = CURRENT_TIMESTAMP
             WHERE company = ?16",
            params![
                enriched.summary,
                enriched.product,
                join_list(&enriched.tags),
                join_list(&enriched.investors),
                enriched.ideal_roles,
                enriched.recent_news,
                enriched.tone_advice,
                enriched.alignment_reason,
                enriched.suggested_opener,
                enriched.funding_stage,
                enriched.technologies_used,
                enriched.website_url,
                enriched.industry,
                enriched.linkedin_company_url,
                join_list(&enriched.linkedin_search_links),
                company,
            ],
        )?;
        if updated == 0 {
            warn!(company, "enrichment update matched no stored row");
        }
        Ok(())
    }

    /// Best-effort record of an external-call failure for later review.
    pub fn log_api_error(&self, stage: &str, company: &str, message: &str) {
        let result = self.conn.execute(
            "INSERT INTO api_errors_log (stage, company, error_message) VALUES (?1, ?2, ?3)",
            params![stage, company, message],
        );
        if let Err(err) = result {
            warn!(stage, company, %err, "failed to record api error");
        }
    }
}

fn value_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(text) => Value::Text(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

fn sql_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        Value::Int(i) => rusqlite::types::Value::Integer(*i),
        Value::Float(f) => rusqlite::types::Value::Real(*f),
        Value::Text(text) => rusqlite::types::Value::Text(text.clone()),
    }
}
