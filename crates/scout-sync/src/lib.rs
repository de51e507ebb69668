//! Spreadsheet-to-store reconciliation: delta computation plus the
//! per-table sync orchestrator.
//!
//! There is no rollback. A partially applied delta leaves the store in a
//! mixed state; the next run recomputes the delta from persisted state
//! and converges. Re-running is the consistency mechanism.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use scout_adapters::SheetSource;
use scout_core::{pretty_column_name, Delta, Row, TableSpec, SYNCED_TABLES};
use scout_store::RecordStore;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "scout-sync";

/// Compute the minimal upsert/delete sets that reconcile `existing`
/// (stored-name-keyed snapshot) with `incoming` (pretty-name-keyed sheet
/// rows).
///
/// Duplicate incoming keys: last occurrence wins. Incoming rows without a
/// usable key are dropped with a warning. An existing row is upserted
/// only when one of the table's comparison fields differs (exact
/// comparison, modulo the storage folds of
/// [`scout_core::Value::loosely_equals`]); unrelated stored columns (audit
/// timestamps, derived flags) never trigger one.
///
/// Sharp edge, preserved on purpose: an empty `incoming` list means the
/// source is empty and every existing row is marked for deletion. The
/// store mirrors the source, it does not guard it.
pub fn compute_delta(
    existing: &BTreeMap<String, Row>,
    incoming: &[Row],
    spec: &TableSpec,
) -> Delta {
    let mut incoming_by_key: BTreeMap<String, &Row> = BTreeMap::new();
    for row in incoming {
        match row.key_text(spec.source_key) {
            Some(key) => {
                incoming_by_key.insert(key.to_owned(), row);
            }
            None => warn!(
                table = spec.name,
                key_field = spec.source_key,
                "incoming row without a primary key dropped"
            ),
        }
    }

    let mut to_upsert = Vec::new();
    for (key, row) in &incoming_by_key {
        match existing.get(key) {
            None => to_upsert.push((*row).clone()),
            Some(current) => {
                let changed = spec.comparison_fields.iter().any(|field| {
                    !row.get(&pretty_column_name(field))
                        .loosely_equals(current.get(field))
                });
                if changed {
                    to_upsert.push((*row).clone());
                }
            }
        }
    }

    let to_delete: Vec<String> = existing
        .keys()
        .filter(|key| !incoming_by_key.contains_key(*key))
        .cloned()
        .collect();

    info!(
        table = spec.name,
        upserts = to_upsert.len(),
        deletes = to_delete.len(),
        "delta computed"
    );
    Delta { to_upsert, to_delete }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Completed,
    SourceFailed,
}

/// Per-table outcome with attempted/failed counts for both operation
/// kinds.
#[derive(Debug, Clone, Serialize)]
pub struct TableSyncSummary {
    pub table: String,
    pub status: SyncStatus,
    pub incoming_rows: usize,
    pub existing_rows: usize,
    pub upserts_attempted: usize,
    pub upserts_failed: usize,
    pub deletes_attempted: usize,
    pub deletes_failed: usize,
}

impl TableSyncSummary {
    fn source_failed(spec: &TableSpec) -> Self {
        Self {
            table: spec.name.to_string(),
            status: SyncStatus::SourceFailed,
            incoming_rows: 0,
            existing_rows: 0,
            upserts_attempted: 0,
            upserts_failed: 0,
            deletes_attempted: 0,
            deletes_failed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: Vec<TableSyncSummary>,
}

/// Drives one full reconciliation of every registered table against a
/// single source. Owns the store for the duration of the run.
pub struct SyncPipeline {
    store: RecordStore,
    source: Box<dyn SheetSource>,
}

impl SyncPipeline {
    pub fn new(store: RecordStore, source: Box<dyn SheetSource>) -> Self {
        Self { store, source }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Sync every registered table sequentially. A table whose source
    /// fetch fails is skipped; the remaining tables still sync.
    pub async fn run_once(&self) -> SyncRunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, "starting sync run");

        let mut tables = Vec::with_capacity(SYNCED_TABLES.len());
        for spec in SYNCED_TABLES {
            tables.push(self.sync_table(spec).await);
        }

        let finished_at = Utc::now();
        info!(
            %run_id,
            tables = tables.len(),
            failed_sources = tables
                .iter()
                .filter(|t| t.status == SyncStatus::SourceFailed)
                .count(),
            "sync run finished"
        );
        SyncRunSummary {
            run_id,
            started_at,
            finished_at,
            tables,
        }
    }

    /// Reconcile one table: fetch incoming, snapshot existing, compute
    /// the delta, apply upserts as one batched store call and deletes one
    /// key at a time, continuing past individual failures.
    pub async fn sync_table(&self, spec: &TableSpec) -> TableSyncSummary {
        info!(table = spec.name, "syncing table");

        let incoming = match self.source.fetch_rows(spec).await {
            Ok(rows) => rows,
            Err(err) => {
                error!(table = spec.name, %err, "source fetch failed, skipping table");
                return TableSyncSummary::source_failed(spec);
            }
        };

        let existing = self.store.fetch_all(spec);
        let delta = compute_delta(&existing, &incoming, spec);
        info!(
            table = spec.name,
            upserts = delta.to_upsert.len(),
            deletes = delta.to_delete.len(),
            "applying delta"
        );

        let upsert_report = self.store.upsert(spec, &delta.to_upsert);
        let mut deletes_failed = 0usize;
        for key in &delta.to_delete {
            if !self.store.delete(spec, key) {
                deletes_failed += 1;
            }
        }

        TableSyncSummary {
            table: spec.name.to_string(),
            status: SyncStatus::Completed,
            incoming_rows: incoming.len(),
            existing_rows: existing.len(),
            upserts_attempted: upsert_report.attempted,
            upserts_failed: upsert_report.failed,
            deletes_attempted: delta.to_delete.len(),
            deletes_failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::{Value, COMPANY_RESEARCH, PROCESSED_COMPANIES};

    fn stored_row(company: &str, summary: &str) -> Row {
        Row::new()
            .with("company", Value::Text(company.into()))
            .with("summary", Value::Text(summary.into()))
    }

    fn sheet_row(company: &str, summary: &str) -> Row {
        Row::new()
            .with("Company", Value::Text(company.into()))
            .with("Summary", Value::Text(summary.into()))
    }

    fn snapshot(rows: Vec<Row>) -> BTreeMap<String, Row> {
        rows.into_iter()
            .map(|row| (row.key_text("company").unwrap().to_owned(), row))
            .collect()
    }

    #[test]
    fn new_and_changed_rows_upsert_unchanged_rows_skip() {
        // Scenario A: Acme unchanged, Beta new.
        let existing = snapshot(vec![stored_row("Acme", "old")]);
        let incoming = vec![sheet_row("Acme", "old"), sheet_row("Beta", "new")];

        let delta = compute_delta(&existing, &incoming, &PROCESSED_COMPANIES);
        assert_eq!(delta.to_upsert.len(), 1);
        assert_eq!(delta.to_upsert[0].key_text("Company"), Some("Beta"));
        assert!(delta.to_delete.is_empty());
    }

    #[test]
    fn absent_keys_are_deleted() {
        // Scenario B: Gamma vanished from the source.
        let existing = snapshot(vec![stored_row("Acme", "same"), stored_row("Gamma", "x")]);
        let incoming = vec![sheet_row("Acme", "same")];

        let delta = compute_delta(&existing, &incoming, &PROCESSED_COMPANIES);
        assert!(delta.to_upsert.is_empty());
        assert_eq!(delta.to_delete, vec!["Gamma".to_string()]);
    }

    #[test]
    fn changed_comparison_field_triggers_upsert() {
        let existing = snapshot(vec![stored_row("Acme", "old")]);
        let incoming = vec![sheet_row("Acme", "new")];

        let delta = compute_delta(&existing, &incoming, &PROCESSED_COMPANIES);
        assert_eq!(delta.to_upsert.len(), 1);
        assert!(delta.to_delete.is_empty());
    }

    #[test]
    fn empty_source_deletes_everything() {
        let existing = snapshot(vec![stored_row("Acme", "a"), stored_row("Beta", "b")]);
        let delta = compute_delta(&existing, &[], &PROCESSED_COMPANIES);
        assert!(delta.to_upsert.is_empty());
        assert_eq!(delta.to_delete, vec!["Acme".to_string(), "Beta".to_string()]);
    }

    #[test]
    fn non_comparison_columns_never_trigger_upserts() {
        // Stored row carries audit state the sheet knows nothing about.
        let stored = stored_row("Acme", "same")
            .with("last_updated", Value::Text("2026-01-01 00:00:00".into()));
        let existing = snapshot(vec![stored]);
        let incoming = vec![sheet_row("Acme", "same")];

        let delta = compute_delta(&existing, &incoming, &PROCESSED_COMPANIES);
        assert!(delta.is_empty());
    }

    #[test]
    fn no_key_appears_in_both_sets() {
        let existing = snapshot(vec![
            stored_row("Acme", "old"),
            stored_row("Beta", "same"),
            stored_row("Gamma", "x"),
        ]);
        let incoming = vec![sheet_row("Acme", "new"), sheet_row("Beta", "same")];

        let delta = compute_delta(&existing, &incoming, &PROCESSED_COMPANIES);
        let upsert_keys: Vec<&str> = delta
            .to_upsert
            .iter()
            .filter_map(|r| r.key_text("Company"))
            .collect();
        assert_eq!(upsert_keys, vec!["Acme"]);
        assert_eq!(delta.to_delete, vec!["Gamma".to_string()]);
        for key in &upsert_keys {
            assert!(!delta.to_delete.iter().any(|d| d == key));
        }
    }

    #[test]
    fn duplicate_incoming_keys_last_occurrence_wins() {
        let existing = BTreeMap::new();
        let incoming = vec![sheet_row("Acme", "first"), sheet_row("Acme", "second")];

        let delta = compute_delta(&existing, &incoming, &PROCESSED_COMPANIES);
        assert_eq!(delta.to_upsert.len(), 1);
        assert_eq!(
            delta.to_upsert[0].get("Summary"),
            &Value::Text("second".into())
        );
    }

    #[test]
    fn keyless_incoming_rows_are_dropped() {
        let existing = BTreeMap::new();
        let incoming = vec![
            Row::new().with("Summary", Value::Text("no key".into())),
            Row::new().with("Company", Value::Text("  ".into())),
            sheet_row("Acme", "ok"),
        ];

        let delta = compute_delta(&existing, &incoming, &PROCESSED_COMPANIES);
        assert_eq!(delta.to_upsert.len(), 1);
        assert_eq!(delta.to_upsert[0].key_text("Company"), Some("Acme"));
    }

    #[test]
    fn stored_boolean_integers_match_incoming_bools() {
        let stored = stored_row("Acme", "same").with("company_processed", Value::Int(0));
        let existing = snapshot(vec![stored]);
        let incoming =
            vec![sheet_row("Acme", "same").with("Company Processed", Value::Bool(false))];

        assert!(compute_delta(&existing, &incoming, &PROCESSED_COMPANIES).is_empty());

        let flipped = vec![sheet_row("Acme", "same").with("Company Processed", Value::Bool(true))];
        let delta = compute_delta(&existing, &flipped, &PROCESSED_COMPANIES);
        assert_eq!(delta.to_upsert.len(), 1);
    }

    #[test]
    fn stored_text_affinity_numbers_match_incoming_scalars() {
        // Numeric cells land in TEXT columns and read back as text.
        let stored = Row::new()
            .with("company", Value::Text("Acme".into()))
            .with("company_info", Value::Text("42".into()))
            .with("contact_info", Value::Text("2.5".into()));
        let existing = snapshot(vec![stored]);
        let incoming = vec![Row::new()
            .with("Company", Value::Text("Acme".into()))
            .with("Company Info", Value::Int(42))
            .with("Contact Info", Value::Float(2.5))];

        assert!(compute_delta(&existing, &incoming, &COMPANY_RESEARCH).is_empty());

        let changed = vec![Row::new()
            .with("Company", Value::Text("Acme".into()))
            .with("Company Info", Value::Int(43))
            .with("Contact Info", Value::Float(2.5))];
        let delta = compute_delta(&existing, &changed, &COMPANY_RESEARCH);
        assert_eq!(delta.to_upsert.len(), 1);
    }

    #[test]
    fn company_research_uses_its_own_comparison_fields() {
        let stored = Row::new()
            .with("company", Value::Text("Acme".into()))
            .with("company_info", Value::Text("rockets".into()))
            .with("contact_info", Value::Text("a@acme.test".into()));
        let existing = snapshot(vec![stored]);

        let same = Row::new()
            .with("Company", Value::Text("Acme".into()))
            .with("Company Info", Value::Text("rockets".into()))
            .with("Contact Info", Value::Text("a@acme.test".into()));
        assert!(compute_delta(&existing, &[same], &COMPANY_RESEARCH).is_empty());

        let changed = Row::new()
            .with("Company", Value::Text("Acme".into()))
            .with("Company Info", Value::Text("rockets".into()))
            .with("Contact Info", Value::Text("b@acme.test".into()));
        let delta = compute_delta(&existing, &[changed], &COMPANY_RESEARCH);
        assert_eq!(delta.to_upsert.len(), 1);
    }
}
