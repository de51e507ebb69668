//! Core domain model for the scout outreach pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "scout-core";

/// Scalar cell value for spreadsheet rows and stored records.
///
/// Derived equality is exact and type-sensitive: `Int(1)` never equals
/// `Text("1")` or `Bool(true)`. Change detection goes through
/// [`Value::loosely_equals`], which additionally folds the conversions
/// SQLite storage applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

const NULL_VALUE: Value = Value::Null;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Equality for change detection. Exact except for the conversions
    /// SQLite applies on write: booleans come back as the 0/1 integers
    /// they are stored as, and numbers written to a TEXT-affinity column
    /// come back as text. Without these folds every such column would
    /// re-upsert on every run.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(b), Value::Int(i)) | (Value::Int(i), Value::Bool(b)) => {
                *i == i64::from(*b)
            }
            (Value::Int(i), Value::Text(t)) | (Value::Text(t), Value::Int(i)) => {
                t.parse::<i64>().map_or(false, |parsed| parsed == *i)
            }
            (Value::Float(f), Value::Text(t)) | (Value::Text(t), Value::Float(f)) => {
                t.parse::<f64>().map_or(false, |parsed| parsed == *f)
            }
            (Value::Bool(b), Value::Text(t)) | (Value::Text(t), Value::Bool(b)) => {
                t.parse::<i64>().map_or(false, |parsed| parsed == i64::from(*b))
            }
            _ => self == other,
        }
    }

    /// Converts a JSON scalar into a cell value. Arrays and objects have
    /// no column representation and collapse to their JSON text form.
    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }
}

/// A single record: column name mapped to scalar value.
///
/// Incoming spreadsheet rows are keyed by pretty header names
/// (`"Website Url"`); rows read back from the store are keyed by stored
/// column names (`website_url`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        self.values.insert(column.into(), value);
    }

    /// Builder-style `set`, convenient in tests and fixtures.
    pub fn with(mut self, column: impl Into<String>, value: Value) -> Self {
        self.set(column, value);
        self
    }

    /// Absent columns read as `Null`.
    pub fn get(&self, column: &str) -> &Value {
        self.values.get(column).unwrap_or(&NULL_VALUE)
    }

    /// The row's key under `column`, if present and non-blank text.
    pub fn key_text(&self, column: &str) -> Option<&str> {
        self.get(column)
            .as_text()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Translates a stored column name to the spreadsheet header form:
/// underscores become spaces and each word is title-cased
/// (`website_url` -> `Website Url`).
pub fn pretty_column_name(stored: &str) -> String {
    stored
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Metadata for one synced logical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    /// Stored table name.
    pub name: &'static str,
    /// Stored column names, in insert order. Excludes audit columns the
    /// store fills itself (`last_updated`).
    pub columns: &'static [&'static str],
    /// Primary key field as the source names it (pretty form).
    pub source_key: &'static str,
    /// Primary key column as the store names it.
    pub stored_key: &'static str,
    /// Stored column names whose changes trigger an upsert. Never the
    /// key, never audit columns.
    pub comparison_fields: &'static [&'static str],
}

pub const PROCESSED_COMPANIES: TableSpec = TableSpec {
    name: "processed_companies",
    columns: &[
        "company",
        "summary",
        "product",
        "tags",
        "investors",
        "ideal_roles",
        "recent_news",
        "tone_advice",
        "alignment_reason",
        "suggested_opener",
        "funding_stage",
        "technologies_used",
        "website_url",
        "industry",
        "linkedin_company_url",
        "linkedin_search_links",
        "company_processed",
        "email_generated",
    ],
    source_key: "Company",
    stored_key: "company",
    comparison_fields: &[
        "summary",
        "product",
        "tags",
        "investors",
        "ideal_roles",
        "recent_news",
        "tone_advice",
        "alignment_reason",
        "suggested_opener",
        "funding_stage",
        "technologies_used",
        "website_url",
        "industry",
        "linkedin_company_url",
        "linkedin_search_links",
        "company_processed",
        "email_generated",
    ],
};

pub const COMPANY_RESEARCH: TableSpec = TableSpec {
    name: "company_research",
    columns: &["company", "company_info", "contact_info"],
    source_key: "Company",
    stored_key: "company",
    comparison_fields: &["company_info", "contact_info"],
};

/// Every table the sync pipeline mirrors, in sync order.
pub const SYNCED_TABLES: &[&TableSpec] = &[&PROCESSED_COMPANIES, &COMPANY_RESEARCH];

pub fn table_spec(name: &str) -> Option<&'static TableSpec> {
    SYNCED_TABLES.iter().copied().find(|spec| spec.name == name)
}

/// Result of reconciling an existing snapshot against incoming rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    /// Incoming rows (pretty-keyed) that are new or changed.
    pub to_upsert: Vec<Row>,
    /// Stored primary keys absent from the incoming data.
    pub to_delete: Vec<String>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.to_upsert.is_empty() && self.to_delete.is_empty()
    }
}

/// Structured facts produced by the enrichment pipeline for one company.
///
/// `Default` is the empty sentinel: it signals "enrichment failed, write
/// nothing" and must never be persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedCompany {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub investors: Vec<String>,
    #[serde(default)]
    pub ideal_roles: String,
    #[serde(default)]
    pub recent_news: String,
    #[serde(default)]
    pub tone_advice: String,
    #[serde(default)]
    pub alignment_reason: String,
    #[serde(default)]
    pub suggested_opener: String,
    #[serde(default)]
    pub funding_stage: String,
    #[serde(default)]
    pub technologies_used: String,
    #[serde(default)]
    pub website_url: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub linkedin_company_url: String,
    #[serde(default)]
    pub linkedin_search_links: Vec<String>,
}

impl EnrichedCompany {
    /// True for the empty sentinel.
    pub fn is_empty(&self) -> bool {
        *self == EnrichedCompany::default()
    }
}

/// List-valued fields persist as one delimited TEXT column.
pub fn join_list(items: &[String]) -> String {
    items.join(", ")
}
