use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

// ===== Import Models =====

/// Lifecycle of a CSV import. Moves strictly forward:
/// `pending -> processing -> {completed | failed}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "import_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Processing => "processing",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: ImportStatus) -> bool {
        matches!(
            (self, next),
            (ImportStatus::Pending, ImportStatus::Processing)
                | (ImportStatus::Processing, ImportStatus::Completed)
                | (ImportStatus::Processing, ImportStatus::Failed)
        )
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CsvImport {
    pub id: i32,
    pub file_path: String,
    pub file_name: String,
    pub uploaded_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ImportStatus,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub error_log: String,
}

/// Snapshot returned by the progress read contract.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct ImportProgress {
    pub processed_rows: i64,
    pub total_rows: i64,
    pub status: ImportStatus,
    pub error_log: String,
}

// ===== Shipment Catalog =====

/// A customer as stored; imports create one per unknown identity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Customer {
    pub customer_id: String,
    pub name: String,
    pub email: String,
}

/// A shipment row as produced by row conversion and stored in `shipments`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Shipment {
    pub shipment_id: String,
    pub customer_id: Option<String>,
    pub carrier: Option<String>,
    pub origin: String,
    pub destination: String,
    pub weight: f64,
    pub volume: f64,
    pub mode: String,
    pub status: String,
    pub arrival_date: Option<NaiveDate>,
    pub departure_date: Option<NaiveDate>,
    pub delivered_date: Option<NaiveDate>,
}

// ===== Consolidation =====

/// A committed consolidation group with the identities of its shipments.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct ConsolidationGroup {
    pub id: i32,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub total_weight: f64,
    pub total_volume: f64,
    pub created_at: DateTime<Utc>,
    pub shipment_ids: Vec<String>,
}
