use crate::models::ImportStatus;
use std::fmt;
use thiserror::Error;

/// A date literal that matched none of the accepted formats.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateError {
    #[error("malformed date literal '{0}'")]
    Malformed(String),
}

/// Why a single CSV record could not become a shipment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowErrorReason {
    InvalidNumber(String),
    MalformedDate(String),
    MissingField,
    TooLong { max: usize },
}

impl fmt::Display for RowErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowErrorReason::InvalidNumber(value) => write!(f, "invalid number '{value}'"),
            RowErrorReason::MalformedDate(value) => write!(f, "unparseable date '{value}'"),
            RowErrorReason::MissingField => write!(f, "missing required field"),
            RowErrorReason::TooLong { max } => write!(f, "longer than {max} characters"),
        }
    }
}

/// Row-level validation failure, identifying the offending column.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("row {line}: column '{column}': {reason}")]
pub struct RowError {
    pub line: u64,
    pub column: &'static str,
    pub reason: RowErrorReason,
}

impl RowError {
    pub fn new(line: u64, column: &'static str, reason: RowErrorReason) -> Self {
        Self {
            line,
            column,
            reason,
        }
    }

    pub fn from_date(line: u64, column: &'static str, err: DateError) -> Self {
        match err {
            DateError::Malformed(literal) => {
                Self::new(line, column, RowErrorReason::MalformedDate(literal))
            }
        }
    }
}

/// Failures raised while running an import.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Row(#[from] RowError),
    #[error("bulk transfer failed: {0}")]
    BulkTransfer(String),
    #[error("import {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i32,
        from: ImportStatus,
        to: ImportStatus,
    },
    #[error("import {0} not found")]
    NotFound(i32),
    #[error("csv error: {0}")]
    Csv(#[from] csv_async::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Failures raised by the consolidation rebuild.
#[derive(Debug, Error)]
pub enum ConsolidationError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Failures while running a claimed job.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Consolidation(#[from] ConsolidationError),
}
