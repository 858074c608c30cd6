//! CSV shipment ingestion.
//!
//! An import is registered as `pending` with its declared row count, then run
//! by [`ImportJob`]: the backend is probed once, a [`BulkLoadStrategy`] is
//! chosen, and the import ends `completed` or `failed`. Progress is readable
//! at any time through [`ImportStore::progress`].

pub mod dates;
pub mod job;
pub mod row_loader;
pub mod source;
pub mod store;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;

pub use dates::parse_date;
pub use job::{register_import, ImportJob, ImportOutcome};
pub use row_loader::{convert_row, RowLoader};
pub use source::{CsvHeader, CsvRow, CsvRows, CsvSource, ShipmentColumn};
pub use store::{BackendCapabilities, ImportStore, PgImportStore, ShipmentsData};
pub use strategy::{
    choose_strategy, select_strategy, BatchedInsert, BulkLoadStrategy, StrategyChoice,
    StreamingCopy,
};
