//! Conversion of a single CSV record into a shipment.

use crate::error::{ImportError, RowError, RowErrorReason};
use crate::ingest::dates::parse_date;
use crate::ingest::source::{CsvRow, ShipmentColumn};
use crate::ingest::store::{BackendCapabilities, ImportStore};
use crate::models::Shipment;
use std::collections::HashSet;

/// Status given to rows that leave the column empty.
pub const DEFAULT_SHIPMENT_STATUS: &str = "received";

/// Widths of the bounded text columns in the schema.
const MAX_SHIPMENT_ID_LEN: usize = 40;
const MAX_CUSTOMER_ID_LEN: usize = 32;
const MAX_CARRIER_LEN: usize = 120;

/// Converts CSV rows into shipments, resolving referenced customers first
/// when the backend enforces the customer reference.
pub struct RowLoader<'a> {
    store: &'a dyn ImportStore,
    capabilities: BackendCapabilities,
    resolved_customers: HashSet<String>,
}

impl<'a> RowLoader<'a> {
    pub fn new(store: &'a dyn ImportStore, capabilities: BackendCapabilities) -> Self {
        Self {
            store,
            capabilities,
            resolved_customers: HashSet::new(),
        }
    }

    /// Validate `row` and make sure its customer exists.
    pub async fn load(&mut self, row: &CsvRow) -> Result<Shipment, ImportError> {
        let shipment = convert_row(row)?;

        if self.capabilities.customer_foreign_key {
            if let Some(customer_id) = &shipment.customer_id {
                self.resolve_customer(customer_id).await?;
            }
        }

        log::trace!("row {}: converted shipment '{}'", row.line, shipment.shipment_id);
        Ok(shipment)
    }

    async fn resolve_customer(&mut self, customer_id: &str) -> Result<(), ImportError> {
        if self.resolved_customers.contains(customer_id) {
            return Ok(());
        }
        let customer = self.store.resolve_or_create_customer(customer_id).await?;
        self.resolved_customers.insert(customer.customer_id);
        Ok(())
    }
}

/// Pure conversion of one record. Numeric cells parse empty as zero; optional
/// text cells parse empty as absent.
pub fn convert_row(row: &CsvRow) -> Result<Shipment, RowError> {
    let shipment_id = row.get(ShipmentColumn::ShipmentId);
    if shipment_id.is_empty() {
        return Err(RowError::new(
            row.line,
            ShipmentColumn::ShipmentId.db_column(),
            RowErrorReason::MissingField,
        ));
    }

    check_width(row, ShipmentColumn::ShipmentId, MAX_SHIPMENT_ID_LEN)?;
    check_width(row, ShipmentColumn::CustomerId, MAX_CUSTOMER_ID_LEN)?;
    check_width(row, ShipmentColumn::Carrier, MAX_CARRIER_LEN)?;

    let status = match row.get(ShipmentColumn::Status) {
        "" => DEFAULT_SHIPMENT_STATUS,
        other => other,
    };

    Ok(Shipment {
        shipment_id: shipment_id.to_string(),
        customer_id: optional_text(row, ShipmentColumn::CustomerId),
        carrier: optional_text(row, ShipmentColumn::Carrier),
        origin: row.get(ShipmentColumn::Origin).to_string(),
        destination: row.get(ShipmentColumn::Destination).to_string(),
        weight: number(row, ShipmentColumn::Weight)?,
        volume: number(row, ShipmentColumn::Volume)?,
        mode: row.get(ShipmentColumn::Mode).to_string(),
        status: status.to_string(),
        arrival_date: date(row, ShipmentColumn::ArrivalDate)?,
        departure_date: date(row, ShipmentColumn::DepartureDate)?,
        delivered_date: date(row, ShipmentColumn::DeliveredDate)?,
    })
}

fn check_width(row: &CsvRow, column: ShipmentColumn, max: usize) -> Result<(), RowError> {
    if row.get(column).chars().count() > max {
        return Err(RowError::new(
            row.line,
            column.db_column(),
            RowErrorReason::TooLong { max },
        ));
    }
    Ok(())
}

fn optional_text(row: &CsvRow, column: ShipmentColumn) -> Option<String> {
    match row.get(column) {
        "" => None,
        value => Some(value.to_string()),
    }
}

fn number(row: &CsvRow, column: ShipmentColumn) -> Result<f64, RowError> {
    let raw = row.get(column);
    if raw.is_empty() {
        return Ok(0.0);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| {
            RowError::new(
                row.line,
                column.db_column(),
                RowErrorReason::InvalidNumber(raw.to_string()),
            )
        })
}

fn date(row: &CsvRow, column: ShipmentColumn) -> Result<Option<chrono::NaiveDate>, RowError> {
    parse_date(row.get(column)).map_err(|err| RowError::from_date(row.line, column.db_column(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::testing::MemoryStore;
    use chrono::NaiveDate;

    fn full_row() -> CsvRow {
        CsvRow::new(2)
            .with(ShipmentColumn::ShipmentId, "S1")
            .with(ShipmentColumn::CustomerId, "C9")
            .with(ShipmentColumn::Origin, "TX")
            .with(ShipmentColumn::Destination, "DOM")
            .with(ShipmentColumn::Weight, "10.5")
            .with(ShipmentColumn::Volume, "")
            .with(ShipmentColumn::Mode, "air")
            .with(ShipmentColumn::Carrier, "Island Air")
            .with(ShipmentColumn::Status, "")
            .with(ShipmentColumn::ArrivalDate, "04/10/2025")
            .with(ShipmentColumn::DepartureDate, "2025-04-08")
            .with(ShipmentColumn::DeliveredDate, "")
    }

    #[test]
    fn converts_complete_row() {
        let shipment = convert_row(&full_row()).unwrap();
        assert_eq!(shipment.shipment_id, "S1");
        assert_eq!(shipment.customer_id.as_deref(), Some("C9"));
        assert_eq!(shipment.carrier.as_deref(), Some("Island Air"));
        assert_eq!(shipment.weight, 10.5);
        assert_eq!(shipment.volume, 0.0);
        assert_eq!(shipment.status, DEFAULT_SHIPMENT_STATUS);
        assert_eq!(shipment.arrival_date, NaiveDate::from_ymd_opt(2025, 4, 10));
        assert_eq!(shipment.departure_date, NaiveDate::from_ymd_opt(2025, 4, 8));
        assert_eq!(shipment.delivered_date, None);
    }

    #[test]
    fn missing_identity_is_rejected() {
        let row = CsvRow::new(7).with(ShipmentColumn::Origin, "TX");
        let err = convert_row(&row).unwrap_err();
        assert_eq!(err.line, 7);
        assert_eq!(err.column, "shipment_id");
        assert_eq!(err.reason, RowErrorReason::MissingField);
    }

    #[test]
    fn bad_number_names_the_column() {
        let row = full_row().with(ShipmentColumn::Volume, "lots");
        let err = convert_row(&row).unwrap_err();
        assert_eq!(err.column, "volume");
        assert_eq!(err.reason, RowErrorReason::InvalidNumber("lots".into()));

        let row = full_row().with(ShipmentColumn::Weight, "NaN");
        assert_eq!(convert_row(&row).unwrap_err().column, "weight");
    }

    #[test]
    fn bad_date_names_the_column() {
        let row = full_row().with(ShipmentColumn::DeliveredDate, "soon");
        let err = convert_row(&row).unwrap_err();
        assert_eq!(err.column, "delivered_date");
        assert_eq!(err.reason, RowErrorReason::MalformedDate("soon".into()));
    }

    #[test]
    fn oversized_identities_are_row_errors() {
        let row = full_row().with(ShipmentColumn::ShipmentId, &"X".repeat(41));
        let err = convert_row(&row).unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.column, "shipment_id");
        assert_eq!(err.reason, RowErrorReason::TooLong { max: 40 });

        let row = full_row().with(ShipmentColumn::CustomerId, &"C".repeat(33));
        assert_eq!(convert_row(&row).unwrap_err().column, "customer_id");

        let row = full_row().with(ShipmentColumn::ShipmentId, &"X".repeat(40));
        assert!(convert_row(&row).is_ok());
    }

    #[tokio::test]
    async fn customers_are_created_once() {
        let store = MemoryStore::new();
        let mut loader = RowLoader::new(&store, store.capabilities_snapshot());

        loader.load(&full_row()).await.unwrap();
        loader
            .load(&full_row().with(ShipmentColumn::ShipmentId, "S2"))
            .await
            .unwrap();

        assert_eq!(store.customer_ids().await, vec!["C9".to_string()]);
        assert_eq!(store.customer_resolutions().await, 1);
    }

    #[tokio::test]
    async fn customers_untouched_without_foreign_key() {
        let store = MemoryStore::new();
        let capabilities = BackendCapabilities {
            bulk_copy: false,
            customer_foreign_key: false,
        };
        let mut loader = RowLoader::new(&store, capabilities);

        let shipment = loader.load(&full_row()).await.unwrap();
        assert_eq!(shipment.customer_id.as_deref(), Some("C9"));
        assert!(store.customer_ids().await.is_empty());
    }
}
