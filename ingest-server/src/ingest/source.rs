//! CSV row sources and header mapping.

use crate::error::ImportError;
use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::File;

/// Recognized shipment columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShipmentColumn {
    ShipmentId,
    CustomerId,
    Origin,
    Destination,
    Weight,
    Volume,
    Mode,
    Carrier,
    Status,
    ArrivalDate,
    DepartureDate,
    DeliveredDate,
}

impl ShipmentColumn {
    /// Map a header cell to a column. Date columns accept both the short and
    /// the `_date` spelling; anything else unknown is ignored.
    pub fn from_header(header: &str) -> Option<Self> {
        let column = match header.trim().to_ascii_lowercase().as_str() {
            "shipment_id" => ShipmentColumn::ShipmentId,
            "customer_id" => ShipmentColumn::CustomerId,
            "origin" => ShipmentColumn::Origin,
            "destination" => ShipmentColumn::Destination,
            "weight" => ShipmentColumn::Weight,
            "volume" => ShipmentColumn::Volume,
            "mode" => ShipmentColumn::Mode,
            "carrier" => ShipmentColumn::Carrier,
            "status" => ShipmentColumn::Status,
            "arrival" | "arrival_date" => ShipmentColumn::ArrivalDate,
            "departure" | "departure_date" => ShipmentColumn::DepartureDate,
            "delivered" | "delivered_date" => ShipmentColumn::DeliveredDate,
            _ => return None,
        };
        Some(column)
    }

    /// Destination column name in the `shipments` table.
    pub fn db_column(&self) -> &'static str {
        match self {
            ShipmentColumn::ShipmentId => "shipment_id",
            ShipmentColumn::CustomerId => "customer_id",
            ShipmentColumn::Origin => "origin",
            ShipmentColumn::Destination => "destination",
            ShipmentColumn::Weight => "weight",
            ShipmentColumn::Volume => "volume",
            ShipmentColumn::Mode => "mode",
            ShipmentColumn::Carrier => "carrier",
            ShipmentColumn::Status => "status",
            ShipmentColumn::ArrivalDate => "arrival_date",
            ShipmentColumn::DepartureDate => "departure_date",
            ShipmentColumn::DeliveredDate => "delivered_date",
        }
    }
}

/// Header row of an import file, resolved against the known columns.
#[derive(Debug, Clone)]
pub struct CsvHeader {
    columns: Vec<Option<ShipmentColumn>>,
}

impl CsvHeader {
    pub fn from_record(record: &StringRecord) -> Self {
        let columns = record.iter().map(ShipmentColumn::from_header).collect();
        Self { columns }
    }

    /// Pair a data record with the header. Unknown columns are dropped; when a
    /// column appears twice the first occurrence wins.
    pub fn row(&self, record: &StringRecord) -> CsvRow {
        let line = record.position().map(|pos| pos.line()).unwrap_or(0);
        let mut fields = HashMap::with_capacity(self.columns.len());
        for (column, value) in self.columns.iter().zip(record.iter()) {
            if let Some(column) = column {
                fields.entry(*column).or_insert_with(|| value.to_string());
            }
        }
        CsvRow { line, fields }
    }
}

/// One CSV record keyed by column.
#[derive(Debug, Clone, Default)]
pub struct CsvRow {
    pub line: u64,
    fields: HashMap<ShipmentColumn, String>,
}

impl CsvRow {
    pub fn new(line: u64) -> Self {
        Self {
            line,
            fields: HashMap::new(),
        }
    }

    pub fn with(mut self, column: ShipmentColumn, value: &str) -> Self {
        self.fields.insert(column, value.to_string());
        self
    }

    /// Trimmed value of a column; absent columns read as empty.
    pub fn get(&self, column: ShipmentColumn) -> &str {
        self.fields.get(&column).map(|v| v.trim()).unwrap_or("")
    }
}

/// An import file on local disk.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Open a streaming reader positioned before the header row.
    pub async fn open(&self) -> Result<AsyncReader<File>, ImportError> {
        let file = File::open(&self.path).await?;
        Ok(AsyncReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .create_reader(file))
    }

    /// Stream the data rows, keyed by the header.
    pub async fn rows(&self) -> Result<CsvRows, ImportError> {
        let mut reader = self.open().await?;
        let header = CsvHeader::from_record(reader.headers().await?);
        Ok(CsvRows {
            reader,
            header,
            record: StringRecord::new(),
        })
    }

    /// Count data rows, excluding the header. Quoted newlines stay inside
    /// their record.
    pub async fn count_rows(&self) -> Result<u64, ImportError> {
        let mut reader = self.open().await?;
        let mut record = StringRecord::new();
        let mut total = 0u64;
        while reader.read_record(&mut record).await? {
            total += 1;
        }
        Ok(total)
    }
}

/// Data rows of an open import file. Blank lines are skipped, the same way
/// [`CsvSource::count_rows`] skips them.
pub struct CsvRows {
    reader: AsyncReader<File>,
    header: CsvHeader,
    record: StringRecord,
}

impl CsvRows {
    pub async fn next_row(&mut self) -> Result<Option<CsvRow>, ImportError> {
        if !self.reader.read_record(&mut self.record).await? {
            return Ok(None);
        }
        Ok(Some(self.header.row(&self.record)))
    }
}
