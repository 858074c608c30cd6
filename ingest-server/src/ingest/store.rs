//! Storage seam for the ingestion pipeline.
//!
//! `ImportStore` covers every write the pipeline performs: import status
//! transitions and checkpoints, customer resolution, batched shipment inserts
//! and the native bulk copy. `PgImportStore` is the PostgreSQL implementation.

use crate::error::ImportError;
use crate::ingest::row_loader::convert_row;
use crate::ingest::source::{CsvRows, CsvSource};
use crate::models::{CsvImport, Customer, ImportProgress, ImportStatus, Shipment};
use async_trait::async_trait;
use chrono::NaiveDate;
use csv_async::AsyncWriterBuilder;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::FromRow;

/// Converted rows encoded per `COPY` data message.
const COPY_CHUNK_ROWS: usize = 1000;

const COPY_STAGING: &str = "COPY shipment_staging (
        shipment_id, customer_id, carrier, origin, destination,
        weight, volume, mode, status,
        arrival_date, departure_date, delivered_date
    ) FROM STDIN WITH (FORMAT csv)";

/// What the storage backend can do, probed once per import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Native streaming bulk transfer is available.
    pub bulk_copy: bool,
    /// Shipments reference customers by foreign key, so unknown customers
    /// must exist before the shipment row is written.
    pub customer_foreign_key: bool,
}

/// Prepared shipment data in columnar form for UNNEST inserts.
///
/// All vectors have the same length; each index is one shipment.
#[derive(Debug, Default, Clone)]
pub struct ShipmentsData {
    pub shipment_ids: Vec<String>,
    pub customer_ids: Vec<Option<String>>,
    pub carriers: Vec<Option<String>>,
    pub origins: Vec<String>,
    pub destinations: Vec<String>,
    pub weights: Vec<f64>,
    pub volumes: Vec<f64>,
    pub modes: Vec<String>,
    pub statuses: Vec<String>,
    pub arrival_dates: Vec<Option<NaiveDate>>,
    pub departure_dates: Vec<Option<NaiveDate>>,
    pub delivered_dates: Vec<Option<NaiveDate>>,
}

impl ShipmentsData {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            shipment_ids: Vec::with_capacity(capacity),
            customer_ids: Vec::with_capacity(capacity),
            carriers: Vec::with_capacity(capacity),
            origins: Vec::with_capacity(capacity),
            destinations: Vec::with_capacity(capacity),
            weights: Vec::with_capacity(capacity),
            volumes: Vec::with_capacity(capacity),
            modes: Vec::with_capacity(capacity),
            statuses: Vec::with_capacity(capacity),
            arrival_dates: Vec::with_capacity(capacity),
            departure_dates: Vec::with_capacity(capacity),
            delivered_dates: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, shipment: Shipment) {
        self.shipment_ids.push(shipment.shipment_id);
        self.customer_ids.push(shipment.customer_id);
        self.carriers.push(shipment.carrier);
        self.origins.push(shipment.origin);
        self.destinations.push(shipment.destination);
        self.weights.push(shipment.weight);
        self.volumes.push(shipment.volume);
        self.modes.push(shipment.mode);
        self.statuses.push(shipment.status);
        self.arrival_dates.push(shipment.arrival_date);
        self.departure_dates.push(shipment.departure_date);
        self.delivered_dates.push(shipment.delivered_date);
    }

    pub fn len(&self) -> usize {
        self.shipment_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shipment_ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.shipment_ids.clear();
        self.customer_ids.clear();
        self.carriers.clear();
        self.origins.clear();
        self.destinations.clear();
        self.weights.clear();
        self.volumes.clear();
        self.modes.clear();
        self.statuses.clear();
        self.arrival_dates.clear();
        self.departure_dates.clear();
        self.delivered_dates.clear();
    }

    /// Rebuild row-shaped records, in insertion order.
    pub fn rows(&self) -> impl Iterator<Item = Shipment> + '_ {
        (0..self.len()).map(move |i| Shipment {
            shipment_id: self.shipment_ids[i].clone(),
            customer_id: self.customer_ids[i].clone(),
            carrier: self.carriers[i].clone(),
            origin: self.origins[i].clone(),
            destination: self.destinations[i].clone(),
            weight: self.weights[i],
            volume: self.volumes[i],
            mode: self.modes[i].clone(),
            status: self.statuses[i].clone(),
            arrival_date: self.arrival_dates[i],
            departure_date: self.departure_dates[i],
            delivered_date: self.delivered_dates[i],
        })
    }
}

#[derive(FromRow)]
struct ResolvedCustomer {
    #[sqlx(flatten)]
    customer: Customer,
    created: bool,
}

#[async_trait]
pub trait ImportStore: Send + Sync {
    /// Record an accepted upload as a `pending` import.
    async fn create_import(
        &self,
        file_path: &str,
        file_name: &str,
        total_rows: u64,
    ) -> Result<CsvImport, ImportError>;

    async fn load_import(&self, import_id: i32) -> Result<CsvImport, ImportError>;

    /// Progress read contract: most recently committed checkpoint.
    async fn progress(&self, import_id: i32) -> Result<ImportProgress, ImportError>;

    /// `pending -> processing`. Refused from any other state.
    async fn begin_processing(&self, import_id: i32) -> Result<(), ImportError>;

    /// Persist the running processed-row count. Never moves it backwards.
    async fn record_progress(&self, import_id: i32, processed: u64) -> Result<(), ImportError>;

    /// `processing -> completed` with the final processed count.
    async fn complete(&self, import_id: i32, processed: u64) -> Result<(), ImportError>;

    /// `processing -> failed`, keeping the error description.
    async fn fail(&self, import_id: i32, error: &str) -> Result<(), ImportError>;

    async fn capabilities(&self) -> Result<BackendCapabilities, ImportError>;

    /// Get-or-create a customer keyed by identity. An existing record is
    /// returned unchanged.
    async fn resolve_or_create_customer(
        &self,
        customer_id: &str,
    ) -> Result<Customer, ImportError>;

    /// Insert a batch, silently skipping identities that already exist.
    /// Returns the number of rows actually inserted.
    async fn insert_shipments(&self, batch: &ShipmentsData) -> Result<u64, ImportError>;

    /// Convert every row of `source` and stream the result into `shipments`
    /// as one atomic transfer. A row that fails conversion aborts the whole
    /// transfer. Returns the number of data rows transferred.
    async fn copy_csv(&self, source: &CsvSource) -> Result<u64, ImportError>;
}

/// PostgreSQL-backed import store.
#[derive(Clone)]
pub struct PgImportStore {
    pool: PgPool,
}

impl PgImportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Move `import_id` from `from` to `to`, or explain why it cannot.
    async fn transition(
        &self,
        import_id: i32,
        from: ImportStatus,
        to: ImportStatus,
        processed: Option<u64>,
        error: Option<&str>,
    ) -> Result<(), ImportError> {
        let result = sqlx::query(
            r#"UPDATE csv_imports
               SET status = $3,
                   processed_rows = CASE WHEN $4::bigint IS NULL THEN processed_rows
                                         ELSE LEAST($4::bigint, total_rows) END,
                   error_log = COALESCE($5::text, error_log),
                   started_at = CASE WHEN $3 = 'processing'::import_status THEN NOW() ELSE started_at END,
                   finished_at = CASE WHEN $3 = 'processing'::import_status THEN finished_at ELSE NOW() END
               WHERE id = $1 AND status = $2"#,
        )
        .bind(import_id)
        .bind(from)
        .bind(to)
        .bind(processed.map(|p| p as i64))
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            log::info!("import {}: {} -> {}", import_id, from, to);
            return Ok(());
        }

        let current = self.load_import(import_id).await?;
        Err(ImportError::InvalidTransition {
            id: import_id,
            from: current.status,
            to,
        })
    }
}

#[async_trait]
impl ImportStore for PgImportStore {
    async fn create_import(
        &self,
        file_path: &str,
        file_name: &str,
        total_rows: u64,
    ) -> Result<CsvImport, ImportError> {
        let import: CsvImport = sqlx::query_as(
            r#"INSERT INTO csv_imports (file_path, file_name, total_rows)
               VALUES ($1, $2, $3)
               RETURNING id, file_path, file_name, uploaded_at, started_at, finished_at,
                         status, total_rows, processed_rows, error_log"#,
        )
        .bind(file_path)
        .bind(file_name)
        .bind(total_rows as i64)
        .fetch_one(&self.pool)
        .await?;

        log::info!(
            "import {}: accepted '{}' with {} rows",
            import.id,
            import.file_name,
            import.total_rows
        );
        Ok(import)
    }

    async fn load_import(&self, import_id: i32) -> Result<CsvImport, ImportError> {
        sqlx::query_as(
            r#"SELECT id, file_path, file_name, uploaded_at, started_at, finished_at,
                      status, total_rows, processed_rows, error_log
               FROM csv_imports WHERE id = $1"#,
        )
        .bind(import_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ImportError::NotFound(import_id))
    }

    async fn progress(&self, import_id: i32) -> Result<ImportProgress, ImportError> {
        sqlx::query_as(
            "SELECT processed_rows, total_rows, status, error_log FROM csv_imports WHERE id = $1",
        )
        .bind(import_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ImportError::NotFound(import_id))
    }

    async fn begin_processing(&self, import_id: i32) -> Result<(), ImportError> {
        self.transition(
            import_id,
            ImportStatus::Pending,
            ImportStatus::Processing,
            None,
            None,
        )
        .await
    }

    async fn record_progress(&self, import_id: i32, processed: u64) -> Result<(), ImportError> {
        sqlx::query(
            r#"UPDATE csv_imports
               SET processed_rows = GREATEST(processed_rows, LEAST($2, total_rows))
               WHERE id = $1 AND status = 'processing'"#,
        )
        .bind(import_id)
        .bind(processed as i64)
        .execute(&self.pool)
        .await?;

        log::debug!("import {}: checkpoint at {} rows", import_id, processed);
        Ok(())
    }

    async fn complete(&self, import_id: i32, processed: u64) -> Result<(), ImportError> {
        self.transition(
            import_id,
            ImportStatus::Processing,
            ImportStatus::Completed,
            Some(processed),
            None,
        )
        .await
    }

    async fn fail(&self, import_id: i32, error: &str) -> Result<(), ImportError> {
        self.transition(
            import_id,
            ImportStatus::Processing,
            ImportStatus::Failed,
            None,
            Some(error),
        )
        .await
    }

    async fn capabilities(&self) -> Result<BackendCapabilities, ImportError> {
        let (version,): (String,) = sqlx::query_as("SELECT version()")
            .fetch_one(&self.pool)
            .await?;

        Ok(BackendCapabilities {
            bulk_copy: supports_copy_from_stdin(&version),
            customer_foreign_key: true,
        })
    }

    async fn resolve_or_create_customer(
        &self,
        customer_id: &str,
    ) -> Result<Customer, ImportError> {
        // The outer SELECT cannot see the CTE's insert, so exactly one arm
        // yields a row.
        let resolved: ResolvedCustomer = sqlx::query_as(
            r#"WITH created AS (
                   INSERT INTO customers (customer_id, name, email)
                   VALUES ($1, $1, '')
                   ON CONFLICT (customer_id) DO NOTHING
                   RETURNING customer_id, name, email
               )
               SELECT customer_id, name, email, TRUE AS created FROM created
               UNION ALL
               SELECT customer_id, name, email, FALSE AS created
               FROM customers WHERE customer_id = $1"#,
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;

        if resolved.created {
            log::debug!("created customer '{}'", resolved.customer.customer_id);
        }
        Ok(resolved.customer)
    }

    async fn insert_shipments(&self, batch: &ShipmentsData) -> Result<u64, ImportError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"INSERT INTO shipments (
                shipment_id, customer_id, carrier, origin, destination,
                weight, volume, mode, status,
                arrival_date, departure_date, delivered_date
               )
               SELECT * FROM UNNEST(
                   $1::text[], $2::text[], $3::text[], $4::text[], $5::text[],
                   $6::float8[], $7::float8[], $8::text[], $9::text[],
                   $10::date[], $11::date[], $12::date[]
               )
               ON CONFLICT (shipment_id) DO NOTHING"#,
        )
        .bind(&batch.shipment_ids)
        .bind(&batch.customer_ids)
        .bind(&batch.carriers)
        .bind(&batch.origins)
        .bind(&batch.destinations)
        .bind(&batch.weights)
        .bind(&batch.volumes)
        .bind(&batch.modes)
        .bind(&batch.statuses)
        .bind(&batch.arrival_dates)
        .bind(&batch.departure_dates)
        .bind(&batch.delivered_dates)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected();
        if (inserted as usize) < batch.len() {
            log::debug!(
                "insert_shipments: {} of {} rows inserted ({} duplicate identities skipped)",
                inserted,
                batch.len(),
                batch.len() - inserted as usize
            );
        }
        Ok(inserted)
    }

    async fn copy_csv(&self, source: &CsvSource) -> Result<u64, ImportError> {
        let mut rows = source.rows().await?;
        let mut tx = self.pool.begin().await.map_err(bulk_transfer)?;

        let copied = copy_into_staging(&mut *tx, &mut rows).await?;
        let inserted = promote_staging(&mut *tx).await.map_err(bulk_transfer)?;
        tx.commit().await.map_err(bulk_transfer)?;

        if inserted < copied {
            log::debug!(
                "copy_csv: {} rows streamed, {} inserted ({} duplicate identities skipped)",
                copied,
                inserted,
                copied - inserted
            );
        }
        Ok(copied)
    }
}

fn bulk_transfer(err: sqlx::Error) -> ImportError {
    ImportError::BulkTransfer(err.to_string())
}

/// Whether a server version string belongs to a backend that accepts
/// `COPY ... FROM STDIN`.
fn supports_copy_from_stdin(version: &str) -> bool {
    version.starts_with("PostgreSQL") && !version.contains("Redshift")
}

/// Stream converted rows into a transaction-scoped staging table.
///
/// Rows go through the same conversion as batched inserts, so the server only
/// ever sees ISO dates and plain numbers. A conversion or read failure aborts
/// the copy before anything reaches `shipments`.
async fn copy_into_staging(
    conn: &mut PgConnection,
    rows: &mut CsvRows,
) -> Result<u64, ImportError> {
    sqlx::query(
        r#"CREATE TEMP TABLE shipment_staging (
            line_no BIGSERIAL,
            shipment_id TEXT NOT NULL,
            customer_id TEXT,
            carrier TEXT,
            origin TEXT,
            destination TEXT,
            weight DOUBLE PRECISION,
            volume DOUBLE PRECISION,
            mode TEXT,
            status TEXT,
            arrival_date DATE,
            departure_date DATE,
            delivered_date DATE
           ) ON COMMIT DROP"#,
    )
    .execute(&mut *conn)
    .await
    .map_err(bulk_transfer)?;

    let mut copy = conn.copy_in_raw(COPY_STAGING).await.map_err(bulk_transfer)?;
    let mut chunk = Vec::with_capacity(COPY_CHUNK_ROWS);
    loop {
        let next = match rows.next_row().await {
            Ok(next) => next,
            Err(err) => {
                copy.abort(err.to_string()).await.map_err(bulk_transfer)?;
                return Err(err);
            }
        };
        let Some(row) = next else { break };

        match convert_row(&row) {
            Ok(shipment) => chunk.push(shipment),
            Err(err) => {
                copy.abort(err.to_string()).await.map_err(bulk_transfer)?;
                return Err(err.into());
            }
        }

        if chunk.len() >= COPY_CHUNK_ROWS {
            let data = encode_staging_rows(&chunk).await?;
            copy.send(data).await.map_err(bulk_transfer)?;
            chunk.clear();
        }
    }

    if !chunk.is_empty() {
        let data = encode_staging_rows(&chunk).await?;
        copy.send(data).await.map_err(bulk_transfer)?;
    }

    copy.finish().await.map_err(bulk_transfer)
}

/// Encode shipments as CSV in `COPY_STAGING` column order. Absent values are
/// written as unquoted empty fields, which the copy reads as NULL.
async fn encode_staging_rows(shipments: &[Shipment]) -> Result<Vec<u8>, ImportError> {
    let mut writer = AsyncWriterBuilder::new()
        .has_headers(false)
        .create_writer(Vec::new());
    for shipment in shipments {
        writer.write_record(&staging_record(shipment)).await?;
    }
    Ok(writer.into_inner().await?)
}

fn staging_record(shipment: &Shipment) -> [String; 12] {
    let date = |value: Option<NaiveDate>| {
        value
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    };

    [
        shipment.shipment_id.clone(),
        shipment.customer_id.clone().unwrap_or_default(),
        shipment.carrier.clone().unwrap_or_default(),
        shipment.origin.clone(),
        shipment.destination.clone(),
        shipment.weight.to_string(),
        shipment.volume.to_string(),
        shipment.mode.clone(),
        shipment.status.clone(),
        date(shipment.arrival_date),
        date(shipment.departure_date),
        date(shipment.delivered_date),
    ]
}

/// Create referenced customers and move staged rows into `shipments`,
/// first occurrence of an identity winning.
async fn promote_staging(conn: &mut PgConnection) -> Result<u64, sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO customers (customer_id, name, email)
           SELECT DISTINCT customer_id, customer_id, ''
           FROM shipment_staging
           WHERE customer_id IS NOT NULL
           ON CONFLICT (customer_id) DO NOTHING"#,
    )
    .execute(&mut *conn)
    .await?;

    let result = sqlx::query(
        r#"INSERT INTO shipments (
            shipment_id, customer_id, carrier, origin, destination,
            weight, volume, mode, status,
            arrival_date, departure_date, delivered_date
           )
           SELECT
               shipment_id,
               customer_id,
               carrier,
               COALESCE(origin, ''),
               COALESCE(destination, ''),
               COALESCE(weight, 0),
               COALESCE(volume, 0),
               COALESCE(mode, ''),
               COALESCE(status, 'received'),
               arrival_date,
               departure_date,
               delivered_date
           FROM shipment_staging
           ORDER BY line_no
           ON CONFLICT (shipment_id) DO NOTHING"#,
    )
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shipment(id: &str) -> Shipment {
        Shipment {
            shipment_id: id.to_string(),
            customer_id: None,
            carrier: Some("Blue Water".into()),
            origin: "FL".into(),
            destination: "JAM".into(),
            weight: 1.5,
            volume: 2.0,
            mode: "sea".into(),
            status: "received".into(),
            arrival_date: None,
            departure_date: NaiveDate::from_ymd_opt(2025, 4, 8),
            delivered_date: None,
        }
    }

    #[test]
    fn columnar_batch_preserves_rows() {
        let mut batch = ShipmentsData::with_capacity(2);
        batch.push(shipment("A"));
        batch.push(shipment("B"));
        assert_eq!(batch.len(), 2);

        let rows: Vec<Shipment> = batch.rows().collect();
        assert_eq!(rows, vec![shipment("A"), shipment("B")]);

        batch.clear();
        assert!(batch.is_empty());
        assert!(batch.departure_dates.is_empty());
    }

    #[tokio::test]
    async fn staging_rows_use_iso_dates_and_empty_for_absent() {
        let mut day_first = shipment("S,1");
        day_first.departure_date = NaiveDate::from_ymd_opt(2025, 12, 25);
        day_first.carrier = None;

        let encoded = encode_staging_rows(&[day_first]).await.unwrap();
        assert_eq!(
            String::from_utf8(encoded).unwrap(),
            "\"S,1\",,,FL,JAM,1.5,2,sea,received,,2025-12-25,\n"
        );
    }

    #[test]
    fn copy_support_follows_server_family() {
        assert!(supports_copy_from_stdin(
            "PostgreSQL 16.2 on x86_64-pc-linux-gnu, compiled by gcc"
        ));
        assert!(!supports_copy_from_stdin(
            "PostgreSQL 8.0.2 on i686-pc-linux-gnu, Redshift 1.0.62312"
        ));
        assert!(!supports_copy_from_stdin("CockroachDB CCL v23.1.0"));
    }
}
