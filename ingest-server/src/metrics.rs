//! Read-side aggregates over `shipments`.
//!
//! Every query here is a pure function of the table contents, so callers may
//! memoize results however they like.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::postgres::PgPool;
use sqlx::FromRow;

/// Warehouse capacity in cubic centimetres.
pub const WAREHOUSE_CAPACITY_CM3: f64 = 60_000_000_000.0;

#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct CarrierCount {
    pub carrier: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct ModeVolume {
    pub mode: String,
    pub total_volume: f64,
}

#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct DailyArrivals {
    pub arrival_date: NaiveDate,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ShipmentMetrics {
    pub by_status: Vec<StatusCount>,
    pub utilisation_pct: f64,
    pub by_carrier: Vec<CarrierCount>,
    pub volume_by_mode: Vec<ModeVolume>,
    pub arrivals_by_date: Vec<DailyArrivals>,
}

/// Share of warehouse capacity taken by `total_volume`, as a percentage
/// rounded to two decimals.
pub fn utilisation_pct(total_volume: f64) -> f64 {
    let pct = total_volume / WAREHOUSE_CAPACITY_CM3 * 100.0;
    (pct * 100.0).round() / 100.0
}

pub struct MetricsQueries {
    pool: PgPool,
}

impl MetricsQueries {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn status_counts(&self) -> Result<Vec<StatusCount>, sqlx::Error> {
        sqlx::query_as(
            "SELECT status, COUNT(*) AS count FROM shipments GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn total_volume(&self) -> Result<f64, sqlx::Error> {
        let (total,): (f64,) =
            sqlx::query_as("SELECT COALESCE(SUM(volume), 0)::float8 FROM shipments")
                .fetch_one(&self.pool)
                .await?;
        Ok(total)
    }

    /// Shipments per carrier label, busiest first. Unlabelled shipments are
    /// left out.
    pub async fn carrier_counts(&self) -> Result<Vec<CarrierCount>, sqlx::Error> {
        sqlx::query_as(
            r#"SELECT carrier, COUNT(*) AS count
               FROM shipments
               WHERE carrier IS NOT NULL
               GROUP BY carrier
               ORDER BY count DESC, carrier"#,
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn volume_by_mode(&self) -> Result<Vec<ModeVolume>, sqlx::Error> {
        sqlx::query_as(
            r#"SELECT mode, SUM(volume)::float8 AS total_volume
               FROM shipments
               GROUP BY mode
               ORDER BY mode"#,
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn daily_arrivals(&self) -> Result<Vec<DailyArrivals>, sqlx::Error> {
        sqlx::query_as(
            r#"SELECT arrival_date, COUNT(*) AS count
               FROM shipments
               WHERE arrival_date IS NOT NULL
               GROUP BY arrival_date
               ORDER BY arrival_date"#,
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn snapshot(&self) -> Result<ShipmentMetrics, sqlx::Error> {
        Ok(ShipmentMetrics {
            by_status: self.status_counts().await?,
            utilisation_pct: utilisation_pct(self.total_volume().await?),
            by_carrier: self.carrier_counts().await?,
            volume_by_mode: self.volume_by_mode().await?,
            arrivals_by_date: self.daily_arrivals().await?,
        })
    }
}
