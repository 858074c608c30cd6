//! Consolidation index: shipments sharing a destination and departure date.
//!
//! The index is derived data. `rebuild` throws the whole thing away and
//! recomputes it from `shipments` inside one transaction, so readers either
//! see the previous index or the new one, never a half-built state.

use crate::error::ConsolidationError;
use crate::models::ConsolidationGroup;
use chrono::NaiveDate;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::FromRow;

/// Fewest shipments that make a shared load.
pub const MIN_GROUP_SIZE: i64 = 2;

/// Aggregates for one `(destination, departure_date)` key.
#[derive(Debug, Clone, FromRow, PartialEq)]
struct GroupTotals {
    destination: String,
    departure_date: NaiveDate,
    shipment_count: i64,
    total_weight: f64,
    total_volume: f64,
}

pub struct ConsolidationEngine {
    pool: PgPool,
}

impl ConsolidationEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Replace the consolidation index with one computed from the current
    /// shipments. Returns the number of groups created.
    ///
    /// Shipments without a departure date never group. Concurrent rebuilds
    /// serialize on the table lock; readers are not blocked.
    pub async fn rebuild(&self) -> Result<u64, ConsolidationError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;
        // Taken before any query so the snapshot postdates the lock.
        sqlx::query(
            "LOCK TABLE consolidations, consolidation_shipments IN SHARE ROW EXCLUSIVE MODE",
        )
        .execute(&mut *tx)
        .await?;

        let links = sqlx::query("DELETE FROM consolidation_shipments")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let groups = sqlx::query("DELETE FROM consolidations")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        log::debug!("consolidation: cleared {} groups and {} links", groups, links);

        let totals = aggregate_groups(&mut *tx).await?;

        let mut created = 0u64;
        for group in &totals {
            let linked = insert_group(&mut *tx, group).await?;
            if linked as i64 != group.shipment_count {
                log::warn!(
                    "consolidation: {} on {} counted {} shipments but linked {}",
                    group.destination,
                    group.departure_date,
                    group.shipment_count,
                    linked
                );
            }
            created += 1;
        }

        tx.commit().await?;

        log::info!("consolidation: rebuilt {} groups", created);
        Ok(created)
    }

    /// Current groups with their linked shipment identities, ordered by
    /// departure date then destination.
    pub async fn list(&self) -> Result<Vec<ConsolidationGroup>, ConsolidationError> {
        let groups = sqlx::query_as::<_, ConsolidationGroup>(
            r#"SELECT c.id, c.destination, c.departure_date, c.total_weight, c.total_volume,
                      c.created_at,
                      COALESCE(
                          array_agg(cs.shipment_id::text ORDER BY cs.shipment_id)
                              FILTER (WHERE cs.shipment_id IS NOT NULL),
                          '{}'::text[]
                      ) AS shipment_ids
               FROM consolidations c
               LEFT JOIN consolidation_shipments cs ON cs.consolidation_id = c.id
               GROUP BY c.id
               ORDER BY c.departure_date, c.destination"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(groups)
    }
}

async fn aggregate_groups(conn: &mut PgConnection) -> Result<Vec<GroupTotals>, sqlx::Error> {
    sqlx::query_as::<_, GroupTotals>(
        r#"SELECT destination,
                  departure_date,
                  COUNT(*) AS shipment_count,
                  SUM(weight) AS total_weight,
                  SUM(volume) AS total_volume
           FROM shipments
           WHERE departure_date IS NOT NULL
           GROUP BY destination, departure_date
           HAVING COUNT(*) >= $1
           ORDER BY destination, departure_date"#,
    )
    .bind(MIN_GROUP_SIZE)
    .fetch_all(conn)
    .await
}

/// Create one group and link every shipment on its key. Returns the number
/// of links written.
async fn insert_group(conn: &mut PgConnection, group: &GroupTotals) -> Result<u64, sqlx::Error> {
    let (consolidation_id,): (i32,) = sqlx::query_as(
        r#"INSERT INTO consolidations (destination, departure_date, total_weight, total_volume)
           VALUES ($1, $2, $3, $4)
           RETURNING id"#,
    )
    .bind(&group.destination)
    .bind(group.departure_date)
    .bind(group.total_weight)
    .bind(group.total_volume)
    .fetch_one(&mut *conn)
    .await?;

    let shipment_ids: Vec<(String,)> = sqlx::query_as(
        r#"SELECT shipment_id FROM shipments
           WHERE destination = $1 AND departure_date = $2
           ORDER BY shipment_id"#,
    )
    .bind(&group.destination)
    .bind(group.departure_date)
    .fetch_all(&mut *conn)
    .await?;
    let shipment_ids: Vec<String> = shipment_ids.into_iter().map(|(id,)| id).collect();

    let result = sqlx::query(
        r#"INSERT INTO consolidation_shipments (consolidation_id, shipment_id)
           SELECT $1, UNNEST($2::text[])
           ON CONFLICT (consolidation_id, shipment_id) DO NOTHING"#,
    )
    .bind(consolidation_id)
    .bind(&shipment_ids)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}
