use chrono::NaiveDate;
use ingest_server::metrics::{
    CarrierCount, DailyArrivals, MetricsQueries, ModeVolume, StatusCount,
};
use ingest_server::test_support::{TestDatabase, TestDatabaseError};
use sqlx::PgPool;

macro_rules! test_database {
    ($what:literal) => {
        match TestDatabase::new_from_env().await {
            Ok(db) => db,
            Err(TestDatabaseError::MissingUrl) => {
                eprintln!("skipping {}: TEST_DATABASE_URL not set", $what);
                return;
            }
            Err(err) => panic!("failed to provision test database: {err:?}"),
        }
    };
}

fn day(d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(2025, 4, d)
}

async fn insert_shipment(
    pool: &PgPool,
    id: &str,
    mode: &str,
    carrier: Option<&str>,
    status: &str,
    volume: f64,
    arrival: Option<NaiveDate>,
) {
    sqlx::query(
        r#"INSERT INTO shipments (shipment_id, origin, destination, mode, carrier, status, volume, arrival_date)
           VALUES ($1, 'TX', 'DOM', $2, $3, $4, $5, $6)"#,
    )
    .bind(id)
    .bind(mode)
    .bind(carrier)
    .bind(status)
    .bind(volume)
    .bind(arrival)
    .execute(pool)
    .await
    .expect("insert shipment");
}

fn status(status: &str, count: i64) -> StatusCount {
    StatusCount {
        status: status.to_string(),
        count,
    }
}

#[tokio::test]
async fn snapshot_aggregates_shipments() {
    let test_db = test_database!("metrics snapshot test");
    let pool = test_db.pool_clone();

    insert_shipment(&pool, "S1", "air", Some("Island Air"), "received", 1e9, day(8)).await;
    insert_shipment(&pool, "S2", "air", Some("Island Air"), "in transit", 2e9, day(8)).await;
    insert_shipment(&pool, "S3", "sea", Some("Blue Water"), "received", 3e9, day(9)).await;
    insert_shipment(&pool, "S4", "sea", None, "delivered", 0.0, None).await;

    let metrics = MetricsQueries::new(pool.clone())
        .snapshot()
        .await
        .expect("snapshot");

    assert_eq!(
        metrics.by_status,
        vec![
            status("delivered", 1),
            status("in transit", 1),
            status("received", 2)
        ]
    );
    assert_eq!(metrics.utilisation_pct, 10.0);
    assert_eq!(
        metrics.by_carrier,
        vec![
            CarrierCount {
                carrier: "Island Air".to_string(),
                count: 2
            },
            CarrierCount {
                carrier: "Blue Water".to_string(),
                count: 1
            },
        ]
    );
    assert_eq!(
        metrics.volume_by_mode,
        vec![
            ModeVolume {
                mode: "air".to_string(),
                total_volume: 3e9
            },
            ModeVolume {
                mode: "sea".to_string(),
                total_volume: 3e9
            },
        ]
    );
    assert_eq!(
        metrics.arrivals_by_date,
        vec![
            DailyArrivals {
                arrival_date: NaiveDate::from_ymd_opt(2025, 4, 8).expect("valid date"),
                count: 2
            },
            DailyArrivals {
                arrival_date: NaiveDate::from_ymd_opt(2025, 4, 9).expect("valid date"),
                count: 1
            },
        ]
    );

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn empty_catalog_reports_zero_utilisation() {
    let test_db = test_database!("metrics empty test");

    let metrics = MetricsQueries::new(test_db.pool_clone())
        .snapshot()
        .await
        .expect("snapshot");
    assert_eq!(metrics.utilisation_pct, 0.0);
    assert!(metrics.by_status.is_empty());
    assert!(metrics.by_carrier.is_empty());

    test_db.close().await.expect("failed to drop test database");
}
