use ingest_server::db::MIGRATOR;
use ingest_server::test_support::{TestDatabase, TestDatabaseError};
use sqlx::PgPool;

async fn table_exists(pool: &PgPool, table: &str) -> bool {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'public' AND table_name = $1",
    )
    .bind(table)
    .fetch_one(pool)
    .await
    .expect("lookup succeeded");
    count == 1
}

#[tokio::test]
async fn migrations_apply_and_revert_cleanly() {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(TestDatabaseError::MissingUrl) => {
            eprintln!("skipping migration revert test: TEST_DATABASE_URL not set");
            return;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };

    let pool = test_db.pool_clone();

    MIGRATOR.run(&pool).await.expect("migrations run");
    for table in ["csv_imports", "shipments", "consolidations", "jobs"] {
        assert!(table_exists(&pool, table).await, "{table} should exist");
    }

    MIGRATOR.undo(&pool, 0).await.expect("migrations revert");
    assert!(
        !table_exists(&pool, "shipments").await,
        "shipments should be dropped after revert"
    );

    MIGRATOR.run(&pool).await.expect("migrations rerun");
    assert!(table_exists(&pool, "shipments").await);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn processed_rows_cannot_exceed_total() {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(TestDatabaseError::MissingUrl) => {
            eprintln!("skipping schema constraint test: TEST_DATABASE_URL not set");
            return;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };

    let pool = test_db.pool_clone();
    let result = sqlx::query(
        "INSERT INTO csv_imports (file_path, file_name, total_rows, processed_rows) VALUES ('a.csv', 'a.csv', 1, 2)",
    )
    .execute(&pool)
    .await;
    assert!(result.is_err());

    test_db.close().await.expect("failed to drop test database");
}
