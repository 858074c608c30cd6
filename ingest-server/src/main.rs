use std::error::Error;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ingest_server::config::AppConfig;
use ingest_server::consolidation::ConsolidationEngine;
use ingest_server::db;
use ingest_server::ingest::{register_import, CsvSource, ImportJob, ImportStore, PgImportStore};
use ingest_server::metrics::MetricsQueries;
use ingest_server::worker::{Dispatcher, JobQueue};

#[derive(Parser, Debug)]
#[command(
    name = "ingest-server",
    about = "Shipment CSV ingestion and consolidation service"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending database migrations.
    Migrate,
    /// Run the job dispatcher until Ctrl-C.
    Worker,
    /// Accept a CSV file and queue it for import.
    Import { file: PathBuf },
    /// Register and import a CSV file in this process, bypassing the queue.
    RunImport { file: PathBuf },
    /// Show progress of an import.
    Progress { import_id: i32 },
    /// Rebuild the consolidation index now.
    Consolidate,
    /// List current consolidation groups.
    Consolidations,
    /// Print shipment metrics.
    Metrics,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    ingest_server::init_logger();

    let cli = Cli::parse();
    let config = AppConfig::from_env();
    let database_url = config
        .database_url
        .clone()
        .ok_or("DATABASE_URL must be set")?;
    let pool = db::connect(&database_url, config.max_connections).await?;

    match cli.command {
        Command::Migrate => db::run_migrations(&pool).await?,
        Command::Worker => run_worker(pool, config).await?,
        Command::Import { file } => {
            let accepted = accept_upload(&file, &config.upload_dir).await?;
            let store = PgImportStore::new(pool.clone());
            let import = register_import(&store, &CsvSource::new(&accepted)).await?;
            let job_id = JobQueue::new(pool)
                .enqueue_import(import.id, &import.file_path)
                .await?;
            print_json(&serde_json::json!({
                "import": import,
                "job_id": job_id,
            }))?;
        }
        Command::RunImport { file } => {
            let store = PgImportStore::new(pool);
            let job = ImportJob::new(&store, config.import.clone());
            let source = CsvSource::new(&file);
            let import = job.register(&source).await?;
            let outcome = job.run(import.id, &source).await?;
            print_json(&outcome)?;
        }
        Command::Progress { import_id } => {
            let progress = PgImportStore::new(pool).progress(import_id).await?;
            print_json(&progress)?;
        }
        Command::Consolidate => {
            let groups = ConsolidationEngine::new(pool).rebuild().await?;
            print_json(&serde_json::json!({ "groups_created": groups }))?;
        }
        Command::Consolidations => {
            let groups = ConsolidationEngine::new(pool).list().await?;
            print_json(&groups)?;
        }
        Command::Metrics => {
            let metrics = MetricsQueries::new(pool).snapshot().await?;
            print_json(&metrics)?;
        }
    }

    Ok(())
}

async fn run_worker(pool: PgPool, config: AppConfig) -> Result<(), Box<dyn Error>> {
    db::run_migrations(&pool).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("shutdown requested; finishing current job");
            }
            shutdown.cancel();
        }
    });

    Dispatcher::new(pool, config.import, config.dispatcher)
        .run(shutdown)
        .await;
    Ok(())
}

/// Copy `file` into the upload directory under a collision-free name.
async fn accept_upload(file: &Path, upload_dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
    tokio::fs::create_dir_all(upload_dir).await?;

    let name = file
        .file_name()
        .ok_or_else(|| format!("'{}' is not a file", file.display()))?
        .to_string_lossy();
    let target = upload_dir.join(format!("{}_{}", Uuid::new_v4().simple(), name));
    tokio::fs::copy(file, &target).await?;

    log::info!("accepted '{}' as '{}'", file.display(), target.display());
    Ok(target)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}
