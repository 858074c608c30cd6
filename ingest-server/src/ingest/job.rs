//! Orchestration of a single import run.

use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::ingest::source::CsvSource;
use crate::ingest::store::ImportStore;
use crate::ingest::strategy::select_strategy;
use crate::models::CsvImport;
use serde::Serialize;

/// Result of a completed import run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub import_id: i32,
    pub processed_rows: u64,
    pub strategy: &'static str,
}

/// Drives one import through `pending -> processing -> {completed | failed}`.
pub struct ImportJob<'a> {
    store: &'a dyn ImportStore,
    config: ImportConfig,
}

impl<'a> ImportJob<'a> {
    pub fn new(store: &'a dyn ImportStore, config: ImportConfig) -> Self {
        Self { store, config }
    }

    /// Count the file's data rows and record it as a `pending` import.
    pub async fn register(&self, source: &CsvSource) -> Result<CsvImport, ImportError> {
        register_import(self.store, source).await
    }

    /// Run the import to a terminal state.
    ///
    /// An import that is not `pending` is refused untouched. Once it is
    /// `processing`, any failure is recorded on the import before being
    /// returned; rows committed by earlier batches stay committed.
    pub async fn run(
        &self,
        import_id: i32,
        source: &CsvSource,
    ) -> Result<ImportOutcome, ImportError> {
        self.store.begin_processing(import_id).await?;

        match self.execute(import_id, source).await {
            Ok(outcome) => {
                log::info!(
                    "import {}: completed, {} rows via {}",
                    import_id,
                    outcome.processed_rows,
                    outcome.strategy
                );
                Ok(outcome)
            }
            Err(err) => {
                log::error!("import {}: failed: {}", import_id, err);
                if let Err(mark_err) = self.store.fail(import_id, &err.to_string()).await {
                    log::error!(
                        "import {}: could not record failure: {}",
                        import_id,
                        mark_err
                    );
                }
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        import_id: i32,
        source: &CsvSource,
    ) -> Result<ImportOutcome, ImportError> {
        let import = self.store.load_import(import_id).await?;
        let strategy = select_strategy(self.store, &self.config).await?;
        log::info!(
            "import {}: loading '{}' with {}",
            import_id,
            import.file_name,
            strategy.name()
        );

        let processed = strategy.load(self.store, &import, source).await?;
        self.store.complete(import_id, processed).await?;

        Ok(ImportOutcome {
            import_id,
            processed_rows: processed,
            strategy: strategy.name(),
        })
    }
}

/// Count the data rows of `source` and create its import record.
pub async fn register_import(
    store: &dyn ImportStore,
    source: &CsvSource,
) -> Result<CsvImport, ImportError> {
    let total = source.count_rows().await?;
    store
        .create_import(&source.path().to_string_lossy(), &source.file_name(), total)
        .await
}
