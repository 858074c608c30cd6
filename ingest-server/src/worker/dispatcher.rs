use crate::config::{DispatcherConfig, ImportConfig};
use crate::consolidation::ConsolidationEngine;
use crate::error::QueueError;
use crate::ingest::{CsvSource, ImportJob, PgImportStore};
use crate::worker::queue::{ImportPayload, Job, JobQueue, JobType};
use sqlx::postgres::PgPool;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Claims queued jobs and runs them one at a time.
pub struct Dispatcher {
    pool: PgPool,
    queue: JobQueue,
    import_config: ImportConfig,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(pool: PgPool, import_config: ImportConfig, config: DispatcherConfig) -> Self {
        let queue = JobQueue::new(pool.clone());
        Self {
            pool,
            queue,
            import_config,
            config,
        }
    }

    /// Run until `shutdown` fires. Cancellation is only observed between
    /// jobs; a job in progress always runs to its end.
    pub async fn run(self, shutdown: CancellationToken) {
        log::info!("dispatcher started");
        let mut next_consolidation = self
            .config
            .consolidation_interval
            .map(|interval| Instant::now() + interval);

        while !shutdown.is_cancelled() {
            if let (Some(due), Some(interval)) =
                (next_consolidation, self.config.consolidation_interval)
            {
                if Instant::now() >= due {
                    self.schedule_consolidation().await;
                    next_consolidation = Some(Instant::now() + interval);
                }
            }

            match self.run_once().await {
                Ok(true) => {}
                Ok(false) => {
                    if sleep_or_shutdown(&shutdown, self.config.poll_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("dispatcher: failed to claim job: {}", e);
                    if sleep_or_shutdown(&shutdown, self.config.error_backoff).await {
                        break;
                    }
                }
            }
        }

        log::info!("dispatcher stopped");
    }

    /// Requeue abandoned jobs, then claim and process at most one job.
    /// Returns whether a job was found.
    pub async fn run_once(&self) -> Result<bool, sqlx::Error> {
        self.queue.requeue_stale(self.config.stale_after).await?;

        let Some(job) = self.queue.claim_next().await? else {
            return Ok(false);
        };

        log::info!("dispatcher: claimed job {} ({:?})", job.id, job.job_type);
        let job_id = job.id;

        match self.process_with_heartbeat(job).await {
            Ok(()) => {
                log::info!("job {}: succeeded", job_id);
                self.queue.complete(job_id).await?;
            }
            Err(e) => {
                log::error!("job {}: failed: {}", job_id, e);
                self.queue.fail(job_id, &e.to_string()).await?;
            }
        }
        Ok(true)
    }

    /// Run `job`, refreshing its heartbeat until it finishes.
    async fn process_with_heartbeat(&self, job: Job) -> Result<(), QueueError> {
        let job_id = job.id;
        let work = self.process_job(job);
        tokio::pin!(work);

        let mut beat = tokio::time::interval(self.config.heartbeat_interval);
        // The claim already stamped the heartbeat.
        beat.tick().await;

        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = beat.tick() => {
                    if let Err(e) = self.queue.heartbeat(job_id).await {
                        log::warn!("job {}: heartbeat failed: {}", job_id, e);
                    }
                }
            }
        }
    }

    async fn process_job(&self, job: Job) -> Result<(), QueueError> {
        match job.job_type {
            JobType::Import => {
                let payload: ImportPayload = serde_json::from_value(job.payload)?;
                log::info!(
                    "job {}: running import {} from '{}'",
                    job.id,
                    payload.import_id,
                    payload.file_path
                );

                let store = PgImportStore::new(self.pool.clone());
                let runner = ImportJob::new(&store, self.import_config.clone());
                runner
                    .run(payload.import_id, &CsvSource::new(&payload.file_path))
                    .await?;
            }
            JobType::Consolidation => {
                let groups = ConsolidationEngine::new(self.pool.clone()).rebuild().await?;
                log::info!("job {}: consolidation produced {} groups", job.id, groups);
            }
        }
        Ok(())
    }

    async fn schedule_consolidation(&self) {
        match self.queue.enqueue_consolidation().await {
            Ok(Some(id)) => log::info!("dispatcher: scheduled consolidation as job {}", id),
            Ok(None) => log::debug!("dispatcher: consolidation already queued"),
            Err(e) => log::warn!("dispatcher: could not schedule consolidation: {}", e),
        }
    }
}

/// Sleep for `period`; returns `true` if shutdown was requested meanwhile.
async fn sleep_or_shutdown(shutdown: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(period) => false,
    }
}
