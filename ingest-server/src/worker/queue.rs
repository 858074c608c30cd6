use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgPool;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "job_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Import,
    Consolidation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// A claimed unit of work.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i32,
    pub job_type: JobType,
    pub payload: Value,
}

/// Payload of an `import` job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportPayload {
    pub import_id: i32,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JobRecord {
    pub id: i32,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Postgres-backed work queue. Delivery is at-least-once: a running job whose
/// heartbeat goes stale is requeued by [`JobQueue::requeue_stale`].
#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue the run of an already registered import.
    pub async fn enqueue_import(&self, import_id: i32, file_path: &str) -> Result<i32, sqlx::Error> {
        let payload = serde_json::json!({
            "import_id": import_id,
            "file_path": file_path,
        });
        let id = self.enqueue_job(JobType::Import, payload, 0).await?;
        log::info!("queue: job {} enqueued for import {}", id, import_id);
        Ok(id)
    }

    /// Enqueue a consolidation rebuild unless one is already waiting.
    /// Returns `None` when an existing queued rebuild covers this request.
    pub async fn enqueue_consolidation(&self) -> Result<Option<i32>, sqlx::Error> {
        let id: Option<(i32,)> = sqlx::query_as(
            r#"INSERT INTO jobs (job_type, payload, priority)
               SELECT 'consolidation', 'null'::jsonb, 0
               WHERE NOT EXISTS (
                   SELECT 1 FROM jobs WHERE job_type = 'consolidation' AND status = 'queued'
               )
               RETURNING id"#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(id.map(|(id,)| id))
    }

    pub async fn enqueue_job(
        &self,
        job_type: JobType,
        payload: Value,
        priority: i32,
    ) -> Result<i32, sqlx::Error> {
        let (id,): (i32,) = sqlx::query_as(
            r#"INSERT INTO jobs (job_type, payload, priority)
               VALUES ($1, $2, $3)
               RETURNING id"#,
        )
        .bind(job_type)
        .bind(payload)
        .bind(priority)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Claim the next queued job (SELECT FOR UPDATE SKIP LOCKED).
    pub async fn claim_next(&self) -> Result<Option<Job>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let job: Option<(i32, JobType, Value)> = sqlx::query_as(
            r#"SELECT id, job_type, payload FROM jobs
               WHERE status = 'queued'
               ORDER BY priority DESC, created_at ASC, id ASC
               LIMIT 1
               FOR UPDATE SKIP LOCKED"#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id, job_type, payload)) = job else {
            return Ok(None);
        };

        sqlx::query(
            "UPDATE jobs SET status = 'running', started_at = COALESCE(started_at, NOW()), last_heartbeat = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(Job {
            id,
            job_type,
            payload,
        }))
    }

    pub async fn complete(&self, job_id: i32) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE jobs SET status = 'succeeded', completed_at = NOW(), last_heartbeat = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fail(&self, job_id: i32, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', completed_at = NOW(), error_message = $1, last_heartbeat = NOW() WHERE id = $2",
        )
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record that the worker holding `job_id` is still alive.
    pub async fn heartbeat(&self, job_id: i32) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE jobs SET last_heartbeat = NOW() WHERE id = $1 AND status = 'running'")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Put running jobs with no heartbeat for `stale_after` back in the queue.
    /// Returns how many were requeued.
    pub async fn requeue_stale(&self, stale_after: Duration) -> Result<u64, sqlx::Error> {
        let requeued = sqlx::query(
            r#"UPDATE jobs SET status = 'queued'
               WHERE status = 'running'
                 AND COALESCE(last_heartbeat, started_at, created_at)
                     < NOW() - make_interval(secs => $1)"#,
        )
        .bind(stale_after.as_secs_f64())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if requeued > 0 {
            log::warn!("queue: requeued {} stale running jobs", requeued);
        }
        Ok(requeued)
    }

    pub async fn job(&self, job_id: i32) -> Result<Option<JobRecord>, sqlx::Error> {
        sqlx::query_as(
            r#"SELECT id, job_type, status, priority, created_at, started_at, completed_at,
                      last_heartbeat, error_message
               FROM jobs WHERE id = $1"#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_payload_shape() {
        let payload = serde_json::json!({
            "import_id": 3,
            "file_path": "/srv/uploads/april.csv",
        });
        let parsed: ImportPayload = serde_json::from_value(payload).unwrap();
        assert_eq!(
            parsed,
            ImportPayload {
                import_id: 3,
                file_path: "/srv/uploads/april.csv".into(),
            }
        );

        assert!(serde_json::from_value::<ImportPayload>(serde_json::json!({"import_id": 3})).is_err());
    }
}
