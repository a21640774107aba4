use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{parse_enum, parse_optional_timestamp, parse_timestamp, to_db_time, SqliteStorage};
use crate::error::{is_unique_violation, AppError, AppResult, ConflictError, StorageError};
use crate::jobs::{
    Admission, JobConfig, JobStatus, JobStore, ResearchJob, INTERRUPTED_MESSAGE,
};

const JOB_COLUMNS: &str = "id, engagement_id, job_type, status, config, progress, current_phase, \
     result, error_message, cancel_requested, created_at, started_at, completed_at";

/// Attempts at admission when the active job finishes between insert and lookup.
const ADMISSION_ATTEMPTS: usize = 3;

impl SqliteStorage {
    async fn job_transition_error(&self, id: &str, to: JobStatus) -> AppError {
        match self.get_job(id).await {
            Ok(current) => ConflictError::InvalidTransition {
                entity: "job",
                id: id.to_string(),
                from: current.status.to_string(),
                to: to.to_string(),
            }
            .into(),
            Err(e) => e,
        }
    }

    /// Insert unless an active job exists. Returns whether a row was written.
    async fn try_insert_job(&self, job: &ResearchJob, config: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO research_jobs (id, engagement_id, job_type, status, config, progress,
                                       cancel_requested, created_at)
            SELECT ?1, ?2, ?3, 'queued', ?4, 0, 0, ?5
            WHERE NOT EXISTS (
                SELECT 1 FROM research_jobs
                WHERE engagement_id = ?2 AND status IN ('queued', 'running')
            )
            "#,
        )
        .bind(&job.id)
        .bind(&job.engagement_id)
        .bind(job.job_type.as_str())
        .bind(config)
        .bind(to_db_time(&job.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() > 0),
            // Lost a race the partial unique index caught.
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl JobStore for SqliteStorage {
    async fn admit_job(&self, job: &ResearchJob) -> AppResult<Admission> {
        let config = serde_json::to_string(&job.config).map_err(|e| StorageError::Query {
            message: format!("Failed to serialize job config: {}", e),
        })?;

        for attempt in 0..ADMISSION_ATTEMPTS {
            if self.try_insert_job(job, &config).await? {
                info!(job_id = %job.id, engagement_id = %job.engagement_id, job_type = %job.job_type, "Job admitted");
                return Ok(Admission {
                    job: self.get_job(&job.id).await?,
                    created: true,
                });
            }

            if let Some(active) = self.active_job(&job.engagement_id).await? {
                debug!(job_id = %active.id, engagement_id = %job.engagement_id, "Returning active job");
                return Ok(Admission {
                    job: active,
                    created: false,
                });
            }
            warn!(engagement_id = %job.engagement_id, attempt, "Active job finished during admission, retrying");
        }

        Err(AppError::Internal {
            message: format!(
                "Could not admit job for engagement {} after {} attempts",
                job.engagement_id, ADMISSION_ATTEMPTS
            ),
        })
    }

    async fn get_job(&self, id: &str) -> AppResult<ResearchJob> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM research_jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_into()?),
            None => Err(AppError::not_found("job", id)),
        }
    }

    async fn active_job(&self, engagement_id: &str) -> AppResult<Option<ResearchJob>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM research_jobs \
             WHERE engagement_id = ? AND status IN ('queued', 'running') LIMIT 1",
            JOB_COLUMNS
        ))
        .bind(engagement_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ResearchJob::try_from).transpose()?)
    }

    async fn list_jobs(&self, engagement_id: &str) -> AppResult<Vec<ResearchJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM research_jobs WHERE engagement_id = ? ORDER BY created_at DESC, rowid DESC",
            JOB_COLUMNS
        ))
        .bind(engagement_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(ResearchJob::try_from)
            .collect::<Result<_, _>>()?)
    }

    async fn claim_next_job(&self) -> AppResult<Option<ResearchJob>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE research_jobs
            SET status = 'running', started_at = ?
            WHERE id = (
                SELECT id FROM research_jobs
                WHERE status = 'queued'
                ORDER BY created_at ASC, rowid ASC
                LIMIT 1
            )
            AND status = 'queued'
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(to_db_time(&Utc::now()))
        .fetch_optional(&self.pool)
        .await?;

        let job = row.map(ResearchJob::try_from).transpose()?;
        if let Some(job) = &job {
            info!(job_id = %job.id, engagement_id = %job.engagement_id, job_type = %job.job_type, "Job claimed");
        }
        Ok(job)
    }

    async fn update_job_progress(
        &self,
        id: &str,
        progress: u8,
        phase: Option<&str>,
    ) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE research_jobs SET progress = ?, current_phase = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(i64::from(progress.min(100)))
        .bind(phase)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.job_transition_error(id, JobStatus::Running).await);
        }
        Ok(())
    }

    async fn finish_job(
        &self,
        id: &str,
        status: JobStatus,
        result: &serde_json::Value,
    ) -> AppResult<ResearchJob> {
        if !matches!(status, JobStatus::Completed | JobStatus::Partial) {
            return Err(AppError::validation(
                "status",
                format!("{} is not a finishing status", status),
            ));
        }

        let result_json = serde_json::to_string(result).map_err(|e| StorageError::Query {
            message: format!("Failed to serialize job result: {}", e),
        })?;

        let done = sqlx::query(
            r#"
            UPDATE research_jobs
            SET status = ?1,
                result = ?2,
                progress = CASE WHEN ?1 = 'completed' THEN 100 ELSE progress END,
                current_phase = NULL,
                completed_at = ?3
            WHERE id = ?4 AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(&result_json)
        .bind(to_db_time(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if done.rows_affected() == 0 {
            return Err(self.job_transition_error(id, status).await);
        }
        self.get_job(id).await
    }

    async fn fail_job(&self, id: &str, error_message: &str) -> AppResult<ResearchJob> {
        let done = sqlx::query(
            "UPDATE research_jobs SET status = 'failed', error_message = ?, current_phase = NULL, \
             completed_at = ? WHERE id = ? AND status IN ('queued', 'running')",
        )
        .bind(error_message)
        .bind(to_db_time(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if done.rows_affected() == 0 {
            return Err(self.job_transition_error(id, JobStatus::Failed).await);
        }
        self.get_job(id).await
    }

    async fn request_cancel(&self, id: &str) -> AppResult<ResearchJob> {
        let queued = sqlx::query(
            "UPDATE research_jobs SET status = 'failed', cancel_requested = 1, \
             error_message = 'Cancelled before start', completed_at = ? \
             WHERE id = ? AND status = 'queued'",
        )
        .bind(to_db_time(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if queued.rows_affected() == 0 {
            let running = sqlx::query(
                "UPDATE research_jobs SET cancel_requested = 1 WHERE id = ? AND status = 'running'",
            )
            .bind(id)
            .execute(&self.pool)
            .await?;

            if running.rows_affected() == 0 {
                return Err(self.job_transition_error(id, JobStatus::Failed).await);
            }
        }

        info!(job_id = %id, "Job cancellation requested");
        self.get_job(id).await
    }

    async fn is_cancel_requested(&self, id: &str) -> AppResult<bool> {
        let flag: Option<i64> =
            sqlx::query_scalar("SELECT cancel_requested FROM research_jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        flag.map(|f| f != 0)
            .ok_or_else(|| AppError::not_found("job", id))
    }

    async fn reclaim_interrupted_jobs(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> AppResult<Vec<ResearchJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE research_jobs
            SET status = 'failed', error_message = ?1, current_phase = NULL, completed_at = ?2
            WHERE status = 'running' AND started_at < ?3
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(INTERRUPTED_MESSAGE)
        .bind(to_db_time(&Utc::now()))
        .bind(to_db_time(&claimed_before))
        .fetch_all(&self.pool)
        .await?;

        let jobs = rows
            .into_iter()
            .map(ResearchJob::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        for job in &jobs {
            warn!(job_id = %job.id, engagement_id = %job.engagement_id, "Reclaimed interrupted job");
        }
        Ok(jobs)
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    engagement_id: String,
    job_type: String,
    status: String,
    config: String,
    progress: i64,
    current_phase: Option<String>,
    result: Option<String>,
    error_message: Option<String>,
    cancel_requested: i64,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<JobRow> for ResearchJob {
    type Error = StorageError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let config: JobConfig =
            serde_json::from_str(&row.config).map_err(|e| StorageError::Query {
                message: format!("Invalid job config for {}: {}", row.id, e),
            })?;

        Ok(Self {
            id: row.id,
            engagement_id: row.engagement_id,
            job_type: parse_enum("job_type", &row.job_type)?,
            status: parse_enum("status", &row.status)?,
            config,
            progress: row.progress.clamp(0, 100) as u8,
            current_phase: row.current_phase,
            result: row.result.and_then(|s| serde_json::from_str(&s).ok()),
            error_message: row.error_message,
            cancel_requested: row.cancel_requested != 0,
            created_at: parse_timestamp(&row.created_at),
            started_at: parse_optional_timestamp(row.started_at),
            completed_at: parse_optional_timestamp(row.completed_at),
        })
    }
}
