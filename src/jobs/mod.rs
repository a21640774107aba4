//! Long-running research and stress-test jobs.
//!
//! A job is admitted only when its engagement has no other job in `queued` or
//! `running`; a duplicate submission gets the active job back instead. Workers
//! claim queued jobs, run their phase pipeline and publish progress on a
//! per-job channel. The job row is the source of truth for status.

mod orchestrator;
mod pipeline;
mod progress;
mod research;
mod stress;

pub use orchestrator::{JobStatusView, Orchestrator, Submission};
pub use progress::{ProgressEvent, ProgressEventType, ProgressHub};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::macros::text_enum;
use crate::stress_test::Intensity;

/// Minimum thesis length accepted for a research job.
pub const MIN_THESIS_LEN: usize = 10;

/// Error recorded on jobs whose worker went away mid-run.
pub const INTERRUPTED_MESSAGE: &str = "Job interrupted: its worker stopped before it finished";

/// Default cap on generated hypotheses per research job.
pub const DEFAULT_MAX_HYPOTHESES: u32 = 8;

/// Kind of workflow a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Research,
    StressTest,
}

text_enum!(JobType, "job type", {
    Research => "research",
    StressTest => "stress_test",
});

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
    /// Stopped early (cancelled) after at least one phase finished.
    Partial,
}

text_enum!(JobStatus, "job status", {
    Queued => "queued",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Partial => "partial",
});

impl JobStatus {
    /// Queued or running; counts against the one-active-job limit.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

/// Parameters of a research job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchConfig {
    pub thesis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hypotheses: Option<u32>,
}

impl ResearchConfig {
    pub fn new(thesis: impl Into<String>) -> Self {
        Self {
            thesis: thesis.into(),
            ticker: None,
            max_hypotheses: None,
        }
    }

    pub fn with_ticker(mut self, ticker: impl Into<String>) -> Self {
        self.ticker = Some(ticker.into());
        self
    }

    pub fn with_max_hypotheses(mut self, max: u32) -> Self {
        self.max_hypotheses = Some(max.max(1));
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.thesis.trim().chars().count() < MIN_THESIS_LEN {
            return Err(AppError::validation(
                "thesis",
                format!("Thesis must be at least {} characters", MIN_THESIS_LEN),
            ));
        }
        Ok(())
    }
}

/// Parameters of a stress-test job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StressTestConfig {
    #[serde(default)]
    pub intensity: Intensity,
    /// Empty means every hypothesis.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hypothesis_ids: Vec<String>,
}

/// Job parameters, tagged by job type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobConfig {
    Research(ResearchConfig),
    StressTest(StressTestConfig),
}

impl JobConfig {
    pub fn job_type(&self) -> JobType {
        match self {
            JobConfig::Research(_) => JobType::Research,
            JobConfig::StressTest(_) => JobType::StressTest,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        match self {
            JobConfig::Research(config) => config.validate(),
            JobConfig::StressTest(_) => Ok(()),
        }
    }
}

/// Durable record of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchJob {
    pub id: String,
    pub engagement_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub config: JobConfig,
    /// 0-100.
    pub progress: u8,
    /// Phase currently executing.
    pub current_phase: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ResearchJob {
    /// Create a queued job.
    pub fn new(engagement_id: impl Into<String>, config: JobConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            engagement_id: engagement_id.into(),
            job_type: config.job_type(),
            status: JobStatus::Queued,
            config,
            progress: 0,
            current_phase: None,
            result: None,
            error_message: None,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Outcome of [`JobStore::admit_job`].
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    /// The new job, or the engagement's already-active one.
    pub job: ResearchJob,
    /// False when an active job was returned instead of `job` being inserted.
    pub created: bool,
}

/// Durable job registry.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert `job` unless its engagement already has an active job.
    async fn admit_job(&self, job: &ResearchJob) -> AppResult<Admission>;

    async fn get_job(&self, id: &str) -> AppResult<ResearchJob>;

    /// The engagement's queued or running job, if any.
    async fn active_job(&self, engagement_id: &str) -> AppResult<Option<ResearchJob>>;

    /// Newest first.
    async fn list_jobs(&self, engagement_id: &str) -> AppResult<Vec<ResearchJob>>;

    /// Atomically move the oldest queued job to `running`.
    async fn claim_next_job(&self) -> AppResult<Option<ResearchJob>>;

    /// Record progress of a running job.
    async fn update_job_progress(&self, id: &str, progress: u8, phase: Option<&str>)
        -> AppResult<()>;

    /// `running → completed | partial` with a result.
    async fn finish_job(
        &self,
        id: &str,
        status: JobStatus,
        result: &serde_json::Value,
    ) -> AppResult<ResearchJob>;

    /// `queued | running → failed`.
    async fn fail_job(&self, id: &str, error_message: &str) -> AppResult<ResearchJob>;

    /// Cancel a job: a queued job fails at once, a running one is flagged.
    async fn request_cancel(&self, id: &str) -> AppResult<ResearchJob>;

    async fn is_cancel_requested(&self, id: &str) -> AppResult<bool>;

    /// Fail every job still `running` that was claimed before `claimed_before`.
    /// Returns the jobs it failed.
    async fn reclaim_interrupted_jobs(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> AppResult<Vec<ResearchJob>>;
}
