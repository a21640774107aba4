use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, watch, Notify, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::pipeline::{JobContext, Outcome};
use super::progress::{ProgressEvent, ProgressEventType, ProgressHub};
use super::{research, stress, JobConfig, JobStatus, JobStore, ResearchJob};
use crate::config::OrchestratorConfig;
use crate::error::{AppError, AppResult};
use crate::metrics::MetricsAggregator;
use crate::providers::{MarketDataProvider, ReasoningProvider};
use crate::storage::SqliteStorage;

/// Result of a submission: the job to poll and whether it is new.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub job: ResearchJob,
    /// False when the engagement's active job was returned instead.
    pub created: bool,
    pub status_url: String,
}

/// Pollable view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl From<ResearchJob> for JobStatusView {
    fn from(job: ResearchJob) -> Self {
        Self {
            id: job.id,
            status: job.status,
            progress: job.progress,
            current_phase: job.current_phase,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error_message,
            result: job.result,
        }
    }
}

/// Admits jobs, runs them on a worker pool and fans out their progress.
///
/// Cloning is cheap; clones share the hub, the wake-up signal and shutdown.
#[derive(Clone)]
pub struct Orchestrator {
    storage: SqliteStorage,
    reasoning: Arc<dyn ReasoningProvider>,
    market: Option<Arc<dyn MarketDataProvider>>,
    metrics: MetricsAggregator,
    hub: Arc<ProgressHub>,
    config: OrchestratorConfig,
    wake: Arc<Notify>,
    shutdown: Arc<watch::Sender<bool>>,
    /// Jobs claimed before this instance existed belong to a dead worker.
    booted_at: DateTime<Utc>,
    recovered: Arc<OnceCell<()>>,
}

impl Orchestrator {
    pub fn new(
        storage: SqliteStorage,
        reasoning: Arc<dyn ReasoningProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            metrics: MetricsAggregator::new(storage.clone()),
            hub: Arc::new(ProgressHub::new(config.progress_buffer)),
            storage,
            reasoning,
            market: None,
            config,
            wake: Arc::new(Notify::new()),
            shutdown: Arc::new(shutdown),
            booted_at: Utc::now(),
            recovered: Arc::new(OnceCell::new()),
        }
    }

    /// Attach a market-data provider for ticker evidence.
    pub fn with_market_data(mut self, market: Arc<dyn MarketDataProvider>) -> Self {
        self.market = Some(market);
        self
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn hub(&self) -> &ProgressHub {
        &self.hub
    }

    /// Admit a job for an engagement, or return its already-active job.
    pub async fn submit(&self, engagement_id: &str, config: JobConfig) -> AppResult<Submission> {
        config.validate()?;

        let job = ResearchJob::new(engagement_id, config);
        let admission = self.storage.admit_job(&job).await?;

        if admission.created {
            self.wake.notify_one();
        } else {
            info!(
                engagement_id = %engagement_id,
                job_id = %admission.job.id,
                "Engagement already has an active job"
            );
        }

        let status_url = format!(
            "{}/{}",
            self.config.status_url_prefix.trim_end_matches('/'),
            admission.job.id
        );
        Ok(Submission {
            job: admission.job,
            created: admission.created,
            status_url,
        })
    }

    /// Current state of a job.
    pub async fn status(&self, job_id: &str) -> AppResult<JobStatusView> {
        Ok(self.storage.get_job(job_id).await?.into())
    }

    /// Subscribe to a job's progress events.
    ///
    /// For a job that has already finished the stream is closed at once; the
    /// final state is available from [`Orchestrator::status`].
    pub async fn subscribe(&self, job_id: &str) -> AppResult<broadcast::Receiver<ProgressEvent>> {
        let receiver = self.hub.subscribe(job_id).await;
        // Checked after subscribing so a job finishing in between still closes us.
        let job = self.storage.get_job(job_id).await;
        match job {
            Ok(job) if job.status.is_active() => Ok(receiver),
            Ok(_) => {
                self.hub.close(job_id).await;
                Ok(receiver)
            }
            Err(e) => {
                self.hub.close(job_id).await;
                Err(e)
            }
        }
    }

    /// Request cancellation. Queued jobs fail at once; running jobs stop at
    /// the next phase boundary.
    pub async fn cancel(&self, job_id: &str) -> AppResult<ResearchJob> {
        let job = self.storage.request_cancel(job_id).await?;
        if job.status.is_terminal() {
            self.hub
                .publish(ProgressEvent::new(
                    ProgressEventType::Failed,
                    job_id,
                    json!({ "error": job.error_message }),
                ))
                .await;
            self.hub.close(job_id).await;
        }
        Ok(job)
    }

    /// Recompute an engagement's quality metrics on demand.
    pub async fn recompute_metrics(
        &self,
        engagement_id: &str,
    ) -> AppResult<crate::metrics::MetricValues> {
        self.metrics.recompute_and_record(engagement_id).await
    }

    /// Claim and execute one queued job. Returns the finished job, or `None`
    /// when the queue is empty.
    pub async fn run_once(&self) -> AppResult<Option<ResearchJob>> {
        self.recover_interrupted().await?;

        let Some(job) = self.storage.claim_next_job().await? else {
            return Ok(None);
        };
        self.execute(job).await.map(Some)
    }

    async fn execute(&self, job: ResearchJob) -> AppResult<ResearchJob> {
        self.hub
            .publish(ProgressEvent::new(
                ProgressEventType::Started,
                &job.id,
                json!({ "job_type": job.job_type, "engagement_id": job.engagement_id }),
            ))
            .await;

        let outcome = {
            let mut ctx = JobContext::new(
                &self.storage,
                self.reasoning.as_ref(),
                self.market.as_deref(),
                &self.hub,
                &job,
                Duration::from_millis(self.config.provider_timeout_ms),
            );
            match &job.config {
                JobConfig::Research(config) => research::run(&mut ctx, config).await,
                JobConfig::StressTest(config) => stress::run(&mut ctx, config).await,
            }
        };

        let finished = match outcome {
            Ok(Outcome::Completed(result)) => {
                self.record_result(&job, JobStatus::Completed, &result).await?
            }
            Ok(Outcome::Partial(result)) => {
                info!(job_id = %job.id, "Job stopped with partial results");
                self.record_result(&job, JobStatus::Partial, &result).await?
            }
            Ok(Outcome::Cancelled) => {
                info!(job_id = %job.id, "Job cancelled");
                self.record_failure(&job, "Cancelled before any phase completed")
                    .await?
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Job failed");
                self.record_failure(&job, &e.to_string()).await?
            }
        };

        if finished.status == JobStatus::Completed {
            if let Err(e) = self.metrics.recompute_and_record(&job.engagement_id).await {
                warn!(job_id = %job.id, error = %e, "Metrics recompute failed");
            }
            info!(job_id = %job.id, engagement_id = %job.engagement_id, "Job completed");
        }

        let (event_type, data) = match finished.status {
            JobStatus::Completed => (
                ProgressEventType::Completed,
                json!({ "result": finished.result }),
            ),
            JobStatus::Partial => (
                ProgressEventType::Partial,
                json!({ "result": finished.result }),
            ),
            _ => (
                ProgressEventType::Failed,
                json!({ "error": finished.error_message }),
            ),
        };
        self.publish_terminal(event_type, &finished, data).await;

        Ok(finished)
    }

    /// Store a finishing result, failing the job when the write is refused.
    async fn record_result(
        &self,
        job: &ResearchJob,
        status: JobStatus,
        result: &serde_json::Value,
    ) -> AppResult<ResearchJob> {
        match self.storage.finish_job(&job.id, status, result).await {
            Ok(finished) => Ok(finished),
            Err(e) => {
                error!(job_id = %job.id, status = %status, error = %e, "Recording job result failed");
                self.record_failure(job, &format!("Failed to record {} result: {}", status, e))
                    .await
            }
        }
    }

    async fn record_failure(&self, job: &ResearchJob, message: &str) -> AppResult<ResearchJob> {
        self.storage.fail_job(&job.id, message).await.map_err(|e| {
            // Left running; the next orchestrator start reclaims it.
            error!(job_id = %job.id, error = %e, "Recording job failure failed");
            e
        })
    }

    /// Fail jobs left `running` by a worker that no longer exists and close
    /// their progress streams. Runs once per orchestrator, before its first
    /// claim; later calls return at once.
    pub async fn recover_interrupted(&self) -> AppResult<()> {
        self.recovered
            .get_or_try_init(|| async {
                let reclaimed = self
                    .storage
                    .reclaim_interrupted_jobs(self.booted_at)
                    .await?;
                if !reclaimed.is_empty() {
                    info!(count = reclaimed.len(), "Recovered interrupted jobs");
                }
                for job in &reclaimed {
                    self.publish_terminal(
                        ProgressEventType::Failed,
                        job,
                        json!({ "error": job.error_message }),
                    )
                    .await;
                }
                Ok::<_, AppError>(())
            })
            .await?;
        Ok(())
    }

    async fn publish_terminal(
        &self,
        event_type: ProgressEventType,
        job: &ResearchJob,
        mut data: serde_json::Value,
    ) {
        data["status"] = json!(job.status);
        data["progress"] = json!(job.progress);
        self.hub
            .publish(ProgressEvent::new(event_type, &job.id, data))
            .await;
        self.hub.close(&job.id).await;
    }

    /// Spawn the worker pool. Workers run until [`Orchestrator::shutdown`].
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let workers = self.config.workers.max(1);
        info!(workers, "Starting job workers");
        (0..workers)
            .map(|worker| {
                let orchestrator = self.clone();
                tokio::spawn(async move { orchestrator.worker_loop(worker).await })
            })
            .collect()
    }

    async fn worker_loop(self, worker: usize) {
        let mut shutdown = self.shutdown.subscribe();
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(Some(job)) => {
                    debug!(worker, job_id = %job.id, status = %job.status, "Worker finished job");
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!(worker, error = %e, "Worker error"),
            }

            tokio::select! {
                _ = shutdown.changed() => {}
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }

        debug!(worker, "Worker stopped");
    }

    /// Signal workers to stop after their current job.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.wake.notify_waiters();
    }
}
