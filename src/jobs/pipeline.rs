use std::future::Future;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info};

use super::progress::{ProgressEvent, ProgressEventType, ProgressHub};
use super::{JobStore, ResearchJob};
use crate::error::{AppError, AppResult, ProviderError, ProviderResult};
use crate::providers::{Candidates, GenerationRequest, MarketDataProvider, ReasoningProvider};
use crate::storage::SqliteStorage;

/// How a pipeline ended without error.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Outcome {
    Completed(serde_json::Value),
    /// Cancelled after at least one phase finished.
    Partial(serde_json::Value),
    /// Cancelled before any phase finished.
    Cancelled,
}

/// Everything a phase pipeline needs while executing one job.
pub(super) struct JobContext<'a> {
    pub storage: &'a SqliteStorage,
    pub market: Option<&'a dyn MarketDataProvider>,
    pub job: &'a ResearchJob,
    reasoning: &'a dyn ReasoningProvider,
    hub: &'a ProgressHub,
    provider_timeout: Duration,
    phases_completed: Vec<&'static str>,
}

impl<'a> JobContext<'a> {
    pub fn new(
        storage: &'a SqliteStorage,
        reasoning: &'a dyn ReasoningProvider,
        market: Option<&'a dyn MarketDataProvider>,
        hub: &'a ProgressHub,
        job: &'a ResearchJob,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            market,
            job,
            reasoning,
            hub,
            provider_timeout,
            phases_completed: Vec::new(),
        }
    }

    /// Check for cancellation, then mark `phase` as current.
    ///
    /// Returns false when the job should stop.
    pub async fn begin_phase(&mut self, phase: &'static str, progress: u8) -> AppResult<bool> {
        if self.storage.is_cancel_requested(&self.job.id).await? {
            info!(job_id = %self.job.id, phase, "Job cancelled before phase");
            return Ok(false);
        }

        self.report(phase, progress, json!({ "phase": phase, "status": "started" }))
            .await?;
        Ok(true)
    }

    /// Report an intermediate milestone within the current phase.
    pub async fn milestone(
        &self,
        phase: &'static str,
        progress: u8,
        data: serde_json::Value,
    ) -> AppResult<()> {
        self.report(phase, progress, data).await
    }

    /// Record `phase` as finished.
    pub async fn end_phase(
        &mut self,
        phase: &'static str,
        progress: u8,
        data: serde_json::Value,
    ) -> AppResult<()> {
        self.phases_completed.push(phase);
        self.storage
            .update_job_progress(&self.job.id, progress, Some(phase))
            .await?;
        self.hub
            .publish(ProgressEvent::new(
                ProgressEventType::PhaseCompleted,
                &self.job.id,
                json!({ "phase": phase, "progress": progress, "summary": data }),
            ))
            .await;
        debug!(job_id = %self.job.id, phase, progress, "Phase completed");
        Ok(())
    }

    async fn report(&self, phase: &str, progress: u8, data: serde_json::Value) -> AppResult<()> {
        self.storage
            .update_job_progress(&self.job.id, progress, Some(phase))
            .await?;
        self.hub
            .publish(ProgressEvent::new(
                ProgressEventType::Progress,
                &self.job.id,
                json!({ "phase": phase, "progress": progress, "detail": data }),
            ))
            .await;
        Ok(())
    }

    /// Run one reasoning call under the provider timeout.
    pub async fn generate(&self, request: &GenerationRequest) -> AppResult<Candidates> {
        self.bounded(request.phase.as_str(), self.reasoning.generate(request))
            .await
    }

    /// Bound a provider future by the configured timeout.
    pub async fn bounded<T, F>(&self, phase: &str, call: F) -> AppResult<T>
    where
        F: Future<Output = ProviderResult<T>>,
    {
        match tokio::time::timeout(self.provider_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(AppError::provider(phase, e)),
            Err(_) => Err(AppError::provider(
                phase,
                ProviderError::Timeout {
                    timeout_ms: self.provider_timeout.as_millis() as u64,
                },
            )),
        }
    }

    /// Stop early: partial when something finished, cancelled otherwise.
    pub fn stop(&self, mut partial: serde_json::Value) -> Outcome {
        if self.phases_completed.is_empty() {
            return Outcome::Cancelled;
        }
        if let Some(map) = partial.as_object_mut() {
            map.insert("cancelled".to_string(), json!(true));
            map.insert("phases_completed".to_string(), json!(self.phases_completed));
        }
        Outcome::Partial(partial)
    }
}
