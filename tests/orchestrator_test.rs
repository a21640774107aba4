//! End-to-end tests for job admission, execution and progress fan-out
//!
//! Uses a scripted reasoning provider so pipelines run without the network.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use thesis_research_engine::config::{DatabaseConfig, OrchestratorConfig};
use thesis_research_engine::contradictions::{ContradictionStore, Severity};
use thesis_research_engine::error::{AppError, ProviderResult};
use thesis_research_engine::evidence::{EvidenceStore, SourceType};
use thesis_research_engine::graph::{GraphStore, NodeType};
use thesis_research_engine::jobs::{
    JobConfig, JobStatus, JobStore, ProgressEventType, ResearchConfig, ResearchJob,
    StressTestConfig, INTERRUPTED_MESSAGE,
};
use thesis_research_engine::metrics::{MetricType, MetricsStore};
use thesis_research_engine::providers::{
    Candidates, ContradictionCandidate, EvidenceCandidate, GenerationPhase, GenerationRequest,
    HypothesisCandidate, ReasoningProvider, ScenarioCandidate,
};
use thesis_research_engine::storage::SqliteStorage;
use thesis_research_engine::stress_test::{Intensity, StressTestStatus, StressTestStore, Vulnerability};
use thesis_research_engine::Orchestrator;

const THESIS: &str = "Acme compounds free cash flow at 15% through 2028";

/// Reasoning provider with canned answers per phase.
#[derive(Default)]
struct ScriptedProvider {
    delay: Option<Duration>,
    /// Request cancellation of the engagement's job while answering this phase.
    cancel_during: Option<(GenerationPhase, SqliteStorage)>,
    calls: Mutex<Vec<GenerationPhase>>,
}

impl ScriptedProvider {
    fn calls(&self) -> Vec<GenerationPhase> {
        self.calls.lock().unwrap().clone()
    }

    fn first_context_id(request: &GenerationRequest, key: &str) -> Option<String> {
        request.context[key]
            .as_array()
            .and_then(|items| items.iter().find(|i| i["type"] != json!("thesis")))
            .and_then(|item| item["id"].as_str())
            .map(str::to_string)
    }

    fn answer(request: &GenerationRequest) -> Candidates {
        match request.phase {
            GenerationPhase::Hypotheses => Candidates {
                hypotheses: vec![
                    HypothesisCandidate {
                        content: "Price increases stick".to_string(),
                        node_type: NodeType::Lever,
                        confidence: 0.7,
                        importance: Default::default(),
                        testability: Default::default(),
                    },
                    HypothesisCandidate {
                        content: "Largest customer renews".to_string(),
                        node_type: NodeType::Risk,
                        confidence: 0.4,
                        importance: Default::default(),
                        testability: Default::default(),
                    },
                ],
                ..Default::default()
            },
            GenerationPhase::Evidence => Candidates {
                evidence: vec![
                    EvidenceCandidate {
                        content: "Two price rises held in 2025".to_string(),
                        source_type: SourceType::Filing,
                        sentiment: Default::default(),
                        credibility: 0.9,
                        source_title: Some("10-K".to_string()),
                        source_url: None,
                        hypothesis_id: Self::first_context_id(request, "hypotheses"),
                        relevance: 0.8,
                    },
                    EvidenceCandidate {
                        content: "Forum chatter about churn".to_string(),
                        source_type: SourceType::Web,
                        sentiment: Default::default(),
                        credibility: 0.3,
                        source_title: None,
                        source_url: None,
                        hypothesis_id: Some("invented-id".to_string()),
                        relevance: 0.5,
                    },
                ],
                ..Default::default()
            },
            GenerationPhase::Contradictions => Candidates {
                contradictions: vec![ContradictionCandidate {
                    description: "Churn chatter conflicts with pricing power".to_string(),
                    severity: Severity::Medium,
                    hypothesis_id: Self::first_context_id(request, "hypotheses"),
                    evidence_id: Some("invented-id".to_string()),
                    bear_case_theme: Some("pricing".to_string()),
                }],
                ..Default::default()
            },
            GenerationPhase::Report => Candidates {
                report: Some("Thesis holds with pricing caveats".to_string()),
                ..Default::default()
            },
            GenerationPhase::Scenarios => Candidates {
                scenarios: (0..10)
                    .map(|i| ScenarioCandidate {
                        title: format!("Scenario {}", i),
                        description: String::new(),
                        hypothesis_id: None,
                    })
                    .collect(),
                ..Default::default()
            },
            GenerationPhase::Vulnerabilities => Candidates {
                vulnerabilities: vec![
                    Vulnerability::new("Customer concentration", Severity::High)
                        .targeting("invented-id"),
                    Vulnerability::new("FX exposure", Severity::Medium),
                ],
                report: Some("Concentration dominates".to_string()),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl ReasoningProvider for ScriptedProvider {
    async fn generate(&self, request: &GenerationRequest) -> ProviderResult<Candidates> {
        self.calls.lock().unwrap().push(request.phase);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((phase, storage)) = &self.cancel_during {
            if *phase == request.phase {
                if let Some(job) = storage.active_job(&request.engagement_id).await.unwrap() {
                    storage.request_cancel(&job.id).await.unwrap();
                }
            }
        }
        Ok(Self::answer(request))
    }
}

fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        workers: 2,
        provider_timeout_ms: 5_000,
        poll_interval_ms: 10,
        progress_buffer: 64,
        status_url_prefix: "/api/jobs/".to_string(),
    }
}

async fn create_orchestrator(provider: ScriptedProvider) -> (Orchestrator, Arc<ScriptedProvider>) {
    let storage = SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage");
    let provider = Arc::new(provider);
    let orchestrator = Orchestrator::new(storage, provider.clone(), test_config());
    (orchestrator, provider)
}

fn research(thesis: &str) -> JobConfig {
    JobConfig::Research(ResearchConfig::new(thesis))
}

mod admission_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_submit_returns_status_url() {
        let (orchestrator, _) = create_orchestrator(ScriptedProvider::default()).await;

        let submission = orchestrator.submit("eng-1", research(THESIS)).await.unwrap();

        assert!(submission.created);
        assert_eq!(submission.job.status, JobStatus::Queued);
        assert_eq!(
            submission.status_url,
            format!("/api/jobs/{}", submission.job.id)
        );
    }

    #[tokio::test]
    async fn test_short_thesis_is_rejected() {
        let (orchestrator, _) = create_orchestrator(ScriptedProvider::default()).await;

        let result = orchestrator.submit("eng-1", research("too short")).await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
        assert!(orchestrator
            .storage()
            .list_jobs("eng-1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_submission_returns_active_job() {
        let (orchestrator, _) = create_orchestrator(ScriptedProvider::default()).await;

        let first = orchestrator.submit("eng-1", research(THESIS)).await.unwrap();
        let second = orchestrator
            .submit(
                "eng-1",
                JobConfig::StressTest(StressTestConfig::default()),
            )
            .await
            .unwrap();

        assert!(!second.created);
        assert_eq!(second.job.id, first.job.id);

        // Other engagements are unaffected.
        let other = orchestrator.submit("eng-2", research(THESIS)).await.unwrap();
        assert!(other.created);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_admit_one_job() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::new(&DatabaseConfig {
            path: dir.path().join("jobs.db"),
            max_connections: 5,
        })
        .await
        .unwrap();
        let orchestrator = Orchestrator::new(
            storage,
            Arc::new(ScriptedProvider::default()),
            test_config(),
        );

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.submit("eng-1", research(THESIS)).await })
            })
            .collect();

        let mut submissions = Vec::new();
        for handle in handles {
            submissions.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(submissions.iter().filter(|s| s.created).count(), 1);
        let id = &submissions[0].job.id;
        assert!(submissions.iter().all(|s| &s.job.id == id));
        assert_eq!(orchestrator.storage().list_jobs("eng-1").await.unwrap().len(), 1);
    }
}

mod research_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_research_job_builds_graph_and_records_metrics() {
        let (orchestrator, provider) = create_orchestrator(ScriptedProvider::default()).await;
        let submission = orchestrator.submit("eng-1", research(THESIS)).await.unwrap();

        let finished = orchestrator.run_once().await.unwrap().unwrap();
        assert_eq!(finished.id, submission.job.id);
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.progress, 100);

        assert_eq!(
            provider.calls(),
            vec![
                GenerationPhase::Hypotheses,
                GenerationPhase::Evidence,
                GenerationPhase::Contradictions,
                GenerationPhase::Report,
            ]
        );

        let storage = orchestrator.storage();
        let graph = storage.list_graph("eng-1").await.unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.root().unwrap().content, THESIS);
        assert_eq!(graph.edges.len(), 2);

        let evidence = storage.evidence_stats("eng-1").await.unwrap();
        assert_eq!(evidence.total, 2);

        // The invented evidence reference is dropped, the real hypothesis kept.
        let contradictions = storage
            .list_contradictions("eng-1", &Default::default())
            .await
            .unwrap();
        assert_eq!(contradictions.len(), 1);
        assert!(contradictions[0].hypothesis_id.is_some());
        assert_eq!(contradictions[0].evidence_id, None);

        let status = orchestrator.status(&submission.job.id).await.unwrap();
        let result = status.result.unwrap();
        assert_eq!(result["hypotheses_created"], 2);
        assert_eq!(result["links_created"], 1);
        assert_eq!(result["report"], "Thesis holds with pricing caveats");

        let metrics = storage.current_metrics("eng-1").await.unwrap();
        assert_eq!(metrics.len(), MetricType::ALL.len());
    }

    #[tokio::test]
    async fn test_second_research_job_reuses_thesis_root() {
        let (orchestrator, _) = create_orchestrator(ScriptedProvider::default()).await;
        orchestrator.submit("eng-1", research(THESIS)).await.unwrap();
        orchestrator.run_once().await.unwrap();

        orchestrator
            .submit("eng-1", research("A different framing of the same thesis"))
            .await
            .unwrap();
        let second = orchestrator.run_once().await.unwrap().unwrap();
        assert_eq!(second.status, JobStatus::Completed);

        let graph = orchestrator.storage().list_graph("eng-1").await.unwrap();
        let roots = graph
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Thesis)
            .count();
        assert_eq!(roots, 1);
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let (orchestrator, _) = create_orchestrator(ScriptedProvider::default()).await;
        assert!(orchestrator.run_once().await.unwrap().is_none());
    }
}

mod progress_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_progress_events_in_order_then_closed() {
        let (orchestrator, _) = create_orchestrator(ScriptedProvider::default()).await;
        let submission = orchestrator.submit("eng-1", research(THESIS)).await.unwrap();
        let mut rx = orchestrator.subscribe(&submission.job.id).await.unwrap();

        orchestrator.run_once().await.unwrap();

        let mut events = Vec::new();
        loop {
            match rx.recv().await {
                Ok(event) => events.push(event),
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(n)) => panic!("lagged by {}", n),
            }
        }

        assert_eq!(events.first().unwrap().event_type, ProgressEventType::Started);
        let last = events.last().unwrap();
        assert_eq!(last.event_type, ProgressEventType::Completed);
        assert_eq!(last.data["status"], "completed");
        assert_eq!(last.data["progress"], 100);

        let phases: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == ProgressEventType::PhaseCompleted)
            .map(|e| e.data["phase"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            phases,
            vec![
                "hypothesis_generation",
                "evidence_gathering",
                "contradiction_detection",
                "report_generation"
            ]
        );

        let progress: Vec<u64> = events
            .iter()
            .filter_map(|e| e.data["progress"].as_u64())
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert!(events.iter().all(|e| e.job_id == submission.job.id));
        assert_eq!(orchestrator.hub().open_channels().await, 0);
    }

    #[tokio::test]
    async fn test_subscribe_to_finished_job_is_closed() {
        let (orchestrator, _) = create_orchestrator(ScriptedProvider::default()).await;
        let submission = orchestrator.submit("eng-1", research(THESIS)).await.unwrap();
        orchestrator.run_once().await.unwrap();

        let mut rx = orchestrator.subscribe(&submission.job.id).await.unwrap();
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
    }

    #[tokio::test]
    async fn test_subscribe_to_unknown_job_is_not_found() {
        let (orchestrator, _) = create_orchestrator(ScriptedProvider::default()).await;
        let result = orchestrator.subscribe("missing").await;
        assert!(matches!(result, Err(AppError::NotFound { .. })));
        assert_eq!(orchestrator.hub().open_channels().await, 0);
    }
}

mod failure_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_provider_timeout_fails_job() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let config = OrchestratorConfig {
            provider_timeout_ms: 20,
            ..test_config()
        };
        let provider = ScriptedProvider {
            delay: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(storage, Arc::new(provider), config);
        let submission = orchestrator.submit("eng-1", research(THESIS)).await.unwrap();
        let mut rx = orchestrator.subscribe(&submission.job.id).await.unwrap();

        let finished = orchestrator.run_once().await.unwrap().unwrap();

        assert_eq!(finished.status, JobStatus::Failed);
        let error = finished.error_message.unwrap();
        assert!(error.contains("timeout"), "unexpected error: {}", error);
        assert!(error.contains("hypotheses"));

        let mut last = None;
        while let Ok(event) = rx.recv().await {
            last = Some(event);
        }
        assert_eq!(last.unwrap().event_type, ProgressEventType::Failed);

        // The engagement is free for a new job.
        let retry = orchestrator.submit("eng-1", research(THESIS)).await.unwrap();
        assert!(retry.created);
    }

    #[tokio::test]
    async fn test_stress_test_without_hypotheses_fails() {
        let (orchestrator, provider) = create_orchestrator(ScriptedProvider::default()).await;
        orchestrator
            .submit("eng-1", JobConfig::StressTest(StressTestConfig::default()))
            .await
            .unwrap();

        let finished = orchestrator.run_once().await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
        assert!(provider.calls().is_empty());

        let tests = orchestrator.storage().list_stress_tests("eng-1").await.unwrap();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].status, StressTestStatus::Failed);
    }
}

mod recovery_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn wait_for_terminal(orchestrator: &Orchestrator, job_id: &str) -> JobStatus {
        let wait = async {
            loop {
                let status = orchestrator.status(job_id).await.unwrap().status;
                if status.is_terminal() {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), wait)
            .await
            .expect("job did not finish")
    }

    #[tokio::test]
    async fn test_start_reclaims_job_left_running() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        // A previous process claimed this job and died.
        let stale = ResearchJob::new("eng-1", research(THESIS));
        storage.admit_job(&stale).await.unwrap();
        storage.claim_next_job().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let orchestrator = Orchestrator::new(
            storage,
            Arc::new(ScriptedProvider::default()),
            test_config(),
        );
        let mut rx = orchestrator.subscribe(&stale.id).await.unwrap();
        let handles = orchestrator.start();

        assert_eq!(wait_for_terminal(&orchestrator, &stale.id).await, JobStatus::Failed);
        let reclaimed = orchestrator.status(&stale.id).await.unwrap();
        assert_eq!(reclaimed.error.as_deref(), Some(INTERRUPTED_MESSAGE));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, ProgressEventType::Failed);
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));

        let next = orchestrator.submit("eng-1", research(THESIS)).await.unwrap();
        assert!(next.created);
        assert_eq!(
            wait_for_terminal(&orchestrator, &next.job.id).await,
            JobStatus::Completed
        );

        orchestrator.shutdown();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("worker did not stop")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_own_running_jobs_are_not_reclaimed() {
        let (orchestrator, _) = create_orchestrator(ScriptedProvider::default()).await;
        let submission = orchestrator.submit("eng-1", research(THESIS)).await.unwrap();
        orchestrator.recover_interrupted().await.unwrap();

        let claimed = orchestrator.storage().claim_next_job().await.unwrap().unwrap();
        assert_eq!(claimed.id, submission.job.id);
        orchestrator.recover_interrupted().await.unwrap();
        orchestrator.clone().recover_interrupted().await.unwrap();

        assert_eq!(
            orchestrator.status(&claimed.id).await.unwrap().status,
            JobStatus::Running
        );
    }

    #[tokio::test]
    async fn test_refused_result_write_fails_job() {
        let (orchestrator, _) = create_orchestrator(ScriptedProvider::default()).await;
        sqlx::query(
            "CREATE TRIGGER refuse_completion BEFORE UPDATE OF status ON research_jobs \
             WHEN NEW.status = 'completed' BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(orchestrator.storage().pool())
        .await
        .unwrap();

        let submission = orchestrator.submit("eng-1", research(THESIS)).await.unwrap();
        let mut rx = orchestrator.subscribe(&submission.job.id).await.unwrap();

        let finished = orchestrator.run_once().await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
        let error = finished.error_message.unwrap();
        assert!(error.contains("disk full"), "unexpected error: {}", error);

        let mut last = None;
        while let Ok(event) = rx.recv().await {
            last = Some(event);
        }
        assert_eq!(last.unwrap().event_type, ProgressEventType::Failed);

        let retry = orchestrator.submit("eng-1", research(THESIS)).await.unwrap();
        assert!(retry.created);
    }
}

mod cancel_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_cancel_queued_job_fails_it() {
        let (orchestrator, _) = create_orchestrator(ScriptedProvider::default()).await;
        let submission = orchestrator.submit("eng-1", research(THESIS)).await.unwrap();
        let mut rx = orchestrator.subscribe(&submission.job.id).await.unwrap();

        let cancelled = orchestrator.cancel(&submission.job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Failed);
        assert!(cancelled.cancel_requested);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, ProgressEventType::Failed);
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));

        // Nothing left to run.
        assert!(orchestrator.run_once().await.unwrap().is_none());

        // Cancelling again is a conflict.
        let again = orchestrator.cancel(&submission.job.id).await;
        assert!(matches!(again, Err(e) if e.is_conflict()));
    }

    #[tokio::test]
    async fn test_cancel_running_job_yields_partial() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let provider = ScriptedProvider {
            cancel_during: Some((GenerationPhase::Evidence, storage.clone())),
            ..Default::default()
        };
        let provider = Arc::new(provider);
        let orchestrator = Orchestrator::new(storage, provider.clone(), test_config());
        orchestrator.submit("eng-1", research(THESIS)).await.unwrap();

        let finished = orchestrator.run_once().await.unwrap().unwrap();

        assert_eq!(finished.status, JobStatus::Partial);
        let result = finished.result.unwrap();
        assert_eq!(result["cancelled"], true);
        assert_eq!(
            result["phases_completed"],
            json!(["hypothesis_generation", "evidence_gathering"])
        );
        assert_eq!(
            provider.calls(),
            vec![GenerationPhase::Hypotheses, GenerationPhase::Evidence]
        );
    }
}

mod stress_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_stress_test_job_scores_vulnerabilities() {
        let (orchestrator, provider) = create_orchestrator(ScriptedProvider::default()).await;
        orchestrator.submit("eng-1", research(THESIS)).await.unwrap();
        orchestrator.run_once().await.unwrap();

        orchestrator
            .submit(
                "eng-1",
                JobConfig::StressTest(StressTestConfig {
                    intensity: Intensity::Light,
                    hypothesis_ids: vec![],
                }),
            )
            .await
            .unwrap();
        let job_id = orchestrator
            .storage()
            .active_job("eng-1")
            .await
            .unwrap()
            .unwrap()
            .id;
        let mut rx = orchestrator.subscribe(&job_id).await.unwrap();
        let finished = orchestrator.run_once().await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Completed);

        let mut milestones = Vec::new();
        while let Ok(event) = rx.recv().await {
            // Phase starts report progress too; milestones carry their own detail.
            if event.event_type == ProgressEventType::Progress
                && event.data["detail"]["status"] != "started"
            {
                milestones.push(event.data);
            }
        }
        let vulnerability_milestone = milestones
            .iter()
            .find(|m| m["phase"] == "vulnerability_synthesis")
            .expect("no vulnerability milestone");
        assert_eq!(vulnerability_milestone["progress"], 60);
        assert_eq!(vulnerability_milestone["detail"]["vulnerabilities"], 2);
        assert!(milestones
            .iter()
            .any(|m| m["phase"] == "scenario_generation" && m["detail"]["kept"] == 3));

        let calls = provider.calls();
        assert_eq!(
            &calls[calls.len() - 2..],
            &[GenerationPhase::Scenarios, GenerationPhase::Vulnerabilities]
        );

        let latest = orchestrator
            .storage()
            .latest_completed_stress_test("eng-1")
            .await
            .unwrap()
            .unwrap();
        let results = latest.results.unwrap();
        // Light intensity caps the ten scripted scenarios at three.
        assert_eq!(results.scenarios_run, 3);
        assert_eq!(results.overall_risk_score, 45);
        assert_eq!(results.summary, "Concentration dominates");
        assert_eq!(results.vulnerabilities[0].hypothesis_id, None);

        let values = orchestrator.recompute_metrics("eng-1").await.unwrap();
        assert!((values.stress_test_vulnerability - 0.45).abs() < 1e-9);
    }
}

mod worker_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_worker_pool_drains_queue_and_stops() {
        let (orchestrator, _) = create_orchestrator(ScriptedProvider::default()).await;
        let handles = orchestrator.start();

        let a = orchestrator.submit("eng-a", research(THESIS)).await.unwrap();
        let b = orchestrator.submit("eng-b", research(THESIS)).await.unwrap();

        let wait = async {
            loop {
                let sa = orchestrator.status(&a.job.id).await.unwrap().status;
                let sb = orchestrator.status(&b.job.id).await.unwrap().status;
                if sa.is_terminal() && sb.is_terminal() {
                    return (sa, sb);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        let (sa, sb) = tokio::time::timeout(Duration::from_secs(10), wait)
            .await
            .expect("jobs did not finish");
        assert_eq!(sa, JobStatus::Completed);
        assert_eq!(sb, JobStatus::Completed);

        orchestrator.shutdown();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("worker did not stop")
                .unwrap();
        }
    }
}
