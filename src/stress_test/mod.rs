//! Adversarial stress tests of the thesis and their risk scoring.
//!
//! A stress test moves `pending → running → {completed, failed}`. Results are
//! written in the same statement as the `completed` transition, and the schema
//! refuses a `completed` row without results or a `failed` row without an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contradictions::Severity;
use crate::error::{AppError, AppResult};
use crate::macros::text_enum;

/// Upper bound of the risk score.
pub const MAX_RISK_SCORE: u32 = 100;

/// How hard the reasoning step pushes against the thesis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Light,
    #[default]
    Moderate,
    Aggressive,
}

text_enum!(Intensity, "intensity", {
    Light => "light",
    Moderate => "moderate",
    Aggressive => "aggressive",
});

impl Intensity {
    /// Number of adversarial scenarios to generate.
    pub fn scenario_count(&self) -> u32 {
        match self {
            Intensity::Light => 3,
            Intensity::Moderate => 5,
            Intensity::Aggressive => 8,
        }
    }
}

/// Lifecycle state of a stress test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressTestStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

text_enum!(StressTestStatus, "stress test status", {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

impl StressTestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StressTestStatus::Completed | StressTestStatus::Failed)
    }

    pub fn can_transition_to(&self, next: StressTestStatus) -> bool {
        use StressTestStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Running, Completed) | (Pending, Failed) | (Running, Failed)
        )
    }
}

/// Qualitative band of the overall risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assessment {
    Robust,
    Moderate,
    Vulnerable,
    Critical,
}

text_enum!(Assessment, "assessment", {
    Robust => "robust",
    Moderate => "moderate",
    Vulnerable => "vulnerable",
    Critical => "critical",
});

impl Assessment {
    /// Map a 0-100 risk score to its band.
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s < 25 => Assessment::Robust,
            s if s < 50 => Assessment::Moderate,
            s if s < 75 => Assessment::Vulnerable,
            _ => Assessment::Critical,
        }
    }
}

/// A weakness surfaced by a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    /// Hypothesis the weakness targets, when attributable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypothesis_id: Option<String>,
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    /// Scenario that exposed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mitigation: Option<String>,
}

impl Vulnerability {
    pub fn new(description: impl Into<String>, severity: Severity) -> Self {
        Self {
            hypothesis_id: None,
            description: description.into(),
            severity,
            scenario: None,
            mitigation: None,
        }
    }

    pub fn targeting(mut self, hypothesis_id: impl Into<String>) -> Self {
        self.hypothesis_id = Some(hypothesis_id.into());
        self
    }

    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    pub fn with_mitigation(mut self, mitigation: impl Into<String>) -> Self {
        self.mitigation = Some(mitigation.into());
        self
    }
}

/// Risk points contributed by one vulnerability.
pub fn severity_weight(severity: Severity) -> u32 {
    match severity {
        Severity::High => 30,
        Severity::Medium => 15,
        Severity::Low => 5,
    }
}

/// Sum of severity weights, clamped to [`MAX_RISK_SCORE`].
pub fn score_vulnerabilities(vulnerabilities: &[Vulnerability]) -> u32 {
    vulnerabilities
        .iter()
        .map(|v| severity_weight(v.severity))
        .sum::<u32>()
        .min(MAX_RISK_SCORE)
}

/// Structured outcome of a completed stress test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressTestResults {
    pub scenarios_run: u32,
    pub vulnerabilities: Vec<Vulnerability>,
    /// 0-100.
    pub overall_risk_score: u32,
    pub overall_assessment: Assessment,
    pub summary: String,
}

impl StressTestResults {
    /// Score the findings and derive the assessment band.
    pub fn from_findings(
        scenarios_run: u32,
        vulnerabilities: Vec<Vulnerability>,
        summary: impl Into<String>,
    ) -> Self {
        let overall_risk_score = score_vulnerabilities(&vulnerabilities);
        Self {
            scenarios_run,
            vulnerabilities,
            overall_risk_score,
            overall_assessment: Assessment::from_score(overall_risk_score),
            summary: summary.into(),
        }
    }
}

/// One stress-test run against an engagement's thesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressTest {
    pub id: String,
    pub engagement_id: String,
    pub intensity: Intensity,
    /// Restrict the run to these hypotheses; `None` targets the whole graph.
    pub hypothesis_ids: Option<Vec<String>>,
    pub status: StressTestStatus,
    pub results: Option<StressTestResults>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StressTest {
    /// Create a pending stress test.
    pub fn new(engagement_id: impl Into<String>, intensity: Intensity) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            engagement_id: engagement_id.into(),
            intensity,
            hypothesis_ids: None,
            status: StressTestStatus::Pending,
            results: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Limit to a subset of hypotheses. An empty list means all.
    pub fn with_hypotheses(mut self, hypothesis_ids: Vec<String>) -> Self {
        self.hypothesis_ids = if hypothesis_ids.is_empty() {
            None
        } else {
            Some(hypothesis_ids)
        };
        self
    }

    /// Whether `hypothesis_id` is within this test's target set.
    pub fn targets(&self, hypothesis_id: &str) -> bool {
        self.hypothesis_ids
            .as_ref()
            .map_or(true, |ids| ids.iter().any(|id| id == hypothesis_id))
    }
}

/// Persistence and lifecycle transitions for stress tests.
#[async_trait]
pub trait StressTestStore: Send + Sync {
    async fn create_stress_test(&self, test: &StressTest) -> AppResult<()>;

    async fn get_stress_test(&self, engagement_id: &str, id: &str) -> AppResult<StressTest>;

    /// Newest first.
    async fn list_stress_tests(&self, engagement_id: &str) -> AppResult<Vec<StressTest>>;

    /// `pending → running`.
    async fn start_stress_test(&self, engagement_id: &str, id: &str) -> AppResult<StressTest>;

    /// `running → completed`, storing results in the same write.
    async fn complete_stress_test(
        &self,
        engagement_id: &str,
        id: &str,
        results: &StressTestResults,
    ) -> AppResult<StressTest>;

    /// `pending | running → failed`.
    async fn fail_stress_test(
        &self,
        engagement_id: &str,
        id: &str,
        error_message: &str,
    ) -> AppResult<StressTest>;

    /// Rejected with `StressTestRunning` while the test is running.
    async fn delete_stress_test(&self, engagement_id: &str, id: &str) -> AppResult<()>;

    /// Most recently completed test, if any.
    async fn latest_completed_stress_test(
        &self,
        engagement_id: &str,
    ) -> AppResult<Option<StressTest>>;
}

/// Reject an empty failure message before it reaches the store.
pub(crate) fn validate_error_message(message: &str) -> AppResult<()> {
    if message.trim().is_empty() {
        return Err(AppError::validation(
            "error_message",
            "A failed stress test needs an error message",
        ));
    }
    Ok(())
}
