//! Derived quality metrics.
//!
//! [`compute_metrics`] is a pure function of an engagement's current state;
//! [`MetricsAggregator`] gathers that state from storage and appends one
//! [`QualityMetric`] per [`MetricType`]. History is never rewritten.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::AppResult;
use crate::evidence::SourceType;
use crate::macros::text_enum;
use crate::storage::SqliteStorage;
use crate::stress_test::MAX_RISK_SCORE;

/// Kinds of tracked quality metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    EvidenceCredibility,
    SourceDiversity,
    HypothesisCoverage,
    ContradictionResolution,
    OverallConfidence,
    StressTestVulnerability,
    ResearchCompleteness,
}

text_enum!(MetricType, "metric type", {
    EvidenceCredibility => "evidence_credibility",
    SourceDiversity => "source_diversity",
    HypothesisCoverage => "hypothesis_coverage",
    ContradictionResolution => "contradiction_resolution",
    OverallConfidence => "overall_confidence",
    StressTestVulnerability => "stress_test_vulnerability",
    ResearchCompleteness => "research_completeness",
});

/// One appended metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetric {
    pub id: String,
    pub engagement_id: String,
    pub metric_type: MetricType,
    pub value: f64,
    pub metadata: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

impl QualityMetric {
    pub fn new(engagement_id: impl Into<String>, metric_type: MetricType, value: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            engagement_id: engagement_id.into(),
            metric_type,
            value,
            metadata: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Snapshot of the state the metrics are derived from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricInputs {
    pub hypothesis_count: u64,
    /// Sum of hypothesis confidences.
    pub confidence_sum: f64,
    pub evidence_count: u64,
    pub average_credibility: f64,
    pub distinct_source_types: u64,
    pub hypothesis_coverage: f64,
    pub resolution_rate: f64,
    /// Risk score of the latest completed stress test.
    pub latest_risk_score: Option<u32>,
}

/// Computed values, one per [`MetricType`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricValues {
    pub evidence_credibility: f64,
    pub source_diversity: f64,
    pub hypothesis_coverage: f64,
    pub contradiction_resolution: f64,
    pub overall_confidence: f64,
    pub stress_test_vulnerability: f64,
    pub research_completeness: f64,
}

impl MetricValues {
    /// Values paired with their type, in [`MetricType::ALL`] order.
    pub fn entries(&self) -> [(MetricType, f64); 7] {
        [
            (MetricType::EvidenceCredibility, self.evidence_credibility),
            (MetricType::SourceDiversity, self.source_diversity),
            (MetricType::HypothesisCoverage, self.hypothesis_coverage),
            (MetricType::ContradictionResolution, self.contradiction_resolution),
            (MetricType::OverallConfidence, self.overall_confidence),
            (MetricType::StressTestVulnerability, self.stress_test_vulnerability),
            (MetricType::ResearchCompleteness, self.research_completeness),
        ]
    }

    pub fn get(&self, metric_type: MetricType) -> f64 {
        self.entries()
            .iter()
            .find(|(t, _)| *t == metric_type)
            .map(|(_, v)| *v)
            .unwrap_or_default()
    }
}

/// Weights of the research completeness composite.
const COMPLETENESS_WEIGHTS: (f64, f64, f64, f64) = (0.4, 0.2, 0.2, 0.2);

/// Evidence items per hypothesis that count as full depth.
const EVIDENCE_PER_HYPOTHESIS: f64 = 3.0;

/// Derive every metric from `inputs`. Deterministic and side-effect free.
pub fn compute_metrics(inputs: &MetricInputs) -> MetricValues {
    let source_diversity =
        (inputs.distinct_source_types as f64 / SourceType::ALL.len() as f64).min(1.0);

    let overall_confidence = if inputs.hypothesis_count == 0 {
        0.5
    } else {
        inputs.confidence_sum / inputs.hypothesis_count as f64
    };

    let evidence_credibility = if inputs.evidence_count == 0 {
        0.0
    } else {
        inputs.average_credibility
    };

    let stress_test_vulnerability = inputs
        .latest_risk_score
        .map(|s| s.min(MAX_RISK_SCORE) as f64 / MAX_RISK_SCORE as f64)
        .unwrap_or(0.0);

    let depth = (inputs.evidence_count as f64
        / (EVIDENCE_PER_HYPOTHESIS * inputs.hypothesis_count.max(1) as f64))
        .min(1.0);

    let (w_cov, w_div, w_res, w_depth) = COMPLETENESS_WEIGHTS;
    let research_completeness = w_cov * inputs.hypothesis_coverage
        + w_div * source_diversity
        + w_res * inputs.resolution_rate
        + w_depth * depth;

    MetricValues {
        evidence_credibility,
        source_diversity,
        hypothesis_coverage: inputs.hypothesis_coverage,
        contradiction_resolution: inputs.resolution_rate,
        overall_confidence,
        stress_test_vulnerability,
        research_completeness,
    }
}

/// Append-only metric persistence.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Read the inputs of [`compute_metrics`] from one consistent snapshot.
    async fn metric_inputs(&self, engagement_id: &str) -> AppResult<MetricInputs>;

    /// Append a batch atomically.
    async fn record_metrics(&self, metrics: &[QualityMetric]) -> AppResult<()>;

    /// Latest record per metric type.
    async fn current_metrics(&self, engagement_id: &str) -> AppResult<Vec<QualityMetric>>;

    /// Records newest first, optionally restricted to one type.
    async fn metric_history(
        &self,
        engagement_id: &str,
        metric_type: Option<MetricType>,
        limit: Option<u32>,
    ) -> AppResult<Vec<QualityMetric>>;
}

/// Recomputes and records an engagement's quality metrics.
#[derive(Clone)]
pub struct MetricsAggregator {
    storage: SqliteStorage,
}

impl MetricsAggregator {
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }

    /// Read the current state of an engagement.
    pub async fn gather_inputs(&self, engagement_id: &str) -> AppResult<MetricInputs> {
        self.storage.metric_inputs(engagement_id).await
    }

    /// Compute all metrics and append one record per type.
    pub async fn recompute_and_record(&self, engagement_id: &str) -> AppResult<MetricValues> {
        let inputs = self.gather_inputs(engagement_id).await?;
        let values = compute_metrics(&inputs);

        let recorded_at = Utc::now();
        let metrics: Vec<QualityMetric> = values
            .entries()
            .iter()
            .map(|(metric_type, value)| {
                let mut metric = QualityMetric::new(engagement_id, *metric_type, *value);
                metric.recorded_at = recorded_at;
                metric
            })
            .collect();

        self.storage.record_metrics(&metrics).await?;

        info!(
            engagement_id = %engagement_id,
            completeness = values.research_completeness,
            coverage = values.hypothesis_coverage,
            "Quality metrics recorded"
        );
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_empty_engagement() {
        let inputs = MetricInputs {
            resolution_rate: 1.0,
            ..Default::default()
        };
        let values = compute_metrics(&inputs);

        assert_eq!(values.hypothesis_coverage, 0.0);
        assert_eq!(values.contradiction_resolution, 1.0);
        assert_eq!(values.overall_confidence, 0.5);
        assert_eq!(values.evidence_credibility, 0.0);
        assert_eq!(values.stress_test_vulnerability, 0.0);
        assert!(approx(values.research_completeness, 0.2));
    }

    #[test]
    fn test_populated_engagement() {
        let inputs = MetricInputs {
            hypothesis_count: 2,
            confidence_sum: 1.4,
            evidence_count: 3,
            average_credibility: 0.8,
            distinct_source_types: 3,
            hypothesis_coverage: 0.5,
            resolution_rate: 0.5,
            latest_risk_score: Some(50),
        };
        let values = compute_metrics(&inputs);

        assert!(approx(values.overall_confidence, 0.7));
        assert!(approx(values.source_diversity, 0.5));
        assert!(approx(values.stress_test_vulnerability, 0.5));
        // 0.4*0.5 + 0.2*0.5 + 0.2*0.5 + 0.2*(3/6)
        assert!(approx(values.research_completeness, 0.5));
    }

    #[test]
    fn test_depth_saturates() {
        let inputs = MetricInputs {
            hypothesis_count: 1,
            confidence_sum: 0.5,
            evidence_count: 30,
            hypothesis_coverage: 1.0,
            resolution_rate: 1.0,
            distinct_source_types: 6,
            average_credibility: 0.9,
            latest_risk_score: None,
        };
        assert!(approx(compute_metrics(&inputs).research_completeness, 1.0));
    }

    #[test]
    fn test_entries_cover_every_type() {
        let values = MetricValues::default();
        let types: Vec<_> = values.entries().iter().map(|(t, _)| *t).collect();
        assert_eq!(types, MetricType::ALL.to_vec());
    }
}
