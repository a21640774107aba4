//! Integration tests for quality metric aggregation and history

use pretty_assertions::assert_eq;

use thesis_research_engine::contradictions::{
    Contradiction, ContradictionStatus, ContradictionStore, Severity,
};
use thesis_research_engine::evidence::{Evidence, EvidenceStore, SourceType};
use thesis_research_engine::graph::{GraphStore, HypothesisNode, NodeType};
use thesis_research_engine::metrics::{MetricType, MetricsAggregator, MetricsStore};
use thesis_research_engine::storage::SqliteStorage;
use thesis_research_engine::stress_test::{
    Intensity, StressTest, StressTestResults, StressTestStore, Vulnerability,
};

async fn create_test_storage() -> SqliteStorage {
    SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage")
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Two hypotheses, three evidence items across two source types, one of two
/// contradictions resolved and a completed stress test scoring 50.
async fn seed_engagement(storage: &SqliteStorage, engagement: &str) {
    let thesis = HypothesisNode::new(engagement, NodeType::Thesis, "Acme re-rates")
        .with_confidence(0.6);
    let lever = HypothesisNode::new(engagement, NodeType::Lever, "Mix shift to services")
        .with_confidence(0.8)
        .with_parent(&thesis.id);
    storage.create_node(&thesis).await.unwrap();
    storage.create_node(&lever).await.unwrap();

    let web = Evidence::new(engagement, SourceType::Web, "Trade press").with_credibility(0.4);
    let filing = Evidence::new(engagement, SourceType::Filing, "10-Q").with_credibility(0.8);
    let proxy = Evidence::new(engagement, SourceType::Filing, "Proxy").with_credibility(0.6);
    for item in [&web, &filing, &proxy] {
        storage.create_evidence(item).await.unwrap();
    }
    storage
        .link_evidence(engagement, &filing.id, &lever.id, 0.9)
        .await
        .unwrap();

    let resolved = Contradiction::new(engagement, "Services margin lower", Severity::Medium);
    let open = Contradiction::new(engagement, "Churn in services", Severity::High);
    storage.create_contradiction(&resolved).await.unwrap();
    storage.create_contradiction(&open).await.unwrap();
    storage
        .resolve_contradiction(
            engagement,
            &resolved.id,
            ContradictionStatus::Explained,
            Some("Scale effects"),
            None,
        )
        .await
        .unwrap();

    let test = StressTest::new(engagement, Intensity::Moderate);
    storage.create_stress_test(&test).await.unwrap();
    storage.start_stress_test(engagement, &test.id).await.unwrap();
    storage
        .complete_stress_test(
            engagement,
            &test.id,
            &StressTestResults::from_findings(
                5,
                vec![
                    Vulnerability::new("Customer concentration", Severity::High),
                    Vulnerability::new("FX exposure", Severity::Medium),
                    Vulnerability::new("Key person", Severity::Low),
                ],
                "Moderate exposure",
            ),
        )
        .await
        .unwrap();
}

mod aggregation_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_empty_engagement_defaults() {
        let storage = create_test_storage().await;
        let aggregator = MetricsAggregator::new(storage.clone());

        let values = aggregator.recompute_and_record("eng-empty").await.unwrap();

        assert_eq!(values.hypothesis_coverage, 0.0);
        assert_eq!(values.contradiction_resolution, 1.0);
        assert_eq!(values.overall_confidence, 0.5);
        assert_eq!(values.evidence_credibility, 0.0);
        assert_eq!(values.stress_test_vulnerability, 0.0);
    }

    #[tokio::test]
    async fn test_populated_engagement() {
        let storage = create_test_storage().await;
        seed_engagement(&storage, "eng-1").await;
        let aggregator = MetricsAggregator::new(storage.clone());

        let values = aggregator.recompute_and_record("eng-1").await.unwrap();

        assert!(approx(values.evidence_credibility, 0.6));
        assert!(approx(values.source_diversity, 2.0 / 6.0));
        assert!(approx(values.hypothesis_coverage, 0.5));
        assert!(approx(values.contradiction_resolution, 0.5));
        assert!(approx(values.overall_confidence, 0.7));
        assert!(approx(values.stress_test_vulnerability, 0.5));
        // 0.4*0.5 + 0.2*(1/3) + 0.2*0.5 + 0.2*(3/6)
        assert!(approx(values.research_completeness, 0.4 + 0.2 / 3.0));
    }

    #[tokio::test]
    async fn test_engagements_are_isolated() {
        let storage = create_test_storage().await;
        seed_engagement(&storage, "eng-1").await;
        let aggregator = MetricsAggregator::new(storage.clone());

        let inputs = aggregator.gather_inputs("eng-2").await.unwrap();
        assert_eq!(inputs.hypothesis_count, 0);
        assert_eq!(inputs.evidence_count, 0);
        assert_eq!(inputs.latest_risk_score, None);
    }

    #[tokio::test]
    async fn test_inputs_come_from_one_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = thesis_research_engine::config::DatabaseConfig {
            path: dir.path().join("metrics.db"),
            max_connections: 4,
        };
        let storage = SqliteStorage::new(&config).await.unwrap();

        // One linked hypothesis; every later hypothesis stays unlinked, so in
        // any consistent state coverage * hypothesis_count == 1.
        let thesis = HypothesisNode::new("eng-1", NodeType::Thesis, "Acme re-rates");
        storage.create_node(&thesis).await.unwrap();
        let filing = Evidence::new("eng-1", SourceType::Filing, "10-K");
        storage.create_evidence(&filing).await.unwrap();
        storage
            .link_evidence("eng-1", &filing.id, &thesis.id, 0.8)
            .await
            .unwrap();

        let writer_storage = storage.clone();
        let thesis_id = thesis.id.clone();
        let writer = tokio::spawn(async move {
            for i in 0..40 {
                let lever = HypothesisNode::new("eng-1", NodeType::Lever, format!("Lever {}", i))
                    .with_parent(&thesis_id);
                writer_storage.create_node(&lever).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let aggregator = MetricsAggregator::new(storage.clone());
        for _ in 0..40 {
            let inputs = aggregator.gather_inputs("eng-1").await.unwrap();
            assert!(
                approx(inputs.hypothesis_coverage * inputs.hypothesis_count as f64, 1.0),
                "coverage {} disagrees with {} hypotheses",
                inputs.hypothesis_coverage,
                inputs.hypothesis_count
            );
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        let settled = aggregator.gather_inputs("eng-1").await.unwrap();
        assert_eq!(settled.hypothesis_count, 41);
    }
}

mod history_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_recording_appends_and_current_is_latest() {
        let storage = create_test_storage().await;
        let aggregator = MetricsAggregator::new(storage.clone());

        aggregator.recompute_and_record("eng-1").await.unwrap();
        let node = HypothesisNode::new("eng-1", NodeType::Thesis, "Thesis").with_confidence(0.9);
        storage.create_node(&node).await.unwrap();
        aggregator.recompute_and_record("eng-1").await.unwrap();

        let history = storage.metric_history("eng-1", None, None).await.unwrap();
        assert_eq!(history.len(), MetricType::ALL.len() * 2);

        let confidence = storage
            .metric_history("eng-1", Some(MetricType::OverallConfidence), None)
            .await
            .unwrap();
        let values: Vec<f64> = confidence.iter().map(|m| m.value).collect();
        assert_eq!(values, vec![0.9, 0.5]);

        let current = storage.current_metrics("eng-1").await.unwrap();
        assert_eq!(current.len(), MetricType::ALL.len());
        let overall = current
            .iter()
            .find(|m| m.metric_type == MetricType::OverallConfidence)
            .unwrap();
        assert_eq!(overall.value, 0.9);
    }

    #[tokio::test]
    async fn test_history_limit() {
        let storage = create_test_storage().await;
        let aggregator = MetricsAggregator::new(storage.clone());
        for _ in 0..3 {
            aggregator.recompute_and_record("eng-1").await.unwrap();
        }

        let limited = storage
            .metric_history("eng-1", Some(MetricType::HypothesisCoverage), Some(2))
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert!(limited[0].recorded_at >= limited[1].recorded_at);
    }

    #[tokio::test]
    async fn test_no_metrics_recorded_yet() {
        let storage = create_test_storage().await;
        assert!(storage.current_metrics("eng-1").await.unwrap().is_empty());
    }
}
