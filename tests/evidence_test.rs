//! Integration tests for the evidence store and evidence-hypothesis links

use pretty_assertions::assert_eq;

use thesis_research_engine::error::AppError;
use thesis_research_engine::evidence::{
    Evidence, EvidenceFilter, EvidenceStore, EvidenceUpdate, Sentiment, SourceMetadata, SourceType,
};
use thesis_research_engine::graph::{GraphStore, HypothesisNode, NodeType};
use thesis_research_engine::storage::SqliteStorage;

async fn create_test_storage() -> SqliteStorage {
    SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage")
}

async fn hypothesis(storage: &SqliteStorage, engagement: &str, content: &str) -> HypothesisNode {
    let node = HypothesisNode::new(engagement, NodeType::Assumption, content);
    storage.create_node(&node).await.unwrap();
    node
}

async fn evidence(
    storage: &SqliteStorage,
    engagement: &str,
    source_type: SourceType,
    credibility: f64,
) -> Evidence {
    let item = Evidence::new(engagement, source_type, format!("{} observation", source_type))
        .with_credibility(credibility);
    storage.create_evidence(&item).await.unwrap();
    item
}

mod crud_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_and_get_with_source_metadata() {
        let storage = create_test_storage().await;
        let item = Evidence::new("eng-1", SourceType::Filing, "10-K shows 18% gross margin")
            .with_sentiment(Sentiment::Supporting)
            .with_credibility(0.9)
            .with_document("doc-7")
            .with_source(SourceMetadata {
                title: Some("FY2025 10-K".to_string()),
                author: Some("Acme Corp".to_string()),
                url: Some("https://example.com/10k".to_string()),
                published_at: None,
            });
        storage.create_evidence(&item).await.unwrap();

        let fetched = storage.get_evidence("eng-1", &item.id).await.unwrap();
        assert_eq!(fetched.sentiment, Sentiment::Supporting);
        assert_eq!(fetched.credibility, 0.9);
        assert_eq!(fetched.document_id.as_deref(), Some("doc-7"));
        assert_eq!(fetched.source.title.as_deref(), Some("FY2025 10-K"));
    }

    #[tokio::test]
    async fn test_get_evidence_from_other_engagement_is_not_found() {
        let storage = create_test_storage().await;
        let item = evidence(&storage, "eng-1", SourceType::Web, 0.5).await;

        assert!(matches!(
            storage.get_evidence("eng-2", &item.id).await,
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_evidence_validates_credibility() {
        let storage = create_test_storage().await;
        let item = evidence(&storage, "eng-1", SourceType::Expert, 0.5).await;

        let updated = storage
            .update_evidence(
                "eng-1",
                &item.id,
                &EvidenceUpdate::default()
                    .sentiment(Sentiment::Contradicting)
                    .credibility(0.3),
            )
            .await
            .unwrap();
        assert_eq!(updated.sentiment, Sentiment::Contradicting);
        assert_eq!(updated.credibility, 0.3);

        let result = storage
            .update_evidence("eng-1", &item.id, &EvidenceUpdate::default().credibility(1.2))
            .await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_delete_evidence_removes_links() {
        let storage = create_test_storage().await;
        let node = hypothesis(&storage, "eng-1", "Demand is resilient").await;
        let item = evidence(&storage, "eng-1", SourceType::Data, 0.8).await;
        storage
            .link_evidence("eng-1", &item.id, &node.id, 0.6)
            .await
            .unwrap();

        storage.delete_evidence("eng-1", &item.id).await.unwrap();

        assert!(storage
            .list_links_for_hypothesis("eng-1", &node.id)
            .await
            .unwrap()
            .is_empty());
    }
}

mod link_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_relink_upserts_latest_score() {
        let storage = create_test_storage().await;
        let node = hypothesis(&storage, "eng-1", "Margins expand").await;
        let item = evidence(&storage, "eng-1", SourceType::Financial, 0.9).await;

        storage
            .link_evidence("eng-1", &item.id, &node.id, 0.4)
            .await
            .unwrap();
        let link = storage
            .link_evidence("eng-1", &item.id, &node.id, 0.85)
            .await
            .unwrap();
        assert_eq!(link.relevance_score, 0.85);

        let links = storage
            .list_links_for_evidence("eng-1", &item.id)
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].relevance_score, 0.85);
    }

    #[tokio::test]
    async fn test_link_requires_both_ends_in_scope() {
        let storage = create_test_storage().await;
        let foreign = hypothesis(&storage, "eng-2", "Other engagement").await;
        let item = evidence(&storage, "eng-1", SourceType::Web, 0.5).await;

        assert!(matches!(
            storage.link_evidence("eng-1", &item.id, &foreign.id, 0.5).await,
            Err(AppError::NotFound { .. })
        ));
        assert!(matches!(
            storage.link_evidence("eng-1", &item.id, "missing", 0.5).await,
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_link_rejects_out_of_range_score() {
        let storage = create_test_storage().await;
        let node = hypothesis(&storage, "eng-1", "Margins expand").await;
        let item = evidence(&storage, "eng-1", SourceType::Web, 0.5).await;

        assert!(matches!(
            storage.link_evidence("eng-1", &item.id, &node.id, -0.1).await,
            Err(AppError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_unlink_reports_whether_removed() {
        let storage = create_test_storage().await;
        let node = hypothesis(&storage, "eng-1", "Margins expand").await;
        let item = evidence(&storage, "eng-1", SourceType::Web, 0.5).await;
        storage
            .link_evidence("eng-1", &item.id, &node.id, 0.5)
            .await
            .unwrap();

        assert!(storage.unlink_evidence("eng-1", &item.id, &node.id).await.unwrap());
        assert!(!storage.unlink_evidence("eng-1", &item.id, &node.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_deleting_hypothesis_nulls_link_reference() {
        let storage = create_test_storage().await;
        let node = hypothesis(&storage, "eng-1", "Will be deleted").await;
        let item = evidence(&storage, "eng-1", SourceType::Expert, 0.7).await;
        storage
            .link_evidence("eng-1", &item.id, &node.id, 0.9)
            .await
            .unwrap();

        storage.delete_node("eng-1", &node.id).await.unwrap();

        assert!(storage.get_evidence("eng-1", &item.id).await.is_ok());
        let links = storage
            .list_links_for_evidence("eng-1", &item.id)
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].hypothesis_id, None);
        assert_eq!(links[0].relevance_score, 0.9);

        let by_hypothesis = storage
            .list_links_for_hypothesis("eng-1", &node.id)
            .await
            .unwrap();
        assert!(by_hypothesis.is_empty());

        // Orphaned links do not count towards coverage.
        let stats = storage.evidence_stats("eng-1").await.unwrap();
        assert_eq!(stats.hypothesis_coverage, 0.0);

        // The evidence can be linked again to a surviving hypothesis.
        let replacement = hypothesis(&storage, "eng-1", "Replacement").await;
        storage
            .link_evidence("eng-1", &item.id, &replacement.id, 0.4)
            .await
            .unwrap();
        let links = storage
            .list_links_for_evidence("eng-1", &item.id)
            .await
            .unwrap();
        assert_eq!(links.len(), 2);
    }
}

mod listing_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_filters_combine() {
        let storage = create_test_storage().await;
        evidence(&storage, "eng-1", SourceType::Web, 0.2).await;
        let strong = evidence(&storage, "eng-1", SourceType::Filing, 0.9).await;
        evidence(&storage, "eng-1", SourceType::Filing, 0.4).await;
        evidence(&storage, "eng-2", SourceType::Filing, 0.95).await;

        let filter = EvidenceFilter::default()
            .source_type(SourceType::Filing)
            .credibility_between(Some(0.5), None);
        let items = storage.list_evidence("eng-1", &filter).await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, strong.id);
    }

    #[tokio::test]
    async fn test_newest_first_with_pagination() {
        let storage = create_test_storage().await;
        let first = evidence(&storage, "eng-1", SourceType::Web, 0.5).await;
        let second = evidence(&storage, "eng-1", SourceType::Web, 0.5).await;
        let third = evidence(&storage, "eng-1", SourceType::Web, 0.5).await;

        let page = storage
            .list_evidence("eng-1", &EvidenceFilter::default().page(2, 0))
            .await
            .unwrap();
        let ids: Vec<_> = page.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec![third.id.clone(), second.id.clone()]);

        let rest = storage
            .list_evidence("eng-1", &EvidenceFilter::default().page(2, 2))
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, first.id);
    }

    #[tokio::test]
    async fn test_hypothesis_filter_applies_after_pagination() {
        let storage = create_test_storage().await;
        let node = hypothesis(&storage, "eng-1", "Linked claim").await;
        let linked = evidence(&storage, "eng-1", SourceType::Web, 0.5).await;
        evidence(&storage, "eng-1", SourceType::Web, 0.5).await;
        evidence(&storage, "eng-1", SourceType::Web, 0.5).await;
        storage
            .link_evidence("eng-1", &linked.id, &node.id, 0.5)
            .await
            .unwrap();

        // The linked item is the oldest, so it falls outside the first page.
        let first_page = storage
            .list_evidence(
                "eng-1",
                &EvidenceFilter::default().hypothesis(&node.id).page(2, 0),
            )
            .await
            .unwrap();
        assert!(first_page.is_empty());

        let unpaged = storage
            .list_evidence("eng-1", &EvidenceFilter::default().hypothesis(&node.id))
            .await
            .unwrap();
        assert_eq!(unpaged.len(), 1);
        assert_eq!(unpaged[0].id, linked.id);
    }
}

mod stats_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_empty_engagement_stats() {
        let storage = create_test_storage().await;
        let stats = storage.evidence_stats("eng-empty").await.unwrap();

        assert_eq!(stats.total, 0);
        assert_eq!(stats.average_credibility, 0.0);
        assert_eq!(stats.hypothesis_coverage, 0.0);
    }

    #[tokio::test]
    async fn test_stats_counts_average_and_coverage() {
        let storage = create_test_storage().await;
        let covered = hypothesis(&storage, "eng-1", "Covered").await;
        hypothesis(&storage, "eng-1", "Uncovered").await;
        let a = evidence(&storage, "eng-1", SourceType::Web, 0.4).await;
        evidence(&storage, "eng-1", SourceType::Filing, 0.8).await;
        storage
            .link_evidence("eng-1", &a.id, &covered.id, 0.7)
            .await
            .unwrap();

        let stats = storage.evidence_stats("eng-1").await.unwrap();

        assert_eq!(stats.total, 2);
        assert!((stats.average_credibility - 0.6).abs() < 1e-9);
        assert_eq!(stats.by_source_type.get("web"), Some(&1));
        assert_eq!(stats.by_source_type.get("filing"), Some(&1));
        assert_eq!(stats.by_sentiment.get("neutral"), Some(&2));
        assert_eq!(stats.hypothesis_coverage, 0.5);
    }
}
