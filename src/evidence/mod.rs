//! Evidence items, their links to hypotheses, and credibility statistics.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::graph::validate_unit;
use crate::macros::text_enum;

/// Default credibility for evidence without an explicit score.
pub const DEFAULT_CREDIBILITY: f64 = 0.5;

/// Where a piece of evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Web,
    Document,
    Expert,
    Data,
    Filing,
    Financial,
}

text_enum!(SourceType, "source type", {
    Web => "web",
    Document => "document",
    Expert => "expert",
    Data => "data",
    Filing => "filing",
    Financial => "financial",
});

/// Direction of the evidence relative to the thesis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Supporting,
    #[default]
    Neutral,
    Contradicting,
}

text_enum!(Sentiment, "sentiment", {
    Supporting => "supporting",
    Neutral => "neutral",
    Contradicting => "contradicting",
});

/// Bibliographic details of the source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// A sourced, sentiment-tagged, credibility-scored observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Unique evidence identifier.
    pub id: String,
    /// Owning engagement.
    pub engagement_id: String,
    /// Observation text.
    pub content: String,
    /// Source category.
    pub source_type: SourceType,
    /// Sentiment relative to the thesis.
    pub sentiment: Sentiment,
    /// Credibility in [0, 1].
    pub credibility: f64,
    /// Source details.
    pub source: SourceMetadata,
    /// Originating document, if extracted from one.
    pub document_id: Option<String>,
    /// How the evidence was obtained (job id, provider, ...).
    pub provenance: Option<serde_json::Value>,
    /// Free-form metadata.
    pub metadata: Option<serde_json::Value>,
    /// When the underlying data was retrieved.
    pub retrieved_at: Option<DateTime<Utc>>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl Evidence {
    /// Create neutral evidence with default credibility.
    pub fn new(
        engagement_id: impl Into<String>,
        source_type: SourceType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            engagement_id: engagement_id.into(),
            content: content.into(),
            source_type,
            sentiment: Sentiment::Neutral,
            credibility: DEFAULT_CREDIBILITY,
            source: SourceMetadata::default(),
            document_id: None,
            provenance: None,
            metadata: None,
            retrieved_at: None,
            created_at: Utc::now(),
        }
    }

    /// Set sentiment
    pub fn with_sentiment(mut self, sentiment: Sentiment) -> Self {
        self.sentiment = sentiment;
        self
    }

    /// Set credibility
    pub fn with_credibility(mut self, credibility: f64) -> Self {
        self.credibility = credibility.clamp(0.0, 1.0);
        self
    }

    /// Set source metadata
    pub fn with_source(mut self, source: SourceMetadata) -> Self {
        self.source = source;
        self
    }

    /// Set originating document
    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    /// Set provenance
    pub fn with_provenance(mut self, provenance: serde_json::Value) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// Set metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Set retrieval time
    pub fn retrieved(mut self, at: DateTime<Utc>) -> Self {
        self.retrieved_at = Some(at);
        self
    }

    /// Check field ranges before persisting.
    pub fn validate(&self) -> AppResult<()> {
        if self.content.trim().is_empty() {
            return Err(AppError::validation("content", "Content cannot be empty"));
        }
        validate_unit("credibility", self.credibility)
    }
}

/// Partial update applied by [`EvidenceStore::update_evidence`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidenceUpdate {
    pub content: Option<String>,
    pub source_type: Option<SourceType>,
    pub sentiment: Option<Sentiment>,
    pub credibility: Option<f64>,
    pub source: Option<SourceMetadata>,
    pub metadata: Option<serde_json::Value>,
}

impl EvidenceUpdate {
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = Some(source_type);
        self
    }

    pub fn sentiment(mut self, sentiment: Sentiment) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    pub fn credibility(mut self, credibility: f64) -> Self {
        self.credibility = Some(credibility);
        self
    }

    pub fn source(mut self, source: SourceMetadata) -> Self {
        self.source = Some(source);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Apply onto existing evidence, validating the result.
    pub fn apply(&self, evidence: &mut Evidence) -> AppResult<()> {
        if let Some(content) = &self.content {
            evidence.content = content.clone();
        }
        if let Some(source_type) = self.source_type {
            evidence.source_type = source_type;
        }
        if let Some(sentiment) = self.sentiment {
            evidence.sentiment = sentiment;
        }
        if let Some(credibility) = self.credibility {
            evidence.credibility = credibility;
        }
        if let Some(source) = &self.source {
            evidence.source = source.clone();
        }
        if let Some(metadata) = &self.metadata {
            evidence.metadata = Some(metadata.clone());
        }
        evidence.validate()
    }
}

/// Many-to-many link between evidence and a hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceLink {
    pub evidence_id: String,
    /// `None` once the linked hypothesis has been deleted.
    pub hypothesis_id: Option<String>,
    /// Relevance in [0, 1].
    pub relevance_score: f64,
    pub created_at: DateTime<Utc>,
}

/// Filters for [`EvidenceStore::list_evidence`].
///
/// `limit`/`offset` are applied by the query *before* the `hypothesis_id`
/// filter, which runs over the fetched page. A page may therefore hold fewer
/// than `limit` items even when more linked evidence exists further on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceFilter {
    #[serde(default)]
    pub source_type: Option<SourceType>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub min_credibility: Option<f64>,
    #[serde(default)]
    pub max_credibility: Option<f64>,
    #[serde(default)]
    pub hypothesis_id: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl EvidenceFilter {
    pub fn source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = Some(source_type);
        self
    }

    pub fn sentiment(mut self, sentiment: Sentiment) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    pub fn credibility_between(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_credibility = min;
        self.max_credibility = max;
        self
    }

    pub fn hypothesis(mut self, hypothesis_id: impl Into<String>) -> Self {
        self.hypothesis_id = Some(hypothesis_id.into());
        self
    }

    pub fn document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }
}

/// Aggregate view over an engagement's evidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceStats {
    pub total: u64,
    pub by_source_type: BTreeMap<String, u64>,
    pub by_sentiment: BTreeMap<String, u64>,
    pub average_credibility: f64,
    /// Linked hypotheses ÷ total hypotheses; 0 when there are no hypotheses.
    pub hypothesis_coverage: f64,
}

/// Coverage ratio, zero-safe.
pub fn coverage_ratio(linked_hypotheses: u64, total_hypotheses: u64) -> f64 {
    if total_hypotheses == 0 {
        0.0
    } else {
        linked_hypotheses as f64 / total_hypotheses as f64
    }
}

/// Persistence for evidence and evidence-hypothesis links.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Persist new evidence.
    async fn create_evidence(&self, evidence: &Evidence) -> AppResult<()>;
    /// Fetch evidence by id.
    async fn get_evidence(&self, engagement_id: &str, id: &str) -> AppResult<Evidence>;
    /// Apply a partial update.
    async fn update_evidence(
        &self,
        engagement_id: &str,
        id: &str,
        update: &EvidenceUpdate,
    ) -> AppResult<Evidence>;
    /// Delete evidence and its link rows.
    async fn delete_evidence(&self, engagement_id: &str, id: &str) -> AppResult<()>;
    /// Link evidence to a hypothesis; relinking updates the score.
    async fn link_evidence(
        &self,
        engagement_id: &str,
        evidence_id: &str,
        hypothesis_id: &str,
        relevance_score: f64,
    ) -> AppResult<EvidenceLink>;
    /// Remove a link. Returns whether a row was removed.
    async fn unlink_evidence(
        &self,
        engagement_id: &str,
        evidence_id: &str,
        hypothesis_id: &str,
    ) -> AppResult<bool>;
    /// Links of one evidence item, including orphaned ones with no hypothesis.
    async fn list_links_for_evidence(
        &self,
        engagement_id: &str,
        evidence_id: &str,
    ) -> AppResult<Vec<EvidenceLink>>;
    /// Links pointing at one hypothesis.
    async fn list_links_for_hypothesis(
        &self,
        engagement_id: &str,
        hypothesis_id: &str,
    ) -> AppResult<Vec<EvidenceLink>>;
    /// Filtered, paginated listing, newest first.
    async fn list_evidence(
        &self,
        engagement_id: &str,
        filter: &EvidenceFilter,
    ) -> AppResult<Vec<Evidence>>;
    /// Counts, credibility average and hypothesis coverage.
    async fn evidence_stats(&self, engagement_id: &str) -> AppResult<EvidenceStats>;
}
