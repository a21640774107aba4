//! External collaborators of the research pipelines.
//!
//! The reasoning provider turns a thesis and graph context into candidate
//! hypotheses, evidence, contradictions and stress scenarios. The market-data
//! provider is a read-only source of ticker data. Both are opaque to the engine.

mod market;

pub use market::HttpMarketDataClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::contradictions::Severity;
use crate::error::ProviderResult;
use crate::evidence::{Sentiment, SourceType, DEFAULT_CREDIBILITY};
use crate::graph::{Importance, NodeType, Testability};
use crate::macros::text_enum;
use crate::stress_test::Vulnerability;

/// Generation step a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    Hypotheses,
    Evidence,
    Contradictions,
    Report,
    Scenarios,
    Vulnerabilities,
}

text_enum!(GenerationPhase, "generation phase", {
    Hypotheses => "hypotheses",
    Evidence => "evidence",
    Contradictions => "contradictions",
    Report => "report",
    Scenarios => "scenarios",
    Vulnerabilities => "vulnerabilities",
});

/// Input to one reasoning call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub phase: GenerationPhase,
    pub engagement_id: String,
    /// Investment thesis under study.
    pub thesis: String,
    /// Phase-specific context (existing hypotheses, evidence, scenarios).
    pub context: serde_json::Value,
    /// Upper bound on generated items, when the phase produces a list.
    pub max_items: Option<u32>,
}

impl GenerationRequest {
    pub fn new(
        phase: GenerationPhase,
        engagement_id: impl Into<String>,
        thesis: impl Into<String>,
    ) -> Self {
        Self {
            phase,
            engagement_id: engagement_id.into(),
            thesis: thesis.into(),
            context: serde_json::Value::Null,
            max_items: None,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_max_items(mut self, max_items: u32) -> Self {
        self.max_items = Some(max_items);
        self
    }
}

fn default_confidence() -> f64 {
    0.5
}

fn default_credibility() -> f64 {
    DEFAULT_CREDIBILITY
}

fn default_relevance() -> f64 {
    0.7
}

fn default_source_type() -> SourceType {
    SourceType::Web
}

/// A proposed hypothesis node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisCandidate {
    pub content: String,
    #[serde(default, alias = "type")]
    pub node_type: NodeType,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default)]
    pub testability: Testability,
}

/// A proposed piece of evidence, optionally tied to a hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceCandidate {
    pub content: String,
    #[serde(default = "default_source_type")]
    pub source_type: SourceType,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default = "default_credibility")]
    pub credibility: f64,
    #[serde(default)]
    pub source_title: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub hypothesis_id: Option<String>,
    #[serde(default = "default_relevance")]
    pub relevance: f64,
}

/// A proposed contradiction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContradictionCandidate {
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub hypothesis_id: Option<String>,
    #[serde(default)]
    pub evidence_id: Option<String>,
    #[serde(default)]
    pub bear_case_theme: Option<String>,
}

/// An adversarial scenario for a stress test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioCandidate {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hypothesis_id: Option<String>,
}

/// Everything a reasoning call may return; phases fill the fields they own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidates {
    #[serde(default)]
    pub hypotheses: Vec<HypothesisCandidate>,
    #[serde(default)]
    pub evidence: Vec<EvidenceCandidate>,
    #[serde(default)]
    pub contradictions: Vec<ContradictionCandidate>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioCandidate>,
    #[serde(default)]
    pub vulnerabilities: Vec<Vulnerability>,
    /// Report text for research, summary text for stress tests.
    #[serde(default)]
    pub report: Option<String>,
}

/// Source of generated research content.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    /// Run one generation phase.
    async fn generate(&self, request: &GenerationRequest) -> ProviderResult<Candidates>;
}

/// Kind of market data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketCategory {
    MarketData,
    Fundamentals,
    News,
    Earnings,
    Technicals,
}

text_enum!(MarketCategory, "market category", {
    MarketData => "market_data",
    Fundamentals => "fundamentals",
    News => "news",
    Earnings => "earnings",
    Technicals => "technicals",
});

impl MarketCategory {
    /// Credibility assigned to evidence drawn from this category.
    pub fn credibility(&self) -> f64 {
        match self {
            MarketCategory::MarketData
            | MarketCategory::Fundamentals
            | MarketCategory::Earnings => 0.95,
            MarketCategory::News => 0.75,
            MarketCategory::Technicals => 0.90,
        }
    }

    /// Evidence source type used when recording this category.
    pub fn source_type(&self) -> SourceType {
        match self {
            MarketCategory::News => SourceType::Web,
            MarketCategory::Earnings => SourceType::Filing,
            _ => SourceType::Financial,
        }
    }
}

/// One market-data payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub category: MarketCategory,
    pub ticker: String,
    pub data: serde_json::Value,
    pub credibility: f64,
}

impl MarketData {
    pub fn new(category: MarketCategory, ticker: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            category,
            ticker: ticker.into(),
            data,
            credibility: category.credibility(),
        }
    }
}

/// Read-only market data by ticker.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch one category for a ticker.
    async fn fetch(&self, category: MarketCategory, ticker: &str) -> ProviderResult<MarketData>;

    async fn quote(&self, ticker: &str) -> ProviderResult<MarketData> {
        self.fetch(MarketCategory::MarketData, ticker).await
    }

    async fn fundamentals(&self, ticker: &str) -> ProviderResult<MarketData> {
        self.fetch(MarketCategory::Fundamentals, ticker).await
    }

    async fn news(&self, ticker: &str) -> ProviderResult<MarketData> {
        self.fetch(MarketCategory::News, ticker).await
    }

    async fn earnings(&self, ticker: &str) -> ProviderResult<MarketData> {
        self.fetch(MarketCategory::Earnings, ticker).await
    }

    async fn technicals(&self, ticker: &str) -> ProviderResult<MarketData> {
        self.fetch(MarketCategory::Technicals, ticker).await
    }
}
