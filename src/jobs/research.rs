//! Research pipeline: hypotheses → evidence → contradictions → report.

use std::collections::HashSet;

use serde_json::json;
use tracing::{info, warn};

use super::pipeline::{JobContext, Outcome};
use super::{ResearchConfig, DEFAULT_MAX_HYPOTHESES};
use crate::contradictions::{Contradiction, ContradictionStore};
use crate::error::AppResult;
use crate::evidence::{Evidence, EvidenceStore, SourceMetadata};
use crate::graph::{CausalEdge, GraphStore, HypothesisNode, NodeType, Relationship};
use crate::providers::{GenerationPhase, GenerationRequest, MarketCategory};

/// Market categories recorded as evidence when a ticker is given.
const MARKET_EVIDENCE: [MarketCategory; 3] = [
    MarketCategory::MarketData,
    MarketCategory::Fundamentals,
    MarketCategory::News,
];

/// Edge from a generated hypothesis to the thesis root.
fn relationship_to_thesis(node_type: NodeType) -> Relationship {
    match node_type {
        NodeType::Risk => Relationship::Contradicts,
        NodeType::Dependency => Relationship::DependsOn,
        _ => Relationship::Supports,
    }
}

pub(super) async fn run(ctx: &mut JobContext<'_>, config: &ResearchConfig) -> AppResult<Outcome> {
    let engagement_id = ctx.job.engagement_id.clone();
    let mut summary = json!({ "thesis": config.thesis });

    // Phase 1: hypotheses
    if !ctx.begin_phase("hypothesis_generation", 0).await? {
        return Ok(ctx.stop(summary));
    }

    let graph = ctx.storage.list_graph(&engagement_id).await?;
    let thesis_id = match graph.nodes.iter().find(|n| n.node_type == NodeType::Thesis) {
        Some(root) => root.id.clone(),
        None => {
            let root = HypothesisNode::new(&engagement_id, NodeType::Thesis, &config.thesis)
                .with_metadata(json!({ "job_id": ctx.job.id }));
            ctx.storage.create_node(&root).await?;
            root.id
        }
    };

    let max_hypotheses = config.max_hypotheses.unwrap_or(DEFAULT_MAX_HYPOTHESES);
    let existing: Vec<_> = graph
        .nodes
        .iter()
        .map(|n| json!({ "id": n.id, "type": n.node_type, "content": n.content }))
        .collect();
    let request = GenerationRequest::new(GenerationPhase::Hypotheses, &engagement_id, &config.thesis)
        .with_max_items(max_hypotheses)
        .with_context(json!({ "existing_hypotheses": existing }));
    let candidates = ctx.generate(&request).await?;

    let mut hypotheses = Vec::new();
    for candidate in candidates
        .hypotheses
        .into_iter()
        .filter(|c| !c.content.trim().is_empty() && c.node_type != NodeType::Thesis)
        .take(max_hypotheses as usize)
    {
        let node = HypothesisNode::new(&engagement_id, candidate.node_type, candidate.content)
            .with_confidence(candidate.confidence)
            .with_importance(candidate.importance)
            .with_testability(candidate.testability)
            .with_parent(&thesis_id)
            .with_metadata(json!({ "job_id": ctx.job.id }));
        ctx.storage.create_node(&node).await?;

        let edge = CausalEdge::new(
            &engagement_id,
            &node.id,
            &thesis_id,
            relationship_to_thesis(node.node_type),
        )
        .with_strength(node.confidence);
        ctx.storage.create_edge(&edge).await?;
        hypotheses.push(node);
    }

    summary["thesis_id"] = json!(thesis_id);
    summary["hypotheses_created"] = json!(hypotheses.len());
    ctx.end_phase(
        "hypothesis_generation",
        25,
        json!({ "hypotheses_created": hypotheses.len() }),
    )
    .await?;

    // Phase 2: evidence
    if !ctx.begin_phase("evidence_gathering", 25).await? {
        return Ok(ctx.stop(summary));
    }

    let graph = ctx.storage.list_graph(&engagement_id).await?;
    let known_hypotheses: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let hypothesis_context: Vec<_> = graph
        .nodes
        .iter()
        .map(|n| json!({ "id": n.id, "type": n.node_type, "content": n.content }))
        .collect();

    let request = GenerationRequest::new(GenerationPhase::Evidence, &engagement_id, &config.thesis)
        .with_context(json!({ "hypotheses": hypothesis_context }));
    let candidates = ctx.generate(&request).await?;
    ctx.milestone(
        "evidence_gathering",
        40,
        json!({ "candidates": candidates.evidence.len() }),
    )
    .await?;

    let mut evidence_created = Vec::new();
    let mut links_created = 0usize;
    for candidate in candidates.evidence {
        if candidate.content.trim().is_empty() {
            continue;
        }
        let evidence = Evidence::new(&engagement_id, candidate.source_type, candidate.content)
            .with_sentiment(candidate.sentiment)
            .with_credibility(candidate.credibility)
            .with_source(SourceMetadata {
                title: candidate.source_title,
                url: candidate.source_url,
                ..Default::default()
            })
            .with_provenance(json!({ "job_id": ctx.job.id, "provider": "reasoning" }))
            .retrieved(chrono::Utc::now());
        ctx.storage.create_evidence(&evidence).await?;

        if let Some(hypothesis_id) = candidate
            .hypothesis_id
            .as_deref()
            .filter(|id| known_hypotheses.contains(id))
        {
            ctx.storage
                .link_evidence(
                    &engagement_id,
                    &evidence.id,
                    hypothesis_id,
                    candidate.relevance.clamp(0.0, 1.0),
                )
                .await?;
            links_created += 1;
        }
        evidence_created.push(evidence);
    }

    let mut market_evidence = 0usize;
    if let (Some(ticker), Some(market)) = (config.ticker.as_deref(), ctx.market) {
        for category in MARKET_EVIDENCE {
            // Market data enriches the evidence set; a miss is not fatal.
            let data = match ctx
                .bounded("market_data", market.fetch(category, ticker))
                .await
            {
                Ok(data) => data,
                Err(e) => {
                    warn!(job_id = %ctx.job.id, ticker, category = %category, error = %e, "Market data unavailable");
                    continue;
                }
            };

            let evidence = Evidence::new(
                &engagement_id,
                category.source_type(),
                format!("{} {} snapshot", data.ticker, category),
            )
            .with_credibility(data.credibility)
            .with_metadata(data.data)
            .with_provenance(json!({ "job_id": ctx.job.id, "provider": "market_data", "category": category }))
            .retrieved(chrono::Utc::now());
            ctx.storage.create_evidence(&evidence).await?;
            evidence_created.push(evidence);
            market_evidence += 1;
        }
    }

    summary["evidence_created"] = json!(evidence_created.len());
    summary["links_created"] = json!(links_created);
    summary["market_evidence"] = json!(market_evidence);
    ctx.end_phase(
        "evidence_gathering",
        60,
        json!({ "evidence_created": evidence_created.len(), "links_created": links_created }),
    )
    .await?;

    // Phase 3: contradictions
    if !ctx.begin_phase("contradiction_detection", 60).await? {
        return Ok(ctx.stop(summary));
    }

    let known_evidence: HashSet<&str> = evidence_created.iter().map(|e| e.id.as_str()).collect();
    let evidence_context: Vec<_> = evidence_created
        .iter()
        .map(|e| json!({ "id": e.id, "content": e.content, "sentiment": e.sentiment, "credibility": e.credibility }))
        .collect();
    let request =
        GenerationRequest::new(GenerationPhase::Contradictions, &engagement_id, &config.thesis)
            .with_context(json!({ "hypotheses": hypothesis_context, "evidence": evidence_context }));
    let candidates = ctx.generate(&request).await?;

    let mut contradictions_created = 0usize;
    for candidate in candidates.contradictions {
        if candidate.description.trim().is_empty() {
            continue;
        }
        let mut contradiction =
            Contradiction::new(&engagement_id, candidate.description, candidate.severity);
        // Drop references the provider invented.
        contradiction.hypothesis_id = candidate
            .hypothesis_id
            .filter(|id| known_hypotheses.contains(id.as_str()));
        contradiction.evidence_id = candidate
            .evidence_id
            .filter(|id| known_evidence.contains(id.as_str()));
        contradiction.bear_case_theme = candidate.bear_case_theme;

        ctx.storage.create_contradiction(&contradiction).await?;
        contradictions_created += 1;
    }

    summary["contradictions_created"] = json!(contradictions_created);
    ctx.end_phase(
        "contradiction_detection",
        85,
        json!({ "contradictions_created": contradictions_created }),
    )
    .await?;

    // Phase 4: report
    if !ctx.begin_phase("report_generation", 85).await? {
        return Ok(ctx.stop(summary));
    }

    let request = GenerationRequest::new(GenerationPhase::Report, &engagement_id, &config.thesis)
        .with_context(json!({
            "hypotheses": hypothesis_context,
            "evidence_count": evidence_created.len(),
            "contradictions_found": contradictions_created,
        }));
    let candidates = ctx.generate(&request).await?;
    summary["report"] = json!(candidates.report.unwrap_or_default());

    ctx.end_phase("report_generation", 100, json!({ "report": true }))
        .await?;

    info!(
        job_id = %ctx.job.id,
        engagement_id = %engagement_id,
        hypotheses = hypotheses.len(),
        evidence = evidence_created.len(),
        contradictions = contradictions_created,
        "Research pipeline finished"
    );
    Ok(Outcome::Completed(summary))
}
