//! Stress-test pipeline: scenario generation → vulnerability synthesis → scoring.

use std::collections::HashSet;

use serde_json::json;
use tracing::{info, warn};

use super::pipeline::{JobContext, Outcome};
use super::StressTestConfig;
use crate::error::{AppError, AppResult};
use crate::graph::GraphStore;
use crate::providers::{GenerationPhase, GenerationRequest};
use crate::stress_test::{StressTest, StressTestResults, StressTestStore};

pub(super) async fn run(ctx: &mut JobContext<'_>, config: &StressTestConfig) -> AppResult<Outcome> {
    let engagement_id = ctx.job.engagement_id.clone();

    let test = StressTest::new(&engagement_id, config.intensity)
        .with_hypotheses(config.hypothesis_ids.clone());
    ctx.storage.create_stress_test(&test).await?;
    ctx.storage.start_stress_test(&engagement_id, &test.id).await?;

    match execute(ctx, &test).await {
        Ok(Outcome::Completed(result)) => Ok(Outcome::Completed(result)),
        Ok(stopped) => {
            ctx.storage
                .fail_stress_test(&engagement_id, &test.id, "Cancelled")
                .await?;
            Ok(stopped)
        }
        Err(e) => {
            if let Err(fail_err) = ctx
                .storage
                .fail_stress_test(&engagement_id, &test.id, &e.to_string())
                .await
            {
                warn!(stress_test_id = %test.id, error = %fail_err, "Could not mark stress test failed");
            }
            Err(e)
        }
    }
}

async fn execute(ctx: &mut JobContext<'_>, test: &StressTest) -> AppResult<Outcome> {
    let engagement_id = test.engagement_id.as_str();
    let mut summary = json!({ "stress_test_id": test.id, "intensity": test.intensity });

    let graph = ctx.storage.list_graph(engagement_id).await?;
    if graph.nodes.is_empty() {
        return Err(AppError::validation(
            "engagement_id",
            "Engagement has no hypotheses to stress test",
        ));
    }
    let thesis = graph
        .root()
        .map(|n| n.content.clone())
        .unwrap_or_default();
    let targets: Vec<_> = graph
        .nodes
        .iter()
        .filter(|n| test.targets(&n.id))
        .map(|n| json!({ "id": n.id, "type": n.node_type, "content": n.content, "confidence": n.confidence }))
        .collect();
    let known: HashSet<&str> = graph
        .nodes
        .iter()
        .filter(|n| test.targets(&n.id))
        .map(|n| n.id.as_str())
        .collect();

    // Phase 1: scenarios
    if !ctx.begin_phase("scenario_generation", 0).await? {
        return Ok(ctx.stop(summary));
    }

    let scenario_count = test.intensity.scenario_count();
    let request = GenerationRequest::new(GenerationPhase::Scenarios, engagement_id, &thesis)
        .with_max_items(scenario_count)
        .with_context(json!({ "intensity": test.intensity, "hypotheses": targets }));
    let mut scenarios = ctx.generate(&request).await?.scenarios;
    let proposed = scenarios.len();
    scenarios.truncate(scenario_count as usize);
    ctx.milestone(
        "scenario_generation",
        20,
        json!({ "proposed": proposed, "kept": scenarios.len() }),
    )
    .await?;

    summary["scenarios"] = json!(scenarios);
    ctx.end_phase(
        "scenario_generation",
        40,
        json!({ "scenarios": scenarios.len() }),
    )
    .await?;

    // Phase 2: vulnerabilities
    if !ctx.begin_phase("vulnerability_synthesis", 40).await? {
        return Ok(ctx.stop(summary));
    }

    let request = GenerationRequest::new(GenerationPhase::Vulnerabilities, engagement_id, &thesis)
        .with_context(json!({ "hypotheses": targets, "scenarios": scenarios }));
    let candidates = ctx.generate(&request).await?;
    let vulnerabilities: Vec<_> = candidates
        .vulnerabilities
        .into_iter()
        .filter(|v| !v.description.trim().is_empty())
        .map(|mut v| {
            if v.hypothesis_id.as_deref().is_some_and(|id| !known.contains(id)) {
                v.hypothesis_id = None;
            }
            v
        })
        .collect();
    ctx.milestone(
        "vulnerability_synthesis",
        60,
        json!({ "vulnerabilities": vulnerabilities.len() }),
    )
    .await?;

    ctx.end_phase(
        "vulnerability_synthesis",
        80,
        json!({ "vulnerabilities": vulnerabilities.len() }),
    )
    .await?;

    // Phase 3: scoring
    if !ctx.begin_phase("scoring", 80).await? {
        return Ok(ctx.stop(summary));
    }

    let summary_text = candidates.report.unwrap_or_else(|| {
        format!(
            "{} scenarios exposed {} vulnerabilities",
            scenarios.len(),
            vulnerabilities.len()
        )
    });
    let results =
        StressTestResults::from_findings(scenarios.len() as u32, vulnerabilities, summary_text);
    let completed = ctx
        .storage
        .complete_stress_test(engagement_id, &test.id, &results)
        .await?;

    ctx.end_phase(
        "scoring",
        100,
        json!({
            "risk_score": results.overall_risk_score,
            "assessment": results.overall_assessment,
        }),
    )
    .await?;

    info!(
        job_id = %ctx.job.id,
        stress_test_id = %completed.id,
        risk_score = results.overall_risk_score,
        "Stress-test pipeline finished"
    );
    Ok(Outcome::Completed(json!({
        "stress_test_id": completed.id,
        "intensity": completed.intensity,
        "results": results,
    })))
}
