//! CLI commands for submitting and inspecting research work.
//!
//! Each command runs against an [`Orchestrator`] and renders a plain-text
//! report; long-running worker mode lives in the binary.

use clap::Subcommand;

use crate::contradictions::{ContradictionFilter, ContradictionStatus, ContradictionStore};
use crate::error::AppResult;
use crate::graph::{GraphStore, TreeNode};
use crate::jobs::{JobConfig, JobStatusView, JobStore, Orchestrator, ResearchConfig, StressTestConfig};
use crate::metrics::{MetricType, MetricsStore};
use crate::stress_test::{Intensity, StressTestStore};

const RULE: &str = "────────────────────────────────────────────────────────────────────────\n";

/// Research engine subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum JobCommands {
    /// Submit a research job for an engagement
    Submit {
        /// Engagement the thesis belongs to
        engagement: String,
        /// Investment thesis to research
        thesis: String,
        /// Ticker for market-data evidence
        #[arg(long)]
        ticker: Option<String>,
        /// Upper bound on generated hypotheses
        #[arg(long)]
        max_hypotheses: Option<u32>,
        /// Execute the job in this process instead of leaving it queued
        #[arg(long)]
        run: bool,
    },

    /// Submit a stress test against an engagement's hypotheses
    StressTest {
        engagement: String,
        /// light, moderate or aggressive
        #[arg(long, default_value = "moderate")]
        intensity: Intensity,
        /// Restrict to these hypothesis ids (repeatable)
        #[arg(long = "hypothesis")]
        hypotheses: Vec<String>,
        #[arg(long)]
        run: bool,
    },

    /// Show a job's status
    Status { job_id: String },

    /// Cancel a queued or running job
    Cancel { job_id: String },

    /// List an engagement's jobs
    Jobs { engagement: String },

    /// Print the hypothesis tree
    Graph { engagement: String },

    /// List contradictions, most severe first
    Contradictions {
        engagement: String,
        /// unresolved, explained, dismissed or critical
        #[arg(long)]
        status: Option<ContradictionStatus>,
    },

    /// List an engagement's stress tests
    StressTests { engagement: String },

    /// Show quality metrics
    Metrics {
        engagement: String,
        /// Recompute before printing
        #[arg(long)]
        recompute: bool,
        /// Print this many historical records instead of the latest values
        #[arg(long)]
        history: Option<u32>,
        /// Restrict history to one metric type
        #[arg(long = "type")]
        metric_type: Option<MetricType>,
    },
}

/// Result of CLI command execution.
#[derive(Debug)]
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    pub message: String,
}

impl CliResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

impl From<AppResult<String>> for CliResult {
    fn from(result: AppResult<String>) -> Self {
        match result {
            Ok(output) => CliResult::success(output),
            Err(e) => CliResult::error(format!("Error: {}", e)),
        }
    }
}

/// Execute a CLI command.
pub async fn execute_command(command: JobCommands, orchestrator: &Orchestrator) -> CliResult {
    let result = match command {
        JobCommands::Submit {
            engagement,
            thesis,
            ticker,
            max_hypotheses,
            run,
        } => {
            let mut config = ResearchConfig::new(thesis);
            if let Some(ticker) = ticker {
                config = config.with_ticker(ticker);
            }
            if let Some(max) = max_hypotheses {
                config = config.with_max_hypotheses(max);
            }
            execute_submit(orchestrator, &engagement, JobConfig::Research(config), run).await
        }
        JobCommands::StressTest {
            engagement,
            intensity,
            hypotheses,
            run,
        } => {
            let config = JobConfig::StressTest(StressTestConfig {
                intensity,
                hypothesis_ids: hypotheses,
            });
            execute_submit(orchestrator, &engagement, config, run).await
        }
        JobCommands::Status { job_id } => orchestrator
            .status(&job_id)
            .await
            .map(|view| format_status(&view)),
        JobCommands::Cancel { job_id } => orchestrator
            .cancel(&job_id)
            .await
            .map(|job| format_status(&job.into())),
        JobCommands::Jobs { engagement } => execute_jobs(orchestrator, &engagement).await,
        JobCommands::Graph { engagement } => execute_graph(orchestrator, &engagement).await,
        JobCommands::Contradictions { engagement, status } => {
            execute_contradictions(orchestrator, &engagement, status).await
        }
        JobCommands::StressTests { engagement } => {
            execute_stress_tests(orchestrator, &engagement).await
        }
        JobCommands::Metrics {
            engagement,
            recompute,
            history,
            metric_type,
        } => execute_metrics(orchestrator, &engagement, recompute, history, metric_type).await,
    };
    result.into()
}

async fn execute_submit(
    orchestrator: &Orchestrator,
    engagement: &str,
    config: JobConfig,
    run: bool,
) -> AppResult<String> {
    let submission = orchestrator.submit(engagement, config).await?;
    let mut output = String::new();

    if submission.created {
        output.push_str(&format!("Submitted job {}\n", submission.job.id));
    } else {
        output.push_str(&format!(
            "Engagement already has active job {} ({})\n",
            submission.job.id, submission.job.status
        ));
    }
    output.push_str(&format!("Status: {}\n", submission.status_url));

    if run && submission.created {
        // Other queued jobs may be claimed first; keep going until ours is done.
        while let Some(job) = orchestrator.run_once().await? {
            if job.id == submission.job.id {
                break;
            }
        }
        let view = orchestrator.status(&submission.job.id).await?;
        output.push('\n');
        output.push_str(&format_status(&view));
    }

    Ok(output)
}

async fn execute_jobs(orchestrator: &Orchestrator, engagement: &str) -> AppResult<String> {
    let jobs = orchestrator.storage().list_jobs(engagement).await?;
    let mut output = format!("\nJobs for {}\n{}", engagement, RULE);
    if jobs.is_empty() {
        output.push_str("  (none)\n");
    }
    for job in jobs {
        output.push_str(&format!(
            "  {} {:<11} {:<9} {:>3}%  {}\n",
            job.id,
            job.job_type,
            job.status,
            job.progress,
            job.created_at.format("%Y-%m-%d %H:%M:%S")
        ));
    }
    Ok(output)
}

async fn execute_graph(orchestrator: &Orchestrator, engagement: &str) -> AppResult<String> {
    let snapshot = orchestrator.storage().list_graph(engagement).await?;
    let mut output = format!(
        "\nHypothesis graph for {} ({} nodes, {} edges)\n{}",
        engagement,
        snapshot.nodes.len(),
        snapshot.edges.len(),
        RULE
    );
    for tree in snapshot.project_tree() {
        render_tree(&tree, 0, &mut output);
    }
    Ok(output)
}

fn render_tree(tree: &TreeNode, depth: usize, output: &mut String) {
    let node = &tree.node;
    output.push_str(&format!(
        "{}[{}] {} ({:.2}, {})\n",
        "  ".repeat(depth + 1),
        node.node_type,
        truncate(&node.content, 70),
        node.confidence,
        node.status
    ));
    for child in &tree.children {
        render_tree(child, depth + 1, output);
    }
}

async fn execute_contradictions(
    orchestrator: &Orchestrator,
    engagement: &str,
    status: Option<ContradictionStatus>,
) -> AppResult<String> {
    let mut filter = ContradictionFilter::default();
    if let Some(status) = status {
        filter = filter.status(status);
    }
    let storage = orchestrator.storage();
    let contradictions = storage.list_contradictions(engagement, &filter).await?;
    let stats = storage.contradiction_stats(engagement).await?;

    let mut output = format!(
        "\nContradictions for {} ({} total, {} unresolved, resolution rate {:.0}%)\n{}",
        engagement,
        stats.total,
        stats.unresolved,
        stats.resolution_rate * 100.0,
        RULE
    );
    for c in contradictions {
        output.push_str(&format!(
            "  [{:<6}] {:<10} {}\n",
            c.severity,
            c.status,
            truncate(&c.description, 60)
        ));
    }
    Ok(output)
}

async fn execute_stress_tests(orchestrator: &Orchestrator, engagement: &str) -> AppResult<String> {
    let tests = orchestrator.storage().list_stress_tests(engagement).await?;
    let mut output = format!("\nStress tests for {}\n{}", engagement, RULE);
    for test in tests {
        let score = test
            .results
            .as_ref()
            .map(|r| format!("risk {} ({})", r.overall_risk_score, r.overall_assessment))
            .unwrap_or_else(|| "-".to_string());
        output.push_str(&format!(
            "  {} {:<10} {:<9} {}\n",
            test.id, test.intensity, test.status, score
        ));
    }
    Ok(output)
}

async fn execute_metrics(
    orchestrator: &Orchestrator,
    engagement: &str,
    recompute: bool,
    history: Option<u32>,
    metric_type: Option<MetricType>,
) -> AppResult<String> {
    if recompute {
        orchestrator.recompute_metrics(engagement).await?;
    }

    let storage = orchestrator.storage();
    let mut output = format!("\nQuality metrics for {}\n{}", engagement, RULE);
    let metrics = match history {
        Some(limit) => {
            storage
                .metric_history(engagement, metric_type, Some(limit))
                .await?
        }
        None => storage.current_metrics(engagement).await?,
    };

    if metrics.is_empty() {
        output.push_str("  (no metrics recorded)\n");
    }
    for metric in metrics {
        output.push_str(&format!(
            "  {:<27} {:>6.3}  {}\n",
            metric.metric_type.as_str(),
            metric.value,
            metric.recorded_at.format("%Y-%m-%d %H:%M:%S")
        ));
    }
    Ok(output)
}

fn format_status(view: &JobStatusView) -> String {
    let mut output = format!(
        "Job {}\n  status:   {}\n  progress: {}%\n",
        view.id, view.status, view.progress
    );
    if let Some(phase) = &view.current_phase {
        output.push_str(&format!("  phase:    {}\n", phase));
    }
    if let Some(started) = view.started_at {
        output.push_str(&format!("  started:  {}\n", started.to_rfc3339()));
    }
    if let Some(completed) = view.completed_at {
        output.push_str(&format!("  finished: {}\n", completed.to_rfc3339()));
    }
    if let Some(error) = &view.error {
        output.push_str(&format!("  error:    {}\n", error));
    }
    if let Some(result) = &view.result {
        let pretty = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
        output.push_str(&format!("  result:\n{}\n", pretty));
    }
    output
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut)
}
