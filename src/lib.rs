//! # Thesis Research Engine
//!
//! Research workflow engine for investment due-diligence. Analysts submit a
//! thesis about a company; the engine runs research and stress-test jobs
//! against a hypothesis graph, links evidence to hypotheses, tracks
//! contradictions through resolution, and records quality metrics.
//!
//! ## Architecture
//!
//! ```text
//! submit → Orchestrator ── workers ──→ ReasoningProvider (Langbase Pipes)
//!              │                  └──→ MarketDataProvider (HTTP)
//!              ↓
//!      SQLite (graph, evidence, contradictions, stress tests, jobs, metrics)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use thesis_research_engine::{Config, Orchestrator};
//! use thesis_research_engine::jobs::{JobConfig, ResearchConfig};
//! use thesis_research_engine::langbase::LangbaseClient;
//! use thesis_research_engine::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let langbase = LangbaseClient::new(&config.langbase, config.request.clone())?
//!         .with_pipes(config.pipes.clone());
//!     let orchestrator = Orchestrator::new(storage, Arc::new(langbase), config.orchestrator);
//!
//!     let submission = orchestrator
//!         .submit("acme", JobConfig::Research(ResearchConfig::new("Acme margins expand in 2026")))
//!         .await?;
//!     orchestrator.run_once().await?;
//!     println!("{:?}", orchestrator.status(&submission.job.id).await?);
//!     Ok(())
//! }
//! ```

mod macros;

/// Command-line subcommands and their execution.
pub mod cli;
/// Configuration loaded from the environment.
pub mod config;
/// Contradiction records and their resolution state machine.
pub mod contradictions;
/// Error types and result aliases.
pub mod error;
/// Evidence items and their links to hypotheses.
pub mod evidence;
/// Hypothesis nodes, causal edges and tree projection.
pub mod graph;
/// Research and stress-test jobs, admission control and progress fan-out.
pub mod jobs;
/// Langbase Pipes client.
pub mod langbase;
/// Derived quality metrics.
pub mod metrics;
/// System prompts for the generation pipes.
pub mod prompts;
/// Reasoning and market-data provider seams.
pub mod providers;
/// SQLite persistence.
pub mod storage;
/// Stress-test runs and risk scoring.
pub mod stress_test;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use jobs::Orchestrator;
