use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub langbase: LangbaseConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipes: PipeConfig,
    pub market_data: MarketDataConfig,
    pub orchestrator: OrchestratorConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Langbase pipe names, one per generation phase
#[derive(Debug, Clone)]
pub struct PipeConfig {
    pub hypotheses: String,
    pub evidence: String,
    pub contradictions: String,
    pub report: String,
    pub scenarios: String,
    pub vulnerabilities: String,
}

/// Market-data provider configuration. Market evidence is skipped when no base URL is set.
#[derive(Debug, Clone, Default)]
pub struct MarketDataConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

/// Job worker configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Number of worker tasks draining the job queue.
    pub workers: usize,
    /// Hard ceiling for a single reasoning or market-data call.
    pub provider_timeout_ms: u64,
    /// How long an idle worker sleeps before re-checking the queue.
    pub poll_interval_ms: u64,
    /// Capacity of each per-job progress channel.
    pub progress_buffer: usize,
    /// Prefix for the status URL returned on submission.
    pub status_url_prefix: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY").map_err(|_| AppError::Config {
                message: "LANGBASE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/research.db".to_string()),
            ),
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_var("REQUEST_TIMEOUT_MS", 30000),
            max_retries: parse_var("MAX_RETRIES", 3),
            retry_delay_ms: parse_var("RETRY_DELAY_MS", 1000),
        };

        let defaults = PipeConfig::default();
        let pipes = PipeConfig {
            hypotheses: env::var("PIPE_HYPOTHESES").unwrap_or(defaults.hypotheses),
            evidence: env::var("PIPE_EVIDENCE").unwrap_or(defaults.evidence),
            contradictions: env::var("PIPE_CONTRADICTIONS").unwrap_or(defaults.contradictions),
            report: env::var("PIPE_REPORT").unwrap_or(defaults.report),
            scenarios: env::var("PIPE_SCENARIOS").unwrap_or(defaults.scenarios),
            vulnerabilities: env::var("PIPE_VULNERABILITIES").unwrap_or(defaults.vulnerabilities),
        };

        let market_data = MarketDataConfig {
            base_url: env::var("MARKET_DATA_BASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            api_key: env::var("MARKET_DATA_API_KEY")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        };

        let orchestrator_defaults = OrchestratorConfig::default();
        let orchestrator = OrchestratorConfig {
            workers: parse_var("JOB_WORKERS", orchestrator_defaults.workers).max(1),
            provider_timeout_ms: parse_var(
                "PROVIDER_TIMEOUT_MS",
                orchestrator_defaults.provider_timeout_ms,
            ),
            poll_interval_ms: parse_var(
                "JOB_POLL_INTERVAL_MS",
                orchestrator_defaults.poll_interval_ms,
            ),
            progress_buffer: parse_var("PROGRESS_BUFFER", orchestrator_defaults.progress_buffer)
                .max(1),
            status_url_prefix: env::var("STATUS_URL_PREFIX")
                .unwrap_or(orchestrator_defaults.status_url_prefix),
        };

        Ok(Config {
            langbase,
            database,
            logging,
            request,
            pipes,
            market_data,
            orchestrator,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            hypotheses: "thesis-hypotheses-v1".to_string(),
            evidence: "thesis-evidence-v1".to_string(),
            contradictions: "thesis-contradictions-v1".to_string(),
            report: "thesis-report-v1".to_string(),
            scenarios: "stress-scenarios-v1".to_string(),
            vulnerabilities: "stress-vulnerabilities-v1".to_string(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            provider_timeout_ms: 120_000,
            poll_interval_ms: 1000,
            progress_buffer: 64,
            status_url_prefix: "/api/jobs".to_string(),
        }
    }
}
