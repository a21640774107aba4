use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{
    parse_candidates, CreatePipeRequest, CreatePipeResponse, Message, PipeRequest, PipeResponse,
};
use crate::config::{LangbaseConfig, PipeConfig, RequestConfig};
use crate::error::{ProviderError, ProviderResult};
use crate::prompts::{system_prompt, user_message};
use crate::providers::{Candidates, GenerationPhase, GenerationRequest, ReasoningProvider};

/// Client for the Langbase Pipes API, one pipe per generation phase.
#[derive(Clone)]
pub struct LangbaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_config: RequestConfig,
    pipes: PipeConfig,
}

impl LangbaseClient {
    /// Create a new Langbase client with the default pipe names
    pub fn new(config: &LangbaseConfig, request_config: RequestConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(ProviderError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
            pipes: PipeConfig::default(),
        })
    }

    /// Override the per-phase pipe names
    pub fn with_pipes(mut self, pipes: PipeConfig) -> Self {
        self.pipes = pipes;
        self
    }

    /// Pipe that serves `phase`.
    pub fn pipe_for(&self, phase: GenerationPhase) -> &str {
        match phase {
            GenerationPhase::Hypotheses => &self.pipes.hypotheses,
            GenerationPhase::Evidence => &self.pipes.evidence,
            GenerationPhase::Contradictions => &self.pipes.contradictions,
            GenerationPhase::Report => &self.pipes.report,
            GenerationPhase::Scenarios => &self.pipes.scenarios,
            GenerationPhase::Vulnerabilities => &self.pipes.vulnerabilities,
        }
    }

    /// Call a Langbase pipe, retrying transport failures with exponential backoff
    pub async fn call_pipe(&self, request: &PipeRequest) -> ProviderResult<PipeResponse> {
        let url = format!("{}/v1/pipes/run", self.base_url);
        let pipe_name = &request.name;

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    pipe = %pipe_name,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying Langbase request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(&url, request).await {
                Ok(response) => {
                    info!(
                        pipe = %pipe_name,
                        latency_ms = start.elapsed().as_millis(),
                        "Langbase pipe call succeeded"
                    );
                    return Ok(response);
                }
                // Client errors will not improve on retry.
                Err(ProviderError::Api { status, message })
                    if (400..500).contains(&status) && status != 429 =>
                {
                    error!(pipe = %pipe_name, status, error = %message, "Langbase rejected request");
                    return Err(ProviderError::Api { status, message });
                }
                Err(e) => {
                    error!(
                        pipe = %pipe_name,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Langbase pipe call failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(ProviderError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    async fn execute_request(
        &self,
        url: &str,
        request: &PipeRequest,
    ) -> ProviderResult<PipeResponse> {
        debug!(
            pipe = %request.name,
            messages = request.messages.len(),
            "Calling Langbase pipe"
        );

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    ProviderError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create or upsert a pipe
    pub async fn create_pipe(
        &self,
        request: &CreatePipeRequest,
    ) -> ProviderResult<CreatePipeResponse> {
        let url = format!("{}/v1/pipes", self.base_url);

        info!(pipe = %request.name, "Creating Langbase pipe");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(ProviderError::Http)?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                message: format!("Failed to parse create pipe response: {}", e),
            })
    }

    /// Install every phase pipe with its system prompt. Existing pipes are fine.
    pub async fn ensure_pipes(&self) -> ProviderResult<()> {
        for phase in GenerationPhase::ALL {
            let name = self.pipe_for(*phase);
            let request = CreatePipeRequest::json_pipe(name, system_prompt(*phase))
                .with_description(format!("Thesis research: {} phase", phase))
                .with_model("openai:gpt-4o-mini")
                .with_temperature(0.4)
                .with_max_tokens(4000);

            match self.create_pipe(&request).await {
                Ok(_) => info!(pipe = %name, "Pipe ready"),
                Err(ProviderError::Api { status: 409, .. }) => {
                    info!(pipe = %name, "Pipe already exists")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ReasoningProvider for LangbaseClient {
    async fn generate(&self, request: &GenerationRequest) -> ProviderResult<Candidates> {
        let pipe_request = PipeRequest::new(
            self.pipe_for(request.phase),
            vec![
                Message::system(system_prompt(request.phase)),
                Message::user(user_message(request)),
            ],
        )
        .with_variable("phase", request.phase.as_str())
        .with_variable("engagement_id", request.engagement_id.clone());

        let response = self.call_pipe(&pipe_request).await?;
        if !response.success {
            return Err(ProviderError::InvalidResponse {
                message: format!("Pipe {} reported failure", pipe_request.name),
            });
        }

        match parse_candidates(&response.completion) {
            Ok(candidates) => Ok(candidates),
            // Report pipes sometimes answer in plain prose.
            Err(_) if request.phase == GenerationPhase::Report => Ok(Candidates {
                report: Some(response.completion.trim().to_string()),
                ..Default::default()
            }),
            Err(e) => {
                warn!(phase = %request.phase, error = %e, "Unparseable completion");
                Err(e)
            }
        }
    }
}
