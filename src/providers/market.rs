use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{MarketCategory, MarketData, MarketDataProvider};
use crate::config::{MarketDataConfig, RequestConfig};
use crate::error::{ProviderError, ProviderResult};

/// HTTP client for a JSON market-data API.
///
/// Requests go to `GET {base_url}/v1/{category}/{ticker}` with the ticker
/// percent-encoded as one path segment; the response body is kept verbatim as
/// the payload.
#[derive(Clone)]
pub struct HttpMarketDataClient {
    client: Client,
    base_url: String,
    base: Url,
    api_key: Option<String>,
    timeout_ms: u64,
}

impl HttpMarketDataClient {
    /// Create a client against `base_url`.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        request_config: &RequestConfig,
    ) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(ProviderError::Http)?;

        let base_url = base_url.trim_end_matches('/').to_string();
        let base = Url::parse(&base_url).map_err(|e| ProviderError::NotConfigured {
            message: format!("Invalid market data URL {}: {}", base_url, e),
        })?;
        if base.cannot_be_a_base() {
            return Err(ProviderError::NotConfigured {
                message: format!("Market data URL {} cannot carry a path", base_url),
            });
        }

        Ok(Self {
            client,
            base_url,
            base,
            api_key,
            timeout_ms: request_config.timeout_ms,
        })
    }

    /// Build from configuration; `None` when no base URL is configured.
    pub fn from_config(
        config: &MarketDataConfig,
        request_config: &RequestConfig,
    ) -> ProviderResult<Option<Self>> {
        config
            .base_url
            .as_deref()
            .map(|url| Self::new(url, config.api_key.clone(), request_config))
            .transpose()
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, category: MarketCategory, ticker: &str) -> ProviderResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::NotConfigured {
                message: format!("Market data URL {} cannot carry a path", self.base_url),
            })?
            .pop_if_empty()
            .extend(["v1", category.as_str(), ticker]);
        Ok(url)
    }
}

#[async_trait]
impl MarketDataProvider for HttpMarketDataClient {
    async fn fetch(&self, category: MarketCategory, ticker: &str) -> ProviderResult<MarketData> {
        let ticker = ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(ProviderError::InvalidResponse {
                message: "Ticker cannot be empty".to_string(),
            });
        }

        let url = self.endpoint(category, &ticker)?;
        debug!(category = %category, ticker = %ticker, url = %url, "Fetching market data");

        let start = Instant::now();
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout {
                    timeout_ms: self.timeout_ms,
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

        let data: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    message: format!("Failed to parse market data: {}", e),
                })?;

        info!(
            category = %category,
            ticker = %ticker,
            latency_ms = start.elapsed().as_millis(),
            "Market data fetched"
        );
        Ok(MarketData::new(category, ticker, data))
    }
}
