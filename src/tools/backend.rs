//! Finance data backend
//!
//! Everything the tools need from the outside world: ticker search,
//! fundamentals, preprocessing, the risk model, prices, news and profiles.
//! The HTTP backend talks to the financial tools service; quota refusals are
//! surfaced as `ToolError::QuotaExceeded` so the tool layer can answer with
//! a fixed apology.

use crate::config::OrchestratorConfig;
use crate::dataset::Dataset;
use crate::error::ToolError;
use crate::models::NewsArticle;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait FinanceBackend: Send + Sync {
    /// Resolve a company name to its exchange ticker
    async fn search_ticker(&self, company_name: &str) -> Result<String, ToolError>;

    /// Multi-year fundamentals for one ticker
    async fn fetch_fundamentals(&self, ticker: &str) -> Result<Dataset, ToolError>;

    /// Derive model features (growth, yields...) from raw fundamentals
    async fn preprocess(&self, fetched: &Dataset) -> Result<Dataset, ToolError>;

    /// Run the risk model; the verdict is returned verbatim
    async fn analyze_risk(&self, processed: &Dataset) -> Result<String, ToolError>;

    /// Daily closes, one `close` column indexed by date
    async fn price_history(&self, ticker: &str, period_days: u32) -> Result<Dataset, ToolError>;

    /// `calendarYear` plus one column per ticker holding `metric`
    async fn compare_fundamentals(
        &self,
        tickers: &[String],
        metric: &str,
    ) -> Result<Dataset, ToolError>;

    /// One column per ticker, normalized to base 100, indexed by date
    async fn compare_prices(&self, tickers: &[String], period_days: u32)
        -> Result<Dataset, ToolError>;

    async fn recent_news(
        &self,
        ticker: &str,
        company_name: &str,
    ) -> Result<Vec<NewsArticle>, ToolError>;

    async fn company_profile(&self, ticker: &str) -> Result<Value, ToolError>;
}

/// Backend speaking JSON over HTTP to the financial tools service
pub struct HttpFinanceBackend {
    client: Client,
    base_url: String,
}

impl HttpFinanceBackend {
    pub fn new(base_url: &str) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `None` when no service url is configured
    pub fn from_config(config: &OrchestratorConfig) -> Option<crate::Result<Self>> {
        config.financial_api_base_url.as_deref().map(Self::new)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ToolError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%path, "Calling financial tools service");

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                ToolError::Upstream(format!("financial API request failed for {}: {}", path, e))
            })?;

        let status = response.status();
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| ToolError::Upstream(format!("invalid JSON response: {}", e)))?;

        if is_quota_refusal(status, &body) {
            warn!(%status, %path, "Financial API quota exhausted");
            return Err(ToolError::QuotaExceeded(format!("{} on {}", status, path)));
        }

        if !status.is_success() {
            return Err(ToolError::Upstream(format!(
                "financial API returned {} for {}: {}",
                status,
                path,
                error_detail(&body)
            )));
        }

        Ok(body)
    }

    async fn post_dataset(&self, path: &str, body: &Value) -> Result<Dataset, ToolError> {
        let response = self.post_json(path, body).await?;
        let dataset = response.get("dataset").cloned().unwrap_or(response);
        Dataset::from_value(dataset)
            .map_err(|e| ToolError::Upstream(format!("{} from {}", e, path)))
    }
}

fn is_quota_refusal(status: StatusCode, body: &Value) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::PAYMENT_REQUIRED {
        return true;
    }
    let detail = error_detail(body).to_lowercase();
    detail.contains("limit reach") || detail.contains("quota")
}

fn error_detail(body: &Value) -> String {
    ["error", "detail", "message", "Error Message"]
        .iter()
        .find_map(|key| body.get(*key))
        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
        .unwrap_or_default()
}

#[async_trait]
impl FinanceBackend for HttpFinanceBackend {
    async fn search_ticker(&self, company_name: &str) -> Result<String, ToolError> {
        let response = self
            .post_json("/api/v1/ticker/search", &json!({ "company_name": company_name }))
            .await?;
        response
            .get("ticker")
            .and_then(Value::as_str)
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ToolError::Upstream(format!("no ticker found for '{}'", company_name)))
    }

    async fn fetch_fundamentals(&self, ticker: &str) -> Result<Dataset, ToolError> {
        self.post_dataset("/api/v1/fundamentals", &json!({ "ticker": ticker }))
            .await
    }

    async fn preprocess(&self, fetched: &Dataset) -> Result<Dataset, ToolError> {
        self.post_dataset("/api/v1/fundamentals/preprocess", &json!({ "dataset": fetched }))
            .await
    }

    async fn analyze_risk(&self, processed: &Dataset) -> Result<String, ToolError> {
        let response = self
            .post_json("/api/v1/risk/analyze", &json!({ "dataset": processed }))
            .await?;
        response
            .get("verdict")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ToolError::Upstream("risk model returned no verdict".to_string()))
    }

    async fn price_history(&self, ticker: &str, period_days: u32) -> Result<Dataset, ToolError> {
        self.post_dataset(
            "/api/v1/prices/history",
            &json!({ "ticker": ticker, "period_days": period_days }),
        )
        .await
    }

    async fn compare_fundamentals(
        &self,
        tickers: &[String],
        metric: &str,
    ) -> Result<Dataset, ToolError> {
        self.post_dataset(
            "/api/v1/compare/fundamentals",
            &json!({ "tickers": tickers, "metric": metric }),
        )
        .await
    }

    async fn compare_prices(
        &self,
        tickers: &[String],
        period_days: u32,
    ) -> Result<Dataset, ToolError> {
        self.post_dataset(
            "/api/v1/compare/prices",
            &json!({ "tickers": tickers, "period_days": period_days }),
        )
        .await
    }

    async fn recent_news(
        &self,
        ticker: &str,
        company_name: &str,
    ) -> Result<Vec<NewsArticle>, ToolError> {
        let response = self
            .post_json(
                "/api/v1/news",
                &json!({ "ticker": ticker, "company_name": company_name }),
            )
            .await?;
        let articles = response.get("articles").cloned().unwrap_or(response);
        serde_json::from_value(articles)
            .map_err(|e| ToolError::Upstream(format!("malformed news response: {}", e)))
    }

    async fn company_profile(&self, ticker: &str) -> Result<Value, ToolError> {
        self.post_json("/api/v1/profile", &json!({ "ticker": ticker }))
            .await
    }
}
