//! Data tools: ticker lookup, fundamentals, preprocessing, risk model,
//! news and company profile.

use super::{resolve_ticker, FinanceBackend, Tool, ToolKind, ToolOutput};
use crate::error::ToolError;
use crate::models::ToolRequest;
use crate::state::{ConversationState, StateUpdate};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

fn missing_ticker(action: &str) -> ToolError {
    ToolError::Precondition(format!(
        "no ticker to {}: none was given and no company is being discussed",
        action
    ))
}

pub struct LookupTickerTool {
    backend: Arc<dyn FinanceBackend>,
}

impl LookupTickerTool {
    pub fn new(backend: Arc<dyn FinanceBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for LookupTickerTool {
    fn kind(&self) -> ToolKind {
        ToolKind::LookupTicker
    }

    fn description(&self) -> &'static str {
        "Find the stock ticker of a company from its name. Use it first whenever the user names a company."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "company_name": {"type": "string", "description": "Company name, e.g. 'Apple'"}
            },
            "required": ["company_name"]
        })
    }

    fn validate(&self, _state: &ConversationState, request: &ToolRequest) -> Result<(), ToolError> {
        request
            .str_arg("company_name")
            .map(|_| ())
            .ok_or_else(|| ToolError::InvalidArguments("company_name is required".to_string()))
    }

    async fn execute(
        &self,
        _state: &ConversationState,
        request: &ToolRequest,
    ) -> Result<ToolOutput, ToolError> {
        let company_name = request.str_arg("company_name").unwrap_or_default();
        let ticker = self.backend.search_ticker(company_name).await?;
        info!(%company_name, %ticker, "Ticker resolved");

        Ok(
            ToolOutput::message(format!("[Ticker `{}` found for {}.]", ticker, company_name))
                .with_update(StateUpdate {
                    ticker: Some(ticker),
                    company_name: Some(company_name.to_string()),
                    ..Default::default()
                }),
        )
    }
}

pub struct FetchFundamentalsTool {
    backend: Arc<dyn FinanceBackend>,
}

impl FetchFundamentalsTool {
    pub fn new(backend: Arc<dyn FinanceBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for FetchFundamentalsTool {
    fn kind(&self) -> ToolKind {
        ToolKind::FetchFundamentals
    }

    fn description(&self) -> &'static str {
        "Fetch several years of fundamental data (ratios, per-share figures) for a ticker."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ticker": {"type": "string", "description": "Ticker symbol; defaults to the company under discussion"}
            }
        })
    }

    fn validate(&self, state: &ConversationState, request: &ToolRequest) -> Result<(), ToolError> {
        resolve_ticker(state, request)
            .map(|_| ())
            .ok_or_else(|| missing_ticker("fetch data for"))
    }

    async fn execute(
        &self,
        state: &ConversationState,
        request: &ToolRequest,
    ) -> Result<ToolOutput, ToolError> {
        let ticker = resolve_ticker(state, request).ok_or_else(|| missing_ticker("fetch data for"))?;
        let dataset = self.backend.fetch_fundamentals(&ticker).await?;
        info!(%ticker, rows = dataset.row_count(), "Fundamentals fetched");

        let content = format!(
            "[Data fetched successfully for `{}`: {} rows, columns: {}.]",
            ticker,
            dataset.row_count(),
            dataset.columns().join(", ")
        );
        Ok(ToolOutput::message(content).with_update(StateUpdate {
            ticker: Some(ticker),
            fetched_dataset: Some(dataset.to_json()?),
            ..Default::default()
        }))
    }
}

pub struct PreprocessTool {
    backend: Arc<dyn FinanceBackend>,
}

impl PreprocessTool {
    pub fn new(backend: Arc<dyn FinanceBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for PreprocessTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Preprocess
    }

    fn description(&self) -> &'static str {
        "Prepare the fetched fundamentals for analysis. Requires fetch_fundamentals first."
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn validate(&self, state: &ConversationState, _request: &ToolRequest) -> Result<(), ToolError> {
        if state.has_fetched() {
            Ok(())
        } else {
            Err(ToolError::Precondition(
                "cannot preprocess: no data has been fetched yet".to_string(),
            ))
        }
    }

    async fn execute(
        &self,
        state: &ConversationState,
        _request: &ToolRequest,
    ) -> Result<ToolOutput, ToolError> {
        let fetched = state
            .decode_fetched()
            .ok_or_else(|| ToolError::Precondition("cannot preprocess: no data has been fetched yet".to_string()))??;
        let processed = self.backend.preprocess(&fetched).await?;

        let content = format!(
            "[Data preprocessed successfully: {} rows, columns: {}.]",
            processed.row_count(),
            processed.columns().join(", ")
        );
        Ok(ToolOutput::message(content).with_update(StateUpdate {
            processed_dataset: Some(processed.to_json()?),
            ..Default::default()
        }))
    }
}

pub struct AnalyzeRiskTool {
    backend: Arc<dyn FinanceBackend>,
}

impl AnalyzeRiskTool {
    pub fn new(backend: Arc<dyn FinanceBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for AnalyzeRiskTool {
    fn kind(&self) -> ToolKind {
        ToolKind::AnalyzeRisk
    }

    fn description(&self) -> &'static str {
        "Run the risk model on the preprocessed data. Requires preprocess first."
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn validate(&self, state: &ConversationState, _request: &ToolRequest) -> Result<(), ToolError> {
        if state.has_processed() {
            Ok(())
        } else {
            Err(ToolError::Precondition(
                "cannot analyze risk: the data has not been preprocessed yet".to_string(),
            ))
        }
    }

    async fn execute(
        &self,
        state: &ConversationState,
        _request: &ToolRequest,
    ) -> Result<ToolOutput, ToolError> {
        let processed = state.decode_processed().ok_or_else(|| {
            ToolError::Precondition("cannot analyze risk: the data has not been preprocessed yet".to_string())
        })??;
        let verdict = self.backend.analyze_risk(&processed).await?;
        info!(ticker = ?state.ticker, %verdict, "Risk model verdict");

        Ok(ToolOutput::message(verdict.clone()).with_update(StateUpdate {
            analysis: Some(verdict),
            ..Default::default()
        }))
    }
}

pub struct FetchNewsTool {
    backend: Arc<dyn FinanceBackend>,
}

impl FetchNewsTool {
    pub fn new(backend: Arc<dyn FinanceBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for FetchNewsTool {
    fn kind(&self) -> ToolKind {
        ToolKind::FetchNews
    }

    fn description(&self) -> &'static str {
        "Fetch recent news articles about a company."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ticker": {"type": "string"},
                "company_name": {"type": "string"}
            }
        })
    }

    fn validate(&self, state: &ConversationState, request: &ToolRequest) -> Result<(), ToolError> {
        resolve_ticker(state, request)
            .map(|_| ())
            .ok_or_else(|| missing_ticker("fetch news for"))
    }

    async fn execute(
        &self,
        state: &ConversationState,
        request: &ToolRequest,
    ) -> Result<ToolOutput, ToolError> {
        let ticker = resolve_ticker(state, request).ok_or_else(|| missing_ticker("fetch news for"))?;
        let company_name = request
            .str_arg("company_name")
            .map(str::to_string)
            .or_else(|| state.company_name.clone())
            .unwrap_or_else(|| ticker.clone());

        let articles = self.backend.recent_news(&ticker, &company_name).await?;
        info!(%ticker, articles = articles.len(), "News fetched");

        let content = serde_json::to_string(&articles)
            .map_err(|e| ToolError::Upstream(format!("could not encode news: {}", e)))?;
        Ok(ToolOutput::message(content))
    }
}

pub struct FetchCompanyProfileTool {
    backend: Arc<dyn FinanceBackend>,
}

impl FetchCompanyProfileTool {
    pub fn new(backend: Arc<dyn FinanceBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for FetchCompanyProfileTool {
    fn kind(&self) -> ToolKind {
        ToolKind::FetchCompanyProfile
    }

    fn description(&self) -> &'static str {
        "Fetch the profile of a company: sector, description, price and key facts."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ticker": {"type": "string"}
            }
        })
    }

    fn validate(&self, state: &ConversationState, request: &ToolRequest) -> Result<(), ToolError> {
        resolve_ticker(state, request)
            .map(|_| ())
            .ok_or_else(|| missing_ticker("fetch a profile for"))
    }

    async fn execute(
        &self,
        state: &ConversationState,
        request: &ToolRequest,
    ) -> Result<ToolOutput, ToolError> {
        let ticker =
            resolve_ticker(state, request).ok_or_else(|| missing_ticker("fetch a profile for"))?;
        let profile = self.backend.company_profile(&ticker).await?;
        Ok(ToolOutput::message(profile.to_string()))
    }
}
