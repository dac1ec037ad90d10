//! Tool trait and registry
//!
//! Every capability the model can ask for is one `Tool`. A tool checks its
//! preconditions against the conversation state, runs against the finance
//! backend and hands back the text of its result message plus the state
//! changes it produced. Tools never write to the state themselves.

use crate::error::ToolError;
use crate::llm::ToolSchema;
use crate::models::ToolRequest;
use crate::state::{ConversationState, StateUpdate};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub mod backend;
pub mod market;
pub mod sample;
pub mod visual;

pub use backend::{FinanceBackend, HttpFinanceBackend};
pub use sample::SampleFinanceBackend;

/// Default look-back for price series, one trading year
pub const DEFAULT_PERIOD_DAYS: u32 = 252;
const MAX_PERIOD_DAYS: u64 = 5_040;

/// Closed set of tools known to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    LookupTicker,
    FetchFundamentals,
    Preprocess,
    AnalyzeRisk,
    BuildCustomChart,
    FetchPriceSeriesChart,
    CompareTickers,
    FetchNews,
    FetchCompanyProfile,
    DisplayRawTable,
    DisplayProcessedTable,
}

impl ToolKind {
    pub const ALL: [ToolKind; 11] = [
        ToolKind::LookupTicker,
        ToolKind::FetchFundamentals,
        ToolKind::Preprocess,
        ToolKind::AnalyzeRisk,
        ToolKind::BuildCustomChart,
        ToolKind::FetchPriceSeriesChart,
        ToolKind::CompareTickers,
        ToolKind::FetchNews,
        ToolKind::FetchCompanyProfile,
        ToolKind::DisplayRawTable,
        ToolKind::DisplayProcessedTable,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::LookupTicker => "lookup_ticker",
            ToolKind::FetchFundamentals => "fetch_fundamentals",
            ToolKind::Preprocess => "preprocess",
            ToolKind::AnalyzeRisk => "analyze_risk",
            ToolKind::BuildCustomChart => "build_custom_chart",
            ToolKind::FetchPriceSeriesChart => "fetch_price_series_chart",
            ToolKind::CompareTickers => "compare_tickers",
            ToolKind::FetchNews => "fetch_news",
            ToolKind::FetchCompanyProfile => "fetch_company_profile",
            ToolKind::DisplayRawTable => "display_raw_table",
            ToolKind::DisplayProcessedTable => "display_processed_table",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What a successful tool call leaves behind
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Body of the tool-result message
    pub content: String,
    pub update: StateUpdate,
}

impl ToolOutput {
    pub fn message(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            update: StateUpdate::default(),
        }
    }

    pub fn with_update(mut self, update: StateUpdate) -> Self {
        self.update = update;
        self
    }
}

/// Trait for a single tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;
    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> Value;

    /// Check state preconditions before anything runs
    fn validate(&self, _state: &ConversationState, _request: &ToolRequest) -> Result<(), ToolError> {
        Ok(())
    }

    async fn execute(
        &self,
        state: &ConversationState,
        request: &ToolRequest,
    ) -> Result<ToolOutput, ToolError>;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Schemas for the inference collaborator, in name order
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Ticker from the request, else the active one
pub(crate) fn resolve_ticker(state: &ConversationState, request: &ToolRequest) -> Option<String> {
    request
        .str_arg("ticker")
        .map(str::to_string)
        .or_else(|| state.ticker.clone().filter(|t| !t.trim().is_empty()))
        .map(|t| t.trim().to_uppercase())
}

pub(crate) fn period_days(request: &ToolRequest) -> u32 {
    request
        .arguments
        .get("period_days")
        .and_then(Value::as_u64)
        .filter(|days| *days > 0)
        .map(|days| days.min(MAX_PERIOD_DAYS) as u32)
        .unwrap_or(DEFAULT_PERIOD_DAYS)
}

/// Registry holding the full dispatch table, backed by `backend`
pub fn create_default_registry(backend: Arc<dyn FinanceBackend>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(market::LookupTickerTool::new(backend.clone())));
    registry.register(Arc::new(market::FetchFundamentalsTool::new(backend.clone())));
    registry.register(Arc::new(market::PreprocessTool::new(backend.clone())));
    registry.register(Arc::new(market::AnalyzeRiskTool::new(backend.clone())));
    registry.register(Arc::new(market::FetchNewsTool::new(backend.clone())));
    registry.register(Arc::new(market::FetchCompanyProfileTool::new(backend.clone())));

    registry.register(Arc::new(visual::BuildCustomChartTool));
    registry.register(Arc::new(visual::FetchPriceSeriesChartTool::new(backend.clone())));
    registry.register(Arc::new(visual::CompareTickersTool::new(backend)));
    registry.register(Arc::new(visual::DisplayTableTool::raw()));
    registry.register(Arc::new(visual::DisplayTableTool::processed()));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_registry_covers_every_kind() {
        let registry = create_default_registry(Arc::new(SampleFinanceBackend::new()));
        for kind in ToolKind::ALL {
            let tool = registry.get(kind.name()).expect("tool registered");
            assert_eq!(tool.kind(), kind);
            assert_eq!(tool.schema().parameters["type"], "object");
        }
        assert_eq!(registry.list().len(), ToolKind::ALL.len());
    }

    #[test]
    fn test_kind_names_are_unique_and_parse_back() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("compare_everything"), None);
    }

    #[test]
    fn test_ticker_resolution_prefers_request() {
        let state = ConversationState {
            ticker: Some("msft".into()),
            ..Default::default()
        };
        let explicit = ToolRequest::new("fetch_news", json!({"ticker": "aapl"}));
        let implicit = ToolRequest::new("fetch_news", json!({}));

        assert_eq!(resolve_ticker(&state, &explicit).as_deref(), Some("AAPL"));
        assert_eq!(resolve_ticker(&state, &implicit).as_deref(), Some("MSFT"));
        assert_eq!(resolve_ticker(&ConversationState::new(), &implicit), None);
    }

    #[test]
    fn test_period_days_defaults_and_caps() {
        let none = ToolRequest::new("x", json!({}));
        let zero = ToolRequest::new("x", json!({"period_days": 0}));
        let huge = ToolRequest::new("x", json!({"period_days": 1_000_000}));
        assert_eq!(period_days(&none), DEFAULT_PERIOD_DAYS);
        assert_eq!(period_days(&zero), DEFAULT_PERIOD_DAYS);
        assert_eq!(period_days(&huge), MAX_PERIOD_DAYS as u32);
    }
}
