//! Chart and table tools.
//!
//! Chart tools leave a serialized `ChartSpec` in `chart_payload`; the table
//! tools only check that there is something to show, the display node builds
//! the actual payload.

use super::{period_days, resolve_ticker, FinanceBackend, Tool, ToolKind, ToolOutput};
use crate::chart::{ChartSpec, CustomChartRequest};
use crate::dataset::{Dataset, YEAR_COLUMN};
use crate::error::ToolError;
use crate::models::ToolRequest;
use crate::state::{ConversationState, StateUpdate};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

const CHART_CREATED: &str = "[Interactive chart created successfully.]";

fn chart_update(chart: &ChartSpec) -> Result<StateUpdate, ToolError> {
    Ok(StateUpdate {
        chart_payload: Some(chart.to_json()?),
        ..Default::default()
    })
}

pub struct BuildCustomChartTool;

impl BuildCustomChartTool {
    fn dataset(state: &ConversationState) -> Result<Dataset, ToolError> {
        let raw = state.preferred_dataset().ok_or_else(|| {
            ToolError::Precondition(
                "no data available to chart: fetch the company's data first".to_string(),
            )
        })?;
        Ok(Dataset::from_json(raw)?)
    }
}

#[async_trait]
impl Tool for BuildCustomChartTool {
    fn kind(&self) -> ToolKind {
        ToolKind::BuildCustomChart
    }

    fn description(&self) -> &'static str {
        "Build a chart from columns of the data already fetched (processed data when available)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "chart_type": {"type": "string", "enum": ["line", "bar", "scatter"]},
                "x_column": {"type": "string", "description": "Defaults to calendarYear"},
                "y_column": {"type": "string"},
                "title": {"type": "string"},
                "color_column": {"type": "string"}
            },
            "required": ["y_column"]
        })
    }

    fn validate(&self, state: &ConversationState, request: &ToolRequest) -> Result<(), ToolError> {
        if state.preferred_dataset().is_none() {
            return Err(ToolError::Precondition(
                "no data available to chart: fetch the company's data first".to_string(),
            ));
        }
        request
            .str_arg("y_column")
            .map(|_| ())
            .ok_or_else(|| ToolError::InvalidArguments("y_column is required".to_string()))
    }

    async fn execute(
        &self,
        state: &ConversationState,
        request: &ToolRequest,
    ) -> Result<ToolOutput, ToolError> {
        let dataset = Self::dataset(state)?;
        let chart_request = CustomChartRequest {
            chart_type: request.str_arg("chart_type").unwrap_or("line"),
            x_column: request.str_arg("x_column").unwrap_or(YEAR_COLUMN),
            y_column: request.str_arg("y_column").unwrap_or_default(),
            title: request.str_arg("title"),
            color_column: request.str_arg("color_column"),
        };

        let chart = ChartSpec::custom(&dataset, &chart_request)?;
        info!(title = %chart.title, "Custom chart built");
        Ok(ToolOutput::message(CHART_CREATED).with_update(chart_update(&chart)?))
    }
}

pub struct FetchPriceSeriesChartTool {
    backend: Arc<dyn FinanceBackend>,
}

impl FetchPriceSeriesChartTool {
    pub fn new(backend: Arc<dyn FinanceBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for FetchPriceSeriesChartTool {
    fn kind(&self) -> ToolKind {
        ToolKind::FetchPriceSeriesChart
    }

    fn description(&self) -> &'static str {
        "Chart the share price of a company over a number of trading days."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ticker": {"type": "string"},
                "period_days": {"type": "integer", "default": super::DEFAULT_PERIOD_DAYS}
            }
        })
    }

    fn validate(&self, state: &ConversationState, request: &ToolRequest) -> Result<(), ToolError> {
        resolve_ticker(state, request).map(|_| ()).ok_or_else(|| {
            ToolError::Precondition("no ticker to chart the price of".to_string())
        })
    }

    async fn execute(
        &self,
        state: &ConversationState,
        request: &ToolRequest,
    ) -> Result<ToolOutput, ToolError> {
        let ticker = resolve_ticker(state, request).ok_or_else(|| {
            ToolError::Precondition("no ticker to chart the price of".to_string())
        })?;
        let days = period_days(request);

        let prices = self.backend.price_history(&ticker, days).await?;
        let chart = ChartSpec::price_history(&ticker, days, &prices)?;
        Ok(ToolOutput::message(CHART_CREATED).with_update(chart_update(&chart)?))
    }
}

pub struct CompareTickersTool {
    backend: Arc<dyn FinanceBackend>,
}

impl CompareTickersTool {
    pub fn new(backend: Arc<dyn FinanceBackend>) -> Self {
        Self { backend }
    }

    fn tickers(request: &ToolRequest) -> Result<Vec<String>, ToolError> {
        let tickers: Vec<String> = request
            .arguments
            .get("tickers")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|t| t.trim().to_uppercase())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        if tickers.is_empty() {
            return Err(ToolError::InvalidArguments(
                "tickers must be a non-empty list of ticker symbols".to_string(),
            ));
        }
        Ok(tickers)
    }
}

#[async_trait]
impl Tool for CompareTickersTool {
    fn kind(&self) -> ToolKind {
        ToolKind::CompareTickers
    }

    fn description(&self) -> &'static str {
        "Compare several tickers, either on a fundamental metric over the years or on normalized share price."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tickers": {"type": "array", "items": {"type": "string"}},
                "metric": {"type": "string", "description": "Fundamental metric, e.g. roe"},
                "comparison_type": {"type": "string", "enum": ["fundamental", "price"], "default": "fundamental"},
                "period_days": {"type": "integer", "default": super::DEFAULT_PERIOD_DAYS}
            },
            "required": ["tickers", "metric"]
        })
    }

    fn validate(&self, _state: &ConversationState, request: &ToolRequest) -> Result<(), ToolError> {
        Self::tickers(request)?;
        request
            .str_arg("metric")
            .map(|_| ())
            .ok_or_else(|| ToolError::InvalidArguments("metric is required".to_string()))
    }

    async fn execute(
        &self,
        _state: &ConversationState,
        request: &ToolRequest,
    ) -> Result<ToolOutput, ToolError> {
        let tickers = Self::tickers(request)?;
        let metric = request.str_arg("metric").unwrap_or_default();

        let chart = match request.str_arg("comparison_type").unwrap_or("fundamental") {
            "fundamental" => {
                let dataset = self.backend.compare_fundamentals(&tickers, metric).await?;
                ChartSpec::fundamental_comparison(metric, &dataset)?
            }
            "price" => {
                let dataset = self
                    .backend
                    .compare_prices(&tickers, period_days(request))
                    .await?;
                ChartSpec::price_comparison(&dataset)?
            }
            other => {
                return Err(ToolError::Validation(format!(
                    "unknown comparison type '{}' (expected fundamental or price)",
                    other
                )))
            }
        };

        info!(tickers = ?tickers, %metric, "Comparison chart built");
        let mut update = chart_update(&chart)?;
        update.tickers = Some(tickers);
        Ok(ToolOutput::message(CHART_CREATED).with_update(update))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableSource {
    Raw,
    Processed,
}

/// Announces a table; the payload is attached by the data display node
pub struct DisplayTableTool {
    source: TableSource,
}

impl DisplayTableTool {
    pub fn raw() -> Self {
        Self {
            source: TableSource::Raw,
        }
    }

    pub fn processed() -> Self {
        Self {
            source: TableSource::Processed,
        }
    }
}

#[async_trait]
impl Tool for DisplayTableTool {
    fn kind(&self) -> ToolKind {
        match self.source {
            TableSource::Raw => ToolKind::DisplayRawTable,
            TableSource::Processed => ToolKind::DisplayProcessedTable,
        }
    }

    fn description(&self) -> &'static str {
        match self.source {
            TableSource::Raw => "Show the raw fetched data as a table.",
            TableSource::Processed => "Show the preprocessed data as a table.",
        }
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn validate(&self, state: &ConversationState, _request: &ToolRequest) -> Result<(), ToolError> {
        let available = match self.source {
            TableSource::Raw => state.has_fetched(),
            TableSource::Processed => state.has_processed(),
        };
        if available {
            Ok(())
        } else {
            Err(ToolError::Precondition(match self.source {
                TableSource::Raw => "no data available to display: nothing has been fetched yet".to_string(),
                TableSource::Processed => {
                    "no data available to display: the data has not been preprocessed yet".to_string()
                }
            }))
        }
    }

    async fn execute(
        &self,
        _state: &ConversationState,
        _request: &ToolRequest,
    ) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::message(match self.source {
            TableSource::Raw => "[Preparing the raw data table.]",
            TableSource::Processed => "[Preparing the processed data table.]",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::ChartKind;
    use crate::tools::{FinanceBackend, SampleFinanceBackend};

    async fn state_with_fundamentals() -> ConversationState {
        let backend = SampleFinanceBackend::new();
        let fetched = backend.fetch_fundamentals("AAPL").await.unwrap();
        let processed = backend.preprocess(&fetched).await.unwrap();
        ConversationState {
            ticker: Some("AAPL".into()),
            fetched_dataset: Some(fetched.to_json().unwrap()),
            processed_dataset: Some(processed.to_json().unwrap()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_custom_chart_uses_processed_data() {
        let state = state_with_fundamentals().await;
        let request = ToolRequest::new(
            "build_custom_chart",
            json!({"chart_type": "bar", "y_column": "roe"}),
        );

        BuildCustomChartTool.validate(&state, &request).unwrap();
        let output = BuildCustomChartTool.execute(&state, &request).await.unwrap();

        let chart = ChartSpec::from_json(output.update.chart_payload.as_deref().unwrap()).unwrap();
        assert_eq!(chart.kind, ChartKind::Bar);
        assert_eq!(chart.x.len(), 4);
    }

    #[tokio::test]
    async fn test_custom_chart_names_unknown_column() {
        let state = state_with_fundamentals().await;
        let request = ToolRequest::new("build_custom_chart", json!({"y_column": "colonne_inexistante"}));

        let err = BuildCustomChartTool.execute(&state, &request).await.unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
        assert!(err.to_string().contains("colonne_inexistante"));
    }

    #[test]
    fn test_custom_chart_without_data_fails_validation() {
        let request = ToolRequest::new("build_custom_chart", json!({"y_column": "roe"}));
        assert!(matches!(
            BuildCustomChartTool.validate(&ConversationState::new(), &request),
            Err(ToolError::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn test_price_comparison_records_tickers() {
        let tool = CompareTickersTool::new(Arc::new(SampleFinanceBackend::new()));
        let request = ToolRequest::new(
            "compare_tickers",
            json!({"tickers": ["aapl", "msft"], "metric": "close", "comparison_type": "price", "period_days": 20}),
        );

        let output = tool.execute(&ConversationState::new(), &request).await.unwrap();
        assert_eq!(
            output.update.tickers,
            Some(vec!["AAPL".to_string(), "MSFT".to_string()])
        );
        let chart = ChartSpec::from_json(output.update.chart_payload.as_deref().unwrap()).unwrap();
        assert_eq!(chart.series.len(), 2);
        assert_eq!(chart.x.len(), 20);
    }

    #[tokio::test]
    async fn test_unknown_comparison_type_is_rejected() {
        let tool = CompareTickersTool::new(Arc::new(SampleFinanceBackend::new()));
        let request = ToolRequest::new(
            "compare_tickers",
            json!({"tickers": ["AAPL"], "metric": "roe", "comparison_type": "sideways"}),
        );
        let err = tool.execute(&ConversationState::new(), &request).await.unwrap_err();
        assert!(err.to_string().contains("sideways"));
    }

    #[tokio::test]
    async fn test_price_chart_defaults_to_active_ticker() {
        let tool = FetchPriceSeriesChartTool::new(Arc::new(SampleFinanceBackend::new()));
        let state = ConversationState {
            ticker: Some("MSFT".into()),
            ..Default::default()
        };
        let output = tool
            .execute(&state, &ToolRequest::new("fetch_price_series_chart", json!({})))
            .await
            .unwrap();
        let chart = ChartSpec::from_json(output.update.chart_payload.as_deref().unwrap()).unwrap();
        assert_eq!(chart.x.len(), crate::tools::DEFAULT_PERIOD_DAYS as usize);
        assert_eq!(chart.series[0].name, "MSFT");
    }

    #[test]
    fn test_table_tools_check_their_own_dataset() {
        let fetched_only = ConversationState {
            fetched_dataset: Some(r#"{"columns":["a"],"data":[[1]]}"#.into()),
            ..Default::default()
        };
        let request = ToolRequest::new("display_processed_table", json!({}));

        assert!(DisplayTableTool::raw().validate(&fetched_only, &request).is_ok());
        assert!(DisplayTableTool::processed().validate(&fetched_only, &request).is_err());
    }
}
