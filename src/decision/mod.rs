//! Decision node
//!
//! Builds the prompt for one inference call (instructions, data-shape hint,
//! full history) and records the model's answer. The node appends exactly
//! one message per successful call and never touches any other field,
//! apart from latching an error when the model cannot be reached.

use crate::agent::LastEvent;
use crate::llm::{InferenceClient, ToolSchema};
use crate::models::Message;
use crate::state::ConversationState;
use crate::tools::ToolRegistry;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const ASSISTANT_UNAVAILABLE: &str =
    "Sorry, I could not reach the assistant model just now. Please try again in a moment.";

pub const SYSTEM_PROMPT: &str = r#"You are a financial analysis assistant. Your main job is to help users analyze listed companies.

Context first: always take the previous messages into account. When the user asks to change or extend something, build on the analysis or chart that was just shown. Never restart an analysis from scratch unless asked to.

Ticker identification: when the user names a company ("Apple", "Microsoft") instead of giving its ticker, your first action must be `lookup_ticker`.

Full analysis: when asked for a complete analysis, call in order `lookup_ticker` (if needed), `fetch_fundamentals`, `preprocess`, then `analyze_risk`. Your task ends with `analyze_risk`; the final answer and its chart are produced automatically.

Custom charts: to show the evolution of a metric, make sure the data is fetched and preprocessed, then call `build_custom_chart`. The x axis is `calendarYear`. Column names must be used exactly as they appear in the available data.

Comparisons: for "compare", "vs" or "versus" requests use `compare_tickers` with the list of tickers and the metric. Use `comparison_type="fundamental"` for a financial metric and `comparison_type="price"` for share price performance. When the user adds a company to a comparison that was just shown, call `compare_tickers` again with the previous tickers plus the new one. When the user changes the period, redo the last chart with the new `period_days` (252 trading days per year).

Risk verdicts: an elevated-risk verdict must be presented as a clear warning. A no-extreme-risk verdict is NOT a buy recommendation, only the absence of major danger signals.

News and profile: use `fetch_news` for news about a company and `fetch_company_profile` for its presentation. You may offer both after a full analysis.

If the user asks what you are or how you work, answer without tools and give examples of requests.

Always wrap tickers in backticks, e.g. `AAPL`."#;

/// Ephemeral message listing the columns of the data currently in state.
///
/// Processed data is preferred over raw data. Returns `None` when there is
/// no data or it cannot be decoded.
pub fn data_shape_hint(state: &ConversationState) -> Option<Message> {
    let decoded = state.decode_processed().or_else(|| state.decode_fetched())?;
    let dataset = match decoded {
        Ok(dataset) => dataset,
        Err(e) => {
            warn!("Skipping data-shape hint, stored dataset is unreadable: {}", e);
            return None;
        }
    };

    Some(Message::system(format!(
        "--- CURRENT DATA CONTEXT ---\n\
         Data is available for this conversation.\n\
         When calling `build_custom_chart`, choose columns EXACTLY from this list:\n\
         [{}]\n\
         ----------------------------",
        dataset.columns().join(", ")
    )))
}

pub struct DecisionNode {
    inference: Arc<dyn InferenceClient>,
    tools: Vec<ToolSchema>,
}

impl DecisionNode {
    pub fn new(inference: Arc<dyn InferenceClient>, registry: &ToolRegistry) -> Self {
        Self {
            inference,
            tools: registry.schemas(),
        }
    }

    /// Prompt for one call; nothing here is persisted
    pub fn prompt(&self, state: &ConversationState) -> Vec<Message> {
        let mut prompt = Vec::with_capacity(state.messages.len() + 2);
        prompt.push(Message::system(SYSTEM_PROMPT));
        if let Some(hint) = data_shape_hint(state) {
            prompt.push(hint);
        }
        prompt.extend(state.messages.iter().cloned());
        prompt
    }

    pub async fn run(&self, state: &mut ConversationState) -> LastEvent {
        let prompt = self.prompt(state);
        debug!(prompt_messages = prompt.len(), "Decision: calling inference");

        match self.inference.complete(&prompt, &self.tools).await {
            Ok(message) => {
                let event = if message.has_tool_requests() {
                    info!(
                        tools = ?message.tool_requests.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
                        "Decision: tool calls requested"
                    );
                    LastEvent::ToolsRequested(message.tool_requests.clone())
                } else {
                    info!("Decision: terminal answer");
                    LastEvent::TerminalAnswer
                };
                state.push_message(message);
                event
            }
            Err(e) => {
                error!("Decision: inference failed: {}", e);
                state.latch_error(ASSISTANT_UNAVAILABLE);
                LastEvent::InferenceFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedInference, UnavailableInference};
    use crate::models::{Role, ToolRequest};
    use crate::tools::{create_default_registry, SampleFinanceBackend};
    use serde_json::json;

    fn registry() -> ToolRegistry {
        create_default_registry(Arc::new(SampleFinanceBackend::new()))
    }

    #[test]
    fn test_hint_prefers_processed_columns() {
        let state = ConversationState {
            fetched_dataset: Some(r#"{"columns":["raw"],"data":[[1]]}"#.into()),
            processed_dataset: Some(r#"{"columns":["roe","earningsYield"],"data":[[1,2]]}"#.into()),
            ..Default::default()
        };
        let hint = data_shape_hint(&state).unwrap();
        assert_eq!(hint.role, Role::System);
        assert!(hint.content.contains("roe, earningsYield"));
        assert!(!hint.content.contains("raw"));
    }

    #[test]
    fn test_malformed_dataset_skips_hint() {
        let state = ConversationState {
            fetched_dataset: Some("not a dataset".into()),
            ..Default::default()
        };
        assert!(data_shape_hint(&state).is_none());

        let node = DecisionNode::new(Arc::new(ScriptedInference::new(vec![])), &registry());
        let mut with_history = state.clone();
        with_history.push_message(Message::user("hi"));
        assert_eq!(node.prompt(&with_history).len(), 2);
    }

    #[tokio::test]
    async fn test_appends_exactly_one_message() {
        let node = DecisionNode::new(
            Arc::new(ScriptedInference::new(vec![Message::tool_calls(
                "",
                vec![ToolRequest::new("lookup_ticker", json!({"company_name": "Apple"}))],
            )])),
            &registry(),
        );
        let mut state = ConversationState::new();
        state.push_message(Message::user("Analyze Apple"));
        let before = state.clone();

        let event = node.run(&mut state).await;

        assert!(matches!(event, LastEvent::ToolsRequested(ref r) if r.len() == 1));
        assert_eq!(state.messages.len(), before.messages.len() + 1);
        assert_eq!(state.ticker, before.ticker);
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn test_inference_failure_latches_error() {
        let node = DecisionNode::new(Arc::new(UnavailableInference), &registry());
        let mut state = ConversationState::new();

        let event = node.run(&mut state).await;

        assert_eq!(event, LastEvent::InferenceFailed);
        assert!(state.messages.is_empty());
        assert_eq!(state.error.as_deref(), Some(ASSISTANT_UNAVAILABLE));
    }
}
