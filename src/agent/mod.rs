//! Main orchestrator - runs one conversational turn
//!
//! DECISION → EXECUTION → (DECISION ...) → PRESENT → CLEANUP → END
//!
//! The orchestrator owns the nodes and drives them with the router. Session
//! state is passed in per call; nothing is held between turns.

use crate::config::OrchestratorConfig;
use crate::decision::DecisionNode;
use crate::display::{self, ProfileDisplay};
use crate::execution::ExecutionNode;
use crate::llm::InferenceClient;
use crate::models::{Message, Role};
use crate::state::ConversationState;
use crate::synthesis;
use crate::tools::ToolRegistry;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod router;
pub use router::{route, LastEvent, NodeId};

pub const TOO_MANY_STEPS: &str =
    "Sorry, this request needed too many steps and was stopped. Could you make it more specific?";

/// What a turn produced, captured before cleanup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    /// Outward assistant message of the turn, if any
    pub reply: Option<Message>,
    pub error: Option<String>,
    pub path: Vec<NodeId>,
}

/// Cleanup node: drop per-turn results, keep durable context
pub fn cleanup(state: &mut ConversationState) -> LastEvent {
    state.reset_transient();
    LastEvent::CleanedUp
}

pub struct Orchestrator {
    decision: DecisionNode,
    execution: ExecutionNode,
    profile_display: ProfileDisplay,
    max_decisions_per_turn: u32,
}

impl Orchestrator {
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        registry: Arc<ToolRegistry>,
        max_decisions_per_turn: u32,
    ) -> Self {
        Self {
            decision: DecisionNode::new(inference.clone(), &registry),
            execution: ExecutionNode::new(registry),
            profile_display: ProfileDisplay::new(inference),
            max_decisions_per_turn: max_decisions_per_turn.max(1),
        }
    }

    pub fn from_config(
        config: &OrchestratorConfig,
        inference: Arc<dyn InferenceClient>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self::new(inference, registry, config.max_decisions_per_turn)
    }

    /// Run one turn against `state`, mutating it in place
    pub async fn run_turn(&self, state: &mut ConversationState, input: &str) -> Result<TurnOutcome> {
        if state.has_error() {
            warn!("Clearing a stale error left by a previous turn");
            state.error = None;
        }

        state.input = input.to_string();
        state.push_message(Message::user(input));
        let turn_start = state.messages.len();

        info!(
            ticker = ?state.ticker,
            history = turn_start,
            "Orchestrator: turn started"
        );

        let mut path = Vec::new();
        let mut decisions = 0u32;
        let mut captured_error = None;
        let mut event = LastEvent::TerminalAnswer;
        let mut node = NodeId::Decision;

        loop {
            path.push(node);
            debug!(%node, "Entering node");

            event = match node {
                NodeId::Decision => {
                    decisions += 1;
                    self.decision.run(state).await
                }
                NodeId::Execution => {
                    let requests = match &event {
                        LastEvent::ToolsRequested(requests) => requests.clone(),
                        _ => Vec::new(),
                    };
                    self.execution.run(state, &requests).await
                }
                NodeId::FinalSynthesis => synthesis::final_synthesis(state),
                NodeId::DataDisplay => display::data_display(state),
                NodeId::ChartDisplay => display::chart_display(state),
                NodeId::NewsDisplay => display::news_display(state),
                NodeId::ProfileDisplay => self.profile_display.run(state).await,
                NodeId::Cleanup => {
                    captured_error = state.error.clone();
                    cleanup(state)
                }
                NodeId::End => break,
            };

            let mut next = route(state, &event);
            if next == NodeId::Decision && decisions >= self.max_decisions_per_turn {
                warn!(decisions, "Turn budget exhausted");
                state.latch_error(TOO_MANY_STEPS);
                next = route(state, &event);
            }
            debug!(from = %node, to = %next, "Routed");
            node = next;
        }

        let reply = state.messages[turn_start..]
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.has_tool_requests())
            .cloned();

        info!(
            path = ?path,
            error = ?captured_error,
            replied = reply.is_some(),
            "Orchestrator: turn finished"
        );

        Ok(TurnOutcome {
            reply,
            error: captured_error,
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedInference, UnavailableInference};
    use crate::models::{MessagePayload, ToolRequest, VERDICT_ELEVATED_RISK};
    use crate::tools::{create_default_registry, SampleFinanceBackend};
    use serde_json::json;

    fn calls(requests: Vec<ToolRequest>) -> Message {
        Message::tool_calls("", requests)
    }

    fn call(name: &str, arguments: serde_json::Value) -> Message {
        calls(vec![ToolRequest::new(name, arguments)])
    }

    fn orchestrator_with(script: Vec<Message>, backend: SampleFinanceBackend) -> Orchestrator {
        Orchestrator::new(
            Arc::new(ScriptedInference::new(script)),
            Arc::new(create_default_registry(Arc::new(backend))),
            8,
        )
    }

    fn orchestrator(script: Vec<Message>) -> Orchestrator {
        orchestrator_with(script, SampleFinanceBackend::new())
    }

    #[tokio::test]
    async fn test_lookup_loops_back_to_decision() {
        let orchestrator = orchestrator(vec![
            call("lookup_ticker", json!({"company_name": "Apple"})),
            Message::assistant("Found it: `AAPL`."),
        ]);
        let mut state = ConversationState::new();

        let outcome = orchestrator.run_turn(&mut state, "What is Apple's ticker?").await.unwrap();

        assert_eq!(
            outcome.path,
            vec![NodeId::Decision, NodeId::Execution, NodeId::Decision, NodeId::End]
        );
        assert_eq!(state.ticker.as_deref(), Some("AAPL"));
        assert_eq!(state.company_name.as_deref(), Some("Apple"));
        let tool_result = state.last_tool_result().unwrap();
        assert!(tool_result.content.contains("AAPL"));
        assert_eq!(outcome.reply.unwrap().content, "Found it: `AAPL`.");
        assert_eq!(state.input, "What is Apple's ticker?");
    }

    #[tokio::test]
    async fn test_full_analysis_across_turns() {
        let orchestrator = orchestrator_with(
            vec![
                call("fetch_fundamentals", json!({})),
                Message::assistant("Data fetched."),
                call("preprocess", json!({})),
                call("analyze_risk", json!({})),
            ],
            SampleFinanceBackend::new().with_verdict(VERDICT_ELEVATED_RISK),
        );
        let mut state = ConversationState {
            ticker: Some("AAPL".into()),
            ..Default::default()
        };

        orchestrator.run_turn(&mut state, "Fetch Apple's data").await.unwrap();
        assert!(state.has_fetched());

        let outcome = orchestrator.run_turn(&mut state, "Now analyze it").await.unwrap();

        assert_eq!(
            outcome.path,
            vec![
                NodeId::Decision,
                NodeId::Execution,
                NodeId::Decision,
                NodeId::Execution,
                NodeId::FinalSynthesis,
                NodeId::Cleanup,
                NodeId::End
            ]
        );
        let reply = outcome.reply.unwrap();
        assert!(reply.content.contains("Warning"));
        assert!(reply.content.contains("`AAPL`"));
        assert!(reply.content.contains("`2023`"));
        assert!(matches!(reply.payload, MessagePayload::Chart { .. }));

        // Transient results are gone, durable context stays
        assert!(state.analysis.is_empty());
        assert!(state.chart_payload.is_none());
        assert!(state.has_processed());
        assert_eq!(state.ticker.as_deref(), Some("AAPL"));
    }

    #[tokio::test]
    async fn test_invalid_chart_column_ends_turn_after_cleanup() {
        let orchestrator = orchestrator(vec![
            calls(vec![
                ToolRequest::new("fetch_fundamentals", json!({"ticker": "AAPL"})),
                ToolRequest::new("preprocess", json!({})),
            ]),
            call("build_custom_chart", json!({"y_column": "colonne_inexistante"})),
        ]);
        let mut state = ConversationState::new();

        let outcome = orchestrator.run_turn(&mut state, "Chart the nonsense metric").await.unwrap();

        let error = outcome.error.unwrap();
        assert!(error.contains("colonne_inexistante"));
        assert_eq!(outcome.path[outcome.path.len() - 2..], [NodeId::Cleanup, NodeId::End]);
        assert!(!outcome.path.contains(&NodeId::ChartDisplay));
        assert!(state.error.is_none());
        assert!(state.chart_payload.is_none());
        assert!(state.has_processed());
    }

    #[tokio::test]
    async fn test_raw_table_without_data_resets_error() {
        let orchestrator = orchestrator(vec![
            call("display_raw_table", json!({})),
            Message::assistant("Hello again."),
        ]);
        let mut state = ConversationState::new();

        let outcome = orchestrator.run_turn(&mut state, "Show me the raw data").await.unwrap();

        assert!(outcome.error.unwrap().contains("no data available"));
        assert_eq!(
            outcome.path,
            vec![NodeId::Decision, NodeId::Execution, NodeId::Cleanup, NodeId::End]
        );
        assert!(state.error.is_none());
        assert!(state.last_tool_result().unwrap().is_error);

        let next = orchestrator.run_turn(&mut state, "Hi").await.unwrap();
        assert!(next.error.is_none());
        assert_eq!(next.reply.unwrap().content, "Hello again.");
    }

    #[tokio::test]
    async fn test_plain_answer_skips_cleanup() {
        let orchestrator = orchestrator(vec![Message::assistant("I analyze stocks.")]);
        let mut state = ConversationState::new();

        let outcome = orchestrator.run_turn(&mut state, "What can you do?").await.unwrap();

        assert_eq!(outcome.path, vec![NodeId::Decision, NodeId::End]);
        assert_eq!(state.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_chart_request_is_presented() {
        let orchestrator = orchestrator(vec![call(
            "fetch_price_series_chart",
            json!({"ticker": "MSFT", "period_days": 30}),
        )]);
        let mut state = ConversationState::new();

        let outcome = orchestrator.run_turn(&mut state, "MSFT price").await.unwrap();

        assert!(outcome.path.contains(&NodeId::ChartDisplay));
        match outcome.reply.unwrap().payload {
            MessagePayload::Chart { chart, .. } => assert_eq!(chart.x.len(), 30),
            other => panic!("expected chart, got {:?}", other),
        }
        assert!(state.chart_payload.is_none());
    }

    #[tokio::test]
    async fn test_turn_budget_stops_endless_lookups() {
        let script = (0..20)
            .map(|_| call("lookup_ticker", json!({"company_name": "Apple"})))
            .collect();
        let orchestrator = Orchestrator::new(
            Arc::new(ScriptedInference::new(script)),
            Arc::new(create_default_registry(Arc::new(SampleFinanceBackend::new()))),
            3,
        );
        let mut state = ConversationState::new();

        let outcome = orchestrator.run_turn(&mut state, "loop").await.unwrap();

        assert_eq!(outcome.error.as_deref(), Some(TOO_MANY_STEPS));
        let decisions = outcome.path.iter().filter(|n| **n == NodeId::Decision).count();
        assert_eq!(decisions, 3);
        assert_eq!(outcome.path.last(), Some(&NodeId::End));
    }

    #[tokio::test]
    async fn test_unreachable_model_ends_turn_cleanly() {
        let orchestrator = Orchestrator::new(
            Arc::new(UnavailableInference),
            Arc::new(create_default_registry(Arc::new(SampleFinanceBackend::new()))),
            8,
        );
        let mut state = ConversationState::new();

        let outcome = orchestrator.run_turn(&mut state, "hello").await.unwrap();

        assert!(outcome.error.is_some());
        assert!(outcome.reply.is_none());
        assert_eq!(outcome.path, vec![NodeId::Decision, NodeId::Cleanup, NodeId::End]);
        assert!(state.error.is_none());
    }

    #[test]
    fn test_cleanup_twice_is_cleanup_once() {
        let mut state = ConversationState {
            ticker: Some("AAPL".into()),
            analysis: VERDICT_ELEVATED_RISK.into(),
            chart_payload: Some("{}".into()),
            error: Some("boom".into()),
            ..Default::default()
        };
        cleanup(&mut state);
        let once = state.clone();
        assert_eq!(cleanup(&mut state), LastEvent::CleanedUp);
        assert_eq!(state, once);
    }
}
