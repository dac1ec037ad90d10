//! Execution node
//!
//! Runs the tool requests of the latest assistant message, in request order.
//! LLM is NOT allowed here.
//!
//! Each call is isolated: a failing call yields an error result message and
//! latches the turn error, and the next call of the batch still runs. State
//! updates are applied as soon as a call succeeds, so later calls of the
//! same batch see them.

use crate::agent::LastEvent;
use crate::error::ToolError;
use crate::models::{Message, ToolRequest};
use crate::state::ConversationState;
use crate::tools::{ToolOutput, ToolRegistry};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const QUOTA_APOLOGY: &str = "Sorry, the financial data provider's request quota has been reached. \
Please try again later or tomorrow.";

/// Text shown to the user for a failed call
pub fn user_facing_error(tool_name: &str, error: &ToolError) -> String {
    match error {
        ToolError::QuotaExceeded(_) => QUOTA_APOLOGY.to_string(),
        ToolError::Precondition(_) | ToolError::Validation(_) | ToolError::InvalidArguments(_) => {
            format!("Tool '{}' could not run: {}", tool_name, error)
        }
        ToolError::UnknownTool(_) | ToolError::Upstream(_) => {
            format!("Tool '{}' failed: {}", tool_name, error)
        }
    }
}

pub struct ExecutionNode {
    registry: Arc<ToolRegistry>,
}

impl ExecutionNode {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    async fn invoke(
        &self,
        state: &ConversationState,
        request: &ToolRequest,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .registry
            .get(&request.name)
            .ok_or_else(|| ToolError::UnknownTool(request.name.clone()))?;

        tool.validate(state, request)?;
        tool.execute(state, request).await
    }

    pub async fn run(&self, state: &mut ConversationState, requests: &[ToolRequest]) -> LastEvent {
        debug!(batch = requests.len(), "Execution: starting batch");

        for request in requests {
            let start = Instant::now();

            match self.invoke(state, request).await {
                Ok(output) => {
                    info!(
                        tool = %request.name,
                        correlation_id = %request.correlation_id,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Tool call succeeded"
                    );
                    state.apply(output.update);
                    state.push_message(Message::tool_result(request, output.content, false));
                }
                Err(e) => {
                    warn!(
                        tool = %request.name,
                        correlation_id = %request.correlation_id,
                        error = %e,
                        "Tool call failed"
                    );
                    let text = user_facing_error(&request.name, &e);
                    state.push_message(Message::tool_result(request, text.clone(), true));
                    state.latch_error(text);
                }
            }
        }

        LastEvent::ToolsCompleted {
            last_tool: requests.last().map(|r| r.name.clone()),
        }
    }
}
