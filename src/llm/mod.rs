//! Inference collaborator
//!
//! The language model is an opaque function: messages plus tool schemas in,
//! one assistant message out (either final text or tool requests).

use crate::error::OrchestrationError;
use crate::models::Message;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

pub mod groq;
pub use groq::GroqClient;

/// Tool description handed to the model for function calling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Produce the next assistant message for this conversation
    async fn complete(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<Message>;
}

/// Replays prepared assistant messages in order.
/// Keeps the orchestrator runnable without a model.
pub struct ScriptedInference {
    script: Mutex<VecDeque<Message>>,
    fallback: String,
}

impl ScriptedInference {
    pub fn new(script: Vec<Message>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: "I have nothing more to add for now.".to_string(),
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn complete(&self, _messages: &[Message], _tools: &[ToolSchema]) -> Result<Message> {
        let next = self
            .script
            .lock()
            .map_err(|_| OrchestrationError::InferenceError("script lock poisoned".to_string()))?
            .pop_front();

        Ok(next.unwrap_or_else(|| Message::assistant(self.fallback.clone())))
    }
}

/// Always fails; stands in for an unreachable model
pub struct UnavailableInference;

#[async_trait]
impl InferenceClient for UnavailableInference {
    async fn complete(&self, _messages: &[Message], _tools: &[ToolSchema]) -> Result<Message> {
        Err(OrchestrationError::InferenceError(
            "no inference backend configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ToolRequest;
    use serde_json::json;

    #[tokio::test]
    async fn test_script_is_replayed_in_order() {
        let inference = ScriptedInference::new(vec![
            Message::tool_calls("", vec![ToolRequest::new("lookup_ticker", json!({}))]),
            Message::assistant("done"),
        ]);

        let first = inference.complete(&[], &[]).await.unwrap();
        assert!(first.has_tool_requests());
        let second = inference.complete(&[], &[]).await.unwrap();
        assert_eq!(second.content, "done");
        assert_eq!(inference.remaining(), 0);

        let third = inference.complete(&[], &[]).await.unwrap();
        assert!(third.is_terminal());
    }

    #[tokio::test]
    async fn test_unavailable_inference_errors() {
        assert!(UnavailableInference.complete(&[], &[]).await.is_err());
    }
}
