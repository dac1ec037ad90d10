//! Groq chat-completions client
//!
//! Speaks the OpenAI-compatible chat API with function calling.
//! Uses a long-lived reqwest::Client for connection pooling.

use super::{InferenceClient, ToolSchema};
use crate::config::OrchestratorConfig;
use crate::error::OrchestrationError;
use crate::models::{Message, Role, ToolRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reusable Groq client (connection-pooled)
pub struct GroqClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GroqClient {
    pub fn new(api_key: String, base_url: String, model: String) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    pub fn from_config(config: &OrchestratorConfig) -> crate::Result<Self> {
        let api_key = config.groq_api_key.clone().ok_or_else(|| {
            OrchestrationError::ConfigError("GROQ_API_KEY not configured".to_string())
        })?;
        Self::new(api_key, config.groq_base_url.clone(), config.groq_model.clone())
    }
}

#[async_trait]
impl InferenceClient for GroqClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolSchema]) -> crate::Result<Message> {
        let request = build_request(&self.model, messages, tools);
        let url = format!("{}/chat/completions", self.base_url);

        info!(
            model = %self.model,
            messages = request.messages.len(),
            tools = tools.len(),
            "Calling Groq API"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Groq API request failed: {}", e);
                OrchestrationError::InferenceError(format!("Groq API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Groq API error response: {}", error_text);
            return Err(OrchestrationError::InferenceError(format!(
                "Groq API returned {}: {}",
                status, error_text
            )));
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Groq response: {}", e);
            OrchestrationError::InferenceError(format!("Groq parse error: {}", e))
        })?;

        let message = parse_response(body)?;
        debug!(
            tool_requests = message.tool_requests.len(),
            "Groq response received"
        );
        Ok(message)
    }
}

fn build_request(model: &str, messages: &[Message], tools: &[ToolSchema]) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        temperature: 0.0,
        messages: messages.iter().map(to_wire).collect(),
        tools: tools
            .iter()
            .map(|schema| WireTool {
                kind: "function".to_string(),
                function: WireFunction {
                    name: schema.name.clone(),
                    description: schema.description.clone(),
                    parameters: schema.parameters.clone(),
                },
            })
            .collect(),
    }
}

fn to_wire(message: &Message) -> WireMessage {
    let tool_calls = message
        .tool_requests
        .iter()
        .map(|request| WireToolCall {
            id: request.correlation_id.clone(),
            kind: "function".to_string(),
            function: WireFunctionCall {
                name: request.name.clone(),
                arguments: request.arguments.to_string(),
            },
        })
        .collect::<Vec<_>>();

    WireMessage {
        role: message.role.to_string(),
        content: Some(message.content.clone()),
        tool_calls: (message.role == Role::Assistant && !tool_calls.is_empty())
            .then_some(tool_calls),
        tool_call_id: message.correlation_id.clone(),
    }
}

fn parse_response(body: ChatResponse) -> crate::Result<Message> {
    let choice = body.choices.into_iter().next().ok_or_else(|| {
        OrchestrationError::InferenceError("No response from Groq API".to_string())
    })?;

    let content = choice.message.content.unwrap_or_default();
    let requests: Vec<ToolRequest> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let arguments = serde_json::from_str::<Value>(&call.function.arguments)
                .ok()
                .filter(Value::is_object)
                .unwrap_or_else(|| {
                    warn!(
                        tool = %call.function.name,
                        "Unparseable tool arguments, using an empty object"
                    );
                    Value::Object(Default::default())
                });
            ToolRequest::new(call.function.name, arguments).with_correlation_id(call.id)
        })
        .collect();

    if requests.is_empty() {
        Ok(Message::assistant(content))
    } else {
        Ok(Message::tool_calls(content, requests))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}
