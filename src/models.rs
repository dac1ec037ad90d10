//! Core data models for the dialogue orchestrator

use crate::chart::ChartSpec;
use crate::dataset::Dataset;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Verdict returned by the risk model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskVerdict {
    ElevatedRisk,
    NoExtremeRisk,
    Unrecognized,
}

pub const VERDICT_ELEVATED_RISK: &str = "Risque Élevé Détecté";
pub const VERDICT_NO_EXTREME_RISK: &str = "Aucun Risque Extrême Détecté";

impl RiskVerdict {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            VERDICT_ELEVATED_RISK | "High Risk Detected" => RiskVerdict::ElevatedRisk,
            VERDICT_NO_EXTREME_RISK | "No Extreme Risk Detected" => RiskVerdict::NoExtremeRisk,
            _ => RiskVerdict::Unrecognized,
        }
    }
}

//
// ================= Tool requests =================
//

/// One tool invocation requested by the inference collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    pub correlation_id: String,
}

impl ToolRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            correlation_id: format!("call_{}", Uuid::new_v4().simple()),
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// Non-empty string argument, if present
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

//
// ================= Payloads =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsArticle {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
}

/// Side-channel content attached to an outward assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    #[default]
    None,
    Table {
        dataset: Dataset,
    },
    Chart {
        chart: ChartSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
    },
    NewsList {
        articles: Vec<NewsArticle>,
    },
    Profile {
        profile: Value,
    },
}

impl MessagePayload {
    pub fn is_none(&self) -> bool {
        matches!(self, MessagePayload::None)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MessagePayload::None => "none",
            MessagePayload::Table { .. } => "table",
            MessagePayload::Chart { .. } => "chart",
            MessagePayload::NewsList { .. } => "news_list",
            MessagePayload::Profile { .. } => "profile",
        }
    }
}

//
// ================= Messages =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub message_id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_requests: Vec<ToolRequest>,
    /// Set on tool-result messages; matches `ToolRequest::correlation_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "MessagePayload::is_none")]
    pub payload: MessagePayload,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            role,
            content: content.into(),
            tool_requests: Vec::new(),
            correlation_id: None,
            tool_name: None,
            is_error: false,
            payload: MessagePayload::None,
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant message asking for tool invocations
    pub fn tool_calls(content: impl Into<String>, requests: Vec<ToolRequest>) -> Self {
        let mut msg = Self::new(Role::Assistant, content);
        msg.tool_requests = requests;
        msg
    }

    pub fn tool_result(request: &ToolRequest, content: impl Into<String>, is_error: bool) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.correlation_id = Some(request.correlation_id.clone());
        msg.tool_name = Some(request.name.clone());
        msg.is_error = is_error;
        msg
    }

    pub fn with_payload(mut self, payload: MessagePayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn has_tool_requests(&self) -> bool {
        !self.tool_requests.is_empty()
    }

    /// Assistant message with no tool requests
    pub fn is_terminal(&self) -> bool {
        self.role == Role::Assistant && self.tool_requests.is_empty()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_verdict_parsing() {
        assert_eq!(RiskVerdict::parse("Risque Élevé Détecté"), RiskVerdict::ElevatedRisk);
        assert_eq!(
            RiskVerdict::parse(" Aucun Risque Extrême Détecté "),
            RiskVerdict::NoExtremeRisk
        );
        assert_eq!(RiskVerdict::parse("High Risk Detected"), RiskVerdict::ElevatedRisk);
        assert_eq!(RiskVerdict::parse("maybe"), RiskVerdict::Unrecognized);
        assert_eq!(RiskVerdict::parse(""), RiskVerdict::Unrecognized);
    }

    #[test]
    fn test_tool_result_keeps_correlation() {
        let request = ToolRequest::new("lookup_ticker", json!({"company_name": "Apple"}))
            .with_correlation_id("call_1");
        let result = Message::tool_result(&request, "[Ticker `AAPL` found.]", false);

        assert_eq!(result.role, Role::Tool);
        assert_eq!(result.correlation_id.as_deref(), Some("call_1"));
        assert_eq!(result.tool_name.as_deref(), Some("lookup_ticker"));
        assert!(!result.is_terminal());
    }

    #[test]
    fn test_str_arg_ignores_blank_values() {
        let request = ToolRequest::new("fetch_news", json!({"ticker": "  ", "company_name": "Apple"}));
        assert_eq!(request.str_arg("ticker"), None);
        assert_eq!(request.str_arg("company_name"), Some("Apple"));
        assert_eq!(request.str_arg("missing"), None);
    }

    #[test]
    fn test_payload_serializes_with_kind_tag() {
        let payload = MessagePayload::Profile {
            profile: json!({"companyName": "Apple Inc."}),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "profile");
        assert_eq!(payload.kind(), "profile");
        assert!(MessagePayload::default().is_none());
    }
}
