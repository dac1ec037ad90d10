//! Router - the single source of transition truth
//!
//! A pure function of the state and of what the previous node reported.
//! No history scanning: the previous node says what happened through a
//! `LastEvent`.

use crate::models::ToolRequest;
use crate::state::ConversationState;
use crate::tools::ToolKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nodes of the turn graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Decision,
    Execution,
    FinalSynthesis,
    DataDisplay,
    ChartDisplay,
    NewsDisplay,
    ProfileDisplay,
    Cleanup,
    End,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeId::Decision => "decision",
            NodeId::Execution => "execution",
            NodeId::FinalSynthesis => "final_synthesis",
            NodeId::DataDisplay => "data_display",
            NodeId::ChartDisplay => "chart_display",
            NodeId::NewsDisplay => "news_display",
            NodeId::ProfileDisplay => "profile_display",
            NodeId::Cleanup => "cleanup",
            NodeId::End => "end",
        };
        write!(f, "{}", s)
    }
}

/// What the node that just ran produced
#[derive(Debug, Clone, PartialEq)]
pub enum LastEvent {
    /// Decision got a plain text answer
    TerminalAnswer,
    /// Decision got tool requests, to be run by Execution
    ToolsRequested(Vec<ToolRequest>),
    /// Execution finished its batch; `last_tool` is the last request's name
    ToolsCompleted { last_tool: Option<String> },
    /// Decision could not reach the model
    InferenceFailed,
    /// A display or synthesis node produced the outward message
    Presented,
    CleanedUp,
}

/// Node to run after the last tool of a successful batch
fn after_tool(last_tool: Option<&str>) -> NodeId {
    match last_tool.and_then(ToolKind::from_name) {
        Some(ToolKind::AnalyzeRisk) => NodeId::FinalSynthesis,
        Some(
            ToolKind::BuildCustomChart | ToolKind::FetchPriceSeriesChart | ToolKind::CompareTickers,
        ) => NodeId::ChartDisplay,
        Some(ToolKind::DisplayRawTable | ToolKind::DisplayProcessedTable) => NodeId::DataDisplay,
        Some(ToolKind::FetchNews) => NodeId::NewsDisplay,
        Some(ToolKind::FetchCompanyProfile) => NodeId::ProfileDisplay,
        Some(ToolKind::LookupTicker | ToolKind::FetchFundamentals | ToolKind::Preprocess) | None => {
            NodeId::Decision
        }
    }
}

pub fn route(state: &ConversationState, event: &LastEvent) -> NodeId {
    if *event == LastEvent::CleanedUp {
        return NodeId::End;
    }

    // A live error ends the turn, through Cleanup so transient fields reset
    if state.has_error() {
        return NodeId::Cleanup;
    }

    match event {
        LastEvent::TerminalAnswer => NodeId::End,
        LastEvent::ToolsRequested(requests) if requests.is_empty() => NodeId::End,
        LastEvent::ToolsRequested(_) => NodeId::Execution,
        LastEvent::ToolsCompleted { last_tool } => after_tool(last_tool.as_deref()),
        LastEvent::InferenceFailed | LastEvent::Presented => NodeId::Cleanup,
        LastEvent::CleanedUp => NodeId::End,
    }
}
