//! Display-preparation nodes
//!
//! Each variant wraps something a tool just left in the state into one
//! outward assistant message with a short lead-in and the payload attached.
//! Missing or unreadable input degrades to an apology; these nodes never
//! latch a turn error.

use crate::agent::LastEvent;
use crate::chart::ChartSpec;
use crate::llm::InferenceClient;
use crate::models::{Message, MessagePayload, NewsArticle};
use crate::state::ConversationState;
use crate::tools::ToolKind;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

const UNREADABLE_SUFFIX: &str = "\n\n(The stored result could not be read.)";

const PROFILE_PROMPT: &str = "You are a financial assistant. Summarize the following company \
profile for an investor in a short paragraph: what the company does, its sector and any notable \
facts. Do not invent information that is not in the profile. Wrap the ticker in backticks.";

fn ticker_label(state: &ConversationState) -> String {
    state
        .ticker
        .as_deref()
        .map(|t| format!("`{}`", t.to_uppercase()))
        .unwrap_or_else(|| "this company".to_string())
}

/// Latest tool result body, if it belongs to `kind`
fn tool_result_for<'a>(state: &'a ConversationState, kind: ToolKind) -> Option<&'a str> {
    state
        .last_tool_result()
        .filter(|m| m.tool_name.as_deref() == Some(kind.name()) && !m.is_error)
        .map(|m| m.content.as_str())
        .filter(|content| !content.trim().is_empty())
}

fn present(state: &mut ConversationState, message: Message) -> LastEvent {
    debug!(payload = message.payload.kind(), "Presenting message");
    state.push_message(message);
    LastEvent::Presented
}

/// Table of the raw or processed dataset, per the last table tool called
pub fn data_display(state: &mut ConversationState) -> LastEvent {
    let processed = state
        .last_tool_result()
        .and_then(|m| m.tool_name.as_deref())
        .is_some_and(|name| name == ToolKind::DisplayProcessedTable.name());

    let (decoded, label) = if processed {
        (state.decode_processed(), "processed")
    } else {
        (state.decode_fetched(), "raw")
    };

    let message = match decoded {
        None => Message::assistant("Sorry, there is no data to display yet."),
        Some(Err(e)) => {
            warn!("Data display: unreadable dataset: {}", e);
            Message::assistant(format!(
                "Sorry, I could not display the {} data.{}",
                label, UNREADABLE_SUFFIX
            ))
        }
        Some(Ok(dataset)) => Message::assistant(format!(
            "Here is the {} financial data for {}:",
            label,
            ticker_label(state)
        ))
        .with_payload(MessagePayload::Table { dataset }),
    };

    present(state, message)
}

pub fn chart_display(state: &mut ConversationState) -> LastEvent {
    let message = match state.chart_payload.as_deref().filter(|s| !s.is_empty()) {
        None => Message::assistant("Sorry, I could not produce the requested chart."),
        Some(raw) => match ChartSpec::from_json(raw) {
            Ok(chart) => Message::assistant("Here is the chart you asked for:").with_payload(
                MessagePayload::Chart {
                    chart,
                    explanation: None,
                },
            ),
            Err(e) => {
                warn!("Chart display: unreadable chart payload: {}", e);
                Message::assistant(format!(
                    "Sorry, I could not display the chart.{}",
                    UNREADABLE_SUFFIX
                ))
            }
        },
    };

    present(state, message)
}

pub fn news_display(state: &mut ConversationState) -> LastEvent {
    let articles = tool_result_for(state, ToolKind::FetchNews).map(|raw| {
        serde_json::from_str::<Vec<NewsArticle>>(raw).map_err(|e| {
            warn!("News display: unreadable news result: {}", e);
        })
    });

    let message = match articles {
        Some(Ok(articles)) if !articles.is_empty() => Message::assistant(format!(
            "Here are the latest news for {}:",
            ticker_label(state)
        ))
        .with_payload(MessagePayload::NewsList { articles }),
        Some(Err(())) => Message::assistant(format!(
            "Sorry, I could not read the news for {}.{}",
            ticker_label(state),
            UNREADABLE_SUFFIX
        )),
        _ => Message::assistant(format!(
            "Sorry, I could not find any recent news for {}.",
            ticker_label(state)
        )),
    };

    present(state, message)
}

/// Profile object from a tool result; providers sometimes wrap it in a list
fn parse_profile(raw: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let profile = match value {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };
    profile
        .as_object()
        .filter(|fields| !fields.is_empty())
        .map(|_| profile.clone())
}

/// The one display variant that calls the model, to summarize the profile
pub struct ProfileDisplay {
    inference: Arc<dyn InferenceClient>,
}

impl ProfileDisplay {
    pub fn new(inference: Arc<dyn InferenceClient>) -> Self {
        Self { inference }
    }

    pub async fn run(&self, state: &mut ConversationState) -> LastEvent {
        let Some(profile) = tool_result_for(state, ToolKind::FetchCompanyProfile).and_then(parse_profile)
        else {
            let message = Message::assistant(format!(
                "Sorry, I could not find a profile for {}.",
                ticker_label(state)
            ));
            return present(state, message);
        };

        let prompt = [
            Message::system(PROFILE_PROMPT),
            Message::user(profile.to_string()),
        ];
        let summary = match self.inference.complete(&prompt, &[]).await {
            Ok(reply) if !reply.content.trim().is_empty() => reply.content,
            Ok(_) => format!("Here is the profile of {}.", ticker_label(state)),
            Err(e) => {
                warn!("Profile display: summary unavailable: {}", e);
                format!("Here is the profile of {}.", ticker_label(state))
            }
        };

        present(
            state,
            Message::assistant(summary).with_payload(MessagePayload::Profile { profile }),
        )
    }
}
