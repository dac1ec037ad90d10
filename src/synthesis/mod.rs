//! Final-synthesis node
//!
//! Closes a full risk analysis with a templated verdict and the
//! growth-vs-valuation chart. The model is not called here.

use crate::agent::LastEvent;
use crate::chart::ChartSpec;
use crate::dataset::{cell_text, YEAR_COLUMN};
use crate::models::{Message, MessagePayload, RiskVerdict};
use crate::state::ConversationState;
use tracing::{info, warn};

pub const CHART_EXPLANATION: &str = "---
**How to read this chart**

The chart crosses two key questions: \"Is the company growing?\" and \"What price is the market paying for that growth?\".

* **Revenue growth** (left axis) shows the trend of revenue per share growth. A rising line means growth is accelerating.
* **Earnings yield** (right axis) is the inverse of the P/E ratio. **The higher this line, the \"cheaper\" the stock** relative to its profits. A low line means an \"expensive\" stock.

**Key reading:** ideally, growth accelerates while the valuation stays reasonable. Slowing growth while the stock gets more expensive is often a signal for caution.";

/// Forecast horizon phrasing: latest year in the data and the one after it
fn horizon(state: &ConversationState) -> (String, String) {
    let latest = state
        .decode_processed()
        .and_then(|decoded| decoded.ok())
        .and_then(|dataset| dataset.last_value(YEAR_COLUMN).map(cell_text))
        .filter(|year| !year.trim().is_empty());

    match latest {
        Some(year) => {
            let next = year
                .trim()
                .parse::<i64>()
                .map(|y| (y + 1).to_string())
                .unwrap_or_else(|_| "next".to_string());
            (year, next)
        }
        None => ("recent".to_string(), "next".to_string()),
    }
}

/// Verdict text for the active ticker
pub fn verdict_text(state: &ConversationState) -> String {
    let ticker = state
        .ticker
        .as_deref()
        .map(str::to_uppercase)
        .unwrap_or_else(|| "THIS STOCK".to_string());
    let (latest, next) = horizon(state);

    match RiskVerdict::parse(&state.analysis) {
        RiskVerdict::ElevatedRisk => format!(
            "⚠️ **Warning!** For `{ticker}`, based on `{latest}` data (the latest available), my analysis \
             detected signals of an **elevated risk of underperformance over the coming year (`{next}`)**.\n\n\
             The model is particularly confident in this assessment. I advise great caution."
        ),
        RiskVerdict::NoExtremeRisk => format!(
            "For `{ticker}`, based on `{latest}` data (the latest available), my analysis found \
             **no signals of extreme danger for the coming year (`{next}`)**.\n\n\
             **Important:** this does not make it a good investment. The model specializes in detecting \
             strongly negative signals and found none here. Its role is to help you avoid an obvious \
             mistake, not to guarantee a success."
        ),
        RiskVerdict::Unrecognized => format!(
            "The analysis of the data for **{ticker}** was completed, but its verdict could not be interpreted."
        ),
    }
}

/// Build the closing message; never fails, degrades to text only
pub fn synthesize(state: &ConversationState) -> Message {
    let mut text = verdict_text(state);
    let ticker = state.ticker.as_deref().unwrap_or_default();

    let chart = match state.decode_processed() {
        None => {
            text.push_str(
                "\n\n(The growth/valuation summary chart could not be built: no processed data.)",
            );
            None
        }
        Some(Err(e)) => {
            warn!("Synthesis: unreadable processed dataset: {}", e);
            text.push_str("\n\n(I could not build the accompanying chart because of an error.)");
            None
        }
        Some(Ok(dataset)) => match ChartSpec::growth_vs_valuation(ticker, &dataset) {
            Ok(chart) => {
                text.push_str("\n\n**Here is its growth compared with its valuation:**");
                Some(chart)
            }
            Err(missing) => {
                let detail = if missing.is_empty() {
                    "the data is empty".to_string()
                } else {
                    format!("missing columns {}", missing.join(", "))
                };
                text.push_str(&format!(
                    "\n\n(The growth/valuation summary chart could not be built: {}.)",
                    detail
                ));
                None
            }
        },
    };

    let message = Message::assistant(text);
    match chart {
        Some(chart) => message.with_payload(MessagePayload::Chart {
            chart,
            explanation: Some(CHART_EXPLANATION.to_string()),
        }),
        None => message,
    }
}

pub fn final_synthesis(state: &mut ConversationState) -> LastEvent {
    let message = synthesize(state);
    info!(
        ticker = ?state.ticker,
        verdict = %state.analysis,
        with_chart = !message.payload.is_none(),
        "Final synthesis produced"
    );
    state.push_message(message);
    LastEvent::Presented
}
