use financial_dialogue_orchestrator::{
    agent::Orchestrator,
    llm::ScriptedInference,
    models::{Message, ToolRequest},
    session::SessionService,
    state::InMemoryCheckpointStore,
    tools::{create_default_registry, SampleFinanceBackend},
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Model replies for the demo conversation, in the order they are consumed
fn demo_script() -> Vec<Message> {
    let call = |name: &str, args: serde_json::Value| {
        Message::tool_calls("", vec![ToolRequest::new(name, args)])
    };

    vec![
        // Turn 1: full risk analysis
        call("lookup_ticker", json!({"company_name": "Apple"})),
        call("fetch_fundamentals", json!({"ticker": "AAPL"})),
        call("preprocess", json!({})),
        call("analyze_risk", json!({})),
        // Turn 2
        call("display_processed_table", json!({})),
        // Turn 3
        call("fetch_news", json!({})),
        // Turn 4
        call(
            "compare_tickers",
            json!({"tickers": ["AAPL", "MSFT"], "metric": "roe"}),
        ),
        // Turn 5: an invalid chart column
        call("build_custom_chart", json!({"y_column": "dividendYield"})),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Financial Dialogue Orchestrator demo starting");

    let inference = Arc::new(
        ScriptedInference::new(demo_script()).with_fallback("You're welcome, happy investing!"),
    );
    let registry = Arc::new(create_default_registry(Arc::new(SampleFinanceBackend::new())));
    let orchestrator = Arc::new(Orchestrator::new(inference, registry, 8));
    let sessions = SessionService::new(orchestrator, Box::new(InMemoryCheckpointStore::new()));

    let session_id = Uuid::new_v4();
    let turns = [
        "Is Apple a risky investment?",
        "Show me the processed data",
        "Any recent news?",
        "How does its ROE compare with Microsoft?",
        "Plot its dividend yield",
        "Thanks!",
    ];

    for (i, input) in turns.iter().enumerate() {
        let outcome = sessions.handle_turn(session_id, input).await?;

        println!("\n=== TURN {} ===", i + 1);
        println!("User: {}", input);
        match &outcome.reply {
            Some(reply) => {
                println!("Assistant: {}", reply.content);
                println!("Payload: {}", reply.payload.kind());
            }
            None => println!("Assistant: (no reply)"),
        }
        if let Some(error) = &outcome.error {
            println!("Error: {}", error);
        }
        let path: Vec<String> = outcome.path.iter().map(|node| node.to_string()).collect();
        println!("Path: {}", path.join(" -> "));
    }

    let traces = sessions.traces(session_id).await?;
    info!(
        turns = traces.len(),
        intact = sessions.verify_session(session_id).await?,
        "Demo finished"
    );

    Ok(())
}
