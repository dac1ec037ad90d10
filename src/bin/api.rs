use financial_dialogue_orchestrator::{
    agent::Orchestrator,
    api::start_server,
    config::OrchestratorConfig,
    llm::{GroqClient, InferenceClient, UnavailableInference},
    session::SessionService,
    state::build_checkpoint_store,
    tools::{create_default_registry, FinanceBackend, HttpFinanceBackend, SampleFinanceBackend},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables, RUST_LOG included
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = OrchestratorConfig::from_env()?;

    info!("🚀 Financial Dialogue Orchestrator - API Server");
    info!("📍 Port: {}", config.port);

    let inference: Arc<dyn InferenceClient> = match GroqClient::from_config(&config) {
        Ok(client) => {
            info!(model = %config.groq_model, "Using Groq inference");
            Arc::new(client)
        }
        Err(e) => {
            warn!("⚠️  Inference unavailable ({}); every turn will apologize", e);
            warn!("📌 Set GROQ_API_KEY in .env");
            Arc::new(UnavailableInference)
        }
    };

    let backend: Arc<dyn FinanceBackend> = match HttpFinanceBackend::from_config(&config) {
        Some(backend) => Arc::new(backend?),
        None => {
            warn!("FINANCIAL_API_BASE_URL not set, serving sample market data");
            Arc::new(SampleFinanceBackend::new())
        }
    };

    let registry = Arc::new(create_default_registry(backend));
    let orchestrator = Arc::new(Orchestrator::from_config(&config, inference, registry));
    let sessions = Arc::new(SessionService::new(
        orchestrator,
        build_checkpoint_store(&config),
    ));

    info!("✅ Orchestrator initialized");
    info!("📡 Starting API server...");

    // Start API server
    start_server(sessions, config.port).await?;

    Ok(())
}
