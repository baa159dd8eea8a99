use financial_qa_orchestrator::{
    api::start_server, audit::AuditLog, classifier::IntentClassifier, config::OrchestratorConfig,
    responders::create_default_registry, workflow::Orchestrator,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = OrchestratorConfig::from_env()?;

    if config.gemini_api_key.is_none() {
        warn!("GEMINI_API_KEY not set; classification uses keyword scoring and education responders will fail");
    }
    if config.financial_api_base_url.is_none() {
        warn!("FINANCIAL_API_BASE_URL not set; portfolio, market and goal responders will fail");
    }

    info!("🚀 Financial Q&A Orchestrator - API Server");
    info!("📍 Port: {}", config.api_port);

    let registry = Arc::new(create_default_registry(&config)?);
    let orchestrator = Arc::new(Orchestrator::new(
        IntentClassifier::from_config(&config),
        registry,
        &config,
        AuditLog::with_capacity(config.audit_capacity),
    ));

    info!("✅ Orchestrator initialized");

    start_server(orchestrator, config.api_port).await?;

    Ok(())
}
